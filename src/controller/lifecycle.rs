//! Node lifecycle of a LINSTOR satellite
//!
//! Drives one satellite through registration, configuration and removal:
//!
//! ```text
//! Registering -> Online -> (configure on every pass) -> Evacuating -> Removed
//! ```
//!
//! Every pass starts from what the storage controller reports, so any step
//! can be retried from scratch. Waiting is done by requeueing, never by
//! blocking the reconcile task. A node still holding resources is never
//! removed.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::crd::{Condition, ConditionStatus, ConditionType, LinstorSatelliteSpec, PoolBackend};
use crate::error::{Error, Result};
use crate::linstor::{
    Node, PhysicalStorageCreate, PhysicalStorageStoragePool, PropsModify, StorageController,
    StoragePool, PROP_LAST_APPLIED,
};
use crate::properties::resolve_properties;

/// Poll interval while the satellite is not yet connected
pub const NOT_ONLINE_REQUEUE: Duration = Duration::from_secs(10);

/// Phase of a satellite's node lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Waiting for the node registration to come online
    Registering,
    /// Registered and connected; configuration is kept in sync
    Online,
    /// Deletion requested, waiting for the node's resources to move away
    Evacuating,
    /// Registration deleted
    Removed,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Registering => write!(f, "Registering"),
            LifecyclePhase::Online => write!(f, "Online"),
            LifecyclePhase::Evacuating => write!(f, "Evacuating"),
            LifecyclePhase::Removed => write!(f, "Removed"),
        }
    }
}

/// What to do with the satellite's own finalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerAction {
    Ensure,
    Keep,
    Remove,
}

/// Everything the lifecycle needs to know about one satellite
#[derive(Debug, Clone)]
pub struct SatelliteObservation<'a> {
    pub name: &'a str,
    pub generation: Option<i64>,
    pub spec: &'a LinstorSatelliteSpec,
    pub deleting: bool,
    /// The Kubernetes node as JSON, for property resolution
    pub node: Option<&'a Value>,
    /// IP of the running satellite pod
    pub pod_ip: Option<&'a str>,
}

/// Result of one lifecycle pass
#[derive(Debug)]
pub struct LifecycleOutcome {
    pub phase: LifecyclePhase,
    pub conditions: Vec<Condition>,
    pub finalizer: FinalizerAction,
    /// `None` waits for the next change
    pub requeue_after: Option<Duration>,
    /// Backend failure to retry with backoff
    pub failure: Option<Error>,
    /// Resources preventing removal
    pub blocked_by: Vec<String>,
}

impl LifecycleOutcome {
    fn new(phase: LifecyclePhase, finalizer: FinalizerAction) -> Self {
        Self {
            phase,
            conditions: Vec::new(),
            finalizer,
            requeue_after: None,
            failure: None,
            blocked_by: Vec::new(),
        }
    }

    fn condition(
        mut self,
        generation: Option<i64>,
        type_: ConditionType,
        status: impl Into<ConditionStatus>,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        self.conditions
            .push(Condition::new(type_, status, generation, reason, message));
        self
    }

    fn requeue(mut self, after: Duration) -> Self {
        self.requeue_after = Some(after);
        self
    }

    fn fail(mut self, error: Error) -> Self {
        self.failure = Some(error);
        self
    }

    /// The condition of `type_`, if reported
    pub fn find(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == type_.as_str())
    }
}

/// Node lifecycle controller for one storage controller
pub struct NodeLifecycle {
    client: Arc<dyn StorageController>,
    requeue: Duration,
    evacuation_poll: Duration,
}

impl NodeLifecycle {
    pub fn new(client: Arc<dyn StorageController>, requeue: Duration, evacuation_poll: Duration) -> Self {
        Self {
            client,
            requeue,
            evacuation_poll,
        }
    }

    pub async fn reconcile(&self, obs: &SatelliteObservation<'_>) -> LifecycleOutcome {
        if obs.deleting {
            self.remove(obs).await
        } else {
            self.register_and_configure(obs).await
        }
    }

    // =========================================================================
    // Registration and configuration
    // =========================================================================

    async fn register_and_configure(&self, obs: &SatelliteObservation<'_>) -> LifecycleOutcome {
        let gen = obs.generation;
        let registering = LifecycleOutcome::new(LifecyclePhase::Registering, FinalizerAction::Ensure);

        let node = match self.ensure_registered(obs).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                return registering
                    .condition(
                        gen,
                        ConditionType::Available,
                        false,
                        "WaitingForPod",
                        "Satellite pod has no IP yet",
                    )
                    .requeue(NOT_ONLINE_REQUEUE)
            }
            Err(e) => {
                return registering
                    .condition(gen, ConditionType::Available, ConditionStatus::Unknown, "Error", e.to_string())
                    .fail(e)
            }
        };

        if !node.is_online() {
            debug!(node = %node.name, status = %node.connection_status, "Satellite not online yet");
            return registering
                .condition(
                    gen,
                    ConditionType::Available,
                    false,
                    "NotOnline",
                    format!("Node connection status: {}", node.connection_status),
                )
                .requeue(NOT_ONLINE_REQUEUE);
        }

        let online = LifecycleOutcome::new(LifecyclePhase::Online, FinalizerAction::Ensure).condition(
            gen,
            ConditionType::Available,
            true,
            "Online",
            "Satellite is connected",
        );

        match self.configure(obs, &node).await {
            Ok(()) => online
                .condition(
                    gen,
                    ConditionType::Configured,
                    true,
                    "Configured",
                    "Properties and storage pools applied",
                )
                .requeue(self.requeue),
            // Persisted specs may predate validation: report, but wait for an edit
            Err(e) if !e.is_retryable() || is_spec_defect(&e) => {
                warn!(node = obs.name, error = %e, "Satellite configuration is invalid");
                online
                    .condition(gen, ConditionType::Configured, false, "InvalidConfiguration", e.to_string())
                    .requeue(self.requeue)
            }
            Err(e) => online
                .condition(gen, ConditionType::Configured, false, "Error", e.to_string())
                .fail(e),
        }
    }

    /// The node registration, created from the pod IP if missing
    async fn ensure_registered(&self, obs: &SatelliteObservation<'_>) -> Result<Option<Node>> {
        if let Some(node) = self.client.get_node(obs.name).await? {
            return Ok(Some(node));
        }
        let Some(ip) = obs.pod_ip else {
            return Ok(None);
        };

        info!(node = obs.name, ip, "Registering LINSTOR satellite");
        let node = Node::satellite(
            obs.name,
            ip,
            obs.spec.satellite_port(),
            obs.spec.encryption_type(),
        );
        self.client.register_node(&node).await?;
        self.client.get_node(obs.name).await
    }

    async fn configure(&self, obs: &SatelliteObservation<'_>, node: &Node) -> Result<()> {
        let k8s_node = obs.node.unwrap_or(&Value::Null);

        let mut desired = BTreeMap::new();
        for property in resolve_properties(&obs.spec.properties, k8s_node)? {
            desired.insert(property.name, property.value);
        }
        let modify = node_props_modify(node, &desired)?;
        if !modify.is_empty() {
            debug!(
                node = obs.name,
                set = modify.override_props.len(),
                delete = modify.delete_props.len(),
                "Updating node properties"
            );
            self.client.modify_node(obs.name, &modify).await?;
        }

        let existing: BTreeMap<String, StoragePool> = self
            .client
            .list_storage_pools(obs.name)
            .await?
            .into_iter()
            .map(|p| (p.storage_pool_name.clone(), p))
            .collect();

        for pool in &obs.spec.storage_pools {
            let backend = pool.backend()?;
            let mut props = BTreeMap::new();
            for property in resolve_properties(&pool.properties, k8s_node)? {
                props.insert(property.name, property.value);
            }

            match existing.get(&pool.name) {
                Some(current) => {
                    let modify = PropsModify {
                        override_props: changed_props(&current.props, &props),
                        delete_props: Vec::new(),
                    };
                    if !modify.is_empty() {
                        debug!(node = obs.name, pool = %pool.name, "Updating storage pool properties");
                        self.client
                            .modify_storage_pool(obs.name, &pool.name, &modify)
                            .await?;
                    }
                }
                None if !pool.host_devices().is_empty() => {
                    let desired = StoragePool::from_spec(pool, props);
                    let pool_name = match (backend, pool.lvm_thin_names()) {
                        (PoolBackend::LvmThin(_), Some((_, lv))) => lv,
                        _ => pool.pool_name(),
                    };
                    info!(node = obs.name, pool = %pool.name, devices = ?pool.host_devices(), "Creating storage pool from devices");
                    self.client
                        .create_device_pool(
                            obs.name,
                            &PhysicalStorageCreate {
                                provider_kind: desired.provider_kind,
                                device_paths: pool.host_devices().to_vec(),
                                pool_name,
                                with_storage_pool: Some(PhysicalStorageStoragePool {
                                    name: pool.name.clone(),
                                    props: desired.props,
                                }),
                            },
                        )
                        .await?;
                }
                None => {
                    info!(node = obs.name, pool = %pool.name, kind = %backend.kind(), "Creating storage pool");
                    self.client
                        .create_storage_pool(obs.name, &StoragePool::from_spec(pool, props))
                        .await?;
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Evacuation and removal
    // =========================================================================

    async fn remove(&self, obs: &SatelliteObservation<'_>) -> LifecycleOutcome {
        let gen = obs.generation;
        let evacuating = LifecycleOutcome::new(LifecyclePhase::Evacuating, FinalizerAction::Keep);
        let removed = LifecycleOutcome::new(LifecyclePhase::Removed, FinalizerAction::Remove).condition(
            gen,
            ConditionType::EvacuationCompleted,
            true,
            "NodeRemoved",
            "Node evacuated and removed from LINSTOR",
        );
        let failed = |e: Error| {
            LifecycleOutcome::new(LifecyclePhase::Evacuating, FinalizerAction::Keep)
                .condition(gen, ConditionType::EvacuationCompleted, false, "Error", e.to_string())
                .fail(e)
        };

        let node = match self.client.get_node_fresh(obs.name).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                info!(node = obs.name, "LINSTOR node already removed");
                return removed;
            }
            Err(e) => return failed(e),
        };

        if !node.is_evacuating() {
            info!(node = obs.name, "Evacuating LINSTOR node");
            match self.client.evacuate_node(obs.name).await {
                Ok(()) => {}
                Err(e) if e.is_linstor_not_found() => return removed,
                Err(e) => return failed(e),
            }
        }

        let resources = match self.client.list_resources(&[obs.name.to_string()]).await {
            Ok(resources) => resources,
            Err(e) => return failed(e),
        };
        if !resources.is_empty() {
            let names: BTreeSet<String> = resources.into_iter().map(|r| r.name).collect();
            let names: Vec<String> = names.into_iter().collect();
            debug!(node = obs.name, resources = ?names, "Evacuation in progress");
            let mut outcome = evacuating
                .condition(
                    gen,
                    ConditionType::EvacuationCompleted,
                    false,
                    "Evacuating",
                    format!("Node still has resources: {}", names.join(", ")),
                )
                .requeue(self.evacuation_poll);
            outcome.blocked_by = names;
            return outcome;
        }

        match self.client.delete_node(obs.name).await {
            Ok(()) => {
                info!(node = obs.name, "LINSTOR node removed");
                removed
            }
            Err(e) => failed(e),
        }
    }
}

/// Spec defects that fail configuration until the resource is edited
fn is_spec_defect(error: &Error) -> bool {
    matches!(
        error,
        Error::PropertyResolution { .. } | Error::FieldPath { .. } | Error::PoolBackend { .. }
    )
}

/// Entries of `desired` missing from or different in `current`
fn changed_props(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    desired
        .iter()
        .filter(|(k, v)| current.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Changes bringing a node's properties to `desired`.
///
/// Keys applied on an earlier pass but no longer desired are deleted. The
/// applied key set is recorded in [`PROP_LAST_APPLIED`].
pub fn node_props_modify(node: &Node, desired: &BTreeMap<String, String>) -> Result<PropsModify> {
    let mut target = desired.clone();
    let keys: Vec<&String> = desired.keys().collect();
    target.insert(PROP_LAST_APPLIED.to_string(), serde_json::to_string(&keys)?);

    let delete_props = node
        .last_applied_keys()
        .into_iter()
        .filter(|k| !desired.contains_key(k) && node.props.contains_key(k))
        .collect();

    Ok(PropsModify {
        override_props: changed_props(&node.props, &target),
        delete_props,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ClusterReference, LinstorNodeProperty, LinstorStoragePool, LvmThinPool, NodeFieldSource,
        StoragePoolSource,
    };
    use crate::linstor::{CachingStorageController, FakeStorageController};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn lifecycle(fake: &Arc<FakeStorageController>) -> NodeLifecycle {
        NodeLifecycle::new(
            fake.clone(),
            Duration::from_secs(300),
            Duration::from_secs(30),
        )
    }

    fn observe<'a>(
        spec: &'a LinstorSatelliteSpec,
        node: Option<&'a Value>,
        deleting: bool,
    ) -> SatelliteObservation<'a> {
        SatelliteObservation {
            name: "node-a",
            generation: Some(3),
            spec,
            deleting,
            node,
            pod_ip: Some("10.0.0.147"),
        }
    }

    fn spec() -> LinstorSatelliteSpec {
        LinstorSatelliteSpec {
            cluster_ref: ClusterReference {
                name: "linstorcluster".into(),
                external_controller: None,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_registers_and_configures() {
        let fake = Arc::new(FakeStorageController::new());
        let node = json!({"metadata": {"name": "node-a", "labels": {"zone": "a"}}});
        let mut spec = spec();
        spec.properties = vec![
            LinstorNodeProperty::literal("Aux/static", "yes"),
            LinstorNodeProperty {
                name: "Aux/zone".into(),
                value_from: Some(NodeFieldSource {
                    node_field_ref: "metadata.labels['zone']".into(),
                }),
                ..Default::default()
            },
        ];
        spec.storage_pools = vec![LinstorStoragePool {
            name: "thinpool".into(),
            lvm_thin_pool: Some(LvmThinPool::default()),
            ..Default::default()
        }];

        let outcome = lifecycle(&fake).reconcile(&observe(&spec, Some(&node), false)).await;
        assert_eq!(outcome.phase, LifecyclePhase::Online);
        assert_eq!(outcome.finalizer, FinalizerAction::Ensure);
        assert!(outcome.failure.is_none());
        assert!(outcome.find(ConditionType::Available).unwrap().is_true_for(Some(3)));
        assert!(outcome.find(ConditionType::Configured).unwrap().is_true_for(Some(3)));
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(300)));

        let registered = fake.node("node-a").await.unwrap();
        assert_eq!(registered.net_interfaces[0].address, "10.0.0.147");
        assert_eq!(registered.props["Aux/static"], "yes");
        assert_eq!(registered.props["Aux/zone"], "a");

        let pools = fake.pools("node-a").await;
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].provider_kind, "LVM_THIN");
    }

    #[tokio::test]
    async fn test_removed_properties_are_deleted() {
        let fake = Arc::new(FakeStorageController::new());
        let lc = lifecycle(&fake);
        let mut spec = spec();
        spec.properties = vec![
            LinstorNodeProperty::literal("Aux/a", "1"),
            LinstorNodeProperty::literal("Aux/b", "2"),
        ];
        lc.reconcile(&observe(&spec, None, false)).await;

        spec.properties.truncate(1);
        let outcome = lc.reconcile(&observe(&spec, None, false)).await;
        assert!(outcome.failure.is_none());

        let props = fake.node("node-a").await.unwrap().props;
        assert_eq!(props["Aux/a"], "1");
        assert!(!props.contains_key("Aux/b"));
        assert_eq!(props[PROP_LAST_APPLIED], r#"["Aux/a"]"#);
    }

    #[test]
    fn test_node_props_modify_keeps_foreign_keys() {
        let mut node = Node::satellite("node-a", "10.0.0.1", 3366, "PLAIN");
        node.props.insert("Aux/manual".into(), "x".into());
        node.props.insert("Aux/old".into(), "y".into());
        node.props.insert(PROP_LAST_APPLIED.into(), r#"["Aux/old"]"#.into());

        let desired: BTreeMap<String, String> = [("Aux/new".to_string(), "z".to_string())].into();
        let modify = node_props_modify(&node, &desired).unwrap();
        assert_eq!(modify.delete_props, vec!["Aux/old".to_string()]);
        assert_eq!(modify.override_props["Aux/new"], "z");
        assert_eq!(modify.override_props[PROP_LAST_APPLIED], r#"["Aux/new"]"#);
        assert!(!modify.override_props.contains_key("Aux/manual"));

        node.props.remove("Aux/old");
        node.props.insert("Aux/new".into(), "z".into());
        node.props.insert(PROP_LAST_APPLIED.into(), r#"["Aux/new"]"#.into());
        assert!(node_props_modify(&node, &desired).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_pool() {
        let fake = Arc::new(FakeStorageController::new());
        let mut spec = spec();
        spec.storage_pools = vec![LinstorStoragePool {
            name: "thin".into(),
            lvm_thin_pool: Some(LvmThinPool::default()),
            source: Some(StoragePoolSource {
                host_devices: Some(vec!["/dev/vdb".into()]),
            }),
            ..Default::default()
        }];

        let outcome = lifecycle(&fake).reconcile(&observe(&spec, None, false)).await;
        assert!(outcome.failure.is_none());

        let requests = fake.device_requests("node-a").await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].pool_name, "thin");
        assert_eq!(requests[0].device_paths, vec!["/dev/vdb".to_string()]);
        assert_eq!(fake.pools("node-a").await[0].storage_pool_name, "thin");
    }

    #[tokio::test]
    async fn test_not_online_and_no_pod() {
        let fake = Arc::new(FakeStorageController::new());
        let spec = spec();
        let mut obs = observe(&spec, None, false);
        obs.pod_ip = None;

        let outcome = lifecycle(&fake).reconcile(&obs).await;
        assert_eq!(outcome.phase, LifecyclePhase::Registering);
        assert_eq!(outcome.requeue_after, Some(NOT_ONLINE_REQUEUE));
        assert_eq!(
            outcome.find(ConditionType::Available).unwrap().reason,
            "WaitingForPod"
        );

        obs.pod_ip = Some("10.0.0.1");
        lifecycle(&fake).reconcile(&obs).await;
        fake.set_connection_status("node-a", "OFFLINE").await;
        let outcome = lifecycle(&fake).reconcile(&obs).await;
        assert_eq!(outcome.phase, LifecyclePhase::Registering);
        assert!(outcome.find(ConditionType::Configured).is_none());
    }

    #[tokio::test]
    async fn test_invalid_property_is_reported_not_retried() {
        let fake = Arc::new(FakeStorageController::new());
        let mut spec = spec();
        spec.properties = vec![LinstorNodeProperty {
            name: "Aux/broken".into(),
            ..Default::default()
        }];

        let outcome = lifecycle(&fake).reconcile(&observe(&spec, None, false)).await;
        assert!(outcome.failure.is_none());
        let configured = outcome.find(ConditionType::Configured).unwrap();
        assert_eq!(configured.status, ConditionStatus::False);
        assert_eq!(configured.reason, "InvalidConfiguration");
    }

    #[tokio::test]
    async fn test_backend_failure_is_retried() {
        let fake = Arc::new(FakeStorageController::new());
        fake.set_unavailable(true);
        let spec = spec();

        let outcome = lifecycle(&fake).reconcile(&observe(&spec, None, false)).await;
        assert_matches!(outcome.failure, Some(Error::LinstorApi { status: 503, .. }));
        assert_eq!(
            outcome.find(ConditionType::Available).unwrap().status,
            ConditionStatus::Unknown
        );

        let outcome = lifecycle(&fake).reconcile(&observe(&spec, None, true)).await;
        assert!(outcome.failure.is_some());
        assert_eq!(outcome.finalizer, FinalizerAction::Keep);
    }

    #[tokio::test]
    async fn test_evacuation_waits_for_resources() {
        let fake = Arc::new(FakeStorageController::new());
        let lc = lifecycle(&fake);
        let spec = spec();
        lc.reconcile(&observe(&spec, None, false)).await;
        fake.create_resource_definition("resource1").await.unwrap();
        fake.create_resource("resource1", "node-a").await.unwrap();

        let outcome = lc.reconcile(&observe(&spec, None, true)).await;
        assert_eq!(outcome.phase, LifecyclePhase::Evacuating);
        assert_eq!(outcome.finalizer, FinalizerAction::Keep);
        assert_eq!(outcome.blocked_by, vec!["resource1".to_string()]);
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(30)));
        let cond = outcome.find(ConditionType::EvacuationCompleted).unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert!(cond.message.contains("resource1"));
        assert!(fake.node("node-a").await.unwrap().is_evacuating());

        fake.delete_resource_definition("resource1").await.unwrap();
        let outcome = lc.reconcile(&observe(&spec, None, true)).await;
        assert_eq!(outcome.phase, LifecyclePhase::Removed);
        assert_eq!(outcome.finalizer, FinalizerAction::Remove);
        assert!(outcome
            .find(ConditionType::EvacuationCompleted)
            .unwrap()
            .is_true_for(Some(3)));
        assert!(fake.node("node-a").await.is_none());

        // Already gone
        let outcome = lc.reconcile(&observe(&spec, None, true)).await;
        assert_eq!(outcome.finalizer, FinalizerAction::Remove);
        assert_eq!(fake.call_count("evacuate_node"), 1);
    }

    #[tokio::test]
    async fn test_cached_absence_does_not_release_node() {
        let cache = Arc::new(CachingStorageController::new(
            FakeStorageController::new(),
            Duration::from_secs(60),
        ));
        let lc = NodeLifecycle::new(cache.clone(), Duration::from_secs(300), Duration::from_secs(30));
        let spec = spec();

        // Pod not yet scheduled: the node is looked up but not registered
        let mut waiting = observe(&spec, None, false);
        waiting.pod_ip = None;
        let outcome = lc.reconcile(&waiting).await;
        assert_eq!(outcome.phase, LifecyclePhase::Registering);
        assert!(cache.get_node("node-a").await.unwrap().is_none());

        // Registered and given a resource without going through the cache
        let fake = cache.inner();
        fake.register_node(&Node::satellite("node-a", "10.0.0.147", 3366, "PLAIN"))
            .await
            .unwrap();
        fake.create_resource_definition("pvc-1").await.unwrap();
        fake.create_resource("pvc-1", "node-a").await.unwrap();

        let outcome = lc.reconcile(&observe(&spec, None, true)).await;
        assert_eq!(outcome.phase, LifecyclePhase::Evacuating);
        assert_eq!(outcome.finalizer, FinalizerAction::Keep);
        assert_eq!(outcome.blocked_by, vec!["pvc-1".to_string()]);
        assert!(fake.node("node-a").await.is_some());
    }

    #[tokio::test]
    async fn test_cached_node_removed_after_evacuation() {
        let cache = Arc::new(CachingStorageController::new(
            FakeStorageController::new(),
            Duration::from_secs(60),
        ));
        let lc = NodeLifecycle::new(cache.clone(), Duration::from_secs(300), Duration::from_secs(30));
        let spec = spec();
        lc.reconcile(&observe(&spec, None, false)).await;
        assert!(cache.get_node("node-a").await.unwrap().is_some());

        // Deleted elsewhere while still cached as present
        cache.inner().delete_node("node-a").await.unwrap();
        let outcome = lc.reconcile(&observe(&spec, None, true)).await;
        assert_eq!(outcome.phase, LifecyclePhase::Removed);
        assert_eq!(outcome.finalizer, FinalizerAction::Remove);
        assert_eq!(cache.inner().call_count("evacuate_node"), 0);
    }
}
