//! LinstorCluster reconciler
//!
//! Deploys the LINSTOR controller (unless an external one is configured),
//! pushes the controller properties and keeps one LinstorSatellite per
//! selected node. The satellite spec is the cluster's view merged with every
//! matching LinstorSatelliteConfiguration, in name order.

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, ListParams, Patch as ApiPatch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::{apply_manifests, Context, FIELD_MANAGER};
use crate::crd::{
    set_condition, ClusterReference, Condition, ConditionType, LinstorCluster,
    LinstorNodeProperty, LinstorSatellite, LinstorSatelliteConfiguration, LinstorSatelliteSpec,
    LinstorStoragePool,
};
use crate::error::{Error, Result};
use crate::linstor::PropsModify;
use crate::manifests::cluster::{controller_manifests, CONTROLLER_POD_NAME};
use crate::manifests::satellite::SATELLITE_POD_NAME;
use crate::manifests::{pod_template_patch, ImageResolver, ManifestSet};
use crate::validation::validate_cluster;

pub const KIND: &str = "LinstorCluster";

/// Requeue while the LINSTOR controller is unreachable
pub const CONTROLLER_UNAVAILABLE_REQUEUE: Duration = Duration::from_secs(10);

#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<LinstorCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let result = reconcile_cluster(&cluster, &ctx).await;
    ctx.metrics.reconciled(KIND, start.elapsed(), result.is_ok());
    if result.is_ok() {
        ctx.backoff.reset(&backoff_key(&cluster));
    }
    result
}

pub fn error_policy(cluster: Arc<LinstorCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(cluster = %cluster.name_any(), %error, "Cluster reconciliation failed");
    ctx.requeue_on_error(&backoff_key(&cluster), error)
}

fn backoff_key(cluster: &LinstorCluster) -> String {
    format!("{}/{}", KIND, cluster.name_any())
}

async fn reconcile_cluster(cluster: &LinstorCluster, ctx: &Context) -> Result<Action> {
    if cluster.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let name = cluster.name_any();
    let generation = cluster.metadata.generation;
    let api: Api<LinstorCluster> = Api::all(ctx.client.clone());
    let mut conditions = cluster
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let validation = validate_cluster(cluster);
    for warning in &validation.warnings {
        warn!(cluster = %name, %warning, "LinstorCluster validation warning");
    }
    if !validation.is_admissible() {
        set_condition(
            &mut conditions,
            Condition::new(
                ConditionType::Applied,
                false,
                generation,
                "InvalidSpec",
                validation.message(),
            ),
        );
        patch_status(&api, &name, &conditions).await?;
        return Ok(Action::await_change());
    }

    let owner = cluster
        .controller_owner_ref(&())
        .ok_or_else(|| Error::InvalidResource {
            kind: KIND.into(),
            name: name.clone(),
            reason: "missing uid".into(),
        })?;

    let mut applied = 0;
    if cluster.spec.deploys_controller() {
        let set = cluster_manifests(
            cluster,
            &ctx.config.namespace,
            &ctx.config.images,
            ctx.config.pull_secret.as_deref(),
        )?;
        applied += apply_manifests(&ctx.client, set, &owner).await?;
    }

    let nodes = Api::<Node>::all(ctx.client.clone())
        .list(&ListParams::default())
        .await?;
    let configs = Api::<LinstorSatelliteConfiguration>::all(ctx.client.clone())
        .list(&ListParams::default())
        .await?
        .items;

    let satellites: Api<LinstorSatellite> = Api::all(ctx.client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let mut selected = BTreeSet::new();
    for node in &nodes.items {
        let labels = node.labels();
        if !node_selected(&cluster.spec.node_selector, labels) {
            continue;
        }
        let node_name = node.name_any();
        let mut satellite =
            LinstorSatellite::new(&node_name, satellite_spec_for_node(cluster, &configs, labels)?);
        satellite.metadata.owner_references = Some(vec![owner.clone()]);
        satellites
            .patch(&node_name, &params, &ApiPatch::Apply(&satellite))
            .await?;
        debug!(cluster = %name, node = %node_name, "Applied LinstorSatellite");
        selected.insert(node_name);
        applied += 1;
    }

    let owned = satellites.list(&ListParams::default()).await?;
    for stale in stale_satellites(&owned.items, &owner.uid, &selected) {
        info!(cluster = %name, satellite = %stale, "Removing LinstorSatellite of deselected node");
        match satellites.delete(&stale, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }

    set_condition(
        &mut conditions,
        Condition::new(
            ConditionType::Applied,
            true,
            generation,
            "Applied",
            format!("Applied {} resources", applied),
        ),
    );

    let (available, action, failure) = match configure_controller(cluster, ctx).await {
        Ok(version) => (
            Condition::new(
                ConditionType::Available,
                true,
                generation,
                "Connected",
                format!("LINSTOR controller {} available", version),
            ),
            Action::requeue(ctx.config.requeue_interval),
            None,
        ),
        Err(e) if e.is_transient() => {
            debug!(cluster = %name, error = %e, "LINSTOR controller not yet available");
            (
                Condition::new(
                    ConditionType::Available,
                    false,
                    generation,
                    "Unavailable",
                    e.to_string(),
                ),
                Action::requeue(CONTROLLER_UNAVAILABLE_REQUEUE),
                None,
            )
        }
        Err(e) => (
            Condition::new(ConditionType::Available, false, generation, "Error", e.to_string()),
            Action::await_change(),
            Some(e),
        ),
    };
    set_condition(&mut conditions, available);
    patch_status(&api, &name, &conditions).await?;

    match failure {
        Some(e) => Err(e),
        None => Ok(action),
    }
}

/// Connect to the cluster's LINSTOR controller and push the controller
/// properties. Returns the controller version.
async fn configure_controller(cluster: &LinstorCluster, ctx: &Context) -> Result<String> {
    let controller = ctx
        .connections
        .for_url(&cluster.spec.controller_url(&ctx.config.namespace))?;
    let version = controller.controller_version().await?;

    let modify = controller_properties(cluster);
    if !modify.is_empty() {
        controller.set_controller_properties(&modify).await?;
    }
    Ok(version.version)
}

async fn patch_status(
    api: &Api<LinstorCluster>,
    name: &str,
    conditions: &[Condition],
) -> Result<()> {
    api.patch_status(
        name,
        &PatchParams::default(),
        &ApiPatch::Merge(json!({ "status": { "conditions": conditions } })),
    )
    .await?;
    Ok(())
}

/// Controller resources with the controller pod template and cluster
/// patches applied
pub fn cluster_manifests(
    cluster: &LinstorCluster,
    namespace: &str,
    images: &dyn ImageResolver,
    pull_secret: Option<&str>,
) -> Result<ManifestSet> {
    let mut set = controller_manifests(&cluster.name_any(), namespace, images, pull_secret)?;

    let mut patches = Vec::with_capacity(cluster.spec.patches.len() + 1);
    if let Some(template) = cluster
        .spec
        .controller
        .as_ref()
        .and_then(|c| c.pod_template.as_ref())
    {
        patches.push(pod_template_patch(CONTROLLER_POD_NAME, template)?);
    }
    patches.extend(cluster.spec.patches.iter().cloned());

    set.apply_patches(&patches)?;
    set.promote_pod_templates()?;
    Ok(set)
}

/// Controller properties as a LINSTOR property change
pub fn controller_properties(cluster: &LinstorCluster) -> PropsModify {
    PropsModify {
        override_props: cluster
            .spec
            .properties
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect(),
        delete_props: Vec::new(),
    }
}

/// Whether a node with `labels` runs a satellite. An empty selector
/// selects every node.
pub fn node_selected(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

trait Named {
    fn name(&self) -> &str;
}

impl Named for LinstorNodeProperty {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for LinstorStoragePool {
    fn name(&self) -> &str {
        &self.name
    }
}

fn merge_by_name<T: Named + Clone>(target: &mut Vec<T>, items: &[T]) {
    for item in items {
        match target.iter_mut().find(|t| t.name() == item.name()) {
            Some(existing) => *existing = item.clone(),
            None => target.push(item.clone()),
        }
    }
}

/// Desired satellite spec of a node with `labels`
pub fn satellite_spec_for_node(
    cluster: &LinstorCluster,
    configs: &[LinstorSatelliteConfiguration],
    labels: &BTreeMap<String, String>,
) -> Result<LinstorSatelliteSpec> {
    let mut spec = LinstorSatelliteSpec {
        cluster_ref: ClusterReference {
            name: cluster.name_any(),
            external_controller: cluster.spec.external_controller.clone(),
        },
        ..Default::default()
    };

    let mut matching: Vec<_> = configs
        .iter()
        .filter(|c| c.metadata.deletion_timestamp.is_none() && c.spec.matches(labels))
        .collect();
    matching.sort_by_key(|c| c.name_any());

    for config in matching {
        merge_by_name(&mut spec.properties, &config.spec.properties);
        merge_by_name(&mut spec.storage_pools, &config.spec.storage_pools);
        if let Some(template) = &config.spec.pod_template {
            spec.patches
                .push(pod_template_patch(SATELLITE_POD_NAME, template)?);
        }
        spec.patches.extend(config.spec.patches.iter().cloned());
        if config.spec.internal_tls.is_some() {
            spec.internal_tls = config.spec.internal_tls.clone();
        }
    }
    Ok(spec)
}

/// Satellites owned by the cluster `owner_uid` whose node is no longer
/// selected
pub fn stale_satellites(
    satellites: &[LinstorSatellite],
    owner_uid: &str,
    selected: &BTreeSet<String>,
) -> Vec<String> {
    satellites
        .iter()
        .filter(|s| s.owner_references().iter().any(|o| o.uid == owner_uid))
        .map(|s| s.name_any())
        .filter(|name| !selected.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ComponentSpec, ExternalController, InternalTls, LinstorClusterSpec,
        LinstorControllerProperty, LinstorSatelliteConfigurationSpec, LvmPool, Patch,
    };
    use crate::manifests::ImageConfig;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config(name: &str, spec: LinstorSatelliteConfigurationSpec) -> LinstorSatelliteConfiguration {
        LinstorSatelliteConfiguration::new(name, spec)
    }

    fn lvm_pool(name: &str, vg: &str) -> LinstorStoragePool {
        LinstorStoragePool {
            name: name.into(),
            lvm_pool: Some(LvmPool {
                volume_group: vg.into(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_selected() {
        let node = labels(&[("piraeus.io/storage", "true"), ("zone", "a")]);
        assert!(node_selected(&BTreeMap::new(), &node));
        assert!(node_selected(&labels(&[("zone", "a")]), &node));
        assert!(!node_selected(&labels(&[("zone", "b")]), &node));
        assert!(!node_selected(&labels(&[("missing", "x")]), &node));
    }

    #[test]
    fn test_satellite_spec_merges_configurations() {
        let cluster = LinstorCluster::new("linstorcluster", LinstorClusterSpec::default());
        let configs = vec![
            config(
                "b-zone",
                LinstorSatelliteConfigurationSpec {
                    node_selector: labels(&[("zone", "a")]),
                    properties: vec![LinstorNodeProperty::literal("Aux/zone", "a")],
                    storage_pools: vec![lvm_pool("pool1", "vg-b")],
                    patches: vec![Patch::new("second")],
                    internal_tls: Some(InternalTls::default()),
                    ..Default::default()
                },
            ),
            config(
                "a-all",
                LinstorSatelliteConfigurationSpec {
                    properties: vec![
                        LinstorNodeProperty::literal("Aux/zone", "default"),
                        LinstorNodeProperty::literal("Aux/all", "yes"),
                    ],
                    storage_pools: vec![lvm_pool("pool1", "vg-a")],
                    patches: vec![Patch::new("first")],
                    ..Default::default()
                },
            ),
            config(
                "c-other",
                LinstorSatelliteConfigurationSpec {
                    node_selector: labels(&[("zone", "b")]),
                    properties: vec![LinstorNodeProperty::literal("Aux/zone", "b")],
                    ..Default::default()
                },
            ),
        ];

        let spec = satellite_spec_for_node(&cluster, &configs, &labels(&[("zone", "a")])).unwrap();
        assert_eq!(spec.cluster_ref.name, "linstorcluster");
        assert_eq!(
            spec.properties,
            vec![
                LinstorNodeProperty::literal("Aux/zone", "a"),
                LinstorNodeProperty::literal("Aux/all", "yes"),
            ]
        );
        assert_eq!(spec.storage_pools, vec![lvm_pool("pool1", "vg-b")]);
        let patches: Vec<_> = spec.patches.iter().map(|p| p.patch.as_str()).collect();
        assert_eq!(patches, vec!["first", "second"]);
        assert!(spec.internal_tls.is_some());
        assert_eq!(spec.satellite_port(), 3367);

        let other = satellite_spec_for_node(&cluster, &configs, &labels(&[("zone", "b")])).unwrap();
        assert_eq!(other.properties[0], LinstorNodeProperty::literal("Aux/zone", "b"));
        assert!(other.internal_tls.is_none());
    }

    #[test]
    fn test_satellite_spec_pod_template() {
        let mut cluster = LinstorCluster::new("linstorcluster", LinstorClusterSpec::default());
        cluster.spec.external_controller = Some(ExternalController {
            url: "http://linstor.example.com:3370".into(),
        });
        let configs = vec![config(
            "host-network",
            LinstorSatelliteConfigurationSpec {
                pod_template: Some(json!({"spec": {"hostNetwork": true}})),
                patches: vec![Patch::new("after")],
                ..Default::default()
            },
        )];

        let spec = satellite_spec_for_node(&cluster, &configs, &BTreeMap::new()).unwrap();
        assert_eq!(
            spec.cluster_ref.external_controller,
            cluster.spec.external_controller
        );
        assert_eq!(spec.patches.len(), 2);
        assert!(spec.patches[0].patch.contains("hostNetwork"));
        assert_eq!(spec.patches[1].patch, "after");
    }

    #[test]
    fn test_deleting_configuration_ignored() {
        let cluster = LinstorCluster::new("linstorcluster", LinstorClusterSpec::default());
        let mut deleting = config(
            "deleting",
            LinstorSatelliteConfigurationSpec {
                properties: vec![LinstorNodeProperty::literal("Aux/gone", "x")],
                ..Default::default()
            },
        );
        deleting.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        let spec = satellite_spec_for_node(&cluster, &[deleting], &BTreeMap::new()).unwrap();
        assert!(spec.properties.is_empty());
    }

    #[test]
    fn test_cluster_manifests() {
        let mut cluster = LinstorCluster::new("linstorcluster", LinstorClusterSpec::default());
        cluster.spec.controller = Some(ComponentSpec {
            enabled: true,
            pod_template: Some(json!({"metadata": {"annotations": {"from": "template"}}})),
        });
        cluster.spec.patches = vec![Patch::new(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: controller
  annotations:
    from: patch
"#,
        )];

        let set = cluster_manifests(&cluster, "piraeus", &ImageConfig::default(), None).unwrap();
        assert!(set.get("Pod", CONTROLLER_POD_NAME).is_none());
        let deployment = set.get("Deployment", "linstor-controller").unwrap();
        assert_eq!(
            deployment.as_value()["spec"]["template"]["metadata"]["annotations"]["from"],
            "patch"
        );
        assert!(set.get("Service", "linstor-controller").is_some());
    }

    #[test]
    fn test_controller_properties() {
        let mut cluster = LinstorCluster::new("linstorcluster", LinstorClusterSpec::default());
        assert!(controller_properties(&cluster).is_empty());

        cluster.spec.properties = vec![LinstorControllerProperty {
            name: "DrbdOptions/Net/max-buffers".into(),
            value: "10000".into(),
        }];
        let modify = controller_properties(&cluster);
        assert_eq!(modify.override_props["DrbdOptions/Net/max-buffers"], "10000");
        assert!(modify.delete_props.is_empty());
    }

    #[test]
    fn test_stale_satellites() {
        let owned = |name: &str, uid: &str| {
            let mut s = LinstorSatellite::new(name, LinstorSatelliteSpec::default());
            s.metadata.owner_references = Some(vec![OwnerReference {
                api_version: "piraeus.io/v1".into(),
                kind: KIND.into(),
                name: "linstorcluster".into(),
                uid: uid.into(),
                ..Default::default()
            }]);
            s
        };
        let satellites = vec![
            owned("node-a", "uid-1"),
            owned("node-b", "uid-1"),
            owned("node-c", "uid-2"),
            LinstorSatellite::new("node-d", LinstorSatelliteSpec::default()),
        ];
        let selected: BTreeSet<String> = ["node-a".to_string()].into();

        assert_eq!(stale_satellites(&satellites, "uid-1", &selected), vec!["node-b"]);
    }

    #[test]
    fn test_controller_owner_reference() {
        let mut owner = LinstorCluster::new("linstorcluster", LinstorClusterSpec::default());
        assert!(owner.controller_owner_ref(&()).is_none());

        owner.metadata.uid = Some("uid-1".into());
        let reference = owner.controller_owner_ref(&()).unwrap();
        assert_eq!(reference.kind, "LinstorCluster");
        assert_eq!(reference.api_version, "piraeus.io/v1");
        assert_eq!(reference.uid, "uid-1");
        assert_eq!(reference.controller, Some(true));
    }
}
