//! Reconcilers for the Piraeus CRDs
//!
//! - [`cluster`]: LinstorCluster, generates the controller and one
//!   LinstorSatellite per selected node
//! - [`satellite`]: LinstorSatellite, generates the satellite DaemonSet and
//!   drives the node [`lifecycle`] against LINSTOR

pub mod backoff;
pub mod cluster;
pub mod lifecycle;
pub mod metrics;
pub mod satellite;

pub use backoff::BackoffTracker;
pub use lifecycle::{
    FinalizerAction, LifecycleOutcome, LifecyclePhase, NodeLifecycle, SatelliteObservation,
};
pub use metrics::Metrics;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ApiResource, DynamicObject, Patch as ApiPatch, PatchParams};
use kube::core::GroupVersionKind;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{LinstorCluster, LinstorSatellite, LinstorSatelliteConfiguration};
use crate::error::{Error, ErrorAction, Result};
use crate::linstor::Connections;
use crate::manifests::{split_api_version, ManifestSet};

/// Field manager of every server-side apply
pub const FIELD_MANAGER: &str = "piraeus-operator";

/// Shared state of all reconcilers
pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
    pub connections: Connections,
    pub metrics: Metrics,
    pub backoff: BackoffTracker,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig, metrics: Metrics) -> Self {
        Self {
            client,
            connections: Connections::new(config.linstor.clone()),
            config,
            metrics,
            backoff: BackoffTracker::default(),
        }
    }

    /// Requeue action for a failed reconciliation of `key`
    pub fn requeue_on_error(&self, key: &str, error: &Error) -> Action {
        match error.action() {
            ErrorAction::RequeueWithBackoff => Action::requeue(self.backoff.next_delay(key)),
            ErrorAction::RequeueAfter(after) => Action::requeue(after),
            ErrorAction::NoRequeue => Action::await_change(),
        }
    }
}

/// Make `owner` the controlling owner of a generated object
pub(crate) fn set_owner(object: &mut Value, owner: &OwnerReference) -> Result<()> {
    let metadata = object
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| Error::Manifest("object has no metadata".into()))?;
    metadata.insert(
        "ownerReferences".into(),
        Value::Array(vec![serde_json::to_value(owner)?]),
    );
    Ok(())
}

/// Server-side apply every object of `manifests`, owned by `owner`
pub(crate) async fn apply_manifests(
    client: &Client,
    manifests: ManifestSet,
    owner: &OwnerReference,
) -> Result<usize> {
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let mut applied = 0;
    for manifest in manifests.into_manifests() {
        let (group, version) = split_api_version(manifest.api_version());
        let gvk = GroupVersionKind::gvk(group, version, manifest.kind());
        let resource = ApiResource::from_gvk(&gvk);
        let name = manifest.name().to_string();
        let namespace = manifest.namespace().map(str::to_string);

        let mut object = manifest.into_value();
        set_owner(&mut object, owner)?;

        let api: Api<DynamicObject> = match &namespace {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &resource),
            None => Api::all_with(client.clone(), &resource),
        };
        api.patch(&name, &params, &ApiPatch::Apply(&object)).await?;
        debug!(kind = %resource.kind, %name, "Applied resource");
        applied += 1;
    }
    Ok(applied)
}

/// Run the cluster and satellite reconcilers until `shutdown` fires or a
/// termination signal arrives
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) {
    let client = ctx.client.clone();
    let namespace = ctx.config.namespace.clone();

    let clusters: Api<LinstorCluster> = Api::all(client.clone());
    let cluster_controller = Controller::new(clusters, WatcherConfig::default());
    let cluster_store = cluster_controller.store();
    let node_store = cluster_store.clone();

    let cluster_controller = cluster_controller
        .owns(Api::<LinstorSatellite>::all(client.clone()), WatcherConfig::default())
        .owns(
            Api::<Deployment>::namespaced(client.clone(), &namespace),
            WatcherConfig::default(),
        )
        .watches(
            Api::<Node>::all(client.clone()),
            WatcherConfig::default(),
            move |_| {
                node_store
                    .state()
                    .iter()
                    .map(|c| ObjectRef::from_obj(c.as_ref()))
                    .collect::<Vec<_>>()
            },
        )
        .watches(
            Api::<LinstorSatelliteConfiguration>::all(client.clone()),
            WatcherConfig::default(),
            move |_| {
                cluster_store
                    .state()
                    .iter()
                    .map(|c| ObjectRef::from_obj(c.as_ref()))
                    .collect::<Vec<_>>()
            },
        )
        .shutdown_on_signal()
        .run(cluster::reconcile, cluster::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    debug!(cluster = %object.name, ?action, "LinstorCluster reconciled");
                }
                Err(e) => warn!(error = %e, "LinstorCluster reconciliation failed"),
            }
        });

    let satellite_controller =
        Controller::new(Api::<LinstorSatellite>::all(client.clone()), WatcherConfig::default())
            .owns(
                Api::<DaemonSet>::namespaced(client.clone(), &namespace),
                WatcherConfig::default(),
            )
            .shutdown_on_signal()
            .run(satellite::reconcile, satellite::error_policy, ctx.clone())
            .for_each(|result| async move {
                match result {
                    Ok((object, action)) => {
                        debug!(satellite = %object.name, ?action, "LinstorSatellite reconciled");
                    }
                    Err(e) => warn!(error = %e, "LinstorSatellite reconciliation failed"),
                }
            });

    info!(namespace = %namespace, "Starting reconcilers");
    tokio::select! {
        _ = cluster_controller => {
            info!("LinstorCluster reconciler stopped");
        }
        _ = satellite_controller => {
            info!("LinstorSatellite reconciler stopped");
        }
        _ = shutdown.cancelled() => {
            info!("Reconcilers cancelled");
        }
    }
}

/// Requeue interval after a successful pass
pub(crate) fn requeue(after: Option<Duration>) -> Action {
    after.map(Action::requeue).unwrap_or_else(Action::await_change)
}
