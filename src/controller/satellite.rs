//! LinstorSatellite reconciler
//!
//! Each pass:
//! 1. ensures the satellite finalizer
//! 2. generates the satellite resources, applies the satellite's patches,
//!    promotes the seed pod and server-side applies the result
//! 3. observes the Kubernetes node and the satellite pod
//! 4. runs the node lifecycle against LINSTOR
//! 5. writes the conditions and drops the finalizer once the node is gone

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams, Patch as ApiPatch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use super::lifecycle::{FinalizerAction, NodeLifecycle, SatelliteObservation};
use super::{apply_manifests, requeue, Context};
use crate::crd::{
    default_controller_url, set_condition, Condition, ConditionType, LinstorSatellite,
    LinstorSatelliteSpec, SATELLITE_FINALIZER,
};
use crate::error::{Error, Result};
use crate::linstor::{ControllerVersion, StorageController};
use crate::manifests::satellite::{satellite_labels, satellite_manifests, SatelliteParams};
use crate::manifests::{ImageConfig, ManifestSet, COMPONENT_SATELLITE};

pub const KIND: &str = "LinstorSatellite";

#[instrument(skip(satellite, ctx), fields(satellite = %satellite.name_any()))]
pub async fn reconcile(satellite: Arc<LinstorSatellite>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let result = reconcile_satellite(&satellite, &ctx).await;
    ctx.metrics.reconciled(KIND, start.elapsed(), result.is_ok());
    if result.is_ok() {
        ctx.backoff.reset(&backoff_key(&satellite));
    }
    result
}

pub fn error_policy(satellite: Arc<LinstorSatellite>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(satellite = %satellite.name_any(), %error, "Satellite reconciliation failed");
    ctx.requeue_on_error(&backoff_key(&satellite), error)
}

fn backoff_key(satellite: &LinstorSatellite) -> String {
    format!("{}/{}", KIND, satellite.name_any())
}

async fn reconcile_satellite(satellite: &LinstorSatellite, ctx: &Context) -> Result<Action> {
    let name = satellite.name_any();
    let generation = satellite.metadata.generation;
    let api: Api<LinstorSatellite> = Api::all(ctx.client.clone());
    let deleting = satellite.is_deleting();

    if deleting && !satellite.has_finalizer() {
        return Ok(Action::await_change());
    }
    if !deleting && !satellite.has_finalizer() {
        info!(satellite = %name, "Adding finalizer");
        patch_finalizers(&api, &name, with_finalizer(satellite.finalizers())).await?;
    }

    let controller = ctx.connections.for_url(&controller_url(
        &satellite.spec,
        &ctx.config.namespace,
    ))?;

    let mut conditions = satellite
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let mut apply_error = None;
    if !deleting {
        match apply_resources(satellite, ctx, controller.as_ref()).await {
            Ok(count) => set_condition(
                &mut conditions,
                Condition::new(
                    ConditionType::Applied,
                    true,
                    generation,
                    "Applied",
                    format!("Applied {} resources", count),
                ),
            ),
            Err(e) => {
                warn!(satellite = %name, error = %e, "Failed to apply satellite resources");
                set_condition(
                    &mut conditions,
                    Condition::new(ConditionType::Applied, false, generation, "ApplyFailed", e.to_string()),
                );
                apply_error = Some(e);
            }
        }
    }

    let node = if deleting {
        None
    } else {
        Api::<Node>::all(ctx.client.clone())
            .get_opt(&name)
            .await?
            .map(serde_json::to_value)
            .transpose()?
    };
    let pod_ip = if deleting {
        None
    } else {
        satellite_pod_ip(ctx, &name).await?
    };

    let lifecycle = NodeLifecycle::new(
        controller,
        ctx.config.requeue_interval,
        ctx.config.evacuation_poll,
    );
    let outcome = lifecycle
        .reconcile(&SatelliteObservation {
            name: &name,
            generation,
            spec: &satellite.spec,
            deleting,
            node: node.as_ref(),
            pod_ip: pod_ip.as_deref(),
        })
        .await;
    info!(satellite = %name, phase = %outcome.phase, "Node lifecycle");

    for condition in outcome.conditions {
        set_condition(&mut conditions, condition);
    }
    ctx.metrics
        .set_evacuation_blocked(&name, outcome.blocked_by.len());

    api.patch_status(
        &name,
        &PatchParams::default(),
        &ApiPatch::Merge(json!({ "status": { "conditions": conditions } })),
    )
    .await?;

    if outcome.finalizer == FinalizerAction::Remove && satellite.has_finalizer() {
        info!(satellite = %name, "Removing finalizer");
        patch_finalizers(&api, &name, without_finalizer(satellite.finalizers())).await?;
    }

    if let Some(e) = outcome.failure.or(apply_error) {
        return Err(e);
    }
    Ok(requeue(outcome.requeue_after))
}

/// LINSTOR API URL of the satellite's cluster
pub fn controller_url(spec: &LinstorSatelliteSpec, namespace: &str) -> String {
    match &spec.cluster_ref.external_controller {
        Some(external) => external.url.clone(),
        None => default_controller_url(namespace),
    }
}

/// Satellite resources with patches applied and pod template promoted
pub fn satellite_resources(
    params: &SatelliteParams<'_>,
    images: &ImageConfig,
) -> Result<ManifestSet> {
    let mut set = satellite_manifests(params, images)?;
    set.apply_patches(&params.spec.patches)?;
    set.promote_pod_templates()?;
    Ok(set)
}

/// Images for satellites of an external controller run at its version
pub fn images_for_controller(images: &ImageConfig, version: &ControllerVersion) -> Result<ImageConfig> {
    let mut images = images.clone();
    if !version.version.is_empty() {
        images.pin_tag(COMPONENT_SATELLITE, format!("v{}", version.version))?;
    }
    Ok(images)
}

async fn apply_resources(
    satellite: &LinstorSatellite,
    ctx: &Context,
    controller: &dyn StorageController,
) -> Result<usize> {
    let name = satellite.name_any();
    let images = if satellite.spec.cluster_ref.external_controller.is_some() {
        images_for_controller(&ctx.config.images, &controller.controller_version().await?)?
    } else {
        ctx.config.images.clone()
    };

    let set = satellite_resources(
        &SatelliteParams {
            node_name: &name,
            namespace: &ctx.config.namespace,
            spec: &satellite.spec,
            pull_secret: ctx.config.pull_secret.as_deref(),
        },
        &images,
    )?;

    let owner = satellite
        .controller_owner_ref(&())
        .ok_or_else(|| Error::InvalidResource {
            kind: KIND.into(),
            name: name.clone(),
            reason: "missing uid".into(),
        })?;
    apply_manifests(&ctx.client, set, &owner).await
}

async fn satellite_pod_ip(ctx: &Context, node: &str) -> Result<Option<String>> {
    let selector = satellite_labels(node)
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    let pods = Api::<Pod>::namespaced(ctx.client.clone(), &ctx.config.namespace)
        .list(&ListParams::default().labels(&selector))
        .await?;
    Ok(pods
        .items
        .into_iter()
        .filter(|p| p.metadata.deletion_timestamp.is_none())
        .find_map(|p| p.status.and_then(|s| s.pod_ip)))
}

async fn patch_finalizers(
    api: &Api<LinstorSatellite>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<()> {
    api.patch(
        name,
        &PatchParams::default(),
        &ApiPatch::Merge(json!({ "metadata": { "finalizers": finalizers } })),
    )
    .await?;
    Ok(())
}

fn with_finalizer(current: &[String]) -> Vec<String> {
    let mut finalizers = current.to_vec();
    if !finalizers.iter().any(|f| f == SATELLITE_FINALIZER) {
        finalizers.push(SATELLITE_FINALIZER.to_string());
    }
    finalizers
}

/// Finalizers of other owners stay untouched
fn without_finalizer(current: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|f| *f != SATELLITE_FINALIZER)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterReference, ExternalController, Patch};
    use crate::manifests::ImageResolver;

    fn spec() -> LinstorSatelliteSpec {
        LinstorSatelliteSpec {
            cluster_ref: ClusterReference {
                name: "linstorcluster".into(),
                external_controller: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_finalizers() {
        let current = vec!["other.io/protect".to_string()];
        let added = with_finalizer(&current);
        assert_eq!(added, vec!["other.io/protect", SATELLITE_FINALIZER]);
        assert_eq!(with_finalizer(&added), added);
        assert_eq!(without_finalizer(&added), current);
    }

    #[test]
    fn test_controller_url() {
        let mut spec = spec();
        assert_eq!(
            controller_url(&spec, "piraeus"),
            "http://linstor-controller.piraeus.svc:3370"
        );
        spec.cluster_ref.external_controller = Some(ExternalController {
            url: "https://linstor.example.com".into(),
        });
        assert_eq!(controller_url(&spec, "piraeus"), "https://linstor.example.com");
    }

    #[test]
    fn test_patched_resources() {
        let mut spec = spec();
        spec.patches = vec![Patch::new(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: satellite
  annotations:
    test1: val1
"#,
        )];
        let set = satellite_resources(
            &SatelliteParams {
                node_name: "node-a",
                namespace: "piraeus",
                spec: &spec,
                pull_secret: None,
            },
            &ImageConfig::default(),
        )
        .unwrap();

        assert!(set.get("Pod", "satellite").is_none());
        let ds = set.get("DaemonSet", "linstor-satellite.node-a").unwrap();
        assert_eq!(
            ds.as_value()["spec"]["template"]["metadata"]["annotations"]["test1"],
            "val1"
        );
    }

    #[test]
    fn test_images_for_controller() {
        let version = ControllerVersion {
            version: "1.28.1".into(),
            ..Default::default()
        };
        let images = images_for_controller(&ImageConfig::default(), &version).unwrap();
        assert!(images.image(COMPONENT_SATELLITE).unwrap().ends_with(":v1.28.1"));

        let unknown = images_for_controller(&ImageConfig::default(), &ControllerVersion::default())
            .unwrap();
        assert_eq!(unknown, ImageConfig::default());
    }

    #[test]
    fn test_controller_owner_reference() {
        let mut owner = LinstorSatellite::new("node-a", spec());
        assert!(owner.controller_owner_ref(&()).is_none());

        owner.metadata.uid = Some("uid-1".into());
        let reference = owner.controller_owner_ref(&()).unwrap();
        assert_eq!(reference.kind, "LinstorSatellite");
        assert_eq!(reference.api_version, "piraeus.io/v1");
        assert_eq!(reference.uid, "uid-1");
        assert_eq!(reference.controller, Some(true));
    }
}
