//! Baseline resources of the in-cluster LINSTOR controller

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, LocalObjectReference, Pod, PodSpec, PodTemplateSpec,
    Probe, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use super::images::{ImageResolver, COMPONENT_CONTROLLER};
use super::satellite::{LABEL_COMPONENT, LABEL_INSTANCE, LABEL_NAME};
use super::{Manifest, ManifestSet};
use crate::error::Result;

/// Name of the controller's seed Pod
pub const CONTROLLER_POD_NAME: &str = "controller";
/// Name of the controller Deployment and Service
pub const CONTROLLER_NAME: &str = "linstor-controller";
/// Port of the LINSTOR REST API
pub const CONTROLLER_API_PORT: i32 = 3370;

pub fn controller_labels(cluster: &str) -> BTreeMap<String, String> {
    [
        (LABEL_NAME, "piraeus-datastore"),
        (LABEL_COMPONENT, CONTROLLER_NAME),
        (LABEL_INSTANCE, cluster),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Generate the controller Deployment (seeded from Pod `controller`) and
/// its Service.
pub fn controller_manifests(
    cluster: &str,
    namespace: &str,
    images: &dyn ImageResolver,
    pull_secret: Option<&str>,
) -> Result<ManifestSet> {
    let labels = controller_labels(cluster);
    let api_port = IntOrString::String("api".into());

    let pod = Pod {
        metadata: ObjectMeta {
            name: Some(CONTROLLER_POD_NAME.into()),
            namespace: Some(namespace.into()),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::new()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: CONTROLLER_NAME.into(),
                image: Some(images.image(COMPONENT_CONTROLLER)?),
                args: Some(vec!["startController".into()]),
                ports: Some(vec![ContainerPort {
                    name: Some("api".into()),
                    container_port: CONTROLLER_API_PORT,
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                readiness_probe: Some(Probe {
                    http_get: Some(HTTPGetAction {
                        path: Some("/health".into()),
                        port: api_port.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            image_pull_secrets: pull_secret.map(|name| {
                vec![LocalObjectReference {
                    name: Some(name.to_string()),
                }]
            }),
            ..Default::default()
        }),
        status: None,
    };

    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(CONTROLLER_NAME.into()),
            namespace: Some(namespace.into()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".into()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: None,
            },
            ..Default::default()
        }),
        status: None,
    };

    let service = Service {
        metadata: ObjectMeta {
            name: Some(CONTROLLER_NAME.into()),
            namespace: Some(namespace.into()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("api".into()),
                port: CONTROLLER_API_PORT,
                target_port: Some(api_port),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };

    let deployment = Manifest::from_resource(&deployment)?;
    let mut set = ManifestSet::new();
    set.push(Manifest::from_resource(&pod)?);
    set.seed_pod_template(CONTROLLER_POD_NAME, deployment.key());
    set.push(deployment);
    set.push(Manifest::from_resource(&service)?);
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifests::{pod_template_patch, ImageConfig};

    #[test]
    fn test_controller_manifests() {
        let mut set =
            controller_manifests("linstorcluster", "piraeus-datastore", &ImageConfig::default(), None)
                .unwrap();
        assert_eq!(set.len(), 3);
        set.promote_pod_templates().unwrap();
        assert_eq!(set.len(), 2);

        let deployment = set.get("Deployment", CONTROLLER_NAME).unwrap();
        let spec = &deployment.as_value()["spec"];
        assert_eq!(spec["replicas"], 1);
        assert_eq!(spec["template"]["spec"]["containers"][0]["ports"][0]["containerPort"], 3370);
        assert!(spec["template"]["spec"].get("imagePullSecrets").is_none());

        let service = set.get("Service", CONTROLLER_NAME).unwrap();
        assert_eq!(service.as_value()["spec"]["ports"][0]["targetPort"], "api");
        assert_eq!(
            service.as_value()["spec"]["selector"][LABEL_COMPONENT],
            CONTROLLER_NAME
        );
    }

    #[test]
    fn test_component_pod_template() {
        let mut set =
            controller_manifests("linstorcluster", "piraeus-datastore", &ImageConfig::default(), None)
                .unwrap();
        let patch = pod_template_patch(
            CONTROLLER_POD_NAME,
            &serde_json::json!({
                "metadata": {"annotations": {"a": "b"}},
                "spec": {"nodeSelector": {"role": "storage"}}
            }),
        )
        .unwrap();
        set.apply_patches(&[patch]).unwrap();
        set.promote_pod_templates().unwrap();

        let template = &set.get("Deployment", CONTROLLER_NAME).unwrap().as_value()["spec"]["template"];
        assert_eq!(template["metadata"]["annotations"]["a"], "b");
        assert_eq!(template["spec"]["nodeSelector"]["role"], "storage");
        assert_eq!(template["spec"]["containers"][0]["name"], CONTROLLER_NAME);
    }
}
