//! Baseline resources of one LINSTOR satellite
//!
//! Every satellite runs as a single-node DaemonSet named
//! `linstor-satellite.<node>`. Its pod template is generated as the bare
//! seed Pod `satellite` so patches can target the pod directly.

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EnvVar, EnvVarSource, HostPathVolumeSource,
    LocalObjectReference, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    ObjectFieldSelector, Pod, PodSpec, PodTemplateSpec, SecretVolumeSource, SecurityContext,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

use super::images::{
    ImageResolver, COMPONENT_DRBD_MODULE_LOADER, COMPONENT_DRBD_REACTOR,
    COMPONENT_DRBD_SHUTDOWN_GUARD, COMPONENT_SATELLITE,
};
use super::{Manifest, ManifestSet};
use crate::crd::LinstorSatelliteSpec;
use crate::error::Result;

/// Name of the seed Pod of every satellite
pub const SATELLITE_POD_NAME: &str = "satellite";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

const TLS_MOUNT_PATH: &str = "/etc/linstor/ssl";

/// Name of the DaemonSet running the satellite on `node`
pub fn daemonset_name(node: &str) -> String {
    format!("linstor-satellite.{}", node)
}

/// Default name of the TLS secret of `node`
pub fn tls_secret_name(node: &str) -> String {
    format!("{}-tls", node)
}

/// Labels shared by the seed Pod, the DaemonSet selector and its pods
pub fn satellite_labels(node: &str) -> BTreeMap<String, String> {
    [
        (LABEL_NAME, "piraeus-datastore"),
        (LABEL_COMPONENT, "linstor-satellite"),
        (LABEL_INSTANCE, node),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Inputs for the satellite resources
pub struct SatelliteParams<'a> {
    pub node_name: &'a str,
    pub namespace: &'a str,
    pub spec: &'a LinstorSatelliteSpec,
    pub pull_secret: Option<&'a str>,
}

/// Generate the seed Pod and DaemonSet for one satellite
pub fn satellite_manifests(
    params: &SatelliteParams<'_>,
    images: &dyn ImageResolver,
) -> Result<ManifestSet> {
    let labels = satellite_labels(params.node_name);

    let pod = Pod {
        metadata: ObjectMeta {
            name: Some(SATELLITE_POD_NAME.into()),
            namespace: Some(params.namespace.into()),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::new()),
            ..Default::default()
        },
        spec: Some(satellite_pod_spec(params, images)?),
        status: None,
    };

    let daemonset = DaemonSet {
        metadata: ObjectMeta {
            name: Some(daemonset_name(params.node_name)),
            namespace: Some(params.namespace.into()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: None,
            },
            ..Default::default()
        }),
        status: None,
    };

    let daemonset = Manifest::from_resource(&daemonset)?;
    let mut set = ManifestSet::new();
    set.push(Manifest::from_resource(&pod)?);
    set.seed_pod_template(SATELLITE_POD_NAME, daemonset.key());
    set.push(daemonset);
    Ok(set)
}

fn satellite_pod_spec(params: &SatelliteParams<'_>, images: &dyn ImageResolver) -> Result<PodSpec> {
    let spec = params.spec;
    let privileged = Some(SecurityContext {
        privileged: Some(true),
        ..Default::default()
    });

    let mut volumes = vec![
        host_path_volume("dev", "/dev", None),
        host_path_volume("lib-modules", "/lib/modules", Some("DirectoryOrCreate")),
    ];
    let mut mounts = vec![
        mount("dev", "/dev", false),
        mount("lib-modules", "/lib/modules", true),
    ];

    for pool in &spec.storage_pools {
        let Some(directory) = pool.directory() else {
            continue;
        };
        let name = format!("pool-{}", pool.name.to_lowercase().replace('_', "-"));
        volumes.push(host_path_volume(&name, &directory, Some("DirectoryOrCreate")));
        mounts.push(mount(&name, &directory, false));
    }

    if let Some(tls) = &spec.internal_tls {
        let secret = tls
            .secret_name
            .clone()
            .unwrap_or_else(|| tls_secret_name(params.node_name));
        volumes.push(Volume {
            name: "internal-tls".into(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(mount("internal-tls", TLS_MOUNT_PATH, true));
    }

    let node_name_env = EnvVar {
        name: "NODE_NAME".into(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "spec.nodeName".into(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(PodSpec {
        affinity: Some(pin_to_node(params.node_name)),
        init_containers: Some(vec![
            Container {
                name: "drbd-module-loader".into(),
                image: Some(images.image(COMPONENT_DRBD_MODULE_LOADER)?),
                security_context: privileged.clone(),
                volume_mounts: Some(vec![mount("lib-modules", "/lib/modules", true)]),
                ..Default::default()
            },
            Container {
                name: "drbd-shutdown-guard".into(),
                image: Some(images.image(COMPONENT_DRBD_SHUTDOWN_GUARD)?),
                security_context: privileged.clone(),
                ..Default::default()
            },
        ]),
        containers: vec![
            Container {
                name: "linstor-satellite".into(),
                image: Some(images.image(COMPONENT_SATELLITE)?),
                args: Some(vec!["startSatellite".into()]),
                env: Some(vec![node_name_env]),
                ports: Some(vec![ContainerPort {
                    name: Some("linstor".into()),
                    container_port: i32::from(spec.satellite_port()),
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                security_context: privileged,
                volume_mounts: Some(mounts),
                ..Default::default()
            },
            Container {
                name: "drbd-reactor".into(),
                image: Some(images.image(COMPONENT_DRBD_REACTOR)?),
                ports: Some(vec![ContainerPort {
                    name: Some("prometheus".into()),
                    container_port: 9942,
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            },
        ],
        volumes: Some(volumes),
        image_pull_secrets: params.pull_secret.map(|name| {
            vec![LocalObjectReference {
                name: Some(name.to_string()),
            }]
        }),
        ..Default::default()
    })
}

fn pin_to_node(node: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_fields: Some(vec![NodeSelectorRequirement {
                        key: "metadata.name".into(),
                        operator: "In".into(),
                        values: Some(vec![node.to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn host_path_volume(name: &str, path: &str, type_: Option<&str>) -> Volume {
    Volume {
        name: name.into(),
        host_path: Some(HostPathVolumeSource {
            path: path.into(),
            type_: type_.map(str::to_string),
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}
