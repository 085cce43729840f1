//! Generated Kubernetes resources
//!
//! A [`ManifestSet`] holds the resources generated for one LinstorCluster or
//! LinstorSatellite before they are applied. Patches mutate the objects in
//! place; the set never gains or loses objects while patches are applied.
//!
//! Workload controllers are generated from a bare "seed" Pod so that users
//! can patch the pod directly. [`ManifestSet::promote_pod_templates`] folds
//! each seed into its controller's pod template and drops the seed.

pub mod cluster;
pub mod images;
pub mod satellite;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::patch::strategic_merge;

pub use images::{
    ImageConfig, ImageResolver, COMPONENT_CONTROLLER, COMPONENT_DRBD_MODULE_LOADER,
    COMPONENT_DRBD_REACTOR, COMPONENT_DRBD_SHUTDOWN_GUARD, COMPONENT_SATELLITE,
};

use crate::crd::{Patch, Selector};

// =============================================================================
// Manifest
// =============================================================================

/// Identity of a generated resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {}/{}", self.api_version, self.kind, ns, self.name),
            None => write!(f, "{}/{} {}", self.api_version, self.kind, self.name),
        }
    }
}

/// A single generated resource as untyped JSON
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    object: Value,
}

impl Manifest {
    /// Convert a typed resource (anything serialising with apiVersion/kind)
    pub fn from_resource<K: Serialize>(resource: &K) -> Result<Self> {
        Self::from_value(serde_json::to_value(resource)?)
    }

    /// Wrap a JSON object. It must carry apiVersion, kind and metadata.name.
    pub fn from_value(object: Value) -> Result<Self> {
        let manifest = Self { object };
        if !manifest.object.is_object() {
            return Err(Error::Manifest("resource is not an object".into()));
        }
        if manifest.api_version().is_empty() || manifest.kind().is_empty() {
            return Err(Error::Manifest("resource is missing apiVersion or kind".into()));
        }
        if manifest.name().is_empty() {
            return Err(Error::Manifest(format!(
                "{} is missing metadata.name",
                manifest.kind()
            )));
        }
        Ok(manifest)
    }

    pub fn api_version(&self) -> &str {
        self.object["apiVersion"].as_str().unwrap_or_default()
    }

    /// API group, empty for the core group
    pub fn group(&self) -> &str {
        split_api_version(self.api_version()).0
    }

    pub fn version(&self) -> &str {
        split_api_version(self.api_version()).1
    }

    pub fn kind(&self) -> &str {
        self.object["kind"].as_str().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.object["metadata"]["name"].as_str().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object["metadata"]["namespace"].as_str()
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        string_map(&self.object["metadata"]["labels"])
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        string_map(&self.object["metadata"]["annotations"])
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.api_version(), self.kind(), self.namespace(), self.name())
    }

    pub fn as_value(&self) -> &Value {
        &self.object
    }

    pub fn into_value(self) -> Value {
        self.object
    }
}

/// Split `group/version`; core resources have no group
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Manifest Set
// =============================================================================

/// Links a seed Pod to the controller whose template it becomes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTemplateSeed {
    pub pod_name: String,
    pub controller: ObjectKey,
}

/// The generated resources of one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    objects: Vec<Manifest>,
    seeds: Vec<PodTemplateSeed>,
}

impl ManifestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, manifest: Manifest) {
        self.objects.push(manifest);
    }

    /// Register `pod_name` as the template seed of `controller`
    pub fn seed_pod_template(&mut self, pod_name: impl Into<String>, controller: ObjectKey) {
        self.seeds.push(PodTemplateSeed {
            pod_name: pod_name.into(),
            controller,
        });
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
        self.objects.iter()
    }

    pub(crate) fn objects_mut(&mut self) -> &mut [Manifest] {
        &mut self.objects
    }

    /// Look up an object by kind and name
    pub fn get(&self, kind: &str, name: &str) -> Option<&Manifest> {
        self.objects
            .iter()
            .find(|m| m.kind() == kind && m.name() == name)
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.objects.iter().map(Manifest::key).collect()
    }

    pub fn into_manifests(self) -> Vec<Manifest> {
        self.objects
    }

    /// Apply patches in order to every matching object
    pub fn apply_patches(&mut self, patches: &[Patch]) -> Result<()> {
        crate::patch::apply_patches(self, patches)
    }

    /// Replace each seed Pod by its controller's pod template.
    ///
    /// The seed's labels, annotations and spec become the template; whatever
    /// the controller's own template already contains is merged over it.
    pub fn promote_pod_templates(&mut self) -> Result<()> {
        for seed in std::mem::take(&mut self.seeds) {
            let Some(pos) = self
                .objects
                .iter()
                .position(|m| m.kind() == "Pod" && m.name() == seed.pod_name)
            else {
                return Err(Error::Manifest(format!(
                    "seed pod {} not found",
                    seed.pod_name
                )));
            };
            let pod = self.objects.remove(pos).into_value();

            let mut metadata = Map::new();
            for field in ["labels", "annotations"] {
                if let Some(value) = pod["metadata"].get(field) {
                    metadata.insert(field.to_string(), value.clone());
                }
            }
            let mut template = Map::new();
            template.insert("metadata".into(), Value::Object(metadata));
            template.insert(
                "spec".into(),
                pod.get("spec").cloned().unwrap_or_else(|| Value::Object(Map::new())),
            );
            let template = Value::Object(template);

            let controller = self
                .objects
                .iter_mut()
                .find(|m| m.key() == seed.controller)
                .ok_or_else(|| {
                    Error::Manifest(format!("seed controller {} not found", seed.controller))
                })?;

            let mut object = controller.object.take();
            let merged = match object.pointer("/spec/template") {
                Some(own) => strategic_merge(&template, own)?,
                None => template,
            };
            match object.get_mut("spec").and_then(Value::as_object_mut) {
                Some(spec) => {
                    spec.insert("template".into(), merged);
                }
                None => {
                    return Err(Error::Manifest(format!(
                        "{} has no spec",
                        seed.controller
                    )))
                }
            }
            controller.object = object;
        }
        Ok(())
    }
}

/// Turn a component `podTemplate` override into a strategic merge patch
/// on the seed Pod `pod_name`.
///
/// Only the template's labels, annotations and spec are carried over.
pub fn pod_template_patch(pod_name: &str, template: &Value) -> Result<Patch> {
    let mut metadata = Map::new();
    metadata.insert("name".into(), Value::String(pod_name.to_string()));
    for field in ["labels", "annotations"] {
        if let Some(value) = template.pointer(&format!("/metadata/{}", field)) {
            metadata.insert(field.to_string(), value.clone());
        }
    }

    let mut document = Map::new();
    document.insert("apiVersion".into(), Value::String("v1".into()));
    document.insert("kind".into(), Value::String("Pod".into()));
    document.insert("metadata".into(), Value::Object(metadata));
    if let Some(spec) = template.get("spec") {
        document.insert("spec".into(), spec.clone());
    }

    Ok(Patch::with_target(
        serde_json::to_string(&Value::Object(document))?,
        Selector {
            kind: "Pod".into(),
            name: pod_name.to_string(),
            ..Default::default()
        },
    ))
}
