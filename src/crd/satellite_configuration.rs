//! LinstorSatelliteConfiguration CRD
//!
//! Configuration shared by all satellites on nodes matching a label
//! selector. Merged into each node's LinstorSatellite by the cluster
//! reconciler.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::{preserve_unknown_fields, Condition, InternalTls, LinstorNodeProperty, Patch};
use super::storage_pool::LinstorStoragePool;

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "piraeus.io",
    version = "v1",
    kind = "LinstorSatelliteConfiguration",
    plural = "linstorsatelliteconfigurations",
    status = "LinstorSatelliteConfigurationStatus",
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LinstorSatelliteConfigurationSpec {
    /// Nodes this configuration applies to. Empty selects all nodes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_pools: Vec<LinstorStoragePool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<LinstorNodeProperty>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,

    /// Merged into the satellite pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_template: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_tls: Option<InternalTls>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinstorSatelliteConfigurationStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl LinstorSatelliteConfigurationSpec {
    /// Whether the configuration applies to a node with these labels
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.node_selector
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}
