//! LinstorCluster CRD
//!
//! Cluster-wide configuration: where the LINSTOR controller runs, which
//! nodes become satellites, controller properties and patches for the
//! generated controller resources.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::{
    find_condition, Condition, ComponentSpec, ConditionType, ExternalController,
    LinstorControllerProperty, Patch,
};

// =============================================================================
// LinstorCluster CRD
// =============================================================================

/// LinstorCluster is the entry point: one per Kubernetes cluster.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "piraeus.io",
    version = "v1",
    kind = "LinstorCluster",
    plural = "linstorclusters",
    status = "LinstorClusterStatus",
    printcolumn = r#"{"name": "Applied", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Applied\")].status"}"#,
    printcolumn = r#"{"name": "Available", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LinstorClusterSpec {
    /// Nodes that run a LINSTOR satellite. Empty selects all nodes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Use an existing LINSTOR controller instead of deploying one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_controller: Option<ExternalController>,

    /// Properties set on the LINSTOR controller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<LinstorControllerProperty>,

    /// Patches applied to the generated controller resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,

    /// LINSTOR controller deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ComponentSpec>,
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinstorClusterStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// =============================================================================
// Implementations
// =============================================================================

impl LinstorClusterSpec {
    /// Whether the operator deploys the LINSTOR controller itself
    pub fn deploys_controller(&self) -> bool {
        self.external_controller.is_none()
            && self.controller.as_ref().map(|c| c.enabled).unwrap_or(true)
    }

    /// URL of the LINSTOR API for this cluster
    pub fn controller_url(&self, namespace: &str) -> String {
        match &self.external_controller {
            Some(external) => external.url.clone(),
            None => default_controller_url(namespace),
        }
    }
}

impl LinstorCluster {
    /// Whether the cluster reports Available for its current generation
    pub fn is_available(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, ConditionType::Available))
            .map(|c| c.is_true_for(self.metadata.generation))
            .unwrap_or(false)
    }
}

/// URL of the in-cluster LINSTOR controller service
pub fn default_controller_url(namespace: &str) -> String {
    format!("http://linstor-controller.{}.svc:3370", namespace)
}
