//! LinstorSatellite CRD
//!
//! One LinstorSatellite per storage node, named after the Kubernetes node.
//! Usually created by the cluster reconciler from the LinstorCluster and all
//! matching LinstorSatelliteConfigurations. Deleting it evacuates the node.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, ExternalController, InternalTls, LinstorNodeProperty, Patch};
use super::storage_pool::LinstorStoragePool;

/// Finalizer guarding satellite removal until evacuation completed
pub const SATELLITE_FINALIZER: &str = "piraeus.io/satellite-protection";

// =============================================================================
// LinstorSatellite CRD
// =============================================================================

/// LinstorSatellite is the desired state of a single LINSTOR satellite.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "piraeus.io",
    version = "v1",
    kind = "LinstorSatellite",
    plural = "linstorsatellites",
    status = "LinstorSatelliteStatus",
    printcolumn = r#"{"name": "Connected", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name": "Configured", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Configured\")].status"}"#,
    printcolumn = r#"{"name": "Deleted", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"EvacuationCompleted\")].status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LinstorSatelliteSpec {
    /// Cluster this satellite belongs to
    pub cluster_ref: ClusterReference,

    /// Storage pools to create on the satellite
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_pools: Vec<LinstorStoragePool>,

    /// Properties set on the LINSTOR node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<LinstorNodeProperty>,

    /// Patches applied to the generated satellite resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,

    /// TLS between controller and satellite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_tls: Option<InternalTls>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReference {
    /// Name of the LinstorCluster
    #[serde(default)]
    pub name: String,

    /// Set if the LinstorCluster uses an external controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_controller: Option<ExternalController>,
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinstorSatelliteStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// =============================================================================
// Implementations
// =============================================================================

impl LinstorSatellite {
    /// Whether the satellite is being deleted
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether our finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|f| f == SATELLITE_FINALIZER))
            .unwrap_or(false)
    }
}

impl LinstorSatelliteSpec {
    /// Port the satellite listens on
    pub fn satellite_port(&self) -> u16 {
        if self.internal_tls.is_some() {
            3367
        } else {
            3366
        }
    }

    /// Encryption type as understood by the LINSTOR API
    pub fn encryption_type(&self) -> &'static str {
        if self.internal_tls.is_some() {
            "SSL"
        } else {
            "PLAIN"
        }
    }
}
