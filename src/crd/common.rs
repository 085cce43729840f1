//! Shared CRD types
//!
//! Types embedded in more than one Piraeus resource: patches and their
//! target selectors, node properties, cluster references and status
//! conditions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Patches
// =============================================================================

/// Selects the generated resources a [`Patch`] applies to.
///
/// Every non-empty field must match. `group`, `version`, `kind`, `name` and
/// `namespace` are anchored regular expressions; the two selector strings use
/// Kubernetes label selector syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub annotation_selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label_selector: String,
}

impl Selector {
    /// True if no field is set
    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
            && self.version.is_empty()
            && self.kind.is_empty()
            && self.name.is_empty()
            && self.namespace.is_empty()
            && self.annotation_selector.is_empty()
            && self.label_selector.is_empty()
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        for (key, value) in [
            ("group", &self.group),
            ("version", &self.version),
            ("kind", &self.kind),
            ("name", &self.name),
            ("namespace", &self.namespace),
            ("labelSelector", &self.label_selector),
            ("annotationSelector", &self.annotation_selector),
        ] {
            if !value.is_empty() {
                parts.push(format!("{}={}", key, value));
            }
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// A customisation applied to the generated resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    /// Strategic merge patch (JSON or YAML) or RFC 6902 JSON patch
    pub patch: String,

    /// Resources to patch. Derived from the patch document if omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Selector>,

    /// Patch options: `allowNameChange`, `allowKindChange`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, bool>,
}

impl Patch {
    /// Create a patch without explicit target
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            patch: document.into(),
            ..Default::default()
        }
    }

    /// Create a patch with an explicit target
    pub fn with_target(document: impl Into<String>, target: Selector) -> Self {
        Self {
            patch: document.into(),
            target: Some(target),
            options: BTreeMap::new(),
        }
    }

    /// Whether an option is enabled
    pub fn option(&self, name: &str) -> bool {
        self.options.get(name).copied().unwrap_or(false)
    }
}

// =============================================================================
// Node Properties
// =============================================================================

/// A LINSTOR property derived from the Kubernetes node.
///
/// Exactly one of `value`, `valueFrom` and `expandFrom` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinstorNodeProperty {
    /// Property name
    pub name: String,

    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Value copied from a single node field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<NodeFieldSource>,

    /// Values expanded from every node field matching a wildcard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand_from: Option<NodeFieldExpansion>,

    /// Skip the property if the resolved value is empty
    #[serde(default)]
    pub optional: bool,
}

impl LinstorNodeProperty {
    /// Property with a literal value
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Number of value sources set; valid properties have exactly one
    pub fn source_count(&self) -> usize {
        [
            self.value.is_some(),
            self.value_from.is_some(),
            self.expand_from.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// Reference to a single node field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeFieldSource {
    /// Field path, e.g. `metadata.labels['topology.kubernetes.io/zone']`
    pub node_field_ref: String,
}

/// Reference to a wildcard set of node fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeFieldExpansion {
    /// Field path containing a wildcard, e.g. `metadata.labels['*']`
    pub node_field_ref: String,

    /// Emit one property per match, named `<name><nameTemplate>`.
    /// `$1` is replaced by the matched key, `$2` by the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_template: Option<String>,

    /// Template for each value. Defaults to `$2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,

    /// Join all matches into one property using this delimiter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

/// A LINSTOR controller property
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinstorControllerProperty {
    pub name: String,
    pub value: String,
}

// =============================================================================
// Cluster Reference
// =============================================================================

/// Location of an existing LINSTOR controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalController {
    /// URL of the LINSTOR API, e.g. `http://linstor.example.com:3370`
    pub url: String,
}

/// TLS settings for satellite to controller traffic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InternalTls {
    /// Secret holding the TLS key pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

/// Pod template override for a generated component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Set to false to not deploy the component
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Merged into the generated pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_template: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Schema for free-form embedded objects
pub fn preserve_unknown_fields(
    _: &mut schemars::gen::SchemaGenerator,
) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schema.extensions.insert(
        "nullable".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(schema)
}

// =============================================================================
// Conditions
// =============================================================================

/// Condition types reported by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// Generated resources were applied
    Applied,
    /// The LINSTOR controller or satellite is reachable and online
    Available,
    /// Properties and storage pools were applied to LINSTOR
    Configured,
    /// The satellite holds no more resources and was removed
    EvacuationCompleted,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Applied => "Applied",
            ConditionType::Available => "Available",
            ConditionType::Configured => "Configured",
            ConditionType::EvacuationCompleted => "EvacuationCompleted",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Status condition. Only trust `status` if `observedGeneration` matches the
/// resource's current generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: ConditionStatus,
    /// Generation of the resource the condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Machine readable reason
    #[serde(default)]
    pub reason: String,
    /// Human readable message
    #[serde(default)]
    pub message: String,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: impl Into<ConditionStatus>,
        generation: Option<i64>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: type_.to_string(),
            status: status.into(),
            observed_generation: generation,
            last_transition_time: Some(Utc::now()),
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Whether this condition is True for the given generation
    pub fn is_true_for(&self, generation: Option<i64>) -> bool {
        self.status == ConditionStatus::True && self.observed_generation == generation
    }
}

/// Set a condition, replacing any existing condition of the same type.
/// The transition time is kept if the status did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Find a condition by type
pub fn find_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.r#type == type_.as_str())
}
