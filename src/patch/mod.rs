//! Patch Engine
//!
//! Users customise generated resources with patches: either a single
//! resource strategic merge patch (JSON or YAML) or an RFC 6902 JSON patch.
//! A patch document is always parsed both ways; the outcome is one of the
//! [`ParsedPatch`] variants, never a guess.
//!
//! A patch without explicit target selects the resource named by its own
//! strategic merge document. Patches that match nothing are not an error.

mod engine;
mod selector;
mod strategic_merge;

pub use engine::apply_patches;
pub use selector::{CompiledSelector, LabelSelector, Operator, Requirement};
pub use strategic_merge::strategic_merge;

use serde::Deserialize;
use serde_json::Value;

use crate::crd::{Patch, Selector};
use crate::error::{Error, Result};
use crate::manifests::split_api_version;

/// Patch option allowing a patch to rename its target
pub const OPTION_ALLOW_NAME_CHANGE: &str = "allowNameChange";
/// Patch option allowing a patch to change its target's kind
pub const OPTION_ALLOW_KIND_CHANGE: &str = "allowKindChange";

// =============================================================================
// Parsing
// =============================================================================

/// Result of parsing a patch document
#[derive(Debug, Clone)]
pub enum ParsedPatch {
    /// A single resource strategic merge patch
    StrategicMerge(Value),
    /// A sequence of JSON patch operations
    JsonPatch(json_patch::Patch),
    /// Neither form; both parse errors are kept
    Unparseable {
        merge_error: String,
        json_error: String,
    },
}

impl ParsedPatch {
    pub fn parse(document: &str) -> Self {
        let merge = parse_strategic_merge(document);
        let json = parse_json_patch(document);
        match (merge, json) {
            (Ok(resource), _) => ParsedPatch::StrategicMerge(resource),
            (_, Ok(operations)) => ParsedPatch::JsonPatch(operations),
            (Err(merge_error), Err(json_error)) => ParsedPatch::Unparseable {
                merge_error: merge_error.to_string(),
                json_error: json_error.to_string(),
            },
        }
    }

    pub fn is_parseable(&self) -> bool {
        !matches!(self, ParsedPatch::Unparseable { .. })
    }
}

/// Parse every resource in a (possibly multi-document) strategic merge patch
pub fn parse_strategic_merge_resources(document: &str) -> Result<Vec<Value>> {
    let mut resources = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(document) {
        let value = Value::deserialize(doc)?;
        match value {
            Value::Null => continue,
            Value::Object(ref map) => {
                if map.get("kind").and_then(Value::as_str).unwrap_or_default().is_empty() {
                    return Err(Error::PatchParse("resource is missing kind".into()));
                }
                resources.push(value);
            }
            _ => {
                return Err(Error::PatchParse(
                    "strategic merge patch resource is not an object".into(),
                ))
            }
        }
    }
    Ok(resources)
}

/// Parse a strategic merge patch that must contain exactly one resource
pub fn parse_strategic_merge(document: &str) -> Result<Value> {
    let mut resources = parse_strategic_merge_resources(document)?;
    if resources.len() != 1 {
        return Err(Error::PatchParse(format!(
            "expected strategic merge patch to contain exactly 1 resource, got {}",
            resources.len()
        )));
    }
    Ok(resources.remove(0))
}

/// Parse a JSON patch. Documents not starting with `[` are read as YAML.
pub fn parse_json_patch(document: &str) -> Result<json_patch::Patch> {
    let trimmed = document.trim();
    if trimmed.is_empty() {
        return Err(Error::PatchParse("empty json patch operations".into()));
    }
    let value: Value = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        serde_yaml::from_str(trimmed)?
    };
    if !value.is_array() {
        return Err(Error::PatchParse("json patch is not a list of operations".into()));
    }
    Ok(serde_json::from_value(value)?)
}

// =============================================================================
// Targets
// =============================================================================

/// The explicit target, or the identity of the strategic merge resource
pub fn get_target(patch: &Patch) -> Option<Selector> {
    if let Some(target) = &patch.target {
        return Some(target.clone());
    }
    parse_strategic_merge(&patch.patch).ok().map(|r| resource_selector(&r))
}

fn target_of(patch: &Patch, parsed: &ParsedPatch) -> Option<Selector> {
    match (&patch.target, parsed) {
        (Some(target), _) => Some(target.clone()),
        (None, ParsedPatch::StrategicMerge(resource)) => Some(resource_selector(resource)),
        (None, _) => None,
    }
}

fn resource_selector(resource: &Value) -> Selector {
    let text = |v: &Value| v.as_str().unwrap_or_default().to_string();
    let (group, version) = split_api_version(resource["apiVersion"].as_str().unwrap_or_default());
    Selector {
        group: group.to_string(),
        version: version.to_string(),
        kind: text(&resource["kind"]),
        name: text(&resource["metadata"]["name"]),
        namespace: text(&resource["metadata"]["namespace"]),
        ..Default::default()
    }
}
