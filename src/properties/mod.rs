//! Node Property Resolver
//!
//! Turns a list of [`LinstorNodeProperty`] into the key/value pairs pushed to
//! a LINSTOR node or storage pool. Values are literal, copied from a single
//! node field, or expanded from every node field matching a wildcard.
//!
//! Expansion has two modes. With `nameTemplate` one property is emitted per
//! match. Otherwise all matches are joined into a single property using
//! `delimiter` (empty by default). `$1` in a template is the matched key and
//! `$2` the matched value.

pub mod fieldpath;

pub use fieldpath::{FieldPath, Resolved};

use serde_json::Value;

use crate::crd::{LinstorNodeProperty, NodeFieldExpansion};
use crate::error::{Error, Result};

/// Default value template: the matched value
pub const DEFAULT_VALUE_TEMPLATE: &str = "$2";

pub const MSG_EXACTLY_ONE_SOURCE: &str =
    "Expected exactly one of 'value', 'valueFrom' or 'expandFrom' to be set";
pub const MSG_WILDCARD_NOT_ALLOWED: &str = "Wildcard property not allowed, use expandFrom instead";
pub const MSG_WILDCARD_REQUIRED: &str = "Wildcard property required";
pub const MSG_TEMPLATE_OR_DELIMITER: &str =
    "Expected only one of 'nameTemplate' and 'delimiter' to be set";

/// A resolved property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProperty {
    pub name: String,
    pub value: String,
}

impl ResolvedProperty {
    fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Resolve `properties` against `node` (the Kubernetes node as JSON).
///
/// Order follows the input; duplicate names are kept.
pub fn resolve_properties(
    properties: &[LinstorNodeProperty],
    node: &Value,
) -> Result<Vec<ResolvedProperty>> {
    let mut resolved = Vec::with_capacity(properties.len());
    for property in properties {
        resolve_into(property, node, &mut resolved)?;
    }
    Ok(resolved)
}

fn resolve_into(
    property: &LinstorNodeProperty,
    node: &Value,
    out: &mut Vec<ResolvedProperty>,
) -> Result<()> {
    let fail = |reason: &str| Error::PropertyResolution {
        name: property.name.clone(),
        reason: reason.to_string(),
    };
    if property.source_count() != 1 {
        return Err(fail(MSG_EXACTLY_ONE_SOURCE));
    }

    let mut emit = |name: String, value: String| {
        if !(value.is_empty() && property.optional) {
            out.push(ResolvedProperty::new(name, value));
        }
    };

    if let Some(value) = &property.value {
        emit(property.name.clone(), value.clone());
        return Ok(());
    }

    if let Some(source) = &property.value_from {
        let path = FieldPath::parse(&source.node_field_ref)?;
        if path.has_wildcard() {
            return Err(fail(MSG_WILDCARD_NOT_ALLOWED));
        }
        if let Resolved::Scalar(value) = path.resolve(node) {
            emit(property.name.clone(), value);
        }
        return Ok(());
    }

    if let Some(expansion) = &property.expand_from {
        let path = FieldPath::parse(&expansion.node_field_ref)?;
        if !path.has_wildcard() {
            return Err(fail(MSG_WILDCARD_REQUIRED));
        }
        if expansion.name_template.is_some() && expansion.delimiter.is_some() {
            return Err(fail(MSG_TEMPLATE_OR_DELIMITER));
        }
        let Resolved::Matches(matches) = path.resolve(node) else {
            return Ok(());
        };
        let value_template = expansion
            .value_template
            .as_deref()
            .unwrap_or(DEFAULT_VALUE_TEMPLATE);

        match expansion_mode(expansion) {
            ExpansionMode::Template(name_template) => {
                for (key, value) in &matches {
                    emit(
                        format!("{}{}", property.name, substitute(name_template, key, value)),
                        substitute(value_template, key, value),
                    );
                }
            }
            ExpansionMode::Join(delimiter) => {
                let joined = matches
                    .iter()
                    .map(|(key, value)| substitute(value_template, key, value))
                    .collect::<Vec<_>>()
                    .join(delimiter);
                emit(property.name.clone(), joined);
            }
        }
    }
    Ok(())
}

enum ExpansionMode<'a> {
    Template(&'a str),
    Join(&'a str),
}

fn expansion_mode(expansion: &NodeFieldExpansion) -> ExpansionMode<'_> {
    match (&expansion.name_template, &expansion.delimiter) {
        (Some(template), _) => ExpansionMode::Template(template),
        (None, Some(delimiter)) => ExpansionMode::Join(delimiter),
        (None, None) => ExpansionMode::Join(""),
    }
}

/// Replace `$1` with `key` and `$2` with `value` in a single pass
fn substitute(template: &str, key: &str, value: &str) -> String {
    let mut out = String::with_capacity(template.len() + value.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                Some('1') => {
                    chars.next();
                    out.push_str(key);
                    continue;
                }
                Some('2') => {
                    chars.next();
                    out.push_str(value);
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}
