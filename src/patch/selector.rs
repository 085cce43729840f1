//! Patch target matching
//!
//! A [`CompiledSelector`] is built once per patch and matched against every
//! generated resource. Identity fields are anchored regular expressions,
//! label and annotation selectors use the Kubernetes selector syntax.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::crd::Selector;
use crate::error::{Error, Result};
use crate::manifests::Manifest;

// =============================================================================
// Compiled Selector
// =============================================================================

/// A [`Selector`] ready for matching
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    group: Option<Regex>,
    version: Option<Regex>,
    kind: Option<Regex>,
    name: Option<Regex>,
    namespace: Option<Regex>,
    labels: Option<LabelSelector>,
    annotations: Option<LabelSelector>,
}

impl CompiledSelector {
    pub fn compile(selector: &Selector) -> Result<Self> {
        Ok(Self {
            group: anchored(&selector.group)?,
            version: anchored(&selector.version)?,
            kind: anchored(&selector.kind)?,
            name: anchored(&selector.name)?,
            namespace: anchored(&selector.namespace)?,
            labels: optional_selector(&selector.label_selector)?,
            annotations: optional_selector(&selector.annotation_selector)?,
        })
    }

    /// True if every configured predicate matches the resource
    pub fn matches(&self, manifest: &Manifest) -> bool {
        let namespace = manifest.namespace().unwrap_or_default();
        field_matches(&self.group, manifest.group())
            && field_matches(&self.version, manifest.version())
            && field_matches(&self.kind, manifest.kind())
            && field_matches(&self.name, manifest.name())
            && field_matches(&self.namespace, namespace)
            && self
                .labels
                .as_ref()
                .map(|s| s.matches(&manifest.labels()))
                .unwrap_or(true)
            && self
                .annotations
                .as_ref()
                .map(|s| s.matches(&manifest.annotations()))
                .unwrap_or(true)
    }
}

fn anchored(pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!("^(?:{})$", pattern))
        .map(Some)
        .map_err(|e| Error::PatchTarget(format!("invalid pattern '{}': {}", pattern, e)))
}

fn optional_selector(selector: &str) -> Result<Option<LabelSelector>> {
    if selector.trim().is_empty() {
        Ok(None)
    } else {
        selector.parse().map(Some)
    }
}

fn field_matches(pattern: &Option<Regex>, value: &str) -> bool {
    pattern.as_ref().map(|re| re.is_match(value)).unwrap_or(true)
}

// =============================================================================
// Label Selector
// =============================================================================

/// Selector operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A single selector term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: BTreeSet<String>,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::In => {
                value.map(|v| self.values.contains(v)).unwrap_or(false)
            }
            Operator::NotEquals | Operator::NotIn => {
                value.map(|v| !self.values.contains(v)).unwrap_or(true)
            }
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// Parsed Kubernetes label selector, e.g. `app=web,tier in (a,b),!legacy`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

static SET_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<key>[^\s!=()]+)\s+(?P<op>in|notin)\s*\((?P<values>[^()]*)\)$")
        .expect("static regex")
});

impl LabelSelector {
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Conjunction of all requirements; an empty selector matches everything
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    fn parse_term(term: &str) -> Result<Requirement> {
        let invalid = || Error::PatchTarget(format!("invalid selector term '{}'", term));

        if let Some(caps) = SET_TERM.captures(term) {
            let operator = if &caps["op"] == "in" {
                Operator::In
            } else {
                Operator::NotIn
            };
            let values: BTreeSet<String> = caps["values"]
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                return Err(invalid());
            }
            return Ok(Requirement {
                key: caps["key"].to_string(),
                operator,
                values,
            });
        }

        let (key, operator, value) = if let Some(key) = term.strip_prefix('!') {
            (key, Operator::DoesNotExist, None)
        } else if let Some((key, value)) = term.split_once("!=") {
            (key, Operator::NotEquals, Some(value))
        } else if let Some((key, value)) = term.split_once("==") {
            (key, Operator::Equals, Some(value))
        } else if let Some((key, value)) = term.split_once('=') {
            (key, Operator::Equals, Some(value))
        } else {
            (term, Operator::Exists, None)
        };

        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) || key.contains(['(', ')', '!', '=']) {
            return Err(invalid());
        }
        let values = match value {
            Some(v) => {
                let v = v.trim();
                if v.contains(char::is_whitespace) || v.contains(['(', ')', '!', '=', ',']) {
                    return Err(invalid());
                }
                BTreeSet::from([v.to_string()])
            }
            None => BTreeSet::new(),
        };
        Ok(Requirement {
            key: key.to_string(),
            operator,
            values,
        })
    }
}

impl FromStr for LabelSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in split_terms(s) {
            let term = term.trim();
            if term.is_empty() {
                if s.trim().is_empty() {
                    continue;
                }
                return Err(Error::PatchTarget(format!("empty term in selector '{}'", s)));
            }
            requirements.push(Self::parse_term(term)?);
        }
        Ok(Self { requirements })
    }
}

/// Split on commas outside of parentheses
fn split_terms(s: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&s[start..]);
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn manifest() -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {
                "name": "linstor-satellite.node-a",
                "namespace": "piraeus",
                "labels": {"app.kubernetes.io/component": "linstor-satellite"},
                "annotations": {"example.com/managed": "yes"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_label_selector_parse() {
        let sel: LabelSelector = "a=b, c==d,e!=f,g in (h, i),j notin (k),l,!m"
            .parse()
            .unwrap();
        let ops: Vec<Operator> = sel.requirements().iter().map(|r| r.operator).collect();
        assert_eq!(
            ops,
            vec![
                Operator::Equals,
                Operator::Equals,
                Operator::NotEquals,
                Operator::In,
                Operator::NotIn,
                Operator::Exists,
                Operator::DoesNotExist,
            ]
        );
        assert_eq!(sel.requirements()[3].values.len(), 2);
    }

    #[test]
    fn test_label_selector_invalid() {
        assert!("a in ()".parse::<LabelSelector>().is_err());
        assert!("a=b,,c".parse::<LabelSelector>().is_err());
        assert!("a b".parse::<LabelSelector>().is_err());
        assert!("".parse::<LabelSelector>().unwrap().requirements().is_empty());
    }

    #[test]
    fn test_label_selector_matches() {
        let sel: LabelSelector = "tier in (a,b),!legacy,zone!=x".parse().unwrap();
        assert!(sel.matches(&labels(&[("tier", "a")])));
        assert!(sel.matches(&labels(&[("tier", "b"), ("zone", "y")])));
        assert!(!sel.matches(&labels(&[("tier", "c")])));
        assert!(!sel.matches(&labels(&[("tier", "a"), ("legacy", "")])));
        assert!(!sel.matches(&labels(&[("tier", "a"), ("zone", "x")])));
    }

    #[test]
    fn test_selector_matches_identity() {
        let m = manifest();
        let sel = |s: Selector| CompiledSelector::compile(&s).unwrap().matches(&m);

        assert!(sel(Selector {
            kind: "DaemonSet".into(),
            ..Default::default()
        }));
        assert!(sel(Selector {
            group: "apps".into(),
            version: "v1".into(),
            name: "linstor-satellite\\..*".into(),
            namespace: "piraeus".into(),
            ..Default::default()
        }));
        assert!(!sel(Selector {
            kind: "Daemon".into(),
            ..Default::default()
        }));
        assert!(!sel(Selector {
            kind: "DaemonSet".into(),
            namespace: "other".into(),
            ..Default::default()
        }));
    }

    #[test]
    fn test_selector_matches_labels_and_annotations() {
        let m = manifest();
        let matching = CompiledSelector::compile(&Selector {
            label_selector: "app.kubernetes.io/component=linstor-satellite".into(),
            annotation_selector: "example.com/managed".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(matching.matches(&m));

        let other = CompiledSelector::compile(&Selector {
            label_selector: "app.kubernetes.io/component=linstor-controller".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(!other.matches(&m));
    }

    #[test]
    fn test_selector_invalid_pattern() {
        let err = CompiledSelector::compile(&Selector {
            name: "(unclosed".into(),
            ..Default::default()
        });
        assert!(err.is_err());
    }
}
