//! Node field path expressions
//!
//! Paths are dotted field names with optional quoted map subscripts:
//! `metadata.name`, `metadata.labels['topology.kubernetes.io/zone']`.
//! A subscript key containing `*` is a glob over the map's keys; a path may
//! contain at most one such wildcard segment.

use serde_json::Value;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Segment {
    Field(String),
    Key(String),
    Wildcard(glob::Pattern),
}

/// A parsed field path
#[derive(Debug, Clone)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

/// Result of evaluating a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Value of a path without wildcard; empty if the field is missing
    Scalar(String),
    /// `(key, value)` of every entry matching the wildcard, ordered by key
    Matches(Vec<(String, String)>),
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::FieldPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };
        if raw.is_empty() {
            return Err(invalid("empty path"));
        }

        let chars: Vec<char> = raw.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        loop {
            let start = i;
            while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                i += 1;
            }
            let field: String = chars[start..i].iter().collect();
            if field.is_empty() {
                return Err(invalid("empty field name"));
            }
            if field.contains('*') {
                return Err(invalid("wildcards are only supported in map keys, e.g. ['*']"));
            }
            if !field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid("invalid character in field name"));
            }
            segments.push(Segment::Field(field));

            while i < chars.len() && chars[i] == '[' {
                i += 1;
                let quote = match chars.get(i) {
                    Some(q @ ('\'' | '"')) => *q,
                    _ => return Err(invalid("expected quoted key after '['")),
                };
                i += 1;
                let key_start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(invalid("unterminated key"));
                }
                let key: String = chars[key_start..i].iter().collect();
                i += 1;
                if chars.get(i) != Some(&']') {
                    return Err(invalid("expected ']' after key"));
                }
                i += 1;

                if key.is_empty() {
                    return Err(invalid("empty key"));
                }
                if key.contains('*') {
                    let pattern = glob::Pattern::new(&key)
                        .map_err(|e| invalid(&format!("invalid wildcard: {}", e)))?;
                    segments.push(Segment::Wildcard(pattern));
                } else {
                    segments.push(Segment::Key(key));
                }
            }

            if i == chars.len() {
                break;
            }
            if chars[i] != '.' {
                return Err(invalid("expected '.' or '['"));
            }
            i += 1;
            if i == chars.len() {
                return Err(invalid("trailing '.'"));
            }
        }

        let path = Self {
            raw: raw.to_string(),
            segments,
        };
        if path.wildcard_count() > 1 {
            return Err(invalid("at most one wildcard is supported"));
        }
        Ok(path)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn wildcard_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Wildcard(_)))
            .count()
    }

    pub fn has_wildcard(&self) -> bool {
        self.wildcard_count() > 0
    }

    /// Evaluate the path against an object
    pub fn resolve(&self, object: &Value) -> Resolved {
        match self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::Wildcard(_)))
        {
            None => Resolved::Scalar(
                walk(object, &self.segments)
                    .map(scalar)
                    .unwrap_or_default(),
            ),
            Some(pos) => {
                let Segment::Wildcard(pattern) = &self.segments[pos] else {
                    return Resolved::Matches(Vec::new());
                };
                let (prefix, rest) = (&self.segments[..pos], &self.segments[pos + 1..]);
                let mut matches: Vec<(String, String)> = walk(object, prefix)
                    .and_then(Value::as_object)
                    .map(|map| {
                        map.iter()
                            .filter(|(key, _)| pattern.matches(key))
                            .filter_map(|(key, value)| {
                                walk(value, rest).map(|v| (key.clone(), scalar(v)))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                matches.sort_by(|a, b| a.0.cmp(&b.0));
                Resolved::Matches(matches)
            }
        }
    }
}

impl FromStr for FieldPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn walk<'a>(object: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(object, |current, segment| match segment {
        Segment::Field(name) | Segment::Key(name) => current.get(name.as_str()),
        Segment::Wildcard(_) => None,
    })
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
