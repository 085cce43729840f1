//! Strategic merge patch
//!
//! Kubernetes strategic merge semantics over untyped JSON: maps merge
//! recursively, `null` deletes a field, lists with a known merge key merge
//! element-wise, all other lists are replaced. Supported directives:
//! `$patch: merge|replace|delete` on maps and list elements,
//! `$deleteFromPrimitiveList/<field>`. `$setElementOrder/<field>` and
//! `$retainKeys` are accepted and ignored.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

const PATCH_DIRECTIVE: &str = "$patch";
const RETAIN_KEYS: &str = "$retainKeys";
const SET_ELEMENT_ORDER_PREFIX: &str = "$setElementOrder/";
const DELETE_FROM_PRIMITIVE_LIST_PREFIX: &str = "$deleteFromPrimitiveList/";

/// Merge key of a list field, given the names of the enclosing fields
fn merge_key(path: &[String], field: &str) -> Option<&'static str> {
    match field {
        "containers" | "initContainers" | "ephemeralContainers" | "volumes" | "env"
        | "imagePullSecrets" => Some("name"),
        "volumeMounts" => Some("mountPath"),
        "volumeDevices" => Some("devicePath"),
        "hostAliases" => Some("ip"),
        "topologySpreadConstraints" => Some("topologyKey"),
        "conditions" => Some("type"),
        "ports" => match path.last().map(String::as_str) {
            Some("containers") | Some("initContainers") | Some("ephemeralContainers") => {
                Some("containerPort")
            }
            _ => Some("port"),
        },
        _ => None,
    }
}

/// Apply a strategic merge patch to `original`, returning the result
pub fn strategic_merge(original: &Value, patch: &Value) -> Result<Value> {
    let (Some(original), Some(patch)) = (original.as_object(), patch.as_object()) else {
        return Err(merge_error(&[], "strategic merge requires two objects"));
    };
    match merge_map(original.clone(), patch, &[])? {
        Some(merged) => Ok(Value::Object(merged)),
        None => Err(merge_error(&[], "deleting the patched resource is not supported")),
    }
}

fn merge_error(path: &[String], reason: &str) -> Error {
    let target = if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    };
    Error::PatchApply {
        target,
        reason: reason.to_string(),
    }
}

fn child_path(path: &[String], field: &str) -> Vec<String> {
    let mut child = path.to_vec();
    child.push(field.to_string());
    child
}

/// Merge `patch` into `original`. `None` means the map was deleted.
fn merge_map(
    mut original: Map<String, Value>,
    patch: &Map<String, Value>,
    path: &[String],
) -> Result<Option<Map<String, Value>>> {
    match patch.get(PATCH_DIRECTIVE) {
        None => {}
        Some(Value::String(directive)) => match directive.as_str() {
            "merge" => {}
            "delete" => return Ok(None),
            "replace" => {
                return merge_map(Map::new(), &without_directive(patch), path);
            }
            other => {
                return Err(merge_error(
                    path,
                    &format!("unknown patch directive '{}'", other),
                ))
            }
        },
        Some(_) => return Err(merge_error(path, "patch directive must be a string")),
    }

    for (key, value) in patch {
        if key == PATCH_DIRECTIVE || key == RETAIN_KEYS || key.starts_with(SET_ELEMENT_ORDER_PREFIX) {
            continue;
        }

        if let Some(field) = key.strip_prefix(DELETE_FROM_PRIMITIVE_LIST_PREFIX) {
            let Value::Array(remove) = value else {
                return Err(merge_error(path, &format!("{} must be a list", key)));
            };
            if let Some(Value::Array(items)) = original.get_mut(field) {
                items.retain(|item| !remove.contains(item));
            }
            continue;
        }

        match value {
            Value::Null => {
                original.remove(key);
            }
            Value::Object(patch_map) => {
                let base = match original.remove(key) {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                if let Some(merged) = merge_map(base, patch_map, &child_path(path, key))? {
                    original.insert(key.clone(), Value::Object(merged));
                }
            }
            Value::Array(patch_items) => {
                let merged = match merge_key(path, key) {
                    Some(merge_key) => {
                        let base = match original.remove(key) {
                            Some(Value::Array(items)) => items,
                            _ => Vec::new(),
                        };
                        merge_list(base, patch_items, merge_key, &child_path(path, key))?
                    }
                    None => patch_items.clone(),
                };
                original.insert(key.clone(), Value::Array(merged));
            }
            scalar => {
                original.insert(key.clone(), scalar.clone());
            }
        }
    }

    Ok(Some(original))
}

/// Merge a list of objects identified by `merge_key`
fn merge_list(
    mut original: Vec<Value>,
    patch: &[Value],
    merge_key: &str,
    path: &[String],
) -> Result<Vec<Value>> {
    // Only a bare `- $patch: replace` element replaces the whole list. On a
    // keyed element the directive replaces that element alone.
    let replace = patch.iter().any(|item| match item {
        Value::Object(map) => {
            map.len() == 1 && map.get(PATCH_DIRECTIVE).and_then(Value::as_str) == Some("replace")
        }
        _ => false,
    });
    if replace {
        original.clear();
    }

    for item in patch {
        let Value::Object(item_map) = item else {
            if !original.contains(item) {
                original.push(item.clone());
            }
            continue;
        };

        // Bare list-level directive
        if item_map.len() == 1 && item_map.contains_key(PATCH_DIRECTIVE) {
            continue;
        }

        let Some(key_value) = item_map.get(merge_key) else {
            return Err(merge_error(
                path,
                &format!("list element is missing merge key '{}'", merge_key),
            ));
        };

        let existing = original
            .iter()
            .position(|e| e.get(merge_key) == Some(key_value));

        match existing {
            Some(pos) => {
                let base = match original[pos].take() {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                match merge_map(base, item_map, path)? {
                    Some(merged) => original[pos] = Value::Object(merged),
                    None => {
                        original.remove(pos);
                    }
                }
            }
            None => {
                if let Some(merged) = merge_map(Map::new(), item_map, path)? {
                    original.push(Value::Object(merged));
                }
            }
        }
    }

    Ok(original)
}

fn without_directive(map: &Map<String, Value>) -> Map<String, Value> {
    let mut map = map.clone();
    map.remove(PATCH_DIRECTIVE);
    map
}
