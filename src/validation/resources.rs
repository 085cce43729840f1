//! Validation entry points for the Piraeus resources
//!
//! Each function takes the submitted resource and, for updates, the
//! previously accepted one. Warnings are returned alongside the errors and
//! never affect admissibility.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{
    validate_patches, validate_properties, validate_storage_pools,
    warn_on_bare_satellite_pod_patch, ErrorList, FieldError, Path, ValidationResult,
};
use crate::crd::{
    ExternalController, LinstorCluster, LinstorSatellite, LinstorSatelliteConfiguration,
    LinstorStoragePool,
};

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

static QUALIFIED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("static regex")
});

static DNS_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("static regex")
});

// =============================================================================
// Resources
// =============================================================================

pub fn validate_cluster(cluster: &LinstorCluster) -> ValidationResult {
    let spec = Path::new("spec");
    let mut errors = ErrorList::new();

    errors.extend(validate_node_selector(
        &cluster.spec.node_selector,
        &spec.child("nodeSelector"),
    ));
    errors.extend(validate_external_controller(
        &cluster.spec.external_controller,
        &spec.child("externalController"),
    ));
    for (i, property) in cluster.spec.properties.iter().enumerate() {
        if property.name.is_empty() {
            errors.push(FieldError::required(
                &spec.child("properties").index(i).child("name"),
                "Property name must not be empty",
            ));
        }
    }
    errors.extend(validate_patches(&cluster.spec.patches, &spec.child("patches")));
    if let Some(controller) = &cluster.spec.controller {
        errors.extend(validate_pod_template(
            &controller.pod_template,
            &spec.child("controller").child("podTemplate"),
        ));
    }

    ValidationResult {
        errors,
        warnings: Vec::new(),
    }
}

pub fn validate_satellite(
    satellite: &LinstorSatellite,
    old: Option<&LinstorSatellite>,
) -> ValidationResult {
    let spec = Path::new("spec");
    let mut errors = validate_external_controller(
        &satellite.spec.cluster_ref.external_controller,
        &spec.child("clusterRef").child("externalController"),
    );

    let old_pools = old.map(|o| o.spec.storage_pools.as_slice()).unwrap_or(&[]);
    errors.extend(validate_pools_and_properties(
        &satellite.spec.storage_pools,
        old_pools,
        &spec,
    ));
    errors.extend(validate_properties(&satellite.spec.properties, &spec.child("properties")));
    errors.extend(validate_patches(&satellite.spec.patches, &spec.child("patches")));

    ValidationResult {
        errors,
        warnings: warn_on_bare_satellite_pod_patch(&satellite.spec.patches, &spec.child("patches")),
    }
}

pub fn validate_satellite_configuration(
    config: &LinstorSatelliteConfiguration,
    old: Option<&LinstorSatelliteConfiguration>,
) -> ValidationResult {
    let spec = Path::new("spec");
    let mut errors = validate_node_selector(&config.spec.node_selector, &spec.child("nodeSelector"));

    let old_pools = old.map(|o| o.spec.storage_pools.as_slice()).unwrap_or(&[]);
    errors.extend(validate_pools_and_properties(&config.spec.storage_pools, old_pools, &spec));
    errors.extend(validate_properties(&config.spec.properties, &spec.child("properties")));
    errors.extend(validate_patches(&config.spec.patches, &spec.child("patches")));
    errors.extend(validate_pod_template(&config.spec.pod_template, &spec.child("podTemplate")));

    ValidationResult {
        errors,
        warnings: warn_on_bare_satellite_pod_patch(&config.spec.patches, &spec.child("patches")),
    }
}

fn validate_pools_and_properties(
    pools: &[LinstorStoragePool],
    old: &[LinstorStoragePool],
    spec: &Path,
) -> ErrorList {
    let path = spec.child("storagePools");
    let mut errors = validate_storage_pools(pools, old, &path);
    for (i, pool) in pools.iter().enumerate() {
        errors.extend(validate_properties(
            &pool.properties,
            &path.index(i).child("properties"),
        ));
    }
    errors
}

// =============================================================================
// Fields
// =============================================================================

/// The URL must parse and use http or https
pub fn validate_external_controller(
    external: &Option<ExternalController>,
    path: &Path,
) -> ErrorList {
    let Some(external) = external else {
        return ErrorList::new();
    };
    let path = path.child("url");
    match reqwest::Url::parse(&external.url) {
        Err(e) => vec![FieldError::invalid(
            &path,
            external.url.as_str(),
            format!("Invalid URL format: {}", e),
        )],
        Ok(url) if !matches!(url.scheme(), "http" | "https") => vec![FieldError::not_supported(
            &path.child("scheme"),
            url.scheme(),
            &["http", "https"],
        )],
        Ok(_) => ErrorList::new(),
    }
}

/// Keys must be qualified names, values valid label values
pub fn validate_node_selector(selector: &BTreeMap<String, String>, path: &Path) -> ErrorList {
    let mut errors = ErrorList::new();
    for (key, value) in selector {
        let path = path.key(key);
        if let Some(reason) = qualified_name_error(key) {
            errors.push(FieldError::invalid(&path, key.as_str(), reason));
        }
        if !value.is_empty() && (value.len() > MAX_NAME_LEN || !QUALIFIED_NAME.is_match(value)) {
            errors.push(FieldError::invalid(
                &path,
                value.as_str(),
                "a valid label value must be 63 characters or less and consist of alphanumeric characters, '-', '_' or '.'",
            ));
        }
    }
    errors
}

fn qualified_name_error(key: &str) -> Option<&'static str> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !DNS_SUBDOMAIN.is_match(prefix) {
            return Some("prefix part must be a lowercase DNS subdomain");
        }
    }
    if name.is_empty() || name.len() > MAX_NAME_LEN || !QUALIFIED_NAME.is_match(name) {
        return Some("name part must be 63 characters or less and consist of alphanumeric characters, '-', '_' or '.'");
    }
    None
}

/// A pod template override must decode as a PodTemplateSpec
pub fn validate_pod_template(template: &Option<Value>, path: &Path) -> ErrorList {
    let Some(template) = template else {
        return ErrorList::new();
    };
    // Partial templates may omit the containers list
    let mut template = template.clone();
    if let Some(spec) = template.get_mut("spec").and_then(Value::as_object_mut) {
        spec.entry("containers").or_insert_with(|| Value::Array(Vec::new()));
    }
    match serde_json::from_value::<PodTemplateSpec>(template) {
        Ok(_) => ErrorList::new(),
        Err(e) => vec![FieldError::invalid(
            path,
            "<object>",
            format!("Failed to decode pod template: {}", e),
        )],
    }
}
