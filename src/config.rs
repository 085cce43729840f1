//! Operator configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::linstor::ConnectionSettings;
use crate::manifests::ImageConfig;

/// Namespace file mounted into every pod with a service account
pub const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Runtime configuration shared by all reconcilers
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace of generated workloads
    pub namespace: String,
    /// Image pull secret added to generated pods
    pub pull_secret: Option<String>,
    /// Requeue interval of healthy objects
    pub requeue_interval: Duration,
    /// Poll interval while a satellite is evacuated
    pub evacuation_poll: Duration,
    pub linstor: ConnectionSettings,
    pub images: ImageConfig,
    pub health_addr: SocketAddr,
    pub metrics_addr: SocketAddr,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "piraeus-datastore".into(),
            pull_secret: None,
            requeue_interval: Duration::from_secs(300),
            evacuation_poll: Duration::from_secs(30),
            linstor: ConnectionSettings::default(),
            images: ImageConfig::default(),
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// The explicit namespace, or the one of the operator's service account
pub fn resolve_namespace(explicit: Option<&str>, namespace_file: &Path) -> Result<String> {
    if let Some(ns) = explicit.filter(|ns| !ns.is_empty()) {
        return Ok(ns.to_string());
    }
    let ns = std::fs::read_to_string(namespace_file).map_err(|e| {
        Error::Configuration(format!(
            "no namespace given and {} unreadable: {}",
            namespace_file.display(),
            e
        ))
    })?;
    let ns = ns.trim();
    if ns.is_empty() {
        return Err(Error::Configuration(format!(
            "{} is empty",
            namespace_file.display()
        )));
    }
    debug!(namespace = ns, "Using service account namespace");
    Ok(ns.to_string())
}

/// Image configuration from `path`, or the built-in default
pub fn load_images(path: Option<&Path>) -> Result<ImageConfig> {
    match path {
        Some(path) => ImageConfig::load(path),
        None => {
            info!("Using built-in image configuration");
            Ok(ImageConfig::default())
        }
    }
}

/// Parse a listen address
pub fn parse_addr(name: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("invalid {} address '{}': {}", name, addr, e)))
}
