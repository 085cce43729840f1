//! LINSTOR storage controller access
//!
//! [`StorageController`] is the operator's view of a LINSTOR controller.
//! Implementations:
//! - [`LinstorClient`]: REST client with request deadline and rate limit
//! - [`CachingStorageController`]: short-lived read-through cache for node
//!   and storage pool queries
//! - [`FakeStorageController`]: in-memory controller for tests
//!
//! All implementations share the same idempotency contract: `get_node`
//! returns `None` for unknown nodes, delete-style calls succeed on unknown
//! objects and create-style calls succeed on existing objects.

pub mod cache;
pub mod client;
pub mod fake;
pub mod ratelimit;
pub mod types;

pub use cache::CachingStorageController;
pub use client::{LinstorClient, LinstorClientConfig};
pub use fake::FakeStorageController;
pub use ratelimit::RateLimiter;
pub use types::*;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

#[async_trait]
pub trait StorageController: Send + Sync {
    async fn controller_version(&self) -> Result<ControllerVersion>;

    /// Register a node. An existing registration is left as is.
    async fn register_node(&self, node: &Node) -> Result<()>;

    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    /// Node lookup bypassing any cache. Used for decisions that release a node.
    async fn get_node_fresh(&self, name: &str) -> Result<Option<Node>> {
        self.get_node(name).await
    }

    /// Delete a node registration. Fails while the node holds resources.
    async fn delete_node(&self, name: &str) -> Result<()>;

    /// Set the evacuate flag on a node
    async fn evacuate_node(&self, name: &str) -> Result<()>;

    async fn modify_node(&self, name: &str, modify: &PropsModify) -> Result<()>;

    async fn list_storage_pools(&self, node: &str) -> Result<Vec<StoragePool>>;

    async fn create_storage_pool(&self, node: &str, pool: &StoragePool) -> Result<()>;

    /// Prepare host devices and create a storage pool on top of them
    async fn create_device_pool(&self, node: &str, request: &PhysicalStorageCreate) -> Result<()>;

    async fn modify_storage_pool(&self, node: &str, pool: &str, modify: &PropsModify)
        -> Result<()>;

    async fn create_resource_definition(&self, name: &str) -> Result<()>;

    async fn delete_resource_definition(&self, name: &str) -> Result<()>;

    async fn create_resource(&self, definition: &str, node: &str) -> Result<()>;

    /// Resources placed on any of `nodes`; all resources if `nodes` is empty
    async fn list_resources(&self, nodes: &[String]) -> Result<Vec<Resource>>;

    async fn set_controller_properties(&self, modify: &PropsModify) -> Result<()>;
}

/// Whether a LINSTOR error reports an object that already exists
pub fn is_already_exists(error: &Error) -> bool {
    match error {
        Error::LinstorApi {
            status, message, ..
        } => *status == 409 || message.contains("already exists"),
        _ => false,
    }
}

// =============================================================================
// Connections
// =============================================================================

/// Settings shared by all LINSTOR connections
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub request_timeout: Duration,
    pub qps: f64,
    pub burst: u32,
    /// Zero disables the read cache
    pub cache_ttl: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            qps: 100.0,
            burst: 1,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// One storage controller connection per controller URL
pub struct Connections {
    settings: ConnectionSettings,
    controllers: DashMap<String, Arc<dyn StorageController>>,
}

impl Connections {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            controllers: DashMap::new(),
        }
    }

    /// Connection for `url`, created on first use
    pub fn for_url(&self, url: &str) -> Result<Arc<dyn StorageController>> {
        if let Some(existing) = self.controllers.get(url) {
            return Ok(existing.clone());
        }

        let client = LinstorClient::new(&LinstorClientConfig {
            base_url: url.to_string(),
            timeout: self.settings.request_timeout,
            qps: self.settings.qps,
            burst: self.settings.burst,
        })?;
        let controller: Arc<dyn StorageController> = if self.settings.cache_ttl.is_zero() {
            Arc::new(client)
        } else {
            Arc::new(CachingStorageController::new(client, self.settings.cache_ttl))
        };
        debug!(url, "Created LINSTOR connection");

        Ok(self
            .controllers
            .entry(url.to_string())
            .or_insert(controller)
            .clone())
    }

    /// Use `controller` for `url`
    pub fn insert(&self, url: &str, controller: Arc<dyn StorageController>) {
        self.controllers.insert(url.to_string(), controller);
    }
}
