//! In-memory LINSTOR controller
//!
//! Keeps nodes, storage pools, resource definitions and resources in memory
//! and answers the way a real controller does for the calls the operator
//! makes. Used by the lifecycle and reconciler tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::types::*;
use super::StorageController;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    /// node -> pool name -> pool
    pools: BTreeMap<String, BTreeMap<String, StoragePool>>,
    /// node -> physical storage requests
    device_requests: BTreeMap<String, Vec<PhysicalStorageCreate>>,
    definitions: BTreeSet<String>,
    resources: Vec<Resource>,
    controller_props: BTreeMap<String, String>,
}

/// In-memory [`StorageController`]
#[derive(Debug, Default)]
pub struct FakeStorageController {
    state: RwLock<State>,
    unavailable: AtomicBool,
    calls: DashMap<&'static str, usize>,
}

fn not_found(operation: &str, message: String) -> Error {
    Error::LinstorApi {
        operation: operation.to_string(),
        status: 404,
        message,
    }
}

impl FakeStorageController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with 503 while `unavailable` is set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Override the connection status of a registered node
    pub async fn set_connection_status(&self, node: &str, status: &str) {
        if let Some(n) = self.state.write().await.nodes.get_mut(node) {
            n.connection_status = status.to_string();
        }
    }

    /// Number of calls made to `operation`
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.get(operation).map(|c| *c).unwrap_or(0)
    }

    pub async fn node(&self, name: &str) -> Option<Node> {
        self.state.read().await.nodes.get(name).cloned()
    }

    pub async fn pools(&self, node: &str) -> Vec<StoragePool> {
        self.state
            .read()
            .await
            .pools
            .get(node)
            .map(|pools| pools.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn device_requests(&self, node: &str) -> Vec<PhysicalStorageCreate> {
        self.state
            .read()
            .await
            .device_requests
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn controller_properties(&self) -> BTreeMap<String, String> {
        self.state.read().await.controller_props.clone()
    }

    fn enter(&self, operation: &'static str) -> Result<()> {
        *self.calls.entry(operation).or_insert(0) += 1;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::LinstorApi {
                operation: operation.to_string(),
                status: 503,
                message: "controller unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageController for FakeStorageController {
    async fn controller_version(&self) -> Result<ControllerVersion> {
        self.enter("controller_version")?;
        Ok(ControllerVersion {
            version: "1.29.0".into(),
            rest_api_version: "1.22.0".into(),
            git_hash: "fake".into(),
            build_time: String::new(),
        })
    }

    async fn register_node(&self, node: &Node) -> Result<()> {
        self.enter("register_node")?;
        let mut state = self.state.write().await;
        if state.nodes.contains_key(&node.name) {
            return Ok(());
        }

        let mut node = node.clone();
        node.connection_status =
            if !node.net_interfaces.is_empty() && node.node_type == NODE_TYPE_SATELLITE {
                CONNECTION_ONLINE.to_string()
            } else {
                "OFFLINE".to_string()
            };
        debug!(node = %node.name, status = %node.connection_status, "Fake node registered");
        state.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        self.enter("get_node")?;
        Ok(self.state.read().await.nodes.get(name).cloned())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        self.enter("delete_node")?;
        let mut state = self.state.write().await;
        if let Some(resource) = state.resources.iter().find(|r| r.node_name == name) {
            return Err(Error::LinstorApi {
                operation: "delete node".into(),
                status: 500,
                message: format!(
                    "cannot delete node '{}', it still contains resource '{}'",
                    name, resource.name
                ),
            });
        }
        state.nodes.remove(name);
        state.pools.remove(name);
        state.device_requests.remove(name);
        Ok(())
    }

    async fn evacuate_node(&self, name: &str) -> Result<()> {
        self.enter("evacuate_node")?;
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(name)
            .ok_or_else(|| not_found("evacuate node", format!("node '{}' not found", name)))?;
        if !node.is_evacuating() {
            node.flags.push(FLAG_EVACUATE.to_string());
        }
        Ok(())
    }

    async fn modify_node(&self, name: &str, modify: &PropsModify) -> Result<()> {
        self.enter("modify_node")?;
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(name)
            .ok_or_else(|| not_found("modify node", format!("node '{}' not found", name)))?;
        modify.apply_to(&mut node.props);
        Ok(())
    }

    async fn list_storage_pools(&self, node: &str) -> Result<Vec<StoragePool>> {
        self.enter("list_storage_pools")?;
        Ok(self
            .state
            .read()
            .await
            .pools
            .get(node)
            .map(|pools| pools.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_storage_pool(&self, node: &str, pool: &StoragePool) -> Result<()> {
        self.enter("create_storage_pool")?;
        let mut state = self.state.write().await;
        if !state.nodes.contains_key(node) {
            return Err(not_found(
                "create storage pool",
                format!("node '{}' not found", node),
            ));
        }
        let mut pool = pool.clone();
        pool.node_name = node.to_string();
        state
            .pools
            .entry(node.to_string())
            .or_default()
            .entry(pool.storage_pool_name.clone())
            .or_insert(pool);
        Ok(())
    }

    async fn create_device_pool(&self, node: &str, request: &PhysicalStorageCreate) -> Result<()> {
        self.enter("create_device_pool")?;
        let mut state = self.state.write().await;
        if !state.nodes.contains_key(node) {
            return Err(not_found(
                "create physical storage",
                format!("node '{}' not found", node),
            ));
        }
        state
            .device_requests
            .entry(node.to_string())
            .or_default()
            .push(request.clone());

        if let Some(sp) = &request.with_storage_pool {
            let pool = StoragePool {
                storage_pool_name: sp.name.clone(),
                node_name: node.to_string(),
                provider_kind: request.provider_kind.clone(),
                props: sp.props.clone(),
            };
            state
                .pools
                .entry(node.to_string())
                .or_default()
                .entry(pool.storage_pool_name.clone())
                .or_insert(pool);
        }
        Ok(())
    }

    async fn modify_storage_pool(
        &self,
        node: &str,
        pool: &str,
        modify: &PropsModify,
    ) -> Result<()> {
        self.enter("modify_storage_pool")?;
        let mut state = self.state.write().await;
        let existing = state
            .pools
            .get_mut(node)
            .and_then(|pools| pools.get_mut(pool))
            .ok_or_else(|| {
                not_found(
                    "modify storage pool",
                    format!("storage pool '{}' on node '{}' not found", pool, node),
                )
            })?;
        modify.apply_to(&mut existing.props);
        Ok(())
    }

    async fn create_resource_definition(&self, name: &str) -> Result<()> {
        self.enter("create_resource_definition")?;
        self.state.write().await.definitions.insert(name.to_string());
        Ok(())
    }

    async fn delete_resource_definition(&self, name: &str) -> Result<()> {
        self.enter("delete_resource_definition")?;
        let mut state = self.state.write().await;
        state.definitions.remove(name);
        state.resources.retain(|r| r.name != name);
        Ok(())
    }

    async fn create_resource(&self, definition: &str, node: &str) -> Result<()> {
        self.enter("create_resource")?;
        let mut state = self.state.write().await;
        if !state.definitions.contains(definition) {
            return Err(not_found(
                "create resource",
                format!("resource definition '{}' not found", definition),
            ));
        }
        if !state.nodes.contains_key(node) {
            return Err(not_found(
                "create resource",
                format!("node '{}' not found", node),
            ));
        }
        if !state
            .resources
            .iter()
            .any(|r| r.name == definition && r.node_name == node)
        {
            state.resources.push(Resource {
                name: definition.to_string(),
                node_name: node.to_string(),
                flags: Vec::new(),
            });
        }
        Ok(())
    }

    async fn list_resources(&self, nodes: &[String]) -> Result<Vec<Resource>> {
        self.enter("list_resources")?;
        Ok(self
            .state
            .read()
            .await
            .resources
            .iter()
            .filter(|r| nodes.is_empty() || nodes.contains(&r.node_name))
            .cloned()
            .collect())
    }

    async fn set_controller_properties(&self, modify: &PropsModify) -> Result<()> {
        self.enter("set_controller_properties")?;
        modify.apply_to(&mut self.state.write().await.controller_props);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn satellite(name: &str) -> Node {
        Node::satellite(name, "10.0.0.1", 3366, "PLAIN")
    }

    #[tokio::test]
    async fn test_register_node_online() {
        let fake = FakeStorageController::new();
        fake.register_node(&satellite("node-a")).await.unwrap();
        assert!(fake.get_node("node-a").await.unwrap().unwrap().is_online());

        let bare = Node {
            name: "node-b".into(),
            node_type: NODE_TYPE_SATELLITE.into(),
            ..Default::default()
        };
        fake.register_node(&bare).await.unwrap();
        assert!(!fake.get_node("node-b").await.unwrap().unwrap().is_online());

        // Re-registering keeps the existing node
        fake.set_connection_status("node-a", "OFFLINE").await;
        fake.register_node(&satellite("node-a")).await.unwrap();
        assert!(!fake.node("node-a").await.unwrap().is_online());
    }

    #[tokio::test]
    async fn test_delete_blocked_by_resources() {
        let fake = FakeStorageController::new();
        fake.register_node(&satellite("node-a")).await.unwrap();
        fake.create_resource_definition("resource1").await.unwrap();
        fake.create_resource("resource1", "node-a").await.unwrap();
        fake.create_resource("resource1", "node-a").await.unwrap();

        let resources = fake.list_resources(&["node-a".to_string()]).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert!(fake.list_resources(&["node-b".to_string()]).await.unwrap().is_empty());

        let err = fake.delete_node("node-a").await.unwrap_err();
        assert!(err.to_string().contains("still contains resource 'resource1'"));

        fake.delete_resource_definition("resource1").await.unwrap();
        fake.delete_node("node-a").await.unwrap();
        assert!(fake.get_node("node-a").await.unwrap().is_none());
        fake.delete_node("node-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_objects() {
        let fake = FakeStorageController::new();
        assert_matches!(
            fake.evacuate_node("node-a").await,
            Err(e) if e.is_linstor_not_found()
        );
        assert_matches!(
            fake.create_resource("missing", "node-a").await,
            Err(e) if e.is_linstor_not_found()
        );
        assert_matches!(
            fake.modify_storage_pool("node-a", "pool", &PropsModify::default())
                .await,
            Err(e) if e.is_linstor_not_found()
        );
    }

    #[tokio::test]
    async fn test_evacuate_is_idempotent() {
        let fake = FakeStorageController::new();
        fake.register_node(&satellite("node-a")).await.unwrap();
        fake.evacuate_node("node-a").await.unwrap();
        fake.evacuate_node("node-a").await.unwrap();
        assert_eq!(fake.node("node-a").await.unwrap().flags, vec![FLAG_EVACUATE]);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let fake = FakeStorageController::new();
        fake.set_unavailable(true);
        let err = fake.controller_version().await.unwrap_err();
        assert!(err.is_transient());
        fake.set_unavailable(false);
        assert_eq!(fake.controller_version().await.unwrap().version, "1.29.0");
        assert_eq!(fake.call_count("controller_version"), 2);
    }
}
