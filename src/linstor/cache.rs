//! Read-through cache for node and storage pool queries
//!
//! Entries expire after a fixed time and are dropped whenever the operator
//! changes the node they describe. Unknown nodes and resource listings are
//! never cached: they decide whether evacuation has completed.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::trace;

use super::types::*;
use super::StorageController;
use crate::error::Result;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    fetched: Instant,
}

pub struct CachingStorageController<S> {
    inner: S,
    ttl: Duration,
    nodes: DashMap<String, Entry<Option<Node>>>,
    pools: DashMap<String, Entry<Vec<StoragePool>>>,
}

impl<S: StorageController> CachingStorageController<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            nodes: DashMap::new(),
            pools: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop everything cached about `node`
    pub fn invalidate(&self, node: &str) {
        self.nodes.remove(node);
        self.pools.remove(node);
    }

    fn fresh<T: Clone>(&self, map: &DashMap<String, Entry<T>>, key: &str) -> Option<T> {
        let entry = map.get(key)?;
        if entry.fetched.elapsed() < self.ttl {
            trace!(key, "LINSTOR cache hit");
            Some(entry.value.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl<S: StorageController> StorageController for CachingStorageController<S> {
    async fn controller_version(&self) -> Result<ControllerVersion> {
        self.inner.controller_version().await
    }

    async fn register_node(&self, node: &Node) -> Result<()> {
        self.invalidate(&node.name);
        self.inner.register_node(node).await
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        if let Some(node) = self.fresh(&self.nodes, name) {
            return Ok(node);
        }
        let node = self.inner.get_node(name).await?;
        match &node {
            Some(_) => {
                self.nodes.insert(
                    name.to_string(),
                    Entry {
                        value: node.clone(),
                        fetched: Instant::now(),
                    },
                );
            }
            None => {
                self.nodes.remove(name);
            }
        }
        Ok(node)
    }

    async fn get_node_fresh(&self, name: &str) -> Result<Option<Node>> {
        self.invalidate(name);
        self.get_node(name).await
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        self.invalidate(name);
        self.inner.delete_node(name).await
    }

    async fn evacuate_node(&self, name: &str) -> Result<()> {
        self.invalidate(name);
        self.inner.evacuate_node(name).await
    }

    async fn modify_node(&self, name: &str, modify: &PropsModify) -> Result<()> {
        self.invalidate(name);
        self.inner.modify_node(name, modify).await
    }

    async fn list_storage_pools(&self, node: &str) -> Result<Vec<StoragePool>> {
        if let Some(pools) = self.fresh(&self.pools, node) {
            return Ok(pools);
        }
        let pools = self.inner.list_storage_pools(node).await?;
        self.pools.insert(
            node.to_string(),
            Entry {
                value: pools.clone(),
                fetched: Instant::now(),
            },
        );
        Ok(pools)
    }

    async fn create_storage_pool(&self, node: &str, pool: &StoragePool) -> Result<()> {
        self.invalidate(node);
        self.inner.create_storage_pool(node, pool).await
    }

    async fn create_device_pool(&self, node: &str, request: &PhysicalStorageCreate) -> Result<()> {
        self.invalidate(node);
        self.inner.create_device_pool(node, request).await
    }

    async fn modify_storage_pool(
        &self,
        node: &str,
        pool: &str,
        modify: &PropsModify,
    ) -> Result<()> {
        self.invalidate(node);
        self.inner.modify_storage_pool(node, pool, modify).await
    }

    async fn create_resource_definition(&self, name: &str) -> Result<()> {
        self.inner.create_resource_definition(name).await
    }

    async fn delete_resource_definition(&self, name: &str) -> Result<()> {
        self.inner.delete_resource_definition(name).await
    }

    async fn create_resource(&self, definition: &str, node: &str) -> Result<()> {
        self.inner.create_resource(definition, node).await
    }

    async fn list_resources(&self, nodes: &[String]) -> Result<Vec<Resource>> {
        self.inner.list_resources(nodes).await
    }

    async fn set_controller_properties(&self, modify: &PropsModify) -> Result<()> {
        self.inner.set_controller_properties(modify).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linstor::FakeStorageController;

    fn cached(ttl: Duration) -> CachingStorageController<FakeStorageController> {
        CachingStorageController::new(FakeStorageController::new(), ttl)
    }

    #[tokio::test]
    async fn test_node_queries_are_cached() {
        let cache = cached(Duration::from_secs(60));
        cache
            .register_node(&Node::satellite("node-a", "10.0.0.1", 3366, "PLAIN"))
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(cache.get_node("node-a").await.unwrap().is_some());
        }
        assert_eq!(cache.inner().call_count("get_node"), 1);

        // Unknown nodes always go to the controller
        assert!(cache.get_node("node-b").await.unwrap().is_none());
        assert!(cache.get_node("node-b").await.unwrap().is_none());
        assert_eq!(cache.inner().call_count("get_node"), 3);
    }

    #[tokio::test]
    async fn test_fresh_lookup_bypasses_cache() {
        let cache = cached(Duration::from_secs(60));
        cache
            .register_node(&Node::satellite("node-a", "10.0.0.1", 3366, "PLAIN"))
            .await
            .unwrap();
        cache.get_node("node-a").await.unwrap();
        cache.get_node("node-a").await.unwrap();
        assert_eq!(cache.inner().call_count("get_node"), 1);

        // Removed behind the cache's back
        cache.inner().delete_node("node-a").await.unwrap();
        assert!(cache.get_node("node-a").await.unwrap().is_some());
        assert!(cache.get_node_fresh("node-a").await.unwrap().is_none());
        assert!(cache.get_node("node-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mutation_invalidates() {
        let cache = cached(Duration::from_secs(60));
        cache
            .register_node(&Node::satellite("node-a", "10.0.0.1", 3366, "PLAIN"))
            .await
            .unwrap();
        let node = cache.get_node("node-a").await.unwrap().unwrap();
        assert!(!node.is_evacuating());

        cache.evacuate_node("node-a").await.unwrap();
        let node = cache.get_node("node-a").await.unwrap().unwrap();
        assert!(node.is_evacuating());
    }

    #[tokio::test]
    async fn test_expiry_and_resources_uncached() {
        let cache = cached(Duration::ZERO);
        cache
            .register_node(&Node::satellite("node-a", "10.0.0.1", 3366, "PLAIN"))
            .await
            .unwrap();
        cache.get_node("node-a").await.unwrap();
        cache.get_node("node-a").await.unwrap();
        assert_eq!(cache.inner().call_count("get_node"), 2);

        let nodes = vec!["node-a".to_string()];
        cache.list_resources(&nodes).await.unwrap();
        cache.list_resources(&nodes).await.unwrap();
        assert_eq!(cache.inner().call_count("list_resources"), 2);
    }
}
