//! LINSTOR REST client

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

use super::ratelimit::RateLimiter;
use super::types::*;
use super::{is_already_exists, StorageController};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct LinstorClientConfig {
    /// e.g. `http://linstor-controller.piraeus-datastore.svc:3370`
    pub base_url: String,
    /// Deadline of every request
    pub timeout: Duration,
    pub qps: f64,
    pub burst: u32,
}

/// REST client for one LINSTOR controller
#[derive(Debug)]
pub struct LinstorClient {
    http: reqwest::Client,
    base: Url,
    limiter: RateLimiter,
}

impl LinstorClient {
    pub fn new(config: &LinstorClientConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            Error::Configuration(format!("invalid LINSTOR URL '{}': {}", config.base_url, e))
        })?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("piraeus-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base,
            limiter: RateLimiter::new(config.qps, config.burst),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let path = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        self.base
            .join(&format!("/v1/{}", path))
            .map_err(|e| Error::Internal(format!("failed to build LINSTOR URL: {}", e)))
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        Ok(self.http.request(method, self.url(segments)?))
    }

    /// Send a request, turning non-success responses into [`Error::LinstorApi`]
    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        self.limiter.acquire().await;
        let response = request.send().await?;
        let status = response.status();
        trace!(operation, %status, "LINSTOR response");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<Vec<ApiCallRc>>(&body) {
            Ok(rcs) if !rcs.is_empty() => rcs
                .into_iter()
                .map(|rc| rc.message)
                .collect::<Vec<_>>()
                .join("; "),
            _ => body,
        };
        Err(Error::LinstorApi {
            operation: operation.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, segments: &[&str]) -> Result<T> {
        let response = self
            .send(operation, self.request(Method::GET, segments)?)
            .await?;
        response
            .json()
            .await
            .map_err(|e| Error::LinstorResponseParse(format!("{}: {}", operation, e)))
    }

    async fn write<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<()> {
        let mut request = self.request(method, segments)?;
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(operation, request).await.map(|_| ())
    }
}

/// Treat "already exists" as success
fn tolerate_exists(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if is_already_exists(&e) => Ok(()),
        other => other,
    }
}

/// Treat "not found" as success
fn tolerate_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_linstor_not_found() => Ok(()),
        other => other,
    }
}

#[async_trait]
impl StorageController for LinstorClient {
    async fn controller_version(&self) -> Result<ControllerVersion> {
        self.get_json("get controller version", &["controller", "version"])
            .await
    }

    async fn register_node(&self, node: &Node) -> Result<()> {
        debug!(node = %node.name, "Registering LINSTOR node");
        tolerate_exists(
            self.write("create node", Method::POST, &["nodes"], Some(node))
                .await,
        )
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        match self.get_json("get node", &["nodes", name]).await {
            Ok(node) => Ok(Some(node)),
            Err(e) if e.is_linstor_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        tolerate_not_found(
            self.write::<()>("delete node", Method::DELETE, &["nodes", name], None)
                .await,
        )
    }

    async fn evacuate_node(&self, name: &str) -> Result<()> {
        self.write::<()>("evacuate node", Method::PUT, &["nodes", name, "evacuate"], None)
            .await
    }

    async fn modify_node(&self, name: &str, modify: &PropsModify) -> Result<()> {
        self.write("modify node", Method::PUT, &["nodes", name], Some(modify))
            .await
    }

    async fn list_storage_pools(&self, node: &str) -> Result<Vec<StoragePool>> {
        match self
            .get_json("list storage pools", &["nodes", node, "storage-pools"])
            .await
        {
            Err(e) if e.is_linstor_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    async fn create_storage_pool(&self, node: &str, pool: &StoragePool) -> Result<()> {
        tolerate_exists(
            self.write(
                "create storage pool",
                Method::POST,
                &["nodes", node, "storage-pools"],
                Some(pool),
            )
            .await,
        )
    }

    async fn create_device_pool(&self, node: &str, request: &PhysicalStorageCreate) -> Result<()> {
        tolerate_exists(
            self.write(
                "create physical storage",
                Method::POST,
                &["physical-storage", node],
                Some(request),
            )
            .await,
        )
    }

    async fn modify_storage_pool(
        &self,
        node: &str,
        pool: &str,
        modify: &PropsModify,
    ) -> Result<()> {
        self.write(
            "modify storage pool",
            Method::PUT,
            &["nodes", node, "storage-pools", pool],
            Some(modify),
        )
        .await
    }

    async fn create_resource_definition(&self, name: &str) -> Result<()> {
        let body = ResourceDefinitionCreate {
            resource_definition: ResourceDefinition {
                name: name.to_string(),
            },
        };
        tolerate_exists(
            self.write(
                "create resource definition",
                Method::POST,
                &["resource-definitions"],
                Some(&body),
            )
            .await,
        )
    }

    async fn delete_resource_definition(&self, name: &str) -> Result<()> {
        tolerate_not_found(
            self.write::<()>(
                "delete resource definition",
                Method::DELETE,
                &["resource-definitions", name],
                None,
            )
            .await,
        )
    }

    async fn create_resource(&self, definition: &str, node: &str) -> Result<()> {
        let body = ResourceCreate {
            resource: Resource {
                name: definition.to_string(),
                node_name: node.to_string(),
                flags: Vec::new(),
            },
        };
        tolerate_exists(
            self.write(
                "create resource",
                Method::POST,
                &["resource-definitions", definition, "resources", node],
                Some(&body),
            )
            .await,
        )
    }

    async fn list_resources(&self, nodes: &[String]) -> Result<Vec<Resource>> {
        let query: Vec<(&str, &str)> = nodes.iter().map(|n| ("nodes", n.as_str())).collect();
        let request = self
            .request(Method::GET, &["view", "resources"])?
            .query(&query);
        let response = self.send("list resources", request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        response
            .json()
            .await
            .map_err(|e| Error::LinstorResponseParse(format!("list resources: {}", e)))
    }

    async fn set_controller_properties(&self, modify: &PropsModify) -> Result<()> {
        self.write(
            "set controller properties",
            Method::PUT,
            &["controller", "properties"],
            Some(modify),
        )
        .await
    }
}
