//! Access to NetworkConfig and TunnelEndpoint records
//!
//! The reconciler only talks to the API server through [`NetworkStore`], so
//! tests can substitute an in-memory store. Every write carries the
//! resourceVersion of the object passed in; a stale version surfaces as
//! [`CoreError::Conflict`].

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use peernet_api::{NetworkConfig, TunnelEndpoint};
use peernet_core::{CoreError, Result};

#[async_trait]
pub trait NetworkStore: Send + Sync {
    /// Get a NetworkConfig by name; `None` if it does not exist
    async fn get_network_config(&self, name: &str) -> Result<Option<NetworkConfig>>;

    /// List NetworkConfigs matching a label selector
    async fn list_network_configs(&self, label_selector: &str) -> Result<Vec<NetworkConfig>>;

    async fn create_network_config(&self, config: &NetworkConfig) -> Result<NetworkConfig>;

    /// Replace metadata and spec; status changes are ignored
    async fn replace_network_config(&self, config: &NetworkConfig) -> Result<NetworkConfig>;

    /// Replace the status subresource
    async fn replace_network_config_status(&self, config: &NetworkConfig) -> Result<NetworkConfig>;

    async fn get_tunnel_endpoint(&self, name: &str) -> Result<Option<TunnelEndpoint>>;

    async fn create_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint>;

    async fn replace_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint>;

    async fn replace_tunnel_endpoint_status(
        &self,
        endpoint: &TunnelEndpoint,
    ) -> Result<TunnelEndpoint>;

    async fn delete_tunnel_endpoint(&self, name: &str) -> Result<()>;
}

/// NetworkStore backed by the Kubernetes API server
pub struct KubeNetworkStore {
    configs: Api<NetworkConfig>,
    endpoints: Api<TunnelEndpoint>,
}

impl KubeNetworkStore {
    pub fn new(client: Client) -> Self {
        Self {
            configs: Api::all(client.clone()),
            endpoints: Api::all(client),
        }
    }
}

#[async_trait]
impl NetworkStore for KubeNetworkStore {
    async fn get_network_config(&self, name: &str) -> Result<Option<NetworkConfig>> {
        self.configs
            .get_opt(name)
            .await
            .map_err(|e| CoreError::from_kube(e, name))
    }

    async fn list_network_configs(&self, label_selector: &str) -> Result<Vec<NetworkConfig>> {
        let list = self
            .configs
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn create_network_config(&self, config: &NetworkConfig) -> Result<NetworkConfig> {
        let name = config.name_any();
        self.configs
            .create(&PostParams::default(), config)
            .await
            .map_err(|e| CoreError::from_kube(e, &name))
    }

    async fn replace_network_config(&self, config: &NetworkConfig) -> Result<NetworkConfig> {
        let name = config.name_any();
        self.configs
            .replace(&name, &PostParams::default(), config)
            .await
            .map_err(|e| CoreError::from_kube(e, &name))
    }

    async fn replace_network_config_status(&self, config: &NetworkConfig) -> Result<NetworkConfig> {
        let name = config.name_any();
        let data = serde_json::to_vec(config)?;
        self.configs
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| CoreError::from_kube(e, &name))
    }

    async fn get_tunnel_endpoint(&self, name: &str) -> Result<Option<TunnelEndpoint>> {
        self.endpoints
            .get_opt(name)
            .await
            .map_err(|e| CoreError::from_kube(e, name))
    }

    async fn create_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint> {
        let name = endpoint.name_any();
        self.endpoints
            .create(&PostParams::default(), endpoint)
            .await
            .map_err(|e| CoreError::from_kube(e, &name))
    }

    async fn replace_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint> {
        let name = endpoint.name_any();
        self.endpoints
            .replace(&name, &PostParams::default(), endpoint)
            .await
            .map_err(|e| CoreError::from_kube(e, &name))
    }

    async fn replace_tunnel_endpoint_status(
        &self,
        endpoint: &TunnelEndpoint,
    ) -> Result<TunnelEndpoint> {
        let name = endpoint.name_any();
        let data = serde_json::to_vec(endpoint)?;
        self.endpoints
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| CoreError::from_kube(e, &name))
    }

    async fn delete_tunnel_endpoint(&self, name: &str) -> Result<()> {
        match self.endpoints.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => Err(CoreError::from_kube(e, name)),
        }
    }
}
