//! Kubernetes client for peering resources

use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, Client};
use peernet_api::discovery::{ForeignCluster, CLUSTER_ID_LABEL};
use tracing::debug;

use crate::DiscoveryError;

/// Source of ForeignCluster records keyed by cluster ID
#[async_trait]
pub trait ForeignClusterGetter: Send + Sync {
    async fn get_foreign_cluster_by_id(
        &self,
        cluster_id: &str,
    ) -> Result<ForeignCluster, DiscoveryError>;
}

/// PeeringClient wraps the Kubernetes client for peering lookups
#[derive(Clone)]
pub struct PeeringClient {
    client: Client,
}

impl PeeringClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ForeignClusterGetter for PeeringClient {
    /// Look up the single ForeignCluster labelled with `cluster_id`
    async fn get_foreign_cluster_by_id(
        &self,
        cluster_id: &str,
    ) -> Result<ForeignCluster, DiscoveryError> {
        let api: Api<ForeignCluster> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&format!("{}={}", CLUSTER_ID_LABEL, cluster_id));
        let mut list = api.list(&params).await?;

        debug!(cluster_id = %cluster_id, found = list.items.len(), "Listed ForeignClusters");
        match list.items.len() {
            0 => Err(DiscoveryError::ForeignClusterNotFound(cluster_id.to_string())),
            1 => Ok(list.items.remove(0)),
            count => Err(DiscoveryError::DuplicateForeignCluster {
                cluster_id: cluster_id.to_string(),
                count,
            }),
        }
    }
}
