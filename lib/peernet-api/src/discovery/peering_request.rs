use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{AnnouncesCluster, ClusterIdentity};

/// PeeringRequest from the discovery layer - a peer cluster asking to
/// establish an incoming peering with this cluster
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "discovery.peernet.io",
    version = "v1alpha1",
    kind = "PeeringRequest",
    plural = "peeringrequests",
    derive = "Default",
)]
#[serde(rename_all = "camelCase")]
pub struct PeeringRequestSpec {
    /// Identity of the requesting cluster
    pub cluster_identity: ClusterIdentity,

    /// Namespace on the requesting cluster that hosts the peering resources
    #[serde(default)]
    pub namespace: String,
}

impl AnnouncesCluster for PeeringRequest {
    fn announced_cluster_id(&self) -> &str {
        &self.spec.cluster_identity.cluster_id
    }
}
