use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label the discovery layer sets on each ForeignCluster with the peer's cluster ID
pub const CLUSTER_ID_LABEL: &str = "discovery.peernet.io/cluster-id";

/// ForeignCluster from the discovery layer - this cluster's view of a peer
/// and of the state of the peering in both directions
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "discovery.peernet.io",
    version = "v1alpha1",
    kind = "ForeignCluster",
    plural = "foreignclusters",
    derive = "Default",
    status = "ForeignClusterStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct ForeignClusterSpec {
    /// Identity of the peer cluster
    pub cluster_identity: ClusterIdentity,

    /// Address of the peer's authentication service
    #[serde(default)]
    pub foreign_auth_url: String,
}

/// Stable identity of a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClusterIdentity {
    #[serde(rename = "clusterID")]
    pub cluster_id: String,

    #[serde(rename = "clusterName", default)]
    pub cluster_name: String,
}

/// Status of a ForeignCluster
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForeignClusterStatus {
    #[serde(default)]
    pub peering_conditions: Vec<PeeringCondition>,
}

/// Observed state of one aspect of a peering
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PeeringCondition {
    #[serde(rename = "type")]
    pub condition_type: PeeringConditionType,

    pub status: PeeringConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PeeringConditionType {
    OutgoingPeering,
    IncomingPeering,
    NetworkStatus,
    AuthenticationStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PeeringConditionStatus {
    None,
    Pending,
    Established,
    Disconnecting,
    Denied,
}

impl ForeignCluster {
    /// Status of the given condition; a missing condition reads as None
    pub fn condition_status(&self, condition_type: PeeringConditionType) -> PeeringConditionStatus {
        self.status
            .as_ref()
            .and_then(|status| {
                status
                    .peering_conditions
                    .iter()
                    .find(|c| c.condition_type == condition_type)
            })
            .map_or(PeeringConditionStatus::None, |c| c.status)
    }

    pub fn cluster_name(&self) -> &str {
        &self.spec.cluster_identity.cluster_name
    }
}
