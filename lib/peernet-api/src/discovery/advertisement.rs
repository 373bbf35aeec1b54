use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::AnnouncesCluster;

/// Advertisement from the sharing layer - a peer cluster offering its
/// resources to this cluster
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "sharing.peernet.io",
    version = "v1alpha1",
    kind = "Advertisement",
    plural = "advertisements",
    derive = "Default",
)]
pub struct AdvertisementSpec {
    /// Identifier of the advertising cluster
    #[serde(rename = "clusterId")]
    pub cluster_id: String,

    /// Pod range the advertising cluster declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<AdvertisedNetwork>,
}

/// Network section of an Advertisement
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct AdvertisedNetwork {
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,

    #[serde(rename = "gatewayIP", default)]
    pub gateway_ip: String,
}

impl AnnouncesCluster for Advertisement {
    fn announced_cluster_id(&self) -> &str {
        &self.spec.cluster_id
    }
}
