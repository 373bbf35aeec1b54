use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TunnelEndpoint holds the negotiated parameters of a peering, derived from
/// the local and remote NetworkConfig once both NAT decisions are known.
/// The tunnel data plane watches these records; users never author them.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "net.peernet.io",
    version = "v1alpha1",
    kind = "TunnelEndpoint",
    plural = "tunnelendpoints",
    derive = "Default",
    status = "TunnelEndpointStatus",
    printcolumn = r#"{"name":"Peer","type":"string","jsonPath":".spec.clusterID"}"#,
    printcolumn = r#"{"name":"Gateway","type":"string","jsonPath":".spec.tunnelPublicIP"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
)]
pub struct TunnelEndpointSpec {
    /// Identifier of the peer cluster
    #[serde(rename = "clusterID")]
    pub cluster_id: String,

    /// Peer's original pod range
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,

    /// Public address of the peer's tunnel gateway
    #[serde(rename = "tunnelPublicIP")]
    pub tunnel_public_ip: String,
}

/// Status of a TunnelEndpoint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelEndpointStatus {
    /// Range our pods are known by on the peer side, or "None"
    #[serde(rename = "localRemappedPodCIDR", default, skip_serializing_if = "String::is_empty")]
    pub local_remapped_pod_cidr: String,

    /// Range the peer's pods are known by on our side, or "None"
    #[serde(rename = "remoteRemappedPodCIDR", default, skip_serializing_if = "String::is_empty")]
    pub remote_remapped_pod_cidr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<TunnelEndpointPhase>,
}

/// Processing phase of a TunnelEndpoint. Once Processed it is never reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TunnelEndpointPhase {
    Processed,
}

impl TunnelEndpoint {
    pub fn phase(&self) -> Option<TunnelEndpointPhase> {
        self.status.as_ref().and_then(|status| status.phase)
    }
}
