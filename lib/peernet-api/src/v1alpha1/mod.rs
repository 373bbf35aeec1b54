/// API version v1alpha1 for Peernet CRDs

pub mod network_config;
pub mod tunnel_endpoint;

pub use network_config::{NetworkConfig, NetworkConfigSpec, NetworkConfigStatus, Origin};
pub use tunnel_endpoint::{
    TunnelEndpoint, TunnelEndpointPhase, TunnelEndpointSpec, TunnelEndpointStatus,
};

/// API group for Peernet resources
pub const API_GROUP: &str = "net.peernet.io";
/// API version for Peernet resources
pub const API_VERSION: &str = "v1alpha1";

/// Label telling which side authored a NetworkConfig ("local" or "remote")
pub const ORIGIN_LABEL: &str = "net.peernet.io/origin";
/// Label carrying the identifier of the peer cluster a record relates to
pub const PEER_CLUSTER_LABEL: &str = "net.peernet.io/peer-cluster";

/// Finalizer held on every NetworkConfig while the peering is active
pub const NETWORK_CONFIG_FINALIZER: &str = "netconfig.net.peernet.io/tunnel-endpoint-creator";

/// Value stored in remapped-range fields when no NAT is applied
pub const NO_NAT_SENTINEL: &str = "None";

/// Name prefix of NetworkConfig resources
pub const NETWORK_CONFIG_NAME_PREFIX: &str = "net-config-";
/// Name prefix of TunnelEndpoint resources
pub const TUNNEL_ENDPOINT_NAME_PREFIX: &str = "tun-endpoint-";

/// Deterministic NetworkConfig name for a peer cluster
pub fn network_config_name(cluster_id: &str) -> String {
    format!("{}{}", NETWORK_CONFIG_NAME_PREFIX, cluster_id)
}

/// Deterministic TunnelEndpoint name for a peer cluster
pub fn tunnel_endpoint_name(cluster_id: &str) -> String {
    format!("{}{}", TUNNEL_ENDPOINT_NAME_PREFIX, cluster_id)
}

/// Label selector matching the remote NetworkConfig published by a peer
pub fn remote_selector(cluster_id: &str) -> String {
    format!(
        "{}={},{}={}",
        ORIGIN_LABEL,
        Origin::Remote.as_label(),
        PEER_CLUSTER_LABEL,
        cluster_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_deterministic() {
        assert_eq!(network_config_name("cluster-b"), "net-config-cluster-b");
        assert_eq!(tunnel_endpoint_name("cluster-b"), "tun-endpoint-cluster-b");
    }

    #[test]
    fn test_remote_selector() {
        assert_eq!(
            remote_selector("cluster-b"),
            "net.peernet.io/origin=remote,net.peernet.io/peer-cluster=cluster-b"
        );
    }
}
