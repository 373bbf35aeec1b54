use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{network_config_name, NETWORK_CONFIG_FINALIZER, ORIGIN_LABEL, PEER_CLUSTER_LABEL};

/// NetworkConfig carries one side's network parameters for a peering:
/// its pod address range and the public address of its tunnel gateway.
///
/// A local record is authored in this cluster and replicated to the peer;
/// a remote record arrives from the peer. The status half holds the NAT
/// decision taken by the cluster that received the record.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "net.peernet.io",
    version = "v1alpha1",
    kind = "NetworkConfig",
    plural = "networkconfigs",
    derive = "Default",
    status = "NetworkConfigStatus",
    printcolumn = r#"{"name":"Peer","type":"string","jsonPath":".spec.clusterID"}"#,
    printcolumn = r#"{"name":"PodCIDR","type":"string","jsonPath":".spec.podCIDR"}"#,
    printcolumn = r#"{"name":"NAT","type":"string","jsonPath":".status.podCIDRNAT"}"#,
)]
pub struct NetworkConfigSpec {
    /// Identifier of the peer cluster this record relates to
    #[serde(rename = "clusterID")]
    pub cluster_id: String,

    /// Pod address range advertised by the authoring side
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,

    /// Public address of the authoring side's tunnel gateway
    #[serde(rename = "tunnelPublicIP")]
    pub tunnel_public_ip: String,
}

/// Status of a NetworkConfig
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkConfigStatus {
    /// Whether the pod range had to be remapped; unset until evaluated
    #[serde(rename = "natEnabled", default, skip_serializing_if = "Option::is_none")]
    pub nat_enabled: Option<bool>,

    /// Remapped pod range, or the "None" sentinel when no NAT is applied
    #[serde(rename = "podCIDRNAT", default, skip_serializing_if = "String::is_empty")]
    pub pod_cidr_nat: String,
}

/// Which side authored a NetworkConfig
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

impl Origin {
    pub fn as_label(&self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Remote => "remote",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Origin::Local),
            "remote" => Some(Origin::Remote),
            _ => None,
        }
    }
}

impl NetworkConfig {
    /// Build the local record announcing this cluster's network to `peer_cluster_id`
    pub fn local_for(peer_cluster_id: &str, pod_cidr: &str, tunnel_public_ip: &str) -> Self {
        let mut config = NetworkConfig::new(
            &network_config_name(peer_cluster_id),
            NetworkConfigSpec {
                cluster_id: peer_cluster_id.to_string(),
                pod_cidr: pod_cidr.to_string(),
                tunnel_public_ip: tunnel_public_ip.to_string(),
            },
        );
        config.metadata.labels = Some(BTreeMap::from([
            (ORIGIN_LABEL.to_string(), Origin::Local.as_label().to_string()),
            (PEER_CLUSTER_LABEL.to_string(), peer_cluster_id.to_string()),
        ]));
        config
    }

    /// Origin read from the origin label, if present and recognised
    pub fn origin(&self) -> Option<Origin> {
        self.labels()
            .get(ORIGIN_LABEL)
            .and_then(|value| Origin::from_label(value))
    }

    /// Cluster this record pairs with: the peer-cluster label, falling back to spec.clusterID
    pub fn peer_cluster_id(&self) -> &str {
        self.labels()
            .get(PEER_CLUSTER_LABEL)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.spec.cluster_id)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == NETWORK_CONFIG_FINALIZER)
    }

    /// Whether a NAT decision has been recorded
    pub fn nat_decided(&self) -> bool {
        self.status
            .as_ref()
            .map_or(false, |status| status.nat_enabled.is_some())
    }

    /// Remapped pod range recorded in status; empty while unresolved
    pub fn pod_cidr_nat(&self) -> &str {
        self.status
            .as_ref()
            .map_or("", |status| status.pod_cidr_nat.as_str())
    }
}
