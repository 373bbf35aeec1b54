/// Bindings to the peering CRDs owned by the discovery and sharing layers
///
/// This module provides type-safe Rust bindings to the resources that
/// announce a peer cluster (Advertisement, PeeringRequest) and to the
/// ForeignCluster record that tracks the state of a peering.

pub mod advertisement;
pub mod peering_request;
pub mod foreign_cluster;

pub use advertisement::Advertisement;
pub use peering_request::PeeringRequest;
pub use foreign_cluster::{
    ClusterIdentity, ForeignCluster, PeeringCondition, PeeringConditionStatus,
    PeeringConditionType, CLUSTER_ID_LABEL,
};

/// A resource whose arrival announces a peer cluster
pub trait AnnouncesCluster {
    /// Identifier of the announced cluster
    fn announced_cluster_id(&self) -> &str;
}
