//! Peernet API types and CRDs for Kubernetes integration
//!
//! This library defines the custom resources for cross-cluster network peering:
//! - NetworkConfig: one side's pod range and tunnel endpoint, plus its NAT decision
//! - TunnelEndpoint: the negotiated parameters handed to the tunnel data plane
//!
//! It also carries bindings to the peering resources owned by the discovery
//! layer (Advertisement, PeeringRequest, ForeignCluster).

pub mod v1alpha1;
pub mod discovery;

pub use v1alpha1::{
    NetworkConfig, NetworkConfigSpec, NetworkConfigStatus, Origin, TunnelEndpoint,
    TunnelEndpointPhase, TunnelEndpointSpec, TunnelEndpointStatus,
};
pub use discovery::{Advertisement, AnnouncesCluster, ForeignCluster, PeeringRequest};
