//! Peering-state lookups and polling
//!
//! Higher-level orchestration uses this crate to wait until a peering with
//! another cluster reaches a given state, independent of the reconciler's
//! own event-driven loop.
pub mod client;
pub mod error;
pub mod poll;

pub use client::{ForeignClusterGetter, PeeringClient};
pub use error::DiscoveryError;
pub use poll::{
    authenticated_checker, network_established_checker, poll_for_event, unpeer_checker,
    PeeringEvent,
};
