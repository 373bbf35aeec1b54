//! Core peering network functionality
//!
//! This library provides:
//! - Address-space allocator reserving non-overlapping pod ranges per peer cluster
//! - Conflict-retry combinators for optimistic-concurrency writes
//! - One-shot configuration gate blocking work until static config is known

pub mod error;
pub mod gate;
pub mod ipam;
pub mod retry;

pub use error::{CoreError, Result};
pub use gate::ConfigGate;
pub use ipam::{AddressAllocator, Resolution, SubnetReservations};
pub use retry::{read_modify_write, retry_on, retry_on_conflict, Backoff};
