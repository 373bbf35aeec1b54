//! Address-space allocator for peer pod ranges
//!
//! Every peer cluster gets exactly one reservation: either its own advertised
//! pod range, when that range collides with nothing already reserved, or a
//! substitute range of the same size carved out of the address pool. The
//! table also holds statically reserved ranges (this cluster's own pod and
//! service ranges) which are never handed out.

use crate::{CoreError, Result};
use async_trait::async_trait;
use ipnetwork::{IpNetwork, Ipv4Network};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Outcome of resolving a peer's advertised pod range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The advertised range is usable as-is and is now reserved for the peer
    NoRemapNeeded,
    /// The advertised range collides; the peer is remapped onto this range
    NewRange(IpNetwork),
}

/// Allocator contract used by the reconciler.
///
/// Implementations must be deterministic and idempotent: resolving the same
/// `(candidate, cluster_id)` twice without intervening changes yields the
/// same answer and does not reserve anything new.
#[async_trait]
pub trait AddressAllocator: Send + Sync {
    /// Resolve `candidate` for `cluster_id`, reserving the resulting range
    async fn resolve(&self, candidate: IpNetwork, cluster_id: &str) -> Result<Resolution>;

    /// Drop the reservation held by `cluster_id`, returning it if there was one
    async fn release(&self, cluster_id: &str) -> Option<IpNetwork>;
}

/// Default pool for substitute ranges: the RFC 1918 private blocks
pub const DEFAULT_POOLS: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

#[derive(Clone, Copy, Debug)]
struct Reservation {
    /// Range the peer advertised when the reservation was made
    advertised: Ipv4Network,
    /// Range actually reserved; equal to `advertised` when no remap was needed
    subnet: Ipv4Network,
}

#[derive(Debug, Default)]
struct ReservationTable {
    pools: Vec<Ipv4Network>,
    reserved: Vec<Ipv4Network>,
    clusters: BTreeMap<String, Reservation>,
}

/// Mutex-guarded reservation table implementing [`AddressAllocator`]
pub struct SubnetReservations {
    table: Mutex<ReservationTable>,
}

impl SubnetReservations {
    /// Create an allocator drawing substitute ranges from `pools`
    pub fn new(pools: Vec<IpNetwork>) -> Result<Self> {
        let pools = pools
            .into_iter()
            .map(require_v4)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            table: Mutex::new(ReservationTable {
                pools,
                ..Default::default()
            }),
        })
    }

    /// Create an allocator over the RFC 1918 private blocks
    pub fn with_default_pools() -> Result<Self> {
        let pools = DEFAULT_POOLS
            .iter()
            .map(|cidr| parse_cidr(cidr))
            .collect::<Result<Vec<_>>>()?;
        Self::new(pools)
    }

    /// Statically reserve a range (e.g. this cluster's own pod range).
    ///
    /// Reserving the same range twice is a no-op; reserving a range that
    /// overlaps an existing reservation fails.
    pub async fn reserve(&self, subnet: IpNetwork) -> Result<()> {
        let subnet = require_v4(subnet)?;
        let mut table = self.table.lock().await;
        if table.reserved.contains(&subnet) {
            return Ok(());
        }
        if let Some(existing) = table.first_overlap(&subnet) {
            return Err(CoreError::SubnetOverlap {
                subnet: subnet.to_string(),
                existing: existing.to_string(),
            });
        }
        table.reserved.push(subnet);
        debug!(subnet = %subnet, "Reserved static subnet");
        Ok(())
    }

    /// Re-record a decision persisted before a restart.
    ///
    /// A cluster that already holds a reservation keeps it. Fails if `subnet`
    /// overlaps any live range.
    pub async fn restore(
        &self,
        cluster_id: &str,
        advertised: IpNetwork,
        subnet: IpNetwork,
    ) -> Result<()> {
        let advertised = require_v4(advertised)?;
        let subnet = require_v4(subnet)?;
        let mut table = self.table.lock().await;
        if table.clusters.contains_key(cluster_id) {
            return Ok(());
        }
        if let Some(existing) = table.first_overlap(&subnet) {
            return Err(CoreError::SubnetOverlap {
                subnet: subnet.to_string(),
                existing: existing.to_string(),
            });
        }
        table
            .clusters
            .insert(cluster_id.to_string(), Reservation { advertised, subnet });
        debug!(cluster_id = %cluster_id, subnet = %subnet, "Restored subnet reservation");
        Ok(())
    }

    /// Range currently reserved for a cluster
    pub async fn reserved_for(&self, cluster_id: &str) -> Option<IpNetwork> {
        let table = self.table.lock().await;
        table
            .clusters
            .get(cluster_id)
            .map(|r| IpNetwork::V4(r.subnet))
    }

    /// Every live range: static reservations followed by per-cluster ones
    pub async fn snapshot(&self) -> Vec<IpNetwork> {
        let table = self.table.lock().await;
        table
            .reserved
            .iter()
            .chain(table.clusters.values().map(|r| &r.subnet))
            .map(|net| IpNetwork::V4(*net))
            .collect()
    }
}

#[async_trait]
impl AddressAllocator for SubnetReservations {
    async fn resolve(&self, candidate: IpNetwork, cluster_id: &str) -> Result<Resolution> {
        let candidate = require_v4(candidate)?;
        let mut table = self.table.lock().await;

        if let Some(existing) = table.clusters.get(cluster_id).copied() {
            if existing.advertised == candidate {
                return Ok(existing.resolution());
            }
            // the peer changed its range; recompute from scratch
            table.clusters.remove(cluster_id);
        }

        let subnet = match table.first_overlap(&candidate) {
            None => candidate,
            Some(taken) => {
                let subnet = table.find_free(candidate.prefix()).ok_or_else(|| {
                    CoreError::PoolExhausted {
                        cluster_id: cluster_id.to_string(),
                        prefix: candidate.prefix(),
                    }
                })?;
                info!(
                    cluster_id = %cluster_id,
                    advertised = %candidate,
                    overlaps = %taken,
                    remapped = %subnet,
                    "Pod range collides, remapping"
                );
                subnet
            }
        };

        let reservation = Reservation {
            advertised: candidate,
            subnet,
        };
        table.clusters.insert(cluster_id.to_string(), reservation);
        debug!(cluster_id = %cluster_id, subnet = %subnet, "Reserved subnet for cluster");
        Ok(reservation.resolution())
    }

    async fn release(&self, cluster_id: &str) -> Option<IpNetwork> {
        let mut table = self.table.lock().await;
        let released = table.clusters.remove(cluster_id).map(|r| IpNetwork::V4(r.subnet));
        if let Some(subnet) = released {
            info!(cluster_id = %cluster_id, subnet = %subnet, "Released subnet reservation");
        }
        released
    }
}

impl Reservation {
    fn resolution(&self) -> Resolution {
        if self.subnet == self.advertised {
            Resolution::NoRemapNeeded
        } else {
            Resolution::NewRange(IpNetwork::V4(self.subnet))
        }
    }
}

impl ReservationTable {
    fn live(&self) -> impl Iterator<Item = &Ipv4Network> {
        self.reserved
            .iter()
            .chain(self.clusters.values().map(|r| &r.subnet))
    }

    fn first_overlap(&self, subnet: &Ipv4Network) -> Option<Ipv4Network> {
        self.live().find(|taken| overlaps(taken, subnet)).copied()
    }

    /// First-fit search for a free aligned block of the given prefix length
    fn find_free(&self, prefix: u8) -> Option<Ipv4Network> {
        let size = 1u64 << (32 - u32::from(prefix));
        for pool in &self.pools {
            if prefix < pool.prefix() {
                continue;
            }
            let end = u64::from(u32::from(pool.broadcast()));
            let mut current = u64::from(u32::from(pool.network()));
            while current + size - 1 <= end {
                let candidate = Ipv4Network::new(Ipv4Addr::from(current as u32), prefix).ok()?;
                match self.first_overlap(&candidate) {
                    None => return Some(candidate),
                    Some(taken) => {
                        let past_taken = u64::from(u32::from(taken.broadcast())) + 1;
                        current = align_up(past_taken.max(current + size), size);
                    }
                }
            }
        }
        None
    }
}

fn align_up(addr: u64, size: u64) -> u64 {
    (addr + size - 1) / size * size
}

/// Aligned CIDR blocks either nest or are disjoint
fn overlaps(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

fn require_v4(net: IpNetwork) -> Result<Ipv4Network> {
    match net {
        IpNetwork::V4(v4) => normalize(v4),
        IpNetwork::V6(v6) => Err(CoreError::UnsupportedAddressFamily(v6.to_string())),
    }
}

/// Clear host bits so "10.0.0.1/16" and "10.0.0.0/16" compare equal
fn normalize(net: Ipv4Network) -> Result<Ipv4Network> {
    Ipv4Network::new(net.network(), net.prefix()).map_err(|e| CoreError::InvalidCidr {
        cidr: net.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a CIDR string into a network with host bits cleared
pub fn parse_cidr(cidr: &str) -> Result<IpNetwork> {
    let parsed: IpNetwork = cidr.trim().parse().map_err(|e: ipnetwork::IpNetworkError| {
        CoreError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: e.to_string(),
        }
    })?;
    match parsed {
        IpNetwork::V4(v4) => normalize(v4).map(IpNetwork::V4),
        IpNetwork::V6(v6) => ipnetwork::Ipv6Network::new(v6.network(), v6.prefix())
            .map(IpNetwork::V6)
            .map_err(|e| CoreError::InvalidCidr {
                cidr: cidr.to_string(),
                reason: e.to_string(),
            }),
    }
}
