//! Wait for a peering to reach a given state

use peernet_api::discovery::{
    ClusterIdentity, ForeignCluster, PeeringConditionStatus, PeeringConditionType,
};
use std::fmt;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::{DiscoveryError, ForeignClusterGetter};

/// Named peering state a caller can wait for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeeringEvent {
    Unpeering,
    Authentication,
    NetworkEstablished,
}

impl fmt::Display for PeeringEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeeringEvent::Unpeering => "unpeer",
            PeeringEvent::Authentication => "authentication",
            PeeringEvent::NetworkEstablished => "network established",
        };
        f.write_str(name)
    }
}

/// Both peering directions are torn down
pub fn unpeer_checker(fc: &ForeignCluster) -> bool {
    fc.condition_status(PeeringConditionType::IncomingPeering) == PeeringConditionStatus::None
        && fc.condition_status(PeeringConditionType::OutgoingPeering)
            == PeeringConditionStatus::None
}

pub fn authenticated_checker(fc: &ForeignCluster) -> bool {
    fc.condition_status(PeeringConditionType::AuthenticationStatus)
        == PeeringConditionStatus::Established
}

pub fn network_established_checker(fc: &ForeignCluster) -> bool {
    fc.condition_status(PeeringConditionType::NetworkStatus) == PeeringConditionStatus::Established
}

/// Poll the ForeignCluster of `identity` until `checker` holds.
///
/// The first check happens immediately, then once per `interval`. A fetch
/// error aborts the poll at once; running past `timeout` fails with
/// [`DiscoveryError::EventTimeout`]. Both errors name the event and cluster.
/// A zero `interval` is rejected with [`DiscoveryError::InvalidInterval`].
pub async fn poll_for_event<G, C>(
    getter: &G,
    identity: &ClusterIdentity,
    event: PeeringEvent,
    checker: C,
    interval: Duration,
    timeout: Duration,
) -> Result<(), DiscoveryError>
where
    G: ForeignClusterGetter + ?Sized,
    C: Fn(&ForeignCluster) -> bool,
{
    if interval.is_zero() {
        return Err(DiscoveryError::InvalidInterval);
    }
    let cluster_name = if identity.cluster_name.is_empty() {
        identity.cluster_id.clone()
    } else {
        identity.cluster_name.clone()
    };

    let poll = async {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let fc = getter.get_foreign_cluster_by_id(&identity.cluster_id).await?;
            if checker(&fc) {
                return Ok::<(), DiscoveryError>(());
            }
            debug!(cluster = %cluster_name, event = %event, "Peering event not observed yet");
        }
    };

    match time::timeout(timeout, poll).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(DiscoveryError::EventFetch {
            event,
            cluster_name,
            source: Box::new(source),
        }),
        Err(_) => Err(DiscoveryError::EventTimeout {
            event,
            cluster_name,
            timeout,
        }),
    }
}
