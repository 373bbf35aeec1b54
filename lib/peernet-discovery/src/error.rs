use std::time::Duration;
use thiserror::Error;

use crate::poll::PeeringEvent;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(
        "failed waiting for event \"{event}\" from cluster \"{cluster_name}\": \
         timed out after {timeout:?}"
    )]
    EventTimeout {
        event: PeeringEvent,
        cluster_name: String,
        timeout: Duration,
    },

    #[error("failed waiting for event \"{event}\" from cluster \"{cluster_name}\": {source}")]
    EventFetch {
        event: PeeringEvent,
        cluster_name: String,
        #[source]
        source: Box<DiscoveryError>,
    },

    #[error("poll interval must be non-zero")]
    InvalidInterval,

    #[error("ForeignCluster for cluster {0} not found")]
    ForeignClusterNotFound(String),

    #[error("{count} ForeignClusters found for cluster {cluster_id}, expected one")]
    DuplicateForeignCluster { cluster_id: String, count: usize },

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}
