//! TunnelEndpoint lifecycle
//!
//! One endpoint per peer cluster, named `tun-endpoint-<peer>`. The endpoint
//! moves from absent to created, then has its spec and status brought in
//! line with the paired NetworkConfigs. Once the phase reads `Processed` it
//! is never cleared. Every update is a diff against a fresh read and is
//! skipped when nothing changed.

use peernet_api::v1alpha1::tunnel_endpoint_name;
use peernet_api::{TunnelEndpoint, TunnelEndpointPhase, TunnelEndpointSpec};
use peernet_core::{read_modify_write, retry_on, Backoff, CoreError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::store::NetworkStore;

/// How long a freshly created endpoint may take to show up on reads
const VISIBILITY_BACKOFF: Backoff = Backoff {
    steps: 8,
    duration: Duration::from_millis(50),
    factor: 1.5,
    jitter: 0.1,
};

/// Values copied into a TunnelEndpoint from a local/remote NetworkConfig pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkParams {
    pub cluster_id: String,
    pub tunnel_public_ip: String,
    pub pod_cidr: String,
    /// Remap the peer applies to our pod range
    pub local_nat_pod_cidr: String,
    /// Remap we apply to the peer's pod range
    pub remote_nat_pod_cidr: String,
}

impl NetworkParams {
    fn spec(&self) -> TunnelEndpointSpec {
        TunnelEndpointSpec {
            cluster_id: self.cluster_id.clone(),
            pod_cidr: self.pod_cidr.clone(),
            tunnel_public_ip: self.tunnel_public_ip.clone(),
        }
    }

    fn apply_spec(&self, endpoint: &mut TunnelEndpoint) -> bool {
        let desired = self.spec();
        if endpoint.spec == desired {
            return false;
        }
        endpoint.spec = desired;
        true
    }

    fn apply_status(&self, endpoint: &mut TunnelEndpoint) -> bool {
        let status = endpoint.status.get_or_insert_with(Default::default);
        let mut changed = false;
        if status.local_remapped_pod_cidr != self.local_nat_pod_cidr {
            status.local_remapped_pod_cidr = self.local_nat_pod_cidr.clone();
            changed = true;
        }
        if status.remote_remapped_pod_cidr != self.remote_nat_pod_cidr {
            status.remote_remapped_pod_cidr = self.remote_nat_pod_cidr.clone();
            changed = true;
        }
        if status.phase.is_none() {
            status.phase = Some(TunnelEndpointPhase::Processed);
            changed = true;
        }
        changed
    }
}

pub struct TunnelEndpoints {
    store: Arc<dyn NetworkStore>,
    conflicts: Backoff,
    visibility: Backoff,
}

impl TunnelEndpoints {
    pub fn new(store: Arc<dyn NetworkStore>) -> Self {
        Self {
            store,
            conflicts: Backoff::DEFAULT,
            visibility: VISIBILITY_BACKOFF,
        }
    }

    /// Use one schedule for both conflict retries and the visibility wait
    pub fn with_backoff(store: Arc<dyn NetworkStore>, backoff: Backoff) -> Self {
        Self {
            store,
            conflicts: backoff.clone(),
            visibility: backoff,
        }
    }

    /// Create or update the endpoint for `params.cluster_id`
    #[instrument(skip(self, params), fields(cluster_id = %params.cluster_id))]
    pub async fn process(&self, params: &NetworkParams) -> Result<()> {
        let name = tunnel_endpoint_name(&params.cluster_id);
        if self.store.get_tunnel_endpoint(&name).await?.is_none() {
            self.create(&name, params).await?;
        } else {
            self.update_spec(&name, params).await?;
        }
        self.update_status(&name, params).await
    }

    /// Delete the endpoint for a peer. Returns false if there was none.
    pub async fn delete(&self, cluster_id: &str) -> Result<bool> {
        let name = tunnel_endpoint_name(cluster_id);
        match self.store.delete_tunnel_endpoint(&name).await {
            Ok(()) => {
                info!(name = %name, "Deleted TunnelEndpoint");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, name: &str, params: &NetworkParams) -> Result<()> {
        let endpoint = TunnelEndpoint::new(name, params.spec());
        match self.store.create_tunnel_endpoint(&endpoint).await {
            Ok(_) => info!(
                name = %name,
                gateway = %params.tunnel_public_ip,
                "Created TunnelEndpoint"
            ),
            Err(e) if e.is_already_exists() => {
                debug!(name = %name, "TunnelEndpoint created concurrently, updating instead");
                self.update_spec(name, params).await?;
            }
            Err(e) => return Err(e),
        }
        self.wait_until_visible(name).await
    }

    async fn wait_until_visible(&self, name: &str) -> Result<()> {
        let store = self.store.as_ref();
        retry_on(&self.visibility, CoreError::is_not_found, || async move {
            match store.get_tunnel_endpoint(name).await? {
                Some(_) => Ok(()),
                None => Err(CoreError::NotFound(name.to_string())),
            }
        })
        .await
    }

    async fn update_spec(&self, name: &str, params: &NetworkParams) -> Result<()> {
        let store = self.store.as_ref();
        let wrote = read_modify_write(
            &self.conflicts,
            || async move { fetch(store, name).await },
            |endpoint: &mut TunnelEndpoint| params.apply_spec(endpoint),
            |endpoint| async move { store.replace_tunnel_endpoint(&endpoint).await.map(|_| ()) },
        )
        .await?;
        if wrote {
            info!(name = %name, "Updated TunnelEndpoint spec");
        }
        Ok(())
    }

    async fn update_status(&self, name: &str, params: &NetworkParams) -> Result<()> {
        let store = self.store.as_ref();
        let wrote = read_modify_write(
            &self.conflicts,
            || async move { fetch(store, name).await },
            |endpoint: &mut TunnelEndpoint| params.apply_status(endpoint),
            |endpoint| async move {
                store
                    .replace_tunnel_endpoint_status(&endpoint)
                    .await
                    .map(|_| ())
            },
        )
        .await?;
        if wrote {
            info!(
                name = %name,
                local_remapped = %params.local_nat_pod_cidr,
                remote_remapped = %params.remote_nat_pod_cidr,
                "Updated TunnelEndpoint status"
            );
        }
        Ok(())
    }
}

async fn fetch(store: &dyn NetworkStore, name: &str) -> Result<TunnelEndpoint> {
    store
        .get_tunnel_endpoint(name)
        .await?
        .ok_or_else(|| CoreError::NotFound(name.to_string()))
}
