//! NetworkConfig controller
//!
//! Remote NetworkConfigs (replicated from a peer) get a NAT decision: the
//! peer's pod range either fits next to everything already reserved or is
//! remapped onto a free range. Local NetworkConfigs (created here for a peer)
//! are paired with the remote one for the same peer, and once both sides
//! have decided the TunnelEndpoint for that peer is written.
//!
//! Reconciliation is level-triggered: every pass re-reads the record and
//! recomputes from scratch, so redelivered events are harmless.

use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::{controller::Action, watcher, Controller};
use peernet_api::v1alpha1::{
    remote_selector, NETWORK_CONFIG_FINALIZER, NO_NAT_SENTINEL, ORIGIN_LABEL,
};
use peernet_api::{NetworkConfig, NetworkConfigStatus, Origin};
use peernet_core::ipam::parse_cidr;
use peernet_core::{
    AddressAllocator, Backoff, ConfigGate, CoreError, Resolution, SubnetReservations,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LocalNetwork;
use crate::store::NetworkStore;
use crate::tunnel_endpoint::{NetworkParams, TunnelEndpoints};

/// Requeue after a successful pass or a transient failure
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(5);

/// Requeue when only a change to the input can help
pub const INVALID_INPUT_REQUEUE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] CoreError),

    #[error("NetworkConfig {name} has an invalid pod CIDR: {source}")]
    InvalidPodCidr {
        name: String,
        #[source]
        source: CoreError,
    },

    #[error("found {count} remote NetworkConfigs for cluster {cluster_id}, expected at most one")]
    DuplicateRemoteConfig { cluster_id: String, count: usize },

    #[error("NetworkConfig has no name")]
    MissingName,
}

impl ReconcileError {
    /// Errors that will not go away until someone edits the records
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ReconcileError::InvalidPodCidr { .. }
                | ReconcileError::DuplicateRemoteConfig { .. }
                | ReconcileError::MissingName
        )
    }
}

pub struct NetworkConfigReconciler {
    store: Arc<dyn NetworkStore>,
    allocator: Arc<dyn AddressAllocator>,
    tunnels: TunnelEndpoints,
    gate: ConfigGate<LocalNetwork>,
    prune_tunnel_endpoints: bool,
}

impl NetworkConfigReconciler {
    pub fn new(
        store: Arc<dyn NetworkStore>,
        allocator: Arc<dyn AddressAllocator>,
        gate: ConfigGate<LocalNetwork>,
    ) -> Self {
        Self {
            tunnels: TunnelEndpoints::new(store.clone()),
            store,
            allocator,
            gate,
            prune_tunnel_endpoints: true,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.tunnels = TunnelEndpoints::with_backoff(self.store.clone(), backoff);
        self
    }

    pub fn prune_tunnel_endpoints(mut self, enabled: bool) -> Self {
        self.prune_tunnel_endpoints = enabled;
        self
    }

    /// Run one reconciliation pass for the NetworkConfig `name`
    #[instrument(skip(self))]
    pub async fn reconcile(&self, name: &str) -> Result<Action, ReconcileError> {
        if !self.gate.is_open() {
            debug!("Waiting for static network configuration");
        }
        self.gate.wait().await;

        let Some(config) = self.store.get_network_config(name).await? else {
            debug!("NetworkConfig is gone, nothing to do");
            return Ok(Action::await_change());
        };

        if config.is_deleting() {
            return self.finalize(config).await;
        }
        if !config.has_finalizer() {
            return self.add_finalizer(config).await;
        }

        match config.origin() {
            Some(Origin::Local) => self.process_local(&config).await?,
            // records without an origin tag are treated as replicated ones
            Some(Origin::Remote) | None => self.process_remote(&config).await?,
        }
        Ok(Action::requeue(REQUEUE_INTERVAL))
    }

    async fn add_finalizer(&self, mut config: NetworkConfig) -> Result<Action, ReconcileError> {
        config
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(NETWORK_CONFIG_FINALIZER.to_string());

        match self.store.replace_network_config(&config).await {
            Ok(_) => {
                info!(name = %config.name_any(), "Added finalizer");
                Ok(Action::requeue(REQUEUE_INTERVAL))
            }
            // the competing write triggers another pass
            Err(e) if e.is_conflict() => {
                debug!(
                    name = %config.name_any(),
                    "Conflict adding finalizer, another writer got there first"
                );
                Ok(Action::await_change())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release what this record holds, then let the API server delete it
    async fn finalize(&self, mut config: NetworkConfig) -> Result<Action, ReconcileError> {
        if !config.has_finalizer() {
            return Ok(Action::await_change());
        }
        let name = config.name_any();
        let peer = config.peer_cluster_id().to_string();

        if self.prune_tunnel_endpoints && config.origin() == Some(Origin::Local) {
            self.tunnels.delete(&peer).await?;
        }
        if let Some(subnet) = self.allocator.release(&peer).await {
            debug!(
                name = %name,
                peer = %peer,
                subnet = %subnet,
                "Released reservation of deleted NetworkConfig"
            );
        }

        if let Some(finalizers) = config.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != NETWORK_CONFIG_FINALIZER);
        }
        match self.store.replace_network_config(&config).await {
            Ok(_) => info!(name = %name, "Removed finalizer"),
            Err(e) if e.is_not_found() => debug!(name = %name, "NetworkConfig already gone"),
            Err(e) if e.is_conflict() => {
                debug!(name = %name, "Conflict removing finalizer, another writer got there first")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Action::await_change())
    }

    /// Decide whether the peer's pod range needs remapping
    async fn process_remote(&self, config: &NetworkConfig) -> Result<(), ReconcileError> {
        if config.nat_decided() {
            return Ok(());
        }
        let name = config.name_any();
        let peer = config.peer_cluster_id();

        let candidate = parse_cidr(&config.spec.pod_cidr).map_err(|source| {
            error!(
                name = %name,
                pod_cidr = %config.spec.pod_cidr,
                "Invalid pod CIDR in remote NetworkConfig"
            );
            ReconcileError::InvalidPodCidr {
                name: name.clone(),
                source,
            }
        })?;

        let resolution = self.allocator.resolve(candidate, peer).await.map_err(|e| match e {
            CoreError::UnsupportedAddressFamily(_) => {
                error!(
                    name = %name,
                    pod_cidr = %config.spec.pod_cidr,
                    "Unsupported address family in remote NetworkConfig"
                );
                ReconcileError::InvalidPodCidr {
                    name: name.clone(),
                    source: e,
                }
            }
            e => e.into(),
        })?;

        let status = match resolution {
            Resolution::NoRemapNeeded => NetworkConfigStatus {
                nat_enabled: Some(false),
                pod_cidr_nat: NO_NAT_SENTINEL.to_string(),
            },
            Resolution::NewRange(range) => NetworkConfigStatus {
                nat_enabled: Some(true),
                pod_cidr_nat: range.to_string(),
            },
        };

        let mut updated = config.clone();
        updated.status = Some(status.clone());
        self.store.replace_network_config_status(&updated).await?;
        info!(
            name = %name,
            peer = %peer,
            nat_enabled = ?status.nat_enabled,
            pod_cidr_nat = %status.pod_cidr_nat,
            "Recorded NAT decision"
        );
        Ok(())
    }

    /// Pair with the remote record for the same peer and sync the TunnelEndpoint
    async fn process_local(&self, config: &NetworkConfig) -> Result<(), ReconcileError> {
        let local_nat = config.pod_cidr_nat();
        if local_nat.is_empty() {
            debug!(name = %config.name_any(), "Peer has not decided on our pod range yet");
            return Ok(());
        }
        let peer = config.peer_cluster_id();

        let remotes = self.store.list_network_configs(&remote_selector(peer)).await?;
        let remote = match remotes.as_slice() {
            [] => {
                debug!(peer = %peer, "Remote NetworkConfig not replicated yet");
                return Ok(());
            }
            [remote] => remote,
            _ => {
                error!(
                    peer = %peer,
                    count = remotes.len(),
                    "Multiple remote NetworkConfigs for one peer"
                );
                return Err(ReconcileError::DuplicateRemoteConfig {
                    cluster_id: peer.to_string(),
                    count: remotes.len(),
                });
            }
        };

        let remote_nat = remote.pod_cidr_nat();
        if !remote.nat_decided() || remote_nat.is_empty() {
            debug!(peer = %peer, "NAT decision for the peer's pod range is pending");
            return Ok(());
        }

        let params = NetworkParams {
            cluster_id: peer.to_string(),
            tunnel_public_ip: remote.spec.tunnel_public_ip.clone(),
            pod_cidr: remote.spec.pod_cidr.clone(),
            local_nat_pod_cidr: local_nat.to_string(),
            remote_nat_pod_cidr: remote_nat.to_string(),
        };
        self.tunnels.process(&params).await?;
        Ok(())
    }

    /// Watch NetworkConfigs and reconcile them until the stream ends
    pub async fn run(self: Arc<Self>, client: Client) {
        info!("Starting NetworkConfig reconciliation");

        let configs: Api<NetworkConfig> = Api::all(client);
        let mut stream = Controller::new(configs, watcher::Config::default())
            .run(reconcile, error_policy, self)
            .boxed();

        while let Some(item) = stream.next().await {
            match item {
                Ok((obj, _)) => debug!(name = %obj.name, "Reconciled NetworkConfig"),
                Err(e) => warn!(error = %e, "Error in reconciliation stream"),
            }
        }
    }
}

async fn reconcile(
    config: Arc<NetworkConfig>,
    ctx: Arc<NetworkConfigReconciler>,
) -> Result<Action, ReconcileError> {
    let name = config.metadata.name.as_deref().ok_or(ReconcileError::MissingName)?;
    ctx.reconcile(name).await
}

fn error_policy(
    config: Arc<NetworkConfig>,
    error: &ReconcileError,
    _ctx: Arc<NetworkConfigReconciler>,
) -> Action {
    if error.is_invalid_input() {
        error!(name = %config.name_any(), error = %error, "NetworkConfig needs manual attention");
        Action::requeue(INVALID_INPUT_REQUEUE)
    } else {
        warn!(name = %config.name_any(), error = %error, "Reconcile failed, retrying");
        Action::requeue(REQUEUE_INTERVAL)
    }
}

/// Re-reserve the NAT decisions recorded on remote NetworkConfigs.
///
/// Decided records are skipped by the reconciler, so after a restart their
/// ranges would otherwise be free for other peers. Returns how many
/// reservations were restored.
pub async fn restore_reservations(
    store: &dyn NetworkStore,
    allocator: &SubnetReservations,
) -> Result<usize, CoreError> {
    let selector = format!("{}={}", ORIGIN_LABEL, Origin::Remote.as_label());
    let mut restored = 0;
    for config in store.list_network_configs(&selector).await? {
        if !config.nat_decided() {
            continue;
        }
        let peer = config.peer_cluster_id();
        let decision = parse_cidr(&config.spec.pod_cidr).and_then(|advertised| {
            let subnet = match config.pod_cidr_nat() {
                NO_NAT_SENTINEL => advertised,
                nat => parse_cidr(nat)?,
            };
            Ok((advertised, subnet))
        });
        let restore = match decision {
            Ok((advertised, subnet)) => allocator.restore(peer, advertised, subnet).await,
            Err(e) => Err(e),
        };
        match restore {
            Ok(()) => restored += 1,
            Err(e) => warn!(
                name = %config.name_any(),
                peer = %peer,
                error = %e,
                "Cannot restore reservation"
            ),
        }
    }
    info!(restored, "Restored subnet reservations");
    Ok(restored)
}
