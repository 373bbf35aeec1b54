//! In-memory NetworkStore for tests
//!
//! Mimics the API server semantics the reconciler depends on:
//! resourceVersion checks on every write, status ignored on create and on
//! main-resource replace, and physical removal once a deleting object has no
//! finalizers left. Conflicts and read-after-write lag can be injected.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use peernet_api::{NetworkConfig, NetworkConfigStatus, TunnelEndpoint};
use peernet_core::{CoreError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::store::NetworkStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateNetworkConfig,
    ReplaceNetworkConfig,
    ReplaceNetworkConfigStatus,
    CreateTunnelEndpoint,
    ReplaceTunnelEndpoint,
    ReplaceTunnelEndpointStatus,
    DeleteTunnelEndpoint,
}

#[derive(Default)]
struct State {
    configs: BTreeMap<String, NetworkConfig>,
    endpoints: BTreeMap<String, TunnelEndpoint>,
    version: u64,
    conflicts: HashMap<StoreOp, u32>,
    writes: HashMap<StoreOp, u32>,
    read_lag: u32,
    invisible: HashMap<String, u32>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn take_conflict(&mut self, op: StoreOp, name: &str) -> Result<()> {
        match self.conflicts.get_mut(&op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(CoreError::Conflict(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn record(&mut self, op: StoreOp) {
        *self.writes.entry(op).or_default() += 1;
    }
}

fn matches_selector<K: Resource>(obj: &K, selector: &str) -> bool {
    let labels = obj.labels();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

fn create_object<K>(
    objects: &mut BTreeMap<String, K>,
    version: String,
    incoming: &K,
    clear_status: impl FnOnce(&mut K),
) -> Result<K>
where
    K: Resource + Clone,
{
    let name = incoming.name_any();
    if objects.contains_key(&name) {
        return Err(CoreError::AlreadyExists(name));
    }
    let mut created = incoming.clone();
    clear_status(&mut created);
    created.meta_mut().resource_version = Some(version);
    objects.insert(name, created.clone());
    Ok(created)
}

/// Replace `incoming` if its resourceVersion is current; `merge` decides
/// which parts of the stored object survive the write.
fn replace_object<K>(
    objects: &mut BTreeMap<String, K>,
    version: String,
    incoming: &K,
    merge: impl FnOnce(&K, &mut K),
) -> Result<K>
where
    K: Resource + Clone,
{
    let name = incoming.name_any();
    let stored = objects
        .get(&name)
        .ok_or_else(|| CoreError::NotFound(name.clone()))?;
    if let Some(expected) = incoming.resource_version() {
        if stored.resource_version().as_deref() != Some(expected.as_str()) {
            return Err(CoreError::Conflict(name));
        }
    }

    let mut updated = incoming.clone();
    merge(stored, &mut updated);
    updated.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
    updated.meta_mut().resource_version = Some(version);

    if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
        objects.remove(&name);
    } else {
        objects.insert(name, updated.clone());
    }
    Ok(updated)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as-is, status included
    pub fn insert_network_config(&self, mut config: NetworkConfig) -> NetworkConfig {
        let mut state = self.state.lock().unwrap();
        config.metadata.resource_version = Some(state.next_version());
        state.configs.insert(config.name_any(), config.clone());
        config
    }

    pub fn insert_tunnel_endpoint(&self, mut endpoint: TunnelEndpoint) -> TunnelEndpoint {
        let mut state = self.state.lock().unwrap();
        endpoint.metadata.resource_version = Some(state.next_version());
        state.endpoints.insert(endpoint.name_any(), endpoint.clone());
        endpoint
    }

    /// Overwrite a NetworkConfig status out of band, as a peer's replication would
    pub fn set_network_config_status(&self, name: &str, status: NetworkConfigStatus) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let config = state.configs.get_mut(name).unwrap();
        config.status = Some(status);
        config.metadata.resource_version = Some(version);
    }

    /// Request deletion: removed at once without finalizers, otherwise only stamped
    pub fn mark_deleted(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let finalized = state.configs.get(name).unwrap().finalizers().is_empty();
        if finalized {
            state.configs.remove(name);
            return;
        }
        let version = state.next_version();
        let stamp: Time =
            serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
        let config = state.configs.get_mut(name).unwrap();
        config.metadata.deletion_timestamp = Some(stamp);
        config.metadata.resource_version = Some(version);
    }

    pub fn network_config(&self, name: &str) -> Option<NetworkConfig> {
        self.state.lock().unwrap().configs.get(name).cloned()
    }

    pub fn network_configs(&self) -> Vec<NetworkConfig> {
        self.state.lock().unwrap().configs.values().cloned().collect()
    }

    pub fn tunnel_endpoint(&self, name: &str) -> Option<TunnelEndpoint> {
        self.state.lock().unwrap().endpoints.get(name).cloned()
    }

    pub fn tunnel_endpoints(&self) -> Vec<TunnelEndpoint> {
        self.state.lock().unwrap().endpoints.values().cloned().collect()
    }

    /// Fail the next `count` calls of `op` with a version conflict
    pub fn inject_conflicts(&self, op: StoreOp, count: u32) {
        self.state.lock().unwrap().conflicts.insert(op, count);
    }

    /// Newly created TunnelEndpoints stay invisible to the next `reads` gets
    pub fn lag_reads_after_create(&self, reads: u32) {
        self.state.lock().unwrap().read_lag = reads;
    }

    /// Successful writes of one kind
    pub fn writes(&self, op: StoreOp) -> u32 {
        self.state.lock().unwrap().writes.get(&op).copied().unwrap_or(0)
    }

    pub fn total_writes(&self) -> u32 {
        self.state.lock().unwrap().writes.values().sum()
    }
}

#[async_trait]
impl NetworkStore for InMemoryStore {
    async fn get_network_config(&self, name: &str) -> Result<Option<NetworkConfig>> {
        Ok(self.network_config(name))
    }

    async fn list_network_configs(&self, label_selector: &str) -> Result<Vec<NetworkConfig>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .configs
            .values()
            .filter(|config| matches_selector(*config, label_selector))
            .cloned()
            .collect())
    }

    async fn create_network_config(&self, config: &NetworkConfig) -> Result<NetworkConfig> {
        let mut state = self.state.lock().unwrap();
        state.take_conflict(StoreOp::CreateNetworkConfig, &config.name_any())?;
        let version = state.next_version();
        let created = create_object(&mut state.configs, version, config, |c| c.status = None)?;
        state.record(StoreOp::CreateNetworkConfig);
        Ok(created)
    }

    async fn replace_network_config(&self, config: &NetworkConfig) -> Result<NetworkConfig> {
        let mut state = self.state.lock().unwrap();
        state.take_conflict(StoreOp::ReplaceNetworkConfig, &config.name_any())?;
        let version = state.next_version();
        let updated = replace_object(&mut state.configs, version, config, |stored, updated| {
            updated.status = stored.status.clone();
        })?;
        state.record(StoreOp::ReplaceNetworkConfig);
        Ok(updated)
    }

    async fn replace_network_config_status(&self, config: &NetworkConfig) -> Result<NetworkConfig> {
        let mut state = self.state.lock().unwrap();
        state.take_conflict(StoreOp::ReplaceNetworkConfigStatus, &config.name_any())?;
        let version = state.next_version();
        let updated = replace_object(&mut state.configs, version, config, |stored, updated| {
            let status = updated.status.take();
            *updated = stored.clone();
            updated.status = status;
        })?;
        state.record(StoreOp::ReplaceNetworkConfigStatus);
        Ok(updated)
    }

    async fn get_tunnel_endpoint(&self, name: &str) -> Result<Option<TunnelEndpoint>> {
        let mut state = self.state.lock().unwrap();
        if let Some(left) = state.invisible.get_mut(name) {
            if *left > 0 {
                *left -= 1;
                return Ok(None);
            }
        }
        Ok(state.endpoints.get(name).cloned())
    }

    async fn create_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint> {
        let mut state = self.state.lock().unwrap();
        let name = endpoint.name_any();
        state.take_conflict(StoreOp::CreateTunnelEndpoint, &name)?;
        let version = state.next_version();
        let created = create_object(&mut state.endpoints, version, endpoint, |e| e.status = None)?;
        let lag = state.read_lag;
        state.invisible.insert(name, lag);
        state.record(StoreOp::CreateTunnelEndpoint);
        Ok(created)
    }

    async fn replace_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint> {
        let mut state = self.state.lock().unwrap();
        state.take_conflict(StoreOp::ReplaceTunnelEndpoint, &endpoint.name_any())?;
        let version = state.next_version();
        let updated = replace_object(&mut state.endpoints, version, endpoint, |stored, updated| {
            updated.status = stored.status.clone();
        })?;
        state.record(StoreOp::ReplaceTunnelEndpoint);
        Ok(updated)
    }

    async fn replace_tunnel_endpoint_status(
        &self,
        endpoint: &TunnelEndpoint,
    ) -> Result<TunnelEndpoint> {
        let mut state = self.state.lock().unwrap();
        state.take_conflict(StoreOp::ReplaceTunnelEndpointStatus, &endpoint.name_any())?;
        let version = state.next_version();
        let updated = replace_object(&mut state.endpoints, version, endpoint, |stored, updated| {
            let status = updated.status.take();
            *updated = stored.clone();
            updated.status = status;
        })?;
        state.record(StoreOp::ReplaceTunnelEndpointStatus);
        Ok(updated)
    }

    async fn delete_tunnel_endpoint(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.endpoints.remove(name).is_none() {
            return Err(CoreError::NotFound(name.to_string()));
        }
        state.record(StoreOp::DeleteTunnelEndpoint);
        Ok(())
    }
}
