//! Bridges from peering announcements to local NetworkConfigs
//!
//! Every Advertisement or PeeringRequest that names a peer cluster makes sure
//! a local NetworkConfig exists for that peer. Objects arrive untyped from a
//! watch channel and are decoded into the announcing kind; anything that does
//! not decode is logged and dropped. Bridges do nothing until the static
//! configuration gate opens.

use futures::StreamExt;
use kube::api::{ApiResource, DynamicObject};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::watcher::{self, watcher, Event};
use kube_runtime::WatchStreamExt;
use peernet_api::discovery::AnnouncesCluster;
use peernet_api::NetworkConfig;
use peernet_core::{ConfigGate, CoreError};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::LocalNetwork;
use crate::store::NetworkStore;

const CHANNEL_CAPACITY: usize = 64;

/// Untyped watch notification
#[derive(Clone, Debug)]
pub enum WatchEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
}

/// Create the local NetworkConfig for a peer; an existing one counts as success
pub async fn ensure_local_network_config(
    store: &dyn NetworkStore,
    local: &LocalNetwork,
    peer_cluster_id: &str,
) -> Result<(), CoreError> {
    let config = NetworkConfig::local_for(
        peer_cluster_id,
        &local.pod_cidr.to_string(),
        &local.gateway_ip.to_string(),
    );
    match store.create_network_config(&config).await {
        Ok(_) => {
            info!(
                peer = %peer_cluster_id,
                name = %config.name_any(),
                "Created local NetworkConfig"
            );
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(peer = %peer_cluster_id, "Local NetworkConfig already exists");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn decode<K: DeserializeOwned>(obj: DynamicObject) -> Result<K, serde_json::Error> {
    serde_json::to_value(obj).and_then(serde_json::from_value)
}

/// Consumes watch events for one announcing kind `K`
pub struct EventBridge<K> {
    store: Arc<dyn NetworkStore>,
    gate: ConfigGate<LocalNetwork>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> EventBridge<K>
where
    K: Resource<DynamicType = ()> + AnnouncesCluster + DeserializeOwned,
{
    pub fn new(store: Arc<dyn NetworkStore>, gate: ConfigGate<LocalNetwork>) -> Self {
        Self {
            store,
            gate,
            _kind: PhantomData,
        }
    }

    /// Drain `events` until every sender is gone
    pub async fn run(self, mut events: mpsc::Receiver<WatchEvent>) {
        let local = self.gate.wait().await;
        info!(kind = %K::kind(&()), "Starting event bridge");
        while let Some(event) = events.recv().await {
            self.handle(&local, event).await;
        }
        debug!(kind = %K::kind(&()), "Event bridge channel closed");
    }

    async fn handle(&self, local: &LocalNetwork, event: WatchEvent) {
        let obj = match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => obj,
            WatchEvent::Deleted(obj) => {
                debug!(kind = %K::kind(&()), name = %obj.name_any(), "Ignoring deletion");
                return;
            }
        };

        let name = obj.name_any();
        let resource: K = match decode(obj) {
            Ok(resource) => resource,
            Err(e) => {
                error!(
                    kind = %K::kind(&()),
                    name = %name,
                    error = %e,
                    "Dropping undecodable object"
                );
                return;
            }
        };

        let peer = resource.announced_cluster_id();
        if peer.is_empty() {
            warn!(kind = %K::kind(&()), name = %name, "Object names no cluster, ignoring");
            return;
        }
        if peer == local.cluster_id {
            debug!(kind = %K::kind(&()), name = %name, "Object announces this cluster, ignoring");
            return;
        }

        if let Err(e) = ensure_local_network_config(self.store.as_ref(), local, peer).await {
            error!(peer = %peer, error = %e, "Failed to create local NetworkConfig");
        }
    }
}

/// Relay a cluster-wide watch on `K` into `tx` once the gate opens
pub async fn forward_watch<K>(
    client: Client,
    gate: ConfigGate<LocalNetwork>,
    tx: mpsc::Sender<WatchEvent>,
) where
    K: Resource<DynamicType = ()>,
{
    gate.wait().await;
    let resource = ApiResource::erase::<K>(&());
    let api: Api<DynamicObject> = Api::all_with(client, &resource);
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(Event::InitApply(obj)) => WatchEvent::Added(obj),
            Ok(Event::Apply(obj)) => WatchEvent::Modified(obj),
            Ok(Event::Delete(obj)) => WatchEvent::Deleted(obj),
            Ok(Event::Init) | Ok(Event::InitDone) => continue,
            Err(e) => {
                warn!(kind = %resource.kind, error = %e, "Watch error");
                continue;
            }
        };
        if tx.send(event).await.is_err() {
            debug!(kind = %resource.kind, "Bridge gone, stopping watch");
            break;
        }
    }
}

/// Start the watch relay and bridge for `K`
pub fn spawn<K>(
    client: Client,
    store: Arc<dyn NetworkStore>,
    gate: ConfigGate<LocalNetwork>,
) -> (JoinHandle<()>, JoinHandle<()>)
where
    K: Resource<DynamicType = ()> + AnnouncesCluster + DeserializeOwned + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let watch = tokio::spawn(forward_watch::<K>(client, gate.clone(), tx));
    let bridge = tokio::spawn(EventBridge::<K>::new(store, gate).run(rx));
    (watch, bridge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryStore, StoreOp};
    use peernet_api::discovery::{Advertisement, PeeringRequest};
    use peernet_api::v1alpha1::{ORIGIN_LABEL, PEER_CLUSTER_LABEL};
    use serde_json::json;
    use std::time::Duration;

    fn local() -> LocalNetwork {
        LocalNetwork {
            cluster_id: "cluster-a".into(),
            pod_cidr: "10.0.0.0/16".parse().unwrap(),
            service_cidr: None,
            reserved_subnets: vec![],
            gateway_ip: "203.0.113.7".parse().unwrap(),
        }
    }

    fn advertisement(name: &str, cluster_id: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "sharing.peernet.io/v1alpha1",
            "kind": "Advertisement",
            "metadata": { "name": name },
            "spec": { "clusterId": cluster_id }
        }))
        .unwrap()
    }

    fn peering_request(cluster_id: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "discovery.peernet.io/v1alpha1",
            "kind": "PeeringRequest",
            "metadata": { "name": cluster_id },
            "spec": {
                "clusterIdentity": { "clusterID": cluster_id, "clusterName": "peer" },
                "namespace": "peernet-tenant"
            }
        }))
        .unwrap()
    }

    /// Run a bridge over `events` with the gate already open
    async fn run_bridge<K>(store: Arc<InMemoryStore>, events: Vec<WatchEvent>)
    where
        K: Resource<DynamicType = ()> + AnnouncesCluster + DeserializeOwned,
    {
        let gate = ConfigGate::new();
        gate.open(local());
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        EventBridge::<K>::new(store, gate).run(rx).await;
    }

    #[tokio::test]
    async fn test_advertisement_creates_local_config() {
        let store = Arc::new(InMemoryStore::new());
        run_bridge::<Advertisement>(
            store.clone(),
            vec![WatchEvent::Added(advertisement("adv-b", json!("cluster-b")))],
        )
        .await;

        let config = store.network_config("net-config-cluster-b").unwrap();
        assert_eq!(config.spec.cluster_id, "cluster-b");
        assert_eq!(config.spec.pod_cidr, "10.0.0.0/16");
        assert_eq!(config.spec.tunnel_public_ip, "203.0.113.7");
        assert_eq!(config.labels().get(ORIGIN_LABEL).map(String::as_str), Some("local"));
        assert_eq!(
            config.labels().get(PEER_CLUSTER_LABEL).map(String::as_str),
            Some("cluster-b")
        );
    }

    #[tokio::test]
    async fn test_repeated_events_are_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        run_bridge::<Advertisement>(
            store.clone(),
            vec![
                WatchEvent::Added(advertisement("adv-b", json!("cluster-b"))),
                WatchEvent::Modified(advertisement("adv-b", json!("cluster-b"))),
                WatchEvent::Modified(advertisement("adv-b", json!("cluster-b"))),
            ],
        )
        .await;

        assert_eq!(store.network_configs().len(), 1);
        assert_eq!(store.writes(StoreOp::CreateNetworkConfig), 1);
    }

    #[tokio::test]
    async fn test_ignores_deletions_own_cluster_and_empty_ids() {
        let store = Arc::new(InMemoryStore::new());
        run_bridge::<Advertisement>(
            store.clone(),
            vec![
                WatchEvent::Deleted(advertisement("adv-b", json!("cluster-b"))),
                WatchEvent::Added(advertisement("adv-a", json!("cluster-a"))),
                WatchEvent::Added(advertisement("adv-empty", json!(""))),
            ],
        )
        .await;

        assert!(store.network_configs().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_object_is_dropped() {
        let store = Arc::new(InMemoryStore::new());
        run_bridge::<Advertisement>(
            store.clone(),
            vec![
                WatchEvent::Added(advertisement("adv-bad", json!(42))),
                WatchEvent::Added(advertisement("adv-c", json!("cluster-c"))),
            ],
        )
        .await;

        let configs = store.network_configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].spec.cluster_id, "cluster-c");
    }

    #[tokio::test]
    async fn test_peering_request_creates_local_config() {
        let store = Arc::new(InMemoryStore::new());
        run_bridge::<PeeringRequest>(
            store.clone(),
            vec![WatchEvent::Added(peering_request("cluster-d"))],
        )
        .await;

        assert!(store.network_config("net-config-cluster-d").is_some());
    }

    #[tokio::test]
    async fn test_bridge_waits_for_gate() {
        let store = Arc::new(InMemoryStore::new());
        let gate = ConfigGate::new();
        let (tx, rx) = mpsc::channel(4);
        let bridge =
            tokio::spawn(EventBridge::<Advertisement>::new(store.clone(), gate.clone()).run(rx));

        tx.send(WatchEvent::Added(advertisement("adv-b", json!("cluster-b"))))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.network_configs().is_empty());

        gate.open(local());
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), bridge)
            .await
            .unwrap()
            .unwrap();
        assert!(store.network_config("net-config-cluster-b").is_some());
    }

    #[tokio::test]
    async fn test_existing_config_counts_as_success() {
        let store = InMemoryStore::new();
        store.insert_network_config(NetworkConfig::local_for(
            "cluster-b",
            "10.0.0.0/16",
            "203.0.113.7",
        ));
        ensure_local_network_config(&store, &local(), "cluster-b").await.unwrap();
        assert_eq!(store.writes(StoreOp::CreateNetworkConfig), 0);
    }
}
