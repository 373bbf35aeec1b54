//! Static network configuration of this cluster

use clap::{ArgAction, Args, ValueEnum};
use ipnetwork::IpNetwork;
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::{Api, Client};
use peernet_core::ipam::{parse_cidr, DEFAULT_POOLS};
use peernet_core::{CoreError, SubnetReservations};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_GATEWAY_SELECTOR: &str = "net.peernet.io/gateway=true";

const GATEWAY_RETRY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cluster ID must not be empty")]
    EmptyClusterId,

    #[error("invalid --{flag}: {source}")]
    InvalidCidr {
        flag: &'static str,
        #[source]
        source: CoreError,
    },

    #[error("cannot reserve {subnet}: {source}")]
    Reservation {
        subnet: IpNetwork,
        #[source]
        source: CoreError,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Identifier of this cluster
    #[arg(long, env = "PEERNET_CLUSTER_ID")]
    pub cluster_id: String,

    /// Pod range of this cluster
    #[arg(long, env = "PEERNET_POD_CIDR")]
    pub pod_cidr: String,

    /// Service range of this cluster
    #[arg(long, env = "PEERNET_SERVICE_CIDR")]
    pub service_cidr: Option<String>,

    /// Public address of the tunnel gateway; discovered from nodes when unset
    #[arg(long, env = "PEERNET_GATEWAY_IP")]
    pub gateway_ip: Option<IpAddr>,

    /// Label selector of the gateway node
    #[arg(long, env = "PEERNET_GATEWAY_SELECTOR", default_value = DEFAULT_GATEWAY_SELECTOR)]
    pub gateway_selector: String,

    /// Extra ranges never handed out to peers (comma-separated)
    #[arg(long, env = "PEERNET_RESERVED_SUBNETS", value_delimiter = ',')]
    pub reserved_subnets: Vec<String>,

    /// Pools substitute ranges are carved from (comma-separated, RFC 1918 blocks when unset)
    #[arg(long, env = "PEERNET_ADDRESS_POOL", value_delimiter = ',')]
    pub address_pool: Vec<String>,

    /// Delete a peer's TunnelEndpoint when its local NetworkConfig goes away
    #[arg(
        long,
        env = "PEERNET_PRUNE_TUNNEL_ENDPOINTS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub prune_tunnel_endpoints: bool,

    #[arg(long, env = "PEERNET_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Identity and address ranges of this cluster, published through the config gate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalNetwork {
    pub cluster_id: String,
    pub pod_cidr: IpNetwork,
    pub service_cidr: Option<IpNetwork>,
    pub reserved_subnets: Vec<IpNetwork>,
    pub gateway_ip: IpAddr,
}

fn parse_flag(flag: &'static str, cidr: &str) -> Result<IpNetwork, ConfigError> {
    parse_cidr(cidr).map_err(|source| ConfigError::InvalidCidr { flag, source })
}

impl RunArgs {
    pub fn address_pools(&self) -> Result<Vec<IpNetwork>, ConfigError> {
        if self.address_pool.is_empty() {
            return DEFAULT_POOLS
                .iter()
                .map(|cidr| parse_flag("address-pool", cidr))
                .collect();
        }
        self.address_pool
            .iter()
            .map(|cidr| parse_flag("address-pool", cidr))
            .collect()
    }

    /// Validate the flags and combine them with the gateway address
    pub fn local_network(&self, gateway_ip: IpAddr) -> Result<LocalNetwork, ConfigError> {
        let cluster_id = self.cluster_id.trim();
        if cluster_id.is_empty() {
            return Err(ConfigError::EmptyClusterId);
        }
        let pod_cidr = parse_flag("pod-cidr", &self.pod_cidr)?;
        let service_cidr = self
            .service_cidr
            .as_deref()
            .map(|cidr| parse_flag("service-cidr", cidr))
            .transpose()?;
        let reserved_subnets = self
            .reserved_subnets
            .iter()
            .filter(|cidr| !cidr.trim().is_empty())
            .map(|cidr| parse_flag("reserved-subnets", cidr))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LocalNetwork {
            cluster_id: cluster_id.to_string(),
            pod_cidr,
            service_cidr,
            reserved_subnets,
            gateway_ip,
        })
    }
}

impl LocalNetwork {
    /// Reserve this cluster's own ranges so no peer is mapped onto them
    pub async fn reserve(&self, allocator: &SubnetReservations) -> Result<(), ConfigError> {
        let subnets = std::iter::once(self.pod_cidr)
            .chain(self.service_cidr)
            .chain(self.reserved_subnets.iter().copied());
        for subnet in subnets {
            allocator
                .reserve(subnet)
                .await
                .map_err(|source| ConfigError::Reservation { subnet, source })?;
        }
        Ok(())
    }
}

/// Address of a gateway node, preferring its external address
pub fn gateway_address(node: &Node) -> Option<IpAddr> {
    let addresses = node.status.as_ref()?.addresses.as_ref()?;
    ["ExternalIP", "InternalIP"].iter().find_map(|kind| {
        addresses
            .iter()
            .filter(|address| address.type_ == *kind)
            .find_map(|address| address.address.parse().ok())
    })
}

async fn find_gateway_ip(nodes: &Api<Node>, selector: &str) -> Result<Option<IpAddr>, kube::Error> {
    let list = nodes.list(&ListParams::default().labels(selector)).await?;
    Ok(list.items.iter().find_map(gateway_address))
}

/// Gateway address from the flags, or from the labelled gateway node once it has one
pub async fn resolve_gateway_ip(client: &Client, args: &RunArgs) -> IpAddr {
    if let Some(ip) = args.gateway_ip {
        return ip;
    }

    let nodes: Api<Node> = Api::all(client.clone());
    let mut ticker = tokio::time::interval(GATEWAY_RETRY_INTERVAL);
    loop {
        ticker.tick().await;
        match find_gateway_ip(&nodes, &args.gateway_selector).await {
            Ok(Some(ip)) => {
                info!(gateway = %ip, "Discovered gateway address");
                return ip;
            }
            Ok(None) => warn!(
                selector = %args.gateway_selector,
                "No gateway node with an address yet, retrying"
            ),
            Err(e) => warn!(error = %e, "Gateway node lookup failed, retrying"),
        }
    }
}
