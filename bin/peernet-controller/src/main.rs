//! peernet controller
//!
//! Negotiates pod address ranges with peer clusters and maintains one
//! TunnelEndpoint per peer once both sides have agreed on their ranges.

use anyhow::Result;
use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use peernet_api::{NetworkConfig, TunnelEndpoint};
use peernet_api::discovery::{Advertisement, PeeringRequest};
use peernet_core::{ConfigGate, SubnetReservations};
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod event_bridge;
mod network_config_controller;
mod store;
#[cfg(test)]
mod testing;
mod tunnel_endpoint;

use config::{LocalNetwork, LogFormat, RunArgs};
use network_config_controller::{restore_reservations, NetworkConfigReconciler};
use store::{KubeNetworkStore, NetworkStore};

#[derive(Parser)]
#[command(name = "peernet-controller")]
#[command(about = "Pod range negotiation and tunnel endpoints for peered clusters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print CRD manifests to stdout
    Crds,
    /// Run the controller
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crds => print_crds(),
        Commands::Run(args) => run(args).await,
    }
}

fn print_crds() -> Result<()> {
    for crd in [NetworkConfig::crd(), TunnelEndpoint::crd()] {
        println!("---");
        println!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

/// Resolve this cluster's network, reserve its ranges and recover earlier decisions
async fn load_local_network(
    client: &Client,
    args: &RunArgs,
    store: &dyn NetworkStore,
    allocator: &SubnetReservations,
) -> Result<LocalNetwork> {
    let gateway_ip = config::resolve_gateway_ip(client, args).await;
    let local = args.local_network(gateway_ip)?;
    local.reserve(allocator).await?;
    restore_reservations(store, allocator).await?;
    Ok(local)
}

async fn run(args: RunArgs) -> Result<()> {
    init_tracing(args.log_format);

    info!("Starting peernet-controller...");

    let client = Client::try_default().await?;
    let store: Arc<dyn NetworkStore> = Arc::new(KubeNetworkStore::new(client.clone()));
    let allocator = Arc::new(SubnetReservations::new(args.address_pools()?)?);
    let gate: ConfigGate<LocalNetwork> = ConfigGate::new();

    let reconciler = Arc::new(
        NetworkConfigReconciler::new(store.clone(), allocator.clone(), gate.clone())
            .prune_tunnel_endpoints(args.prune_tunnel_endpoints),
    );

    let _advertisements =
        event_bridge::spawn::<Advertisement>(client.clone(), store.clone(), gate.clone());
    let _peering_requests =
        event_bridge::spawn::<PeeringRequest>(client.clone(), store.clone(), gate.clone());

    // Everything above waits on the gate; opening it starts the real work
    let configure = async {
        let local = load_local_network(&client, &args, store.as_ref(), &allocator).await?;
        info!(
            cluster_id = %local.cluster_id,
            pod_cidr = %local.pod_cidr,
            gateway = %local.gateway_ip,
            "Static network configuration loaded"
        );
        gate.open(local);
        std::future::pending::<Result<()>>().await
    };

    tokio::select! {
        result = configure => result?,
        _ = reconciler.run(client.clone()) => warn!("NetworkConfig controller stopped"),
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received, exiting..."),
    }

    Ok(())
}
