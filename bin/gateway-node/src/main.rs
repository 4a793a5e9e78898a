//! The gateway node keeps the transaction gateway subscribed to the notifications of its nodes
//! and redistributes them as events.
use std::{convert::Infallible, fs, path::Path, sync::Arc};

use anyhow::Context;
use clap::Parser;
use config::{Config, NodeConfig};
use constants::DEFAULT_THREAD_COUNT;
use gateway_btc_notify::{
    reachability::is_endpoint_reachable, stats::spawn_stats_logger, InMemoryNodeRegistry,
    InvalidTxDetected, NewBlockDiscovered, RemovedFromMempool, ZmqConnector, ZmqFailed,
    ZmqReconciler, ZmqSubscribed, ZmqUnsubscribed,
};
use gateway_common::{
    clock::SystemClock,
    logging::{self, LoggerConfig},
};
use gateway_event_bus::EventBus;
use gateway_rpc::{MultiClient, NodeEndpoint, RpcClientFactory};
use serde::de::DeserializeOwned;
use tokio::{runtime, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

mod args;
mod config;
mod constants;

fn main() -> anyhow::Result<()> {
    logging::init(LoggerConfig::with_base_name("gateway-node"));

    let cli = args::Cli::parse();
    let config = parse_toml::<Config>(&cli.config)?;
    info!(config = %cli.config.display(), nodes = config.nodes.len(), "starting gateway node");

    let runtime = runtime::Builder::new_multi_thread()
        .worker_threads(config.num_threads.unwrap_or(DEFAULT_THREAD_COUNT))
        .enable_all()
        .build()
        .context("must be able to create runtime")?;

    runtime.block_on(run(config))?;

    info!("gateway node shutdown complete");
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let bus = EventBus::new();
    let factory = RpcClientFactory::new(config.rpc)?;
    let registry = Arc::new(InMemoryNodeRegistry::new(bus.clone()));

    let nodes = MultiClient::new(factory.clone(), registry.clone());

    let reconciler = ZmqReconciler::new(
        bus.clone(),
        Arc::new(factory),
        Arc::new(ZmqConnector::new()),
        Arc::new(SystemClock),
        config.zmq,
    );

    let mut tasks = spawn_log_handlers(&bus, &cancel);
    tasks.push(spawn_stats_logger(
        reconciler.status(),
        registry.clone(),
        config.zmq.stats_period,
        cancel.clone(),
    ));
    tasks.push(reconciler.spawn(registry.clone(), cancel.clone()));

    for node in config.nodes {
        register_node(&registry, node).await;
    }
    tasks.push(spawn_chain_tip_check(nodes, cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for the shutdown signal")?;
    info!("shutdown signal received, stopping");
    cancel.cancel();

    for task in tasks {
        task.await.context("task did not stop cleanly")?;
    }
    Ok(())
}

/// Registers `node` unless its configured ZMQ endpoint is unreachable.
async fn register_node(registry: &InMemoryNodeRegistry, node: NodeConfig) {
    if let Some(address) = &node.zmq_notifications_endpoint {
        if !is_endpoint_reachable(address).await {
            error!(node = %node.id, %address, "zmq endpoint is unreachable, skipping node");
            return;
        }
    }

    let id = node.id.clone();
    if !registry.add(NodeEndpoint::from(node)) {
        warn!(node = %id, "node is configured twice, ignoring the duplicate");
    }
}

/// Logs the highest chain tip among the registered nodes once.
fn spawn_chain_tip_check(nodes: MultiClient, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match nodes.get_best_blockchain_info(&cancel).await {
            Ok(info) => {
                info!(chain = %info.chain, blocks = info.blocks, best_block_hash = %info.best_block_hash, "best chain tip");
            }
            Err(err) if cancel.is_cancelled() => debug!(%err, "chain tip check cancelled"),
            Err(err) => warn!(%err, "cannot read the chain tip of any node"),
        }
    })
}

/// Logs every domain event until `cancel` fires.
fn spawn_log_handlers(bus: &EventBus, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    vec![
        bus.spawn_handler(cancel.clone(), |event: NewBlockDiscovered| async move {
            info!(block_hash = %event.block_hash, "new block discovered");
            Ok::<_, Infallible>(())
        }),
        bus.spawn_handler(cancel.clone(), |event: InvalidTxDetected| async move {
            info!(txid = %event.message.txid, reason = ?event.message.rejection_reason, "invalid transaction");
            Ok::<_, Infallible>(())
        }),
        bus.spawn_handler(cancel.clone(), |event: RemovedFromMempool| async move {
            info!(txid = %event.message.txid, reason = %event.message.reason, "removed from mempool");
            Ok::<_, Infallible>(())
        }),
        bus.spawn_handler(cancel.clone(), |event: ZmqSubscribed| async move {
            info!(node = %event.node.id, "zmq subscribed");
            Ok::<_, Infallible>(())
        }),
        bus.spawn_handler(cancel.clone(), |event: ZmqUnsubscribed| async move {
            info!(node = %event.node.id, "zmq unsubscribed");
            Ok::<_, Infallible>(())
        }),
        bus.spawn_handler(cancel.clone(), |event: ZmqFailed| async move {
            warn!(node = %event.node.id, reason = %event.reason, "zmq subscription failed");
            Ok::<_, Infallible>(())
        }),
    ]
}

/// Reads and parses a TOML file from the given path into the given type `T`.
fn parse_toml<T>(path: impl AsRef<Path>) -> anyhow::Result<T>
where
    T: std::fmt::Debug + DeserializeOwned,
{
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read TOML file {}", path.display()))?;
    trace!(path = %path.display(), bytes = contents.len(), "read file");

    let parsed = toml::from_str::<T>(&contents).context("failed to parse TOML file")?;
    debug!(?parsed, "parsed TOML file");

    Ok(parsed)
}
