//! Periodic log of the subscription status.
use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{registry::NodeRegistry, status::ReconcilerStatus};

const MIN_STATS_PERIOD: Duration = Duration::from_secs(1);

/// Logs the subscription status of every registered node each `period` until `cancel` fires.
pub fn spawn_stats_logger(
    status: watch::Receiver<ReconcilerStatus>,
    registry: Arc<dyn NodeRegistry>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?period, "zmq stats logger is starting");
        // `interval` panics on a zero period.
        let mut ticks = time::interval(period.max(MIN_STATS_PERIOD));
        ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => log_stats(&status.borrow(), registry.as_ref()),
            }
        }
        info!("zmq stats logger stopped");
    })
}

fn log_stats(status: &ReconcilerStatus, registry: &dyn NodeRegistry) {
    let nodes = registry.nodes();
    info!(
        active = status.active_subscriptions(),
        failed = status.failed_subscriptions(),
        nodes = nodes.len(),
        "zmq stats"
    );

    for node in nodes {
        let Some(node_status) = status.node(&node.id) else {
            warn!(node = %node.id, "node has no zmq subscription status yet");
            continue;
        };

        let endpoints = node_status
            .endpoints
            .iter()
            .map(|endpoint| {
                let topics = endpoint
                    .topics
                    .iter()
                    .map(|topic| topic.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{} [{topics}]", endpoint.address)
            })
            .collect::<Vec<_>>()
            .join("; ");
        let last_message_at = node_status
            .endpoints
            .iter()
            .filter_map(|endpoint| endpoint.last_message_at)
            .max();

        info!(
            node = %node.id,
            state = ?node_status.state,
            responding = node_status.is_responding(),
            %endpoints,
            ?last_message_at,
            last_attempt_at = ?node_status.last_connection_attempt_at,
            last_error = ?node_status.last_error,
            "zmq subscription status"
        );
    }
}

#[cfg(test)]
mod tests {
    use gateway_event_bus::EventBus;
    use gateway_rpc::NodeEndpoint;

    use super::*;
    use crate::registry::InMemoryNodeRegistry;

    #[tokio::test]
    async fn stops_on_cancel() {
        let registry = Arc::new(InMemoryNodeRegistry::new(EventBus::new()));
        registry.add(NodeEndpoint::new("a", "127.0.0.1", 18332, "user", "pass"));
        let (_tx, status) = watch::channel(ReconcilerStatus::default());
        let cancel = CancellationToken::new();

        let handle = spawn_stats_logger(status, registry, Duration::ZERO, cancel.clone());
        cancel.cancel();

        time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("stats logger must stop")
            .expect("stats logger must not panic");
    }
}
