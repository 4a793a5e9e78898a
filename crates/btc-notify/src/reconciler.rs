//! This module contains [`ZmqReconciler`], which keeps the open notification sockets in line with
//! the registered nodes.
//!
//! The reconciler owns every socket. Node changes reach it through [`EventBus`] subscriptions and
//! observers follow its state through a [`watch`] channel, so nothing else ever touches the socket
//! set.
use std::{
    collections::{btree_map::Entry, BTreeMap, VecDeque},
    iter, mem,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use gateway_common::clock::Clock;
use gateway_event_bus::EventBus;
use gateway_rpc::{NodeEndpoint, NodeId, RpcError};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::ReconcilerConfig,
    discovery::{DiscoveredTopic, TopicDiscovery},
    event::{
        InvalidTxDetected, NewBlockDiscovered, NodeAdded, NodeDeleted, RemovedFromMempool,
        ZmqFailed, ZmqSubscribed, ZmqUnsubscribed,
    },
    message::{InvalidTxMessage, RemovedFromMempoolMessage},
    registry::NodeRegistry,
    socket::{NotificationSocket, SocketConnector, SocketError, WireMessage},
    status::{EndpointStatus, NodeState, NodeStatus, ReconcilerStatus},
    topic::ZmqTopic,
};

/// Why a node could not be subscribed to.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The node did not tell which notifications it publishes.
    #[error("cannot discover zmq notifications of node {node}: {source}")]
    Discovery {
        /// The node.
        node: NodeId,

        /// The failed RPC call.
        #[source]
        source: RpcError,
    },

    /// A socket could not be opened or subscribed.
    #[error("cannot subscribe to zmq notifications of node {node}: {source}")]
    Socket {
        /// The node.
        node: NodeId,

        /// The address of the socket.
        address: String,

        /// The socket failure.
        #[source]
        source: SocketError,
    },
}

impl ReconcileError {
    /// The node the error is about.
    pub const fn node(&self) -> &NodeId {
        match self {
            ReconcileError::Discovery { node, .. } | ReconcileError::Socket { node, .. } => node,
        }
    }
}

/// An open socket. At most one exists per address.
#[derive(Debug)]
struct SocketSubscription {
    /// The node whose discovery opened the socket.
    node: NodeId,
    topics: Vec<ZmqTopic>,
    socket: Box<dyn NotificationSocket>,
    subscribed_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
}

impl SocketSubscription {
    fn status(&self, address: &str) -> EndpointStatus {
        EndpointStatus {
            address: address.to_string(),
            topics: self.topics.clone(),
            subscribed_at: self.subscribed_at,
            last_message_at: self.last_message_at,
        }
    }
}

#[derive(Debug)]
struct NodeRecord {
    endpoint: NodeEndpoint,
    state: NodeState,
    last_connection_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl NodeRecord {
    const fn new(endpoint: NodeEndpoint) -> Self {
        Self {
            endpoint,
            state: NodeState::ConnectivityChecking,
            last_connection_attempt_at: None,
            last_error: None,
        }
    }
}

/// Subscribes to the notifications of every registered node and republishes them as events.
///
/// Use [`Self::run`] (or [`Self::spawn`]) to follow the node registry; [`Self::add_node`] and
/// [`Self::remove_node`] drive the same transitions by hand.
#[derive(Debug)]
pub struct ZmqReconciler {
    bus: EventBus,
    discovery: Arc<dyn TopicDiscovery>,
    connector: Arc<dyn SocketConnector>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    subscriptions: BTreeMap<String, SocketSubscription>,
    nodes: BTreeMap<NodeId, NodeRecord>,
    /// Removed nodes still reported in the status, oldest first.
    removed: VecDeque<NodeId>,
    status: watch::Sender<ReconcilerStatus>,
}

impl ZmqReconciler {
    /// Creates a reconciler without any socket.
    pub fn new(
        bus: EventBus,
        discovery: Arc<dyn TopicDiscovery>,
        connector: Arc<dyn SocketConnector>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        let (status, _) = watch::channel(ReconcilerStatus::default());

        Self {
            bus,
            discovery,
            connector,
            clock,
            config,
            subscriptions: BTreeMap::new(),
            nodes: BTreeMap::new(),
            removed: VecDeque::new(),
            status,
        }
    }

    /// Follows the reconciler's state. A new snapshot is published after every mutation.
    pub fn status(&self) -> watch::Receiver<ReconcilerStatus> {
        self.status.subscribe()
    }

    /// Number of open sockets.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    /// Subscribes to every known notification `node` publishes and publishes [`ZmqSubscribed`].
    ///
    /// Sockets are shared per address: a socket opened for another node is reused. On failure only
    /// the sockets opened by this call are closed. A node that was already subscribed keeps its
    /// sockets and its state, any other node is marked [`NodeState::Failed`].
    pub async fn add_node(
        &mut self,
        node: &NodeEndpoint,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let now = self.clock.now();
        let record = self
            .nodes
            .entry(node.id.clone())
            .or_insert_with(|| NodeRecord::new(node.clone()));
        let previous = record.state;
        record.endpoint = node.clone();
        record.state = NodeState::ConnectivityChecking;
        record.last_connection_attempt_at = Some(now);
        self.removed.retain(|id| id != &node.id);
        self.publish_status();

        let mut opened = Vec::new();
        match self.subscribe_node(node, &mut opened, cancel).await {
            Ok(count) => {
                self.set_state(&node.id, NodeState::Subscribed, None);
                info!(node = %node.id, topics = count, "subscribed to zmq notifications");
                self.bus.publish(ZmqSubscribed { node: node.clone() });
                Ok(())
            }
            Err(err) => {
                let closed = self.close_sockets(&opened).await;
                let state = if previous == NodeState::Subscribed && self.owns_sockets(&node.id) {
                    NodeState::Subscribed
                } else {
                    NodeState::Failed
                };
                debug!(node = %node.id, %closed, ?state, "closed sockets opened for failed node");
                self.set_state(&node.id, state, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Closes every socket owned by `node` and publishes one [`ZmqUnsubscribed`].
    ///
    /// The node stays in the status as [`NodeState::Removed`] until more than
    /// [`ReconcilerConfig::removed_nodes_kept`] nodes were removed after it. Returns the number of
    /// closed sockets.
    pub async fn remove_node(&mut self, node: &NodeEndpoint) -> usize {
        let closed = self.close_sockets_of(&node.id).await;
        self.keep_removed(&node.id);
        self.set_state(&node.id, NodeState::Removed, None);

        info!(node = %node.id, %closed, "removed zmq subscriptions of node");
        self.bus.publish(ZmqUnsubscribed { node: node.clone() });
        closed
    }

    /// Runs the reconciler until `cancel` fires.
    ///
    /// Nodes already in `registry` are subscribed to first, then node changes are applied as they
    /// are announced and every open socket is polled in turn. A node that cannot be subscribed to
    /// is reported with [`ZmqFailed`]. On exit every socket is closed.
    pub async fn run(mut self, registry: &dyn NodeRegistry, cancel: CancellationToken) {
        info!("zmq reconciler is starting");

        let mut added = self.bus.subscribe::<NodeAdded>();
        let mut deleted = self.bus.subscribe::<NodeDeleted>();

        // Nodes registered before the subscriptions above existed.
        let mut pending_added = registry.nodes();

        while !cancel.is_cancelled() {
            pending_added.extend(iter::from_fn(|| added.try_next()).map(|event| event.node));
            let pending_deleted: Vec<_> = iter::from_fn(|| deleted.try_next())
                .map(|event| event.node)
                .collect();
            self.apply_node_changes(mem::take(&mut pending_added), pending_deleted, &cancel)
                .await;

            if self.subscriptions.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = time::sleep(self.config.idle_sleep) => {}
                }
                continue;
            }

            self.poll_sockets(&cancel).await;
        }

        self.bus.unsubscribe(&added);
        self.bus.unsubscribe(&deleted);
        self.shutdown().await;
    }

    /// Runs [`Self::run`] on a new task.
    pub fn spawn(self, registry: Arc<dyn NodeRegistry>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(registry.as_ref(), cancel).await })
    }

    async fn apply_node_changes(
        &mut self,
        added: Vec<NodeEndpoint>,
        deleted: Vec<NodeEndpoint>,
        cancel: &CancellationToken,
    ) {
        let changed = !added.is_empty() || !deleted.is_empty();

        if !added.is_empty() {
            info!(count = added.len(), "nodes were added, activating zmq subscriptions");
        }
        for node in added {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(err) = self.add_node(&node, cancel).await {
                if cancel.is_cancelled() {
                    return;
                }
                error!(node = %node.id, %err, "cannot subscribe to zmq notifications");
                self.bus.publish(ZmqFailed {
                    node,
                    reason: err.to_string(),
                });
            }
        }

        if !deleted.is_empty() {
            info!(count = deleted.len(), "nodes were removed, removing zmq subscriptions");
        }
        for node in deleted {
            self.remove_node(&node).await;
        }

        if changed {
            info!(
                active = self.subscriptions.len(),
                "zmq subscriptions after node changes"
            );
        }
    }

    /// Returns the number of topics subscribed for `node`. The addresses of newly opened sockets
    /// are appended to `opened`, even on failure.
    async fn subscribe_node(
        &mut self,
        node: &NodeEndpoint,
        opened: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<usize, ReconcileError> {
        let discovered = self
            .discovery
            .discover(node, cancel)
            .await
            .map_err(|source| ReconcileError::Discovery {
                node: node.id.clone(),
                source,
            })?;

        let mut subscribed = 0;
        for DiscoveredTopic { topic, address } in discovered {
            if !topic.is_known() {
                debug!(node = %node.id, %topic, "skipping unsupported zmq notification");
                continue;
            }

            self.subscribe_topic(&node.id, &address, topic, opened)
                .await
                .map_err(|source| ReconcileError::Socket {
                    node: node.id.clone(),
                    address: address.clone(),
                    source,
                })?;
            subscribed += 1;
        }

        Ok(subscribed)
    }

    async fn subscribe_topic(
        &mut self,
        node: &NodeId,
        address: &str,
        topic: ZmqTopic,
        opened: &mut Vec<String>,
    ) -> Result<(), SocketError> {
        let subscription = match self.subscriptions.entry(address.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let socket = self.connector.connect(address).await?;
                opened.push(address.to_string());
                entry.insert(SocketSubscription {
                    node: node.clone(),
                    topics: Vec::new(),
                    socket,
                    subscribed_at: self.clock.now(),
                    last_message_at: None,
                })
            }
        };

        if !subscription.topics.contains(&topic) {
            subscription.socket.subscribe(&topic).await?;
            subscription.topics.push(topic);
        }

        Ok(())
    }

    async fn poll_sockets(&mut self, cancel: &CancellationToken) {
        let addresses: Vec<String> = self.subscriptions.keys().cloned().collect();

        for address in addresses {
            if cancel.is_cancelled() {
                return;
            }
            let Some(subscription) = self.subscriptions.get_mut(&address) else {
                continue;
            };

            match subscription.socket.poll(self.config.poll_timeout).await {
                Ok(Some(message)) => {
                    subscription.last_message_at = Some(self.clock.now());
                    let node = subscription.node.clone();
                    debug!(
                        %address,
                        topic = %message.topic,
                        len = message.payload.len(),
                        "received zmq message"
                    );
                    dispatch(&self.bus, &node, message);
                    self.publish_status();
                }
                Ok(None) => {}
                Err(SocketError::Closed) => {
                    let node = subscription.node.clone();
                    error!(%address, %node, "zmq socket was lost, dropping its subscription");
                    self.subscriptions.remove(&address);
                    self.fail_node(&node, format!("zmq socket {address} was lost"))
                        .await;
                }
                Err(err) => {
                    warn!(%address, %err, "cannot receive from zmq socket");
                }
            }
        }
    }

    /// Marks `node` failed, closes the sockets it still owns and publishes [`ZmqFailed`].
    async fn fail_node(&mut self, node: &NodeId, reason: String) {
        let closed = self.close_sockets_of(node).await;
        self.set_state(node, NodeState::Failed, Some(reason.clone()));

        if let Some(record) = self.nodes.get(node) {
            warn!(%node, %closed, "zmq subscriptions of node failed");
            self.bus.publish(ZmqFailed {
                node: record.endpoint.clone(),
                reason,
            });
        }
    }

    async fn close_sockets(&mut self, addresses: &[String]) -> usize {
        let mut closed = 0;
        for address in addresses {
            if let Some(subscription) = self.subscriptions.remove(address) {
                subscription.socket.close().await;
                closed += 1;
            }
        }
        closed
    }

    fn owns_sockets(&self, node: &NodeId) -> bool {
        self.subscriptions
            .values()
            .any(|subscription| &subscription.node == node)
    }

    /// Queues `node` among the removed nodes and forgets the oldest ones beyond the limit.
    fn keep_removed(&mut self, node: &NodeId) {
        if !self.nodes.contains_key(node) {
            return;
        }
        self.removed.retain(|id| id != node);
        self.removed.push_back(node.clone());

        while self.removed.len() > self.config.removed_nodes_kept {
            if let Some(oldest) = self.removed.pop_front() {
                self.nodes.remove(&oldest);
            }
        }
    }

    async fn close_sockets_of(&mut self, node: &NodeId) -> usize {
        let (closing, keep): (BTreeMap<_, _>, BTreeMap<_, _>) = mem::take(&mut self.subscriptions)
            .into_iter()
            .partition(|(_, subscription)| &subscription.node == node);
        self.subscriptions = keep;

        let closed = closing.len();
        for subscription in closing.into_values() {
            subscription.socket.close().await;
        }
        closed
    }

    async fn shutdown(&mut self) {
        let subscriptions = mem::take(&mut self.subscriptions);
        let closed = subscriptions.len();
        for subscription in subscriptions.into_values() {
            subscription.socket.close().await;
        }
        self.publish_status();

        info!(%closed, "zmq reconciler stopped");
    }

    fn set_state(&mut self, node: &NodeId, state: NodeState, last_error: Option<String>) {
        if let Some(record) = self.nodes.get_mut(node) {
            record.state = state;
            record.last_error = last_error;
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let nodes = self
            .nodes
            .iter()
            .map(|(id, record)| {
                let endpoints = self
                    .subscriptions
                    .iter()
                    .filter(|(_, subscription)| &subscription.node == id)
                    .map(|(address, subscription)| subscription.status(address))
                    .collect();

                let status = NodeStatus {
                    state: record.state,
                    endpoints,
                    last_connection_attempt_at: record.last_connection_attempt_at,
                    last_error: record.last_error.clone(),
                };
                (id.clone(), status)
            })
            .collect();

        self.status.send_replace(ReconcilerStatus { nodes });
    }
}

/// Publishes the event carried by `message`. Returns whether an event was published.
///
/// Messages that cannot be decoded and messages of unknown topics are logged and dropped.
pub(crate) fn dispatch(bus: &EventBus, node: &NodeId, message: WireMessage) -> bool {
    let WireMessage { topic, payload } = message;

    match topic {
        ZmqTopic::HashBlock => {
            let block_hash = hex::encode(&payload);
            info!(%node, %block_hash, "new block discovered");
            bus.publish(NewBlockDiscovered { block_hash });
            true
        }
        ZmqTopic::InvalidTx => {
            let Some(message) = decode::<InvalidTxMessage>(node, &topic, &payload) else {
                return false;
            };
            info!(
                %node,
                txid = %message.txid,
                code = ?message.rejection_code,
                reason = ?message.rejection_reason,
                "invalid transaction notification"
            );
            bus.publish(InvalidTxDetected { message });
            true
        }
        ZmqTopic::RemovedFromMempool | ZmqTopic::RemovedFromMempoolBlock => {
            let Some(message) = decode::<RemovedFromMempoolMessage>(node, &topic, &payload) else {
                return false;
            };
            info!(
                %node,
                %topic,
                txid = %message.txid,
                reason = %message.reason,
                "transaction removed from mempool"
            );
            bus.publish(RemovedFromMempool { message });
            true
        }
        ZmqTopic::Unknown(topic) => {
            info!(%node, %topic, "unknown zmq message topic, ignoring");
            false
        }
    }
}

fn decode<T: DeserializeOwned>(node: &NodeId, topic: &ZmqTopic, payload: &[u8]) -> Option<T> {
    serde_json::from_slice(payload)
        .inspect_err(|err| warn!(%node, %topic, %err, "cannot decode zmq message, dropping it"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, payload: &[u8]) -> WireMessage {
        WireMessage {
            topic: ZmqTopic::from_wire(topic),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn block_hashes_are_hex_encoded() {
        let bus = EventBus::new();
        let mut blocks = bus.subscribe::<NewBlockDiscovered>();

        assert!(dispatch(&bus, &"n".into(), message("hashblock", &[0x00, 0xab, 0xff])));

        assert_eq!(
            blocks.try_next(),
            Some(NewBlockDiscovered {
                block_hash: "00abff".to_string()
            })
        );
    }

    #[test]
    fn both_removal_topics_become_one_event() {
        let bus = EventBus::new();
        let mut removed = bus.subscribe::<RemovedFromMempool>();
        let payload = br#"{"txid":"aa","reason":"expired"}"#;

        assert!(dispatch(&bus, &"n".into(), message("removedfrommempool", payload)));
        assert!(dispatch(&bus, &"n".into(), message("removedfrommempoolblock", payload)));

        assert_eq!(removed.backlog(), 2);
        assert_eq!(removed.try_next().map(|e| e.message.reason), Some("expired".to_string()));
    }

    #[test]
    fn undecodable_and_unknown_messages_are_dropped() {
        let bus = EventBus::new();
        let mut invalid = bus.subscribe::<InvalidTxDetected>();

        assert!(!dispatch(&bus, &"n".into(), message("invalidtx", b"{not json")));
        assert!(!dispatch(&bus, &"n".into(), message("rawtx", b"0100")));
        assert!(dispatch(&bus, &"n".into(), message("invalidtx", br#"{"txid":"aa"}"#)));

        assert_eq!(invalid.try_next().map(|e| e.message.txid), Some("aa".to_string()));
        assert_eq!(invalid.try_next(), None);
    }
}
