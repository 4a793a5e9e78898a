//! Snapshot of the subscription state the [`crate::ZmqReconciler`] publishes for observers.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use gateway_rpc::NodeId;

use crate::topic::ZmqTopic;

/// Where a node is in its subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Its notifications are being discovered and subscribed to.
    ConnectivityChecking,

    /// Its notifications are being received.
    Subscribed,

    /// Subscribing failed, see [`NodeStatus::last_error`].
    Failed,

    /// The node was removed and its sockets closed.
    Removed,
}

/// One socket as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    /// ZMQ address of the socket.
    pub address: String,

    /// Topics subscribed on the socket.
    pub topics: Vec<ZmqTopic>,

    /// When the socket was opened.
    pub subscribed_at: DateTime<Utc>,

    /// When the last message arrived on the socket.
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Subscription status of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Lifecycle state.
    pub state: NodeState,

    /// Sockets owned by the node.
    pub endpoints: Vec<EndpointStatus>,

    /// When the reconciler last tried to subscribe to the node.
    pub last_connection_attempt_at: Option<DateTime<Utc>>,

    /// Why the last attempt failed.
    pub last_error: Option<String>,
}

impl NodeStatus {
    /// Whether the node's notifications are being received.
    pub fn is_responding(&self) -> bool {
        self.state == NodeState::Subscribed
    }
}

/// Everything the reconciler knows, as of its last mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilerStatus {
    /// Status of every node the reconciler has seen.
    pub nodes: BTreeMap<NodeId, NodeStatus>,
}

impl ReconcilerStatus {
    /// Status of the node `id`.
    pub fn node(&self, id: &NodeId) -> Option<&NodeStatus> {
        self.nodes.get(id)
    }

    /// Number of open sockets.
    pub fn active_subscriptions(&self) -> usize {
        self.nodes.values().map(|node| node.endpoints.len()).sum()
    }

    /// Number of nodes whose last subscription attempt failed.
    pub fn failed_subscriptions(&self) -> usize {
        self.nodes
            .values()
            .filter(|node| node.state == NodeState::Failed)
            .count()
    }
}
