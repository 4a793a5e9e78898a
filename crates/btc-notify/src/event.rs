//! Domain events carried over the [`EventBus`].
//!
//! Every event is a standalone type so that consumers subscribe to exactly what they handle.
//! [`DomainEvent`] groups them for producers that pick the event at runtime.
use gateway_event_bus::{Event, EventBus};
use gateway_rpc::NodeEndpoint;

use crate::message::{InvalidTxMessage, RemovedFromMempoolMessage};

/// A node announced a new block through `hashblock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlockDiscovered {
    /// Hash of the block, hex encoded in the byte order the node sent it.
    pub block_hash: String,
}

/// A node rejected a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTxDetected {
    /// The node's report.
    pub message: InvalidTxMessage,
}

/// A node removed a transaction from its mempool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedFromMempool {
    /// The node's report.
    pub message: RemovedFromMempoolMessage,
}

/// A node was added to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAdded {
    /// The new node.
    pub node: NodeEndpoint,
}

/// A node was removed from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDeleted {
    /// The removed node.
    pub node: NodeEndpoint,
}

/// The notifications of a node are being received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmqSubscribed {
    /// The subscribed node.
    pub node: NodeEndpoint,
}

/// The notification sockets of a node were closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmqUnsubscribed {
    /// The unsubscribed node.
    pub node: NodeEndpoint,
}

/// Subscribing to the notifications of a node failed.
///
/// Whether to retry is up to the consumer of this event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmqFailed {
    /// The node that could not be subscribed to.
    pub node: NodeEndpoint,

    /// Why it failed.
    pub reason: String,
}

impl Event for NewBlockDiscovered {}
impl Event for InvalidTxDetected {}
impl Event for RemovedFromMempool {}
impl Event for NodeAdded {}
impl Event for NodeDeleted {}
impl Event for ZmqSubscribed {}
impl Event for ZmqUnsubscribed {}
impl Event for ZmqFailed {}

/// Every event this crate produces or consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// See [`NewBlockDiscovered`].
    NewBlockDiscovered(NewBlockDiscovered),

    /// See [`InvalidTxDetected`].
    InvalidTxDetected(InvalidTxDetected),

    /// See [`RemovedFromMempool`].
    RemovedFromMempool(RemovedFromMempool),

    /// See [`NodeAdded`].
    NodeAdded(NodeAdded),

    /// See [`NodeDeleted`].
    NodeDeleted(NodeDeleted),

    /// See [`ZmqSubscribed`].
    ZmqSubscribed(ZmqSubscribed),

    /// See [`ZmqUnsubscribed`].
    ZmqUnsubscribed(ZmqUnsubscribed),

    /// See [`ZmqFailed`].
    ZmqFailed(ZmqFailed),
}

impl DomainEvent {
    /// Publishes the wrapped event under its own type and returns how many subscriptions
    /// received it.
    pub fn publish(self, bus: &EventBus) -> usize {
        match self {
            DomainEvent::NewBlockDiscovered(event) => bus.publish(event),
            DomainEvent::InvalidTxDetected(event) => bus.publish(event),
            DomainEvent::RemovedFromMempool(event) => bus.publish(event),
            DomainEvent::NodeAdded(event) => bus.publish(event),
            DomainEvent::NodeDeleted(event) => bus.publish(event),
            DomainEvent::ZmqSubscribed(event) => bus.publish(event),
            DomainEvent::ZmqUnsubscribed(event) => bus.publish(event),
            DomainEvent::ZmqFailed(event) => bus.publish(event),
        }
    }
}

macro_rules! impl_from_event {
    ($($event:ident),* $(,)?) => {
        $(
            impl From<$event> for DomainEvent {
                fn from(event: $event) -> Self {
                    DomainEvent::$event(event)
                }
            }
        )*
    };
}

impl_from_event!(
    NewBlockDiscovered,
    InvalidTxDetected,
    RemovedFromMempool,
    NodeAdded,
    NodeDeleted,
    ZmqSubscribed,
    ZmqUnsubscribed,
    ZmqFailed,
);
