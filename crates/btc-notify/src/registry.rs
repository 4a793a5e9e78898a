//! The set of nodes the gateway talks to.
use std::{collections::BTreeMap, sync::Arc};

use gateway_event_bus::EventBus;
pub use gateway_rpc::NodeRegistry;
use gateway_rpc::{NodeEndpoint, NodeId};
use parking_lot::RwLock;
use tracing::info;

use crate::event::{NodeAdded, NodeDeleted};

/// [`NodeRegistry`] kept in memory that announces changes on the [`EventBus`].
#[derive(Debug, Clone)]
pub struct InMemoryNodeRegistry {
    nodes: Arc<RwLock<BTreeMap<NodeId, NodeEndpoint>>>,
    bus: EventBus,
}

impl InMemoryNodeRegistry {
    /// Creates an empty registry that publishes on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            nodes: Arc::default(),
            bus,
        }
    }

    /// Registers `node` and publishes [`NodeAdded`].
    ///
    /// Returns `false`, without publishing, if a node with the same id is already registered.
    pub fn add(&self, node: NodeEndpoint) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.id) {
            return false;
        }
        nodes.insert(node.id.clone(), node.clone());
        drop(nodes); // dropped eagerly to allow other threads to progress immediately.

        info!(node = %node.id, address = %node.address(), "node added");
        self.bus.publish(NodeAdded { node });
        true
    }

    /// Unregisters the node `id` and publishes [`NodeDeleted`].
    pub fn remove(&self, id: &NodeId) -> Option<NodeEndpoint> {
        let node = self.nodes.write().remove(id)?;

        info!(node = %node.id, "node removed");
        self.bus.publish(NodeDeleted { node: node.clone() });
        Some(node)
    }

    /// The node `id`, if registered.
    pub fn get(&self, id: &NodeId) -> Option<NodeEndpoint> {
        self.nodes.read().get(id).cloned()
    }
}

impl NodeRegistry for InMemoryNodeRegistry {
    fn nodes(&self) -> Vec<NodeEndpoint> {
        self.nodes.read().values().cloned().collect()
    }
}
