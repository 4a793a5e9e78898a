//! Discovery of the notifications a node publishes.
use std::fmt;

use async_trait::async_trait;
use gateway_rpc::{NodeEndpoint, RpcClientFactory, RpcError};
use tokio_util::sync::CancellationToken;

use crate::topic::ZmqTopic;

/// A notification topic together with the address it is published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTopic {
    /// The topic.
    pub topic: ZmqTopic,

    /// ZMQ address, e.g. `tcp://127.0.0.1:28332`.
    pub address: String,
}

/// Asks a node which notifications it publishes.
#[async_trait]
pub trait TopicDiscovery: Send + Sync + fmt::Debug {
    /// Lists every notification `node` publishes, known or not.
    async fn discover(
        &self,
        node: &NodeEndpoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredTopic>, RpcError>;
}

#[async_trait]
impl TopicDiscovery for RpcClientFactory {
    async fn discover(
        &self,
        node: &NodeEndpoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredTopic>, RpcError> {
        let notifications = self
            .create(node.clone())
            .active_zmq_notifications(cancel)
            .await?;

        Ok(notifications
            .into_iter()
            .map(|notification| DiscoveredTopic {
                topic: ZmqTopic::from_notification(&notification.notification),
                address: notification.address,
            })
            .collect())
    }
}
