//! This module contains [`ZmqTopic`], the notification topics the gateway understands.
use std::fmt;

use crate::constants::NOTIFICATION_PREFIX;

/// Topic of a ZMQ notification.
///
/// Decoded once at the boundary: from the `activezmqnotifications` reply and from the first frame
/// of every wire message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ZmqTopic {
    /// Hash of a newly connected block.
    HashBlock,

    /// A transaction the node rejected, as JSON.
    InvalidTx,

    /// A transaction evicted from the mempool, as JSON.
    RemovedFromMempool,

    /// A transaction removed from the mempool because a block conflicted with it, as JSON.
    RemovedFromMempoolBlock,

    /// Any other topic. Never subscribed to.
    Unknown(String),
}

impl ZmqTopic {
    /// Topics the gateway subscribes to.
    pub const KNOWN: [ZmqTopic; 4] = [
        ZmqTopic::HashBlock,
        ZmqTopic::InvalidTx,
        ZmqTopic::RemovedFromMempool,
        ZmqTopic::RemovedFromMempoolBlock,
    ];

    /// Decodes a notification name as reported by `activezmqnotifications`, e.g. `pubhashblock`.
    pub fn from_notification(name: &str) -> Self {
        Self::from_wire(name.strip_prefix(NOTIFICATION_PREFIX).unwrap_or(name))
    }

    /// Decodes the topic frame of a wire message, e.g. `hashblock`.
    pub fn from_wire(topic: &str) -> Self {
        match topic {
            "hashblock" => ZmqTopic::HashBlock,
            "invalidtx" => ZmqTopic::InvalidTx,
            "removedfrommempool" => ZmqTopic::RemovedFromMempool,
            "removedfrommempoolblock" => ZmqTopic::RemovedFromMempoolBlock,
            other => ZmqTopic::Unknown(other.to_string()),
        }
    }

    /// The topic as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            ZmqTopic::HashBlock => "hashblock",
            ZmqTopic::InvalidTx => "invalidtx",
            ZmqTopic::RemovedFromMempool => "removedfrommempool",
            ZmqTopic::RemovedFromMempoolBlock => "removedfrommempoolblock",
            ZmqTopic::Unknown(other) => other,
        }
    }

    /// Whether the gateway handles this topic.
    pub const fn is_known(&self) -> bool {
        !matches!(self, ZmqTopic::Unknown(_))
    }
}

impl fmt::Display for ZmqTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_names_lose_their_prefix() {
        assert_eq!(ZmqTopic::from_notification("pubhashblock"), ZmqTopic::HashBlock);
        assert_eq!(
            ZmqTopic::from_notification("pubremovedfrommempoolblock"),
            ZmqTopic::RemovedFromMempoolBlock
        );
        assert_eq!(
            ZmqTopic::from_notification("pubrawtx"),
            ZmqTopic::Unknown("rawtx".to_string())
        );
    }

    #[test]
    fn known_topics_survive_the_wire() {
        for topic in ZmqTopic::KNOWN {
            assert!(topic.is_known());
            assert_eq!(ZmqTopic::from_wire(topic.as_str()), topic);
        }
        assert!(!ZmqTopic::from_wire("hashtx").is_known());
    }
}
