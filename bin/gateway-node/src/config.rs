use gateway_btc_notify::ReconcilerConfig;
use gateway_rpc::{NodeEndpoint, NodeId, RpcClientConfig};
use serde::{Deserialize, Serialize};

/// The configuration values that dictate the behavior of the gateway node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Config {
    /// The number of worker threads of the runtime.
    ///
    /// Default is [`DEFAULT_THREAD_COUNT`](crate::constants::DEFAULT_THREAD_COUNT).
    pub num_threads: Option<usize>,

    /// Retry and timeout policy of the JSON-RPC clients.
    #[serde(default)]
    pub rpc: RpcClientConfig,

    /// Timing of the ZMQ subscription loop.
    #[serde(default)]
    pub zmq: ReconcilerConfig,

    /// The nodes registered at startup.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// A node registered at startup.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NodeConfig {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// ZMQ address the node is expected to publish on.
    ///
    /// When set, the node is only registered if the address accepts TCP connections.
    pub zmq_notifications_endpoint: Option<String>,
}

// Keeps the password out of the logs.
impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("zmq_notifications_endpoint", &self.zmq_notifications_endpoint)
            .finish_non_exhaustive()
    }
}

impl From<NodeConfig> for NodeEndpoint {
    fn from(node: NodeConfig) -> Self {
        NodeEndpoint::new(node.id, node.host, node.port, node.username, node.password)
    }
}
