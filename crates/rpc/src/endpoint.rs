//! This module contains the addressing information of a node.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a node in the node registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where and how to reach one node's JSON-RPC interface.
///
/// The endpoint is also the key under which the node's notification sockets are tracked.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Identity of the node.
    pub id: NodeId,

    /// Host name or IP address of the node.
    pub host: String,

    /// JSON-RPC port of the node.
    pub port: u16,

    /// User for HTTP basic authentication.
    pub username: String,

    /// Password for HTTP basic authentication.
    pub password: String,
}

impl NodeEndpoint {
    /// Creates an endpoint from its parts.
    pub fn new(
        id: impl Into<NodeId>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// The `host:port` pair, as used in log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The URL JSON-RPC requests are posted to.
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Read access to the nodes the gateway currently talks to.
pub trait NodeRegistry: Send + Sync + fmt::Debug {
    /// Every registered node.
    fn nodes(&self) -> Vec<NodeEndpoint>;
}

impl NodeRegistry for Vec<NodeEndpoint> {
    fn nodes(&self) -> Vec<NodeEndpoint> {
        self.clone()
    }
}

// Coverage is disabled because when tests pass, most Debug impls will never be invoked.
#[cfg_attr(coverage_nightly, coverage(off))]
impl fmt::Debug for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEndpoint")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_password() {
        let endpoint = NodeEndpoint::new("node-1", "localhost", 8332, "user", "hunter2");

        let printed = format!("{endpoint:?}");

        assert!(printed.contains("node-1"));
        assert!(!printed.contains("hunter2"));
        assert_eq!(endpoint.rpc_url(), "http://localhost:8332/");
        assert_eq!(endpoint.address(), "localhost:8332");
    }
}
