//! This module contains [`RpcClientFactory`], the shared context RPC clients are created from.
use crate::{client::NodeRpcClient, config::RpcClientConfig, endpoint::NodeEndpoint, error::RpcError};

/// Creates [`NodeRpcClient`]s that share one HTTP connection pool and one retry policy.
#[derive(Debug, Clone)]
pub struct RpcClientFactory {
    http: reqwest::Client,
    config: RpcClientConfig,
}

impl RpcClientFactory {
    /// Creates a factory with its own HTTP client.
    ///
    /// The HTTP client has no overall timeout; every attempt is bounded by
    /// [`RpcClientConfig::request_timeout`] instead.
    pub fn new(config: RpcClientConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RpcError::Configuration(format!("cannot build http client: {e}")))?;

        Ok(Self::with_http_client(http, config))
    }

    /// Creates a factory around an existing HTTP client.
    pub const fn with_http_client(http: reqwest::Client, config: RpcClientConfig) -> Self {
        Self { http, config }
    }

    /// The policy handed to every client.
    pub const fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    /// Creates a client for `endpoint`.
    pub fn create(&self, endpoint: NodeEndpoint) -> NodeRpcClient {
        NodeRpcClient::new(self.http.clone(), endpoint, self.config)
    }
}
