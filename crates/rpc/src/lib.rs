//! # `gateway-rpc`
//!
//! JSON-RPC client for the blockchain nodes the gateway talks to.
//!
//! [`NodeRpcClient`] performs one logical call against a node over HTTP, hiding transport retries
//! and timeouts behind a single `async` method. Calls whose result is a huge hex-encoded blob
//! (raw blocks) can be made in streaming mode: the response body is never buffered, and the value
//! of the `result` field is exposed through [`HexStreamDecoder`] as a plain
//! [`tokio::io::AsyncRead`] of decoded bytes.
//!
//! [`MultiClient`] spreads a call over every node of a [`NodeRegistry`].

// This cfg_attr is needed so that we can disable coverage in parts of the code that we don't want
// polluting coverage analysis.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod client;
pub mod config;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod hex_stream;
pub mod multi;
pub mod retry;
mod scan;
pub mod types;

pub use client::{is_streaming_call, CallOptions, NodeRpcClient, ResponseBody, RpcByteStream};
pub use config::RpcClientConfig;
pub use endpoint::{NodeEndpoint, NodeId, NodeRegistry};
pub use error::{ErrorKind, RpcError, TransportFailure};
pub use factory::RpcClientFactory;
pub use hex_stream::{HexStreamDecoder, HexStreamError};
pub use multi::{Agreement, MultiClient, MultiClientError};
