//! This crate provides test-utilities shared by the gateway crates.
//!
//! The main utility is [`stub_rpc::StubRpcServer`], a minimal HTTP server that stands in for a
//! node's JSON-RPC endpoint and records every request it receives.

pub mod stub_rpc;
