//! TCP reachability check of a ZMQ address.
//!
//! Connecting a ZMQ socket never fails on an unreachable peer, it just keeps retrying in the
//! background. Probing the address with a plain TCP handshake catches misconfigured endpoints
//! before a node is registered.
use tokio::{net::TcpStream, time};
use tracing::debug;

use crate::constants::REACHABILITY_TIMEOUT;

/// Whether a TCP connection to the `tcp://host:port` `address` can be established within five
/// seconds. Addresses of any other transport are reported as unreachable.
pub async fn is_endpoint_reachable(address: &str) -> bool {
    let Some((host, port)) = parse_tcp_address(address) else {
        debug!(%address, "not a tcp zmq address");
        return false;
    };

    match time::timeout(REACHABILITY_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            debug!(%address, %err, "zmq endpoint refused the connection");
            false
        }
        Err(_) => {
            debug!(%address, "zmq endpoint did not answer in time");
            false
        }
    }
}

fn parse_tcp_address(address: &str) -> Option<(&str, u16)> {
    let authority = address.strip_prefix("tcp://")?;
    let (host, port) = authority.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }

    Some((host, port.parse().ok()?))
}
