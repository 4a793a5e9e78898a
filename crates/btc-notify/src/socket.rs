//! This module contains the socket abstraction the reconciler receives notifications through.
//!
//! [`ZmqConnector`] is the production implementation. `zmq` sockets block, so every receive runs
//! on tokio's blocking pool and hands the socket back when it is done.
use std::{fmt, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::task;
use tracing::{debug, trace};

use crate::topic::ZmqTopic;

/// Errors produced by notification sockets.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The underlying ZMQ call failed.
    #[error("zmq: {0}")]
    Zmq(#[from] zmq::Error),

    /// The blocking task that owned the socket did not finish.
    #[error("socket task failed: {0}")]
    Task(#[from] task::JoinError),

    /// The socket was lost to an earlier failure.
    #[error("socket is closed")]
    Closed,

    /// A message did not have a topic and a payload frame.
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// One notification as received from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Decoded first frame.
    pub topic: ZmqTopic,

    /// Second frame, untouched.
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Builds a message from its frames. Frames after the payload (the sequence number) are
    /// ignored.
    pub fn from_frames(frames: Vec<Vec<u8>>) -> Result<Self, SocketError> {
        let mut frames = frames.into_iter();
        let (Some(topic), Some(payload)) = (frames.next(), frames.next()) else {
            return Err(SocketError::Malformed(
                "expected a topic and a payload frame".to_string(),
            ));
        };

        Ok(Self {
            topic: ZmqTopic::from_wire(&String::from_utf8_lossy(&topic)),
            payload,
        })
    }
}

/// A subscriber socket connected to one address.
#[async_trait]
pub trait NotificationSocket: Send + fmt::Debug {
    /// Starts receiving messages of `topic`.
    async fn subscribe(&mut self, topic: &ZmqTopic) -> Result<(), SocketError>;

    /// Waits up to `timeout` for the next message.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<WireMessage>, SocketError>;

    /// Closes the socket, dropping undelivered messages.
    async fn close(self: Box<Self>);
}

/// Opens [`NotificationSocket`]s.
#[async_trait]
pub trait SocketConnector: Send + Sync + fmt::Debug {
    /// Connects a subscriber socket to `address`, without any topic subscribed.
    async fn connect(&self, address: &str) -> Result<Box<dyn NotificationSocket>, SocketError>;
}

/// [`SocketConnector`] backed by the `zmq` crate.
#[derive(Clone)]
pub struct ZmqConnector {
    context: zmq::Context,
}

// Coverage is disabled because when tests pass, most Debug impls will never be invoked.
#[cfg_attr(coverage_nightly, coverage(off))]
impl fmt::Debug for ZmqConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZmqConnector").finish_non_exhaustive()
    }
}

impl ZmqConnector {
    /// Creates a connector with its own ZMQ context.
    pub fn new() -> Self {
        Self {
            context: zmq::Context::new(),
        }
    }
}

impl Default for ZmqConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocketConnector for ZmqConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn NotificationSocket>, SocketError> {
        let socket = self.context.socket(zmq::SUB)?;
        socket.set_linger(0)?;
        socket.connect(address)?;
        debug!(%address, "connected zmq subscriber socket");

        Ok(Box::new(ZmqSocket {
            address: address.to_string(),
            socket: Some(socket),
        }))
    }
}

/// A `zmq` SUB socket.
struct ZmqSocket {
    address: String,
    // None while a receive runs on the blocking pool or after the socket was lost.
    socket: Option<zmq::Socket>,
}

// Coverage is disabled because when tests pass, most Debug impls will never be invoked.
#[cfg_attr(coverage_nightly, coverage(off))]
impl fmt::Debug for ZmqSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZmqSocket")
            .field("address", &self.address)
            .field("open", &self.socket.is_some())
            .finish()
    }
}

fn receive(socket: &zmq::Socket, timeout: Duration) -> Result<Option<WireMessage>, SocketError> {
    let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
    if socket.poll(zmq::POLLIN, timeout_ms)? == 0 {
        return Ok(None);
    }

    let frames = socket.recv_multipart(0)?;
    WireMessage::from_frames(frames).map(Some)
}

#[async_trait]
impl NotificationSocket for ZmqSocket {
    async fn subscribe(&mut self, topic: &ZmqTopic) -> Result<(), SocketError> {
        let socket = self.socket.as_ref().ok_or(SocketError::Closed)?;
        socket.set_subscribe(topic.as_str().as_bytes())?;
        debug!(address = %self.address, %topic, "subscribed zmq topic");

        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<WireMessage>, SocketError> {
        let socket = self.socket.take().ok_or(SocketError::Closed)?;

        let (socket, result) = task::spawn_blocking(move || {
            let result = receive(&socket, timeout);
            (socket, result)
        })
        .await?;

        self.socket = Some(socket);
        if let Ok(Some(message)) = &result {
            trace!(address = %self.address, topic = %message.topic, "received zmq message");
        }

        result
    }

    async fn close(self: Box<Self>) {
        debug!(address = %self.address, "closing zmq subscriber socket");
        drop(self.socket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_after_the_payload_are_ignored() {
        let message = WireMessage::from_frames(vec![
            b"hashblock".to_vec(),
            vec![0xab; 32],
            1u32.to_le_bytes().to_vec(),
        ])
        .expect("must decode");

        assert_eq!(message.topic, ZmqTopic::HashBlock);
        assert_eq!(message.payload, vec![0xab; 32]);
    }

    #[test]
    fn a_message_needs_a_payload() {
        let err = WireMessage::from_frames(vec![b"hashblock".to_vec()]).expect_err("must fail");
        assert!(matches!(err, SocketError::Malformed(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zmq_socket_receives_published_messages() {
        let connector = ZmqConnector::new();
        let publisher = connector.context.socket(zmq::PUB).expect("pub socket");
        publisher.bind("inproc://notifications").expect("bind");

        let mut socket = connector
            .connect("inproc://notifications")
            .await
            .expect("must connect");
        socket
            .subscribe(&ZmqTopic::InvalidTx)
            .await
            .expect("must subscribe");

        // Subscriptions propagate asynchronously, so publish until one message gets through.
        let mut received = None;
        for _ in 0..50 {
            publisher
                .send_multipart([&b"invalidtx"[..], &b"{}"[..]], 0)
                .expect("publish");
            if let Some(message) = socket
                .poll(Duration::from_millis(20))
                .await
                .expect("must poll")
            {
                received = Some(message);
                break;
            }
        }

        let message = received.expect("a message must arrive");
        assert_eq!(message.topic, ZmqTopic::InvalidTx);
        assert_eq!(message.payload, b"{}".to_vec());

        socket.close().await;
    }
}
