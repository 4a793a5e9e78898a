//! Error types for the RPC client.
use std::{io, time::Duration};

use thiserror::Error;

/// Classification of an [`RpcError`].
///
/// The retry loop branches on this tag only: [`ErrorKind::Transport`] is retried, everything else
/// is surfaced immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The node answered with a well-formed JSON-RPC error.
    Application,

    /// The request or response could not be exchanged.
    Transport,

    /// The node answered with something that is not a valid response.
    Protocol,

    /// The call was rejected before anything was sent.
    Configuration,

    /// The caller cancelled the call.
    Cancelled,
}

impl ErrorKind {
    /// Whether an attempt that failed with this kind may be repeated.
    pub const fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transport)
    }
}

/// A failure to exchange one request and response with a node.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The attempt did not complete within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The HTTP client failed to send the request or receive the response.
    #[error("http request failed: {0}")]
    Http(reqwest::Error),

    /// The node answered with a non-success status and no parseable error body.
    #[error("node answered with http status {status} {reason}")]
    Status {
        /// The HTTP status code.
        status: u16,

        /// The canonical reason phrase of `status`.
        reason: String,
    },

    /// The response body broke off while it was being read.
    #[error("failed to read the response body: {0}")]
    Body(#[from] io::Error),
}

impl From<reqwest::Error> for TransportFailure {
    fn from(err: reqwest::Error) -> Self {
        // the url carries the node's address, which must not leak through `Display`.
        TransportFailure::Http(err.without_url())
    }
}

/// Unified error type for everything that can go wrong during an RPC call.
///
/// `Display` never includes the node's address. Use [`RpcError::unsafe_message`] for internal
/// logs that may carry it.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The node reported an error for the call. Never retried.
    #[error("rpc call failed with code {code}: {message}")]
    Application {
        /// JSON-RPC error code.
        code: i32,

        /// JSON-RPC error message.
        message: String,

        /// `host:port` of the node.
        endpoint: String,
    },

    /// Every attempt failed to reach the node.
    #[error("rpc call failed after {attempts} attempt(s), configured retries {retries}: {last}")]
    Transport {
        /// Attempts actually made.
        attempts: usize,

        /// The retry budget the call was made with.
        retries: usize,

        /// The failure of the last attempt.
        #[source]
        last: TransportFailure,

        /// `host:port` of the node.
        endpoint: String,
    },

    /// The response is not what the protocol prescribes. Never retried.
    #[error("invalid rpc response: {message}")]
    Protocol {
        /// What was wrong with the response.
        message: String,

        /// `host:port` of the node.
        endpoint: String,
    },

    /// The arguments of the call are not allowed for the method.
    #[error("invalid rpc call: {0}")]
    Configuration(String),

    /// The call was cancelled by the caller.
    #[error("rpc call cancelled")]
    Cancelled,
}

impl RpcError {
    /// Returns the classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Application { .. } => ErrorKind::Application,
            RpcError::Transport { .. } => ErrorKind::Transport,
            RpcError::Protocol { .. } => ErrorKind::Protocol,
            RpcError::Configuration(_) => ErrorKind::Configuration,
            RpcError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns the JSON-RPC error code if the node reported one.
    pub const fn code(&self) -> Option<i32> {
        match self {
            RpcError::Application { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the `host:port` of the node involved, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcError::Application { endpoint, .. }
            | RpcError::Transport { endpoint, .. }
            | RpcError::Protocol { endpoint, .. } => Some(endpoint),
            RpcError::Configuration(_) | RpcError::Cancelled => None,
        }
    }

    /// The error message including the node's address.
    ///
    /// Only meant for internal logs, never for external callers.
    pub fn unsafe_message(&self) -> String {
        match self.endpoint() {
            Some(endpoint) => format!("{self} (node {endpoint})"),
            None => self.to_string(),
        }
    }
}
