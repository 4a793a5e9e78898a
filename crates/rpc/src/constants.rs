//! This module provides the constant values used throughout the crate.
use std::time::Duration;

/// Default upper bound for a single request, including reading the response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(100);

/// Default number of attempts for calls that retry on transport failures.
pub const DEFAULT_NUM_OF_RETRIES: usize = 50;

/// Default pause between two attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Reject code of a transaction the node already has in its mempool or chain.
pub const REJECT_ALREADY_KNOWN: i32 = 257;

/// Content type of every request body.
pub const JSON_RPC_CONTENT_TYPE: &str = "application/json-rpc";

/// Maximum number of bytes decoded by [`crate::HexStreamDecoder`] per read from its source.
pub const HEX_CHUNK_BYTES: usize = 4096;

/// Name of the JSON field whose value is streamed in streaming mode.
pub(crate) const RESULT_FIELD: &[u8] = b"result";

/// Characters allowed between the `result` field name and the opening quote of its value.
pub(crate) const SEPARATOR_CHARS: &[u8] = b":\" \n\r\t";
