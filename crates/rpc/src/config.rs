//! This module contains the configuration of the RPC clients.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_NUM_OF_RETRIES, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_DELAY};

/// Retry and timeout policy shared by every client created from one
/// [`crate::RpcClientFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcClientConfig {
    /// Upper bound for one attempt.
    ///
    /// For streaming calls it bounds establishing the response and locating the `result` value;
    /// reading the value itself is not bounded.
    pub request_timeout: Duration,

    /// Total number of attempts for calls that retry on transport failures.
    ///
    /// Zero behaves like one: the call is attempted exactly once.
    pub num_of_retries: usize,

    /// Pause between two attempts.
    pub retry_delay: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            num_of_retries: DEFAULT_NUM_OF_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: RpcClientConfig =
            serde_json::from_str(r#"{ "num_of_retries": 3 }"#).expect("must deserialize");

        assert_eq!(config.num_of_retries, 3);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.retry_delay, DEFAULT_RETRY_DELAY);
    }

    #[test]
    fn default_policy() {
        let config = RpcClientConfig::default();

        assert_eq!(config.num_of_retries, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(100));
        assert_eq!(config.retry_delay, Duration::from_millis(100));
    }
}
