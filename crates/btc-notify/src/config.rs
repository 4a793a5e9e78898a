use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_IDLE_SLEEP, DEFAULT_POLL_TIMEOUT, DEFAULT_REMOVED_NODES_KEPT, DEFAULT_STATS_PERIOD,
};

/// Timing of the [`crate::ZmqReconciler`] loop and of the statistics log.
///
/// Every field falls back to its default when left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// How long each socket is polled per round, defaults to 100ms.
    pub poll_timeout: Duration,

    /// How long the loop sleeps while no socket is open, defaults to 100ms.
    pub idle_sleep: Duration,

    /// Period of [`crate::stats::spawn_stats_logger`], defaults to ten minutes.
    pub stats_period: Duration,

    /// How many removed nodes are still reported in the status, defaults to 32.
    pub removed_nodes_kept: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            idle_sleep: DEFAULT_IDLE_SLEEP,
            stats_period: DEFAULT_STATS_PERIOD,
            removed_nodes_kept: DEFAULT_REMOVED_NODES_KEPT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: ReconcilerConfig =
            serde_json::from_str(r#"{ "idle_sleep": { "secs": 1, "nanos": 0 } }"#)
                .expect("must deserialize");

        assert_eq!(config.idle_sleep, Duration::from_secs(1));
        assert_eq!(config.poll_timeout, DEFAULT_POLL_TIMEOUT);
        assert_eq!(config.stats_period, DEFAULT_STATS_PERIOD);
        assert_eq!(config.removed_nodes_kept, DEFAULT_REMOVED_NODES_KEPT);
    }
}
