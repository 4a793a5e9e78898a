//! This module provides the constant values used throughout the crate.
use std::time::Duration;

/// How long a single socket is polled for a message before moving on to the next one.
pub(crate) const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// How long the reconciler sleeps when it has no socket to poll.
pub(crate) const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Period of the subscription statistics log.
pub(crate) const DEFAULT_STATS_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Number of removed nodes kept in the reconciler status.
pub(crate) const DEFAULT_REMOVED_NODES_KEPT: usize = 32;

/// Upper bound for the TCP handshake of a reachability check.
pub(crate) const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of the notification names reported by `activezmqnotifications`.
pub(crate) const NOTIFICATION_PREFIX: &str = "pub";
