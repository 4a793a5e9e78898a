//! This module provides the constant values used throughout the crate.
use std::time::Duration;

/// How often [`crate::EventBus::wait_for_idle`] samples the subscriptions.
pub(crate) const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long every subscription must stay idle before the bus is considered idle.
///
/// Consumers may be between dequeuing an item and flagging it as in-flight, so a single sample is
/// not enough.
pub(crate) const IDLE_STABILITY_WINDOW: Duration = Duration::from_millis(100);
