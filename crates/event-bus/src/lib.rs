//! # `gateway-event-bus`
//!
//! In-process, typed publish/subscribe bus that decouples the producers of domain events (node
//! registry, ZMQ reconciler) from their consumers (block parser, double-spend checker,
//! notification dispatcher).
//!
//! Every call to [`EventBus::subscribe`] creates an independent unbounded FIFO queue, and every
//! published event is cloned into each queue registered for its type. Consumers drain their queue
//! with [`Subscription::process_events`], which isolates handler failures per event.

// This cfg_attr is needed so that we can disable coverage in parts of the code that we don't want
// polluting coverage analysis.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod bus;
mod constants;
mod event;
mod subscription;

pub use bus::EventBus;
pub use event::Event;
pub use subscription::{Subscription, SubscriptionId};
