use std::fmt;

/// Marker for types that can travel over the [`crate::EventBus`].
///
/// Events are immutable facts. Each subscriber receives its own clone, so they should be cheap to
/// clone or wrap their heavy parts in an `Arc`.
pub trait Event: Clone + fmt::Debug + Send + Sync + 'static {}
