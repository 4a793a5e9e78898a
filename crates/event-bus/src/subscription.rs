//! This module contains the core [`Subscription`] type that consumers of the bus use to observe
//! new events.
use std::{
    any::type_name,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Identifies one subscription on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// State shared between a [`Subscription`] and its registration on the bus.
///
/// Only used for idle detection: `pending` counts items published but not yet dequeued and
/// `processing` is set while a handler runs.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionState {
    processing: AtomicBool,
    pending: AtomicUsize,
}

impl SubscriptionState {
    /// Must be called before the item is handed to the channel so `pending` never underflows.
    pub(crate) fn enqueued(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn dequeued(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.processing.load(Ordering::SeqCst) || self.pending.load(Ordering::SeqCst) > 0
    }
}

/// Clears the processing flag even if the handler panics.
struct ProcessingGuard(Arc<SubscriptionState>);

impl ProcessingGuard {
    fn enter(state: &Arc<SubscriptionState>) -> Self {
        state.processing.store(true, Ordering::SeqCst);
        ProcessingGuard(state.clone())
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.0.processing.store(false, Ordering::SeqCst);
    }
}

/// The primary type that consumers of the bus will handle. It is created via
/// [`crate::EventBus::subscribe`] and owned by exactly one consumer.
///
/// Items can be pulled one at a time ([`Subscription::recv`], [`Subscription::try_next`]), through
/// the [`futures::Stream`] API, or by handing a handler to [`Subscription::process_events`].
pub struct Subscription<T> {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<T>,
    state: Arc<SubscriptionState>,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event", &type_name::<T>())
            .field("backlog", &self.receiver.len())
            .finish()
    }
}

impl<T> Subscription<T> {
    /// Intentionally left private so as not to leak implementation details to consuming APIs.
    pub(crate) const fn new(
        id: SubscriptionId,
        receiver: mpsc::UnboundedReceiver<T>,
        state: Arc<SubscriptionState>,
    ) -> Subscription<T> {
        Subscription {
            id,
            receiver,
            state,
        }
    }

    /// Returns the id under which this subscription is registered.
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the number of messages in the backlog for this subscription.
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }

    /// Returns whether a handler is currently running for an item of this subscription.
    pub fn is_processing(&self) -> bool {
        self.state.processing.load(Ordering::SeqCst)
    }

    /// Waits for the next item.
    ///
    /// Returns `None` once `cancel` fires or the subscription has been removed from the bus and
    /// its backlog is empty.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Option<T> {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = self.receiver.recv() => item,
        };
        if item.is_some() {
            self.state.dequeued();
        }
        item
    }

    /// Takes the next item if one is already queued.
    pub fn try_next(&mut self) -> Option<T> {
        let item = self.receiver.try_recv().ok();
        if item.is_some() {
            self.state.dequeued();
        }
        item
    }

    /// Drains the queue until `cancel` fires, invoking `handler` once per item in publish order.
    ///
    /// A handler that returns an error or panics is logged and the loop continues with the next
    /// item. Cancellation is a normal exit.
    pub async fn process_events<F, Fut, E>(&mut self, cancel: CancellationToken, mut handler: F)
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let event_type = type_name::<T>();
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = self.receiver.recv() => item,
            };

            let Some(item) = item else {
                debug!(event = event_type, id = %self.id, "processing of event queue stopped");
                break;
            };

            // Flag first, then release the pending count, so idle detection never sees a gap.
            let _guard = ProcessingGuard::enter(&self.state);
            self.state.dequeued();

            match AssertUnwindSafe(async { handler(item).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(
                        %err,
                        event = event_type,
                        id = %self.id,
                        "error while processing an event, continuing with next event"
                    );
                }
                Err(_) => {
                    error!(
                        event = event_type,
                        id = %self.id,
                        "event handler panicked, continuing with next event"
                    );
                }
            }
        }
    }
}

impl<T> futures::Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.receiver.poll_recv(cx);
        if let Poll::Ready(Some(_)) = &polled {
            this.state.dequeued();
        }
        polled
    }
}
