//! This module contains the [`EventBus`] registry.
use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::{
    constants::{IDLE_POLL_INTERVAL, IDLE_STABILITY_WINDOW},
    event::Event,
    subscription::{Subscription, SubscriptionId, SubscriptionState},
};

/// Type-erased sending half of a subscription queue.
trait ErasedSender: Send + Sync {
    fn is_closed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Event> ErasedSender for mpsc::UnboundedSender<T> {
    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Registration {
    id: SubscriptionId,
    state: Arc<SubscriptionState>,
    sender: Box<dyn ErasedSender>,
}

#[derive(Default)]
struct Registry {
    subscriptions: Mutex<HashMap<TypeId, Vec<Registration>>>,
    next_id: AtomicU64,
}

// Coverage is disabled because when tests pass, most Debug impls will never be invoked.
#[cfg_attr(coverage_nightly, coverage(off))]
impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subs = self.subscriptions.lock();
        f.debug_struct("Registry")
            .field("event_types", &subs.len())
            .field("subscriptions", &subs.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

/// Process-wide typed publish/subscribe bus.
///
/// Cloning the bus is cheap and every clone shares the same registry. The registry is guarded by
/// a single mutex across subscribe, unsubscribe and publish; queues are unbounded so publishing
/// never waits on a consumer.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    inner: Arc<Registry>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new queue for events of type `T`.
    ///
    /// Several subscriptions to the same type are independent: each of them receives every event
    /// of that type published after this call.
    pub fn subscribe<T: Event>(&self) -> Subscription<T> {
        let (send, recv) = mpsc::unbounded_channel::<T>();
        let state = Arc::new(SubscriptionState::default());
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        self.inner
            .subscriptions
            .lock()
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Registration {
                id,
                state: state.clone(),
                sender: Box::new(send),
            });

        info!(event = type_name::<T>(), %id, "added event bus subscription");

        Subscription::new(id, recv, state)
    }

    /// Removes `subscription` from the bus.
    ///
    /// Returns `false` if it was already removed. Items already queued stay readable.
    pub fn unsubscribe<T: Event>(&self, subscription: &Subscription<T>) -> bool {
        let mut subs = self.inner.subscriptions.lock();
        let Some(list) = subs.get_mut(&TypeId::of::<T>()) else {
            return false;
        };

        let Some(pos) = list.iter().position(|reg| reg.id == subscription.id()) else {
            return false;
        };

        list.remove(pos);
        if list.is_empty() {
            subs.remove(&TypeId::of::<T>());
        }
        drop(subs); // dropped eagerly to allow other threads to progress immediately.

        info!(event = type_name::<T>(), id = %subscription.id(), "removed event bus subscription");
        true
    }

    /// Delivers `event` to every subscription registered for `T` and returns how many received
    /// it.
    ///
    /// Publishing without subscribers is a no-op. Subscriptions whose owner has been dropped are
    /// pruned on the way.
    pub fn publish<T: Event>(&self, event: T) -> usize {
        trace!(?event, "publishing event");

        let mut subs = self.inner.subscriptions.lock();
        let Some(list) = subs.get_mut(&TypeId::of::<T>()) else {
            trace!(event = type_name::<T>(), "no subscribers for event");
            return 0;
        };

        let mut delivered = 0;
        list.retain(|reg| {
            let Some(sender) = reg.sender.as_any().downcast_ref::<mpsc::UnboundedSender<T>>()
            else {
                error!(
                    event = type_name::<T>(),
                    id = %reg.id,
                    "subscription registered under the wrong event type"
                );
                return true;
            };

            reg.state.enqueued();
            if sender.send(event.clone()).is_err() {
                // The receiver has been dropped.
                reg.state.dequeued();
                debug!(event = type_name::<T>(), id = %reg.id, "pruning dropped subscription");
                return false;
            }

            delivered += 1;
            true
        });

        if list.is_empty() {
            subs.remove(&TypeId::of::<T>());
        }

        delivered
    }

    /// Returns the number of live subscriptions for `T`.
    pub fn subscription_count<T: Event>(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .get(&TypeId::of::<T>())
            .map(|list| list.iter().filter(|reg| !reg.sender.is_closed()).count())
            .unwrap_or(0)
    }

    /// Subscribes to `T` and drains the subscription on a new task with `handler` until `cancel`
    /// fires, then unsubscribes.
    ///
    /// The subscription is registered before this function returns, so events published right
    /// after the call are not missed.
    pub fn spawn_handler<T, F, Fut, E>(&self, cancel: CancellationToken, handler: F) -> JoinHandle<()>
    where
        T: Event,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut subscription = self.subscribe::<T>();
        let bus = self.clone();

        tokio::spawn(async move {
            subscription.process_events(cancel, handler).await;
            bus.unsubscribe(&subscription);
        })
    }

    /// Returns whether no subscription is processing an item or has one queued right now.
    pub fn is_idle(&self) -> bool {
        self.inner
            .subscriptions
            .lock()
            .values()
            .flatten()
            .all(|reg| reg.sender.is_closed() || !reg.state.is_busy())
    }

    /// Waits until every subscription has been idle for a whole stability window.
    ///
    /// This polls and is only meant for tests.
    pub async fn wait_for_idle(&self) {
        let checks = (IDLE_STABILITY_WINDOW.as_millis() / IDLE_POLL_INTERVAL.as_millis()).max(1);

        'window: loop {
            for _ in 0..checks {
                let idle = self.is_idle();
                time::sleep(IDLE_POLL_INTERVAL).await;
                if !idle {
                    continue 'window;
                }
            }
            return;
        }
    }
}
