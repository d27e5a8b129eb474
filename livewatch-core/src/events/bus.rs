use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn, Instrument};

use super::event::{Event, EventKind};

/// Boxed async event handler
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to remove that one registration.
///
/// Every `subscribe` call yields a distinct subscription, even when the same handler
/// is registered twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
}

impl Subscription {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }
}

struct Registration {
    id: u64,
    handler: EventHandler,
}

#[derive(Default)]
struct BusInner {
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
}

/// In-process publish/subscribe hub.
///
/// Publishing never blocks on handlers: the handler list for the event kind is
/// snapshotted under the read lock, then dispatched on a spawned task. Within one
/// publish, handlers run one after another in registration order, each in its own
/// task so a panicking handler is logged and does not stop its siblings. Nothing is
/// ordered across separate publishes.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler for one event kind.
    pub fn subscribe<F, Fut>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| Box::pin(handler(event)));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration { id, handler });

        debug!(event_kind = %kind, subscription_id = id, "Event handler subscribed");
        Subscription { id, kind }
    }

    /// Remove one registration. Returns false if it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut handlers = self.inner.handlers.write();
        let Some(registrations) = handlers.get_mut(&subscription.kind) else {
            return false;
        };

        let before = registrations.len();
        registrations.retain(|r| r.id != subscription.id);
        let removed = registrations.len() != before;

        if registrations.is_empty() {
            handlers.remove(&subscription.kind);
        }
        removed
    }

    /// Remove every handler registered for `kind`. Other kinds are untouched.
    pub fn clear(&self, kind: EventKind) {
        self.inner.handlers.write().remove(&kind);
    }

    /// Remove every handler of every kind.
    pub fn clear_all(&self) {
        self.inner.handlers.write().clear();
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Publish an event to the handlers of its kind.
    ///
    /// Returns the number of handlers scheduled. With no handlers this is a no-op.
    /// Must be called from within a Tokio runtime; otherwise the event is dropped
    /// with a warning.
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        let snapshot: Vec<(u64, EventHandler)> = {
            let handlers = self.inner.handlers.read();
            match handlers.get(&kind) {
                Some(registrations) => registrations
                    .iter()
                    .map(|r| (r.id, Arc::clone(&r.handler)))
                    .collect(),
                None => return 0,
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event_kind = %kind, "No async runtime available, dropping event");
            return 0;
        };

        let count = snapshot.len();
        let span = tracing::debug_span!("event_dispatch", event_kind = %kind, room_id = %event.room().id);
        runtime.spawn(
            async move {
                for (id, handler) in snapshot {
                    let event = event.clone();
                    let result = tokio::spawn(async move { handler(event).await }).await;
                    if let Err(e) = result {
                        error!(
                            subscription_id = id,
                            error = %e,
                            "Event handler failed"
                        );
                    }
                }
            }
            .instrument(span),
        );

        count
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.inner.handlers.read();
        let counts: HashMap<EventKind, usize> =
            handlers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Room;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn live_end() -> Event {
        Event::LiveEnd {
            room: Room::parse("https://live.example.com/1").unwrap(),
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<usize>) -> Option<usize> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(live_end()), 0);
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..5 {
            let tx = tx.clone();
            bus.subscribe(EventKind::LiveEnd, move |_| {
                let tx = tx.clone();
                async move {
                    // Later handlers would overtake earlier ones if not run in order.
                    tokio::time::sleep(Duration::from_millis(5 * (5 - i as u64))).await;
                    let _ = tx.send(i);
                }
            });
        }

        assert_eq!(bus.publish(live_end()), 5);
        for expected in 0..5 {
            assert_eq!(recv(&mut rx).await, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_handlers_only_receive_their_kind() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(EventKind::LiveStart, move |_| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(1);
            }
        });

        assert_eq!(bus.publish(live_end()), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_siblings() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe(EventKind::LiveEnd, |_| async {
            panic!("handler failure");
        });
        bus.subscribe(EventKind::LiveEnd, move |_| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(2);
            }
        });

        bus.publish(live_end());
        assert_eq!(recv(&mut rx).await, Some(2));

        // The bus keeps working for later publishes.
        bus.publish(live_end());
        assert_eq!(recv(&mut rx).await, Some(2));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_one_registration() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let make = |tx: mpsc::UnboundedSender<usize>| {
            move |_: Event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(7);
                }
            }
        };
        let first = bus.subscribe(EventKind::LiveEnd, make(tx.clone()));
        let second = bus.subscribe(EventKind::LiveEnd, make(tx));
        assert_ne!(first, second);
        assert_eq!(bus.subscriber_count(EventKind::LiveEnd), 2);

        assert!(bus.unsubscribe(&first));
        assert!(!bus.unsubscribe(&first));
        assert_eq!(bus.subscriber_count(EventKind::LiveEnd), 1);

        assert_eq!(bus.publish(live_end()), 1);
        assert_eq!(recv(&mut rx).await, Some(7));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        assert!(bus.unsubscribe(&second));
        assert_eq!(bus.subscriber_count(EventKind::LiveEnd), 0);
    }

    #[tokio::test]
    async fn test_clear_only_affects_one_kind() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::LiveStart, |_| async {});
        bus.subscribe(EventKind::LiveStart, |_| async {});
        bus.subscribe(EventKind::LiveEnd, |_| async {});

        bus.clear(EventKind::LiveStart);
        assert_eq!(bus.subscriber_count(EventKind::LiveStart), 0);
        assert_eq!(bus.subscriber_count(EventKind::LiveEnd), 1);

        bus.clear_all();
        assert_eq!(bus.subscriber_count(EventKind::LiveEnd), 0);
    }

    #[test]
    fn test_publish_outside_runtime_is_dropped() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::LiveEnd, |_| async {});
        assert_eq!(bus.publish(live_end()), 0);
    }
}
