use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use super::bus::{EventBus, Subscription};
use super::event::{Event, EventKind};

/// Test subscriber that keeps every published event.
///
/// Lets tests observe what the listeners and recorders did without reaching into
/// either. Nothing is ever dropped, so it is not meant for long-running use.
#[derive(Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
    notify: Arc<Notify>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    bus: EventBus,
}

impl EventLog {
    /// Subscribe to every event kind
    #[must_use]
    pub fn attach(bus: &EventBus) -> Self {
        Self::attach_kinds(bus, &EventKind::ALL)
    }

    /// Subscribe to the given event kinds only
    #[must_use]
    pub fn attach_kinds(bus: &EventBus, kinds: &[EventKind]) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());

        let subscriptions = kinds
            .iter()
            .map(|kind| {
                let events = Arc::clone(&events);
                let notify = Arc::clone(&notify);
                bus.subscribe(*kind, move |event: Event| {
                    let events = Arc::clone(&events);
                    let notify = Arc::clone(&notify);
                    async move {
                        debug!(
                            event_kind = %event.kind(),
                            room_id = %event.room().id,
                            "Event observed"
                        );
                        events.lock().push(event);
                        notify.notify_waiters();
                    }
                })
            })
            .collect();

        Self {
            events,
            notify,
            subscriptions: Arc::new(Mutex::new(subscriptions)),
            bus: bus.clone(),
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(Event::kind).collect()
    }

    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Wait until at least `n` events of `kind` were observed.
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_for(&self, kind: EventKind, n: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.count(kind) >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Stop observing the bus
    pub fn detach(&self) {
        for subscription in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(&subscription);
        }
    }
}
