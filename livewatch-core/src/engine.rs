//! Top-level wiring: one event bus, the listener and recorder registries, and the
//! catalog of rooms known to the process.
//!
//! The catalog tracks every registered room whether or not it is being listened
//! to. Catalog mutations are serialised by one async lock held across the listener
//! calls they make; reads only take the short map lock. Listener and recorder
//! state live in their registries.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn, Instrument};

use crate::config::{Config, RoomConfig};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind, Subscription};
use crate::listener::{ListenerOptions, ListenerRegistry};
use crate::models::{Room, RoomId};
use crate::recorder::{RecorderOptions, RecorderRegistry, RecordingJob};
use crate::source::RoomSource;

/// Point-in-time view of one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatus {
    pub room: Room,
    pub listening: bool,
    pub recording: bool,
    pub live: bool,
    /// Room title from the last successful poll, empty if never polled
    pub name: String,
    pub host: String,
    pub recording_since: Option<DateTime<Utc>>,
}

struct EngineInner {
    config: Config,
    bus: EventBus,
    listeners: ListenerRegistry,
    recorders: RecorderRegistry,
    catalog: Mutex<HashMap<RoomId, Room>>,
    catalog_ops: tokio::sync::Mutex<()>,
    subscriptions: Mutex<Vec<Subscription>>,
    started: AtomicBool,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    #[must_use]
    pub fn new(config: Config, source: Arc<dyn RoomSource>, job: Arc<dyn RecordingJob>) -> Self {
        let bus = EventBus::new();
        let listeners = ListenerRegistry::new(
            source,
            bus.clone(),
            ListenerOptions::from_config(&config.listener, &config.split),
        );
        let recorders = RecorderRegistry::new(
            job,
            bus.clone(),
            RecorderOptions::from_config(&config.split, &config.recorder),
        );

        Self {
            inner: Arc::new(EngineInner {
                config,
                bus,
                listeners,
                recorders,
                catalog: Mutex::new(HashMap::new()),
                catalog_ops: tokio::sync::Mutex::new(()),
                subscriptions: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    #[must_use]
    pub fn recorders(&self) -> &RecorderRegistry {
        &self.inner.recorders
    }

    /// Subscribe the recorders, then register the configured rooms.
    ///
    /// Rooms that fail to register are logged and skipped. Calling `start` twice is
    /// a no-op.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.recorders.start();

        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.bus.subscribe(EventKind::RoomResolved, move |event| {
            let weak = weak.clone();
            async move {
                let Some(engine) = Self::upgrade(&weak) else {
                    return;
                };
                if let Event::RoomResolved {
                    placeholder,
                    resolved,
                    ..
                } = event
                {
                    engine.rebind(placeholder, resolved).await;
                }
            }
        });
        self.inner.subscriptions.lock().push(subscription);

        let rooms = self.inner.config.rooms.clone();
        info!(count = rooms.len(), "Registering configured rooms");
        for room in rooms {
            if let Err(e) = self.add_room(&room.url, room.listen).await {
                warn!(url = %room.url, error = %e, "Skipping configured room");
            }
        }
    }

    /// Register a room, and start listening to it if `listen` is set.
    pub async fn add_room(&self, url: &str, listen: bool) -> Result<Room> {
        let room = Room::parse(url)?;
        let _ops = self.inner.catalog_ops.lock().await;
        {
            let mut catalog = self.inner.catalog.lock();
            if catalog.contains_key(&room.id) {
                return Err(Error::AlreadyExists(format!("room {}", room.url)));
            }
            catalog.insert(room.id.clone(), room.clone());
        }
        info!(room_id = %room.id, url = %room.url, listen, "Room added");

        if listen {
            self.inner.listeners.add(room.clone()).await?;
        }
        Ok(room)
    }

    /// Forget a room. Its listener is stopped first, which also ends any recording.
    pub async fn remove_room(&self, room_id: &RoomId) -> Result<()> {
        let _ops = self.inner.catalog_ops.lock().await;
        let room = self
            .inner
            .catalog
            .lock()
            .remove(room_id)
            .ok_or_else(|| Error::NotFound(format!("room {room_id}")))?;

        match self.inner.listeners.remove(room_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        info!(room_id = %room_id, url = %room.url, "Room removed");
        Ok(())
    }

    /// Start listening to a registered room. `AlreadyExists` if it is already listened to.
    pub async fn start_listening(&self, room_id: &RoomId) -> Result<()> {
        let _ops = self.inner.catalog_ops.lock().await;
        let room = self
            .inner
            .catalog
            .lock()
            .get(room_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("room {room_id}")))?;
        self.inner.listeners.add(room).await?;
        Ok(())
    }

    /// Stop listening to a registered room. `NotFound` if it is not listened to.
    pub async fn stop_listening(&self, room_id: &RoomId) -> Result<()> {
        let _ops = self.inner.catalog_ops.lock().await;
        if !self.inner.catalog.lock().contains_key(room_id) {
            return Err(Error::NotFound(format!("room {room_id}")));
        }
        self.inner.listeners.remove(room_id).await
    }

    /// Every registered room, ordered by URL
    pub async fn rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.inner.catalog.lock().values().cloned().collect();
        rooms.sort_by(|a, b| a.url.as_str().cmp(b.url.as_str()));
        rooms
    }

    pub async fn room_status(&self, room_id: &RoomId) -> Result<RoomStatus> {
        let room = self
            .inner
            .catalog
            .lock()
            .get(room_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("room {room_id}")))?;
        Ok(self.status_of(room).await)
    }

    /// Status of every registered room, ordered by URL
    pub async fn statuses(&self) -> Vec<RoomStatus> {
        let mut statuses = Vec::new();
        for room in self.rooms().await {
            statuses.push(self.status_of(room).await);
        }
        statuses
    }

    /// Reconcile the catalog with a desired room list.
    ///
    /// New rooms are added, rooms missing from the list are removed and the
    /// listening state of the rest is toggled to match. The whole list is parsed
    /// before anything changes; per-room failures after that are logged.
    pub async fn apply_rooms(&self, desired: &[RoomConfig]) -> Result<()> {
        let mut wanted: Vec<(Room, bool)> = Vec::with_capacity(desired.len());
        let mut seen = HashSet::new();
        for entry in desired {
            let room = Room::parse(&entry.url)?;
            if seen.insert(room.id.clone()) {
                wanted.push((room, entry.listen));
            }
        }

        let current: Vec<RoomId> = self.inner.catalog.lock().keys().cloned().collect();
        for room_id in current.iter().filter(|id| !seen.contains(*id)) {
            if let Err(e) = self.remove_room(room_id).await {
                warn!(room_id = %room_id, error = %e, "Failed to remove room");
            }
        }

        for (room, listen) in wanted {
            let result = if !current.contains(&room.id) {
                self.add_room(room.url.as_str(), listen).await.map(|_| ())
            } else if listen && !self.inner.listeners.has(&room.id).await {
                self.start_listening(&room.id).await
            } else if !listen && self.inner.listeners.has(&room.id).await {
                self.stop_listening(&room.id).await
            } else {
                Ok(())
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_already_exists() || e.is_not_found() => {
                    debug!(room_id = %room.id, error = %e, "Room changed concurrently");
                }
                Err(e) => warn!(room_id = %room.id, error = %e, "Failed to apply room"),
            }
        }

        debug!("Room list applied");
        Ok(())
    }

    /// Stop everything: listeners first so no new transitions arrive, then the
    /// recordings, then the bus subscriptions.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.inner.listeners.close_all().await;
        self.inner.recorders.close_all().await;
        self.inner.recorders.stop();

        let subscriptions: Vec<_> = self.inner.subscriptions.lock().drain(..).collect();
        for subscription in &subscriptions {
            self.inner.bus.unsubscribe(subscription);
        }
        info!("Shutdown complete");
    }

    fn upgrade(weak: &Weak<EngineInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    async fn status_of(&self, room: Room) -> RoomStatus {
        let listener = self.inner.listeners.get(&room.id).await.ok();
        let info = listener
            .as_ref()
            .and_then(|listener| listener.last_info())
            .unwrap_or_default();
        let recording_since = self.inner.recorders.started_at(&room.id);

        RoomStatus {
            listening: listener.is_some(),
            recording: recording_since.is_some(),
            live: listener.is_some() && info.is_live,
            name: info.room_name,
            host: info.host_name,
            recording_since,
            room,
        }
    }

    /// Replace a placeholder room with the room it resolved to
    async fn rebind(&self, placeholder: Room, resolved: Room) {
        let span = tracing::info_span!("rebind", placeholder = %placeholder.id, resolved = %resolved.id);
        async {
            let _ops = self.inner.catalog_ops.lock().await;
            if self.inner.catalog.lock().remove(&placeholder.id).is_none() {
                debug!("Placeholder no longer registered");
                return;
            }

            let was_listening = match self.inner.listeners.remove(&placeholder.id).await {
                Ok(()) => true,
                Err(e) if e.is_not_found() => false,
                Err(e) => {
                    error!(error = %e, "Failed to stop placeholder listener");
                    false
                }
            };

            {
                let mut catalog = self.inner.catalog.lock();
                if catalog.contains_key(&resolved.id) {
                    info!("Resolved room already registered, placeholder dropped");
                    return;
                }
                catalog.insert(resolved.id.clone(), resolved.clone());
            }

            if was_listening {
                if let Err(e) = self.inner.listeners.add(resolved.clone()).await {
                    error!(error = %e, "Failed to listen to resolved room");
                    return;
                }
            }
            info!(url = %resolved.url, "Placeholder room resolved");
        }
        .instrument(span)
        .await;
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("recorders", &self.inner.recorders)
            .finish_non_exhaustive()
    }
}
