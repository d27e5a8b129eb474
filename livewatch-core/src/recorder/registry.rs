use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::job::{ActiveRecording, RecordingHandle, RecordingJob};
use super::watchdog::SegmentWatchdog;
use crate::config::{RecorderConfig, SplitConfig};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind, Subscription};
use crate::models::{Room, RoomId};

/// Recorder tunables
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Duration segmentation, `None` when disabled
    pub max_duration: Option<Duration>,
    pub check_interval: Duration,
    pub begin_timeout: Duration,
    pub end_timeout: Duration,
}

impl RecorderOptions {
    #[must_use]
    pub const fn from_config(split: &SplitConfig, recorder: &RecorderConfig) -> Self {
        Self {
            max_duration: split.max_duration(),
            check_interval: split.check_interval(),
            begin_timeout: recorder.begin_timeout(),
            end_timeout: recorder.end_timeout(),
        }
    }

    /// How long a listen-stop marker is kept. Covers one `begin` plus the wait for
    /// the operation ahead of it on the room lock.
    fn marker_ttl(&self) -> Duration {
        (self.begin_timeout + self.end_timeout) * 2
    }
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self::from_config(&SplitConfig::default(), &RecorderConfig::default())
    }
}

struct RegistryInner {
    recorders: Mutex<HashMap<RoomId, RecordingHandle>>,
    room_locks: DashMap<RoomId, Arc<tokio::sync::Mutex<()>>>,
    /// When the listener of a room was last seen stopping. A live start observed
    /// before that moment must not leave a recording behind.
    listen_stopped: Mutex<HashMap<RoomId, DateTime<Utc>>>,
    job: Arc<dyn RecordingJob>,
    bus: EventBus,
    options: RecorderOptions,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Exclusive access to one room's recorder.
///
/// The lock entry is dropped from the table on release once nobody else holds or
/// waits for it.
struct RoomGuard {
    guard: Option<OwnedMutexGuard<()>>,
    room_id: RoomId,
    inner: Arc<RegistryInner>,
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.inner
            .room_locks
            .remove_if(&self.room_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Owns the active recordings, at most one per room.
///
/// The map itself is only touched under a short synchronous lock. Each
/// add/remove/restart for a room is serialised by that room's async lock, so a slow
/// `begin` or `end` never blocks other rooms.
#[derive(Clone)]
pub struct RecorderRegistry {
    inner: Arc<RegistryInner>,
}

impl RecorderRegistry {
    #[must_use]
    pub fn new(job: Arc<dyn RecordingJob>, bus: EventBus, options: RecorderOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                recorders: Mutex::new(HashMap::new()),
                room_locks: DashMap::new(),
                listen_stopped: Mutex::new(HashMap::new()),
                job,
                bus,
                options,
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to listener events. Calling it twice is a no-op.
    ///
    /// - `LiveStart` adds a recorder
    /// - `RoomRenamed` restarts the active recorder
    /// - `LiveEnd` and `ListenStop` remove the recorder, waiting for an add still in
    ///   flight
    pub fn start(&self) {
        let mut subscriptions = self.inner.subscriptions.lock();
        if !subscriptions.is_empty() {
            return;
        }

        let bus = &self.inner.bus;
        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(bus.subscribe(EventKind::ListenStart, move |event| {
            let weak = weak.clone();
            async move {
                if let Some(registry) = Self::upgrade(&weak) {
                    registry.inner.listen_stopped.lock().remove(&event.room().id);
                }
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(bus.subscribe(EventKind::LiveStart, move |event| {
            let weak = weak.clone();
            async move {
                let Some(registry) = Self::upgrade(&weak) else {
                    return;
                };
                let Event::LiveStart { room, started_at } = event else {
                    return;
                };
                match registry.add_observed(room.clone(), started_at).await {
                    Ok(()) => {}
                    Err(e) if e.is_already_exists() => {
                        debug!(room_id = %room.id, "Recorder already running");
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(room_id = %room.id, "Room no longer listened to, not recording");
                    }
                    Err(e) => error!(room_id = %room.id, error = %e, "Failed to start recorder"),
                }
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(bus.subscribe(EventKind::RoomRenamed, move |event| {
            let weak = weak.clone();
            async move {
                let Some(registry) = Self::upgrade(&weak) else {
                    return;
                };
                let room_id = event.room().id.clone();
                if !registry.has(&room_id) {
                    return;
                }
                if let Err(e) = registry.restart_recorder(&room_id).await {
                    if e.is_not_found() {
                        debug!(room_id = %room_id, "Recorder gone before restart");
                    } else {
                        error!(room_id = %room_id, error = %e, "Failed to restart recorder");
                    }
                }
            }
        }));

        for kind in [EventKind::LiveEnd, EventKind::ListenStop] {
            let weak = Arc::downgrade(&self.inner);
            subscriptions.push(bus.subscribe(kind, move |event| {
                let weak = weak.clone();
                async move {
                    let Some(registry) = Self::upgrade(&weak) else {
                        return;
                    };
                    let room_id = event.room().id.clone();
                    if let Event::ListenStop { stopped_at, .. } = event {
                        registry.mark_listen_stopped(&room_id, stopped_at);
                    }
                    if let Err(e) = registry.remove_recorder(&room_id).await {
                        if e.is_not_found() {
                            debug!(room_id = %room_id, "No recorder to remove");
                        } else {
                            error!(room_id = %room_id, error = %e, "Failed to remove recorder");
                        }
                    }
                }
            }));
        }

        debug!(count = subscriptions.len(), "Recorder registry subscribed");
    }

    /// Detach from the bus. Active recordings are left running.
    pub fn stop(&self) {
        let subscriptions: Vec<_> = self.inner.subscriptions.lock().drain(..).collect();
        for subscription in &subscriptions {
            self.inner.bus.unsubscribe(subscription);
        }
    }

    /// Begin recording `room`.
    ///
    /// Fails with `AlreadyExists` if the room is already recorded. A failed or timed
    /// out `begin` registers nothing, so the next `LiveStart` retries.
    pub async fn add_recorder(&self, room: Room) -> Result<()> {
        self.add_observed(room, Utc::now()).await
    }

    /// End and deregister the recording for `room_id`. `NotFound` if there is none.
    pub async fn remove_recorder(&self, room_id: &RoomId) -> Result<()> {
        let _guard = self.lock_room(room_id).await;
        let room = self.remove_locked(room_id).await?;
        self.inner.bus.publish(Event::RecorderStop { room });
        Ok(())
    }

    /// Cut the recording for `room_id` into a new segment.
    ///
    /// Remove and re-add run under one room lock. If the re-add fails the room is
    /// left unrecorded and no `RecorderRestart` is published.
    pub async fn restart_recorder(&self, room_id: &RoomId) -> Result<()> {
        let _guard = self.lock_room(room_id).await;
        self.restart_locked(room_id).await
    }

    #[must_use]
    pub fn has(&self, room_id: &RoomId) -> bool {
        self.inner.recorders.lock().contains_key(room_id)
    }

    #[must_use]
    pub fn started_at(&self, room_id: &RoomId) -> Option<DateTime<Utc>> {
        self.inner
            .recorders
            .lock()
            .get(room_id)
            .map(|handle| handle.started_at)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.recorders.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.recorders.lock().is_empty()
    }

    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.inner.recorders.lock().keys().cloned().collect()
    }

    /// End every recording. Used at shutdown, after the listeners are closed.
    pub async fn close_all(&self) {
        let room_ids = self.room_ids();
        debug!(count = room_ids.len(), "Closing all recorders");
        for room_id in room_ids {
            match self.remove_recorder(&room_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(room_id = %room_id, error = %e, "Failed to close recorder"),
            }
        }
    }

    fn upgrade(weak: &Weak<RegistryInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    async fn lock_room(&self, room_id: &RoomId) -> RoomGuard {
        let lock = Arc::clone(
            self.inner
                .room_locks
                .entry(room_id.clone())
                .or_default()
                .value(),
        );
        RoomGuard {
            guard: Some(lock.lock_owned().await),
            room_id: room_id.clone(),
            inner: Arc::clone(&self.inner),
        }
    }

    fn mark_listen_stopped(&self, room_id: &RoomId, stopped_at: DateTime<Utc>) {
        let ttl = self.inner.options.marker_ttl();
        let now = Utc::now();
        let mut markers = self.inner.listen_stopped.lock();
        markers.retain(|_, since| !matches!((now - *since).to_std(), Ok(age) if age >= ttl));
        let marker = markers.entry(room_id.clone()).or_insert(stopped_at);
        *marker = (*marker).max(stopped_at);
    }

    /// True if the room's listener stopped at or after `observed_at`
    fn stopped_since(&self, room_id: &RoomId, observed_at: DateTime<Utc>) -> bool {
        self.inner
            .listen_stopped
            .lock()
            .get(room_id)
            .is_some_and(|stopped_at| *stopped_at >= observed_at)
    }

    /// Add a recorder for a live start observed at `observed_at`
    async fn add_observed(&self, room: Room, observed_at: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock_room(&room.id).await;
        let started_at = self.add_locked(&room, observed_at).await?;
        self.inner.bus.publish(Event::RecorderStart { room, started_at });
        Ok(())
    }

    async fn add_locked(&self, room: &Room, observed_at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.has(&room.id) {
            return Err(Error::AlreadyExists(format!("recorder for room {}", room.url)));
        }
        if self.stopped_since(&room.id, observed_at) {
            return Err(Error::NotFound(format!("listener for room {}", room.url)));
        }

        let recording = tokio::time::timeout(self.inner.options.begin_timeout, self.inner.job.begin(room))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "recording begin for room {} after {:?}",
                    room.url, self.inner.options.begin_timeout
                ))
            })??;

        // The listener stopped while the recording was starting
        if self.stopped_since(&room.id, observed_at) {
            self.end_recording(&room.id, recording.as_ref()).await;
            info!(room_id = %room.id, "Listener stopped during begin, recording discarded");
            return Err(Error::NotFound(format!("listener for room {}", room.url)));
        }

        let mut handle = RecordingHandle::new(room.clone(), recording);
        if let Some(max_duration) = self.inner.options.max_duration {
            handle.watchdog = Some(self.spawn_watchdog(&room.id, handle.started, max_duration));
        }
        let started_at = handle.started_at;

        self.inner.recorders.lock().insert(room.id.clone(), handle);
        info!(room_id = %room.id, started_at = %started_at, "Recorder started");
        Ok(started_at)
    }

    async fn end_recording(&self, room_id: &RoomId, recording: &dyn ActiveRecording) {
        let end_timeout = self.inner.options.end_timeout;
        if tokio::time::timeout(end_timeout, recording.end())
            .await
            .is_err()
        {
            warn!(room_id = %room_id, timeout = ?end_timeout, "Recording did not end in time");
        }
    }

    async fn remove_locked(&self, room_id: &RoomId) -> Result<Room> {
        let handle = self
            .inner
            .recorders
            .lock()
            .remove(room_id)
            .ok_or_else(|| Error::NotFound(format!("recorder for room {room_id}")))?;

        if let Some(token) = &handle.watchdog {
            token.cancel();
        }
        self.end_recording(room_id, handle.recording.as_ref()).await;

        info!(
            room_id = %room_id,
            elapsed_secs = handle.elapsed().as_secs(),
            "Recorder stopped"
        );
        Ok(handle.room)
    }

    async fn restart_locked(&self, room_id: &RoomId) -> Result<()> {
        let observed_at = Utc::now();
        let room = self.remove_locked(room_id).await?;
        self.inner
            .bus
            .publish(Event::RecorderStop { room: room.clone() });

        let started_at = self.add_locked(&room, observed_at).await?;
        info!(room_id = %room_id, "Recorder restarted");
        self.inner
            .bus
            .publish(Event::RecorderRestart { room, started_at });
        Ok(())
    }

    fn spawn_watchdog(
        &self,
        room_id: &RoomId,
        started: Instant,
        max_duration: Duration,
    ) -> CancellationToken {
        let watchdog =
            SegmentWatchdog::new(started, max_duration, self.inner.options.check_interval);
        let token = watchdog.token();
        let weak = Arc::downgrade(&self.inner);
        let room_id = room_id.clone();
        let span = info_span!("segment_watchdog", room_id = %room_id);

        tokio::spawn(
            async move {
                if !watchdog.wait_expired().await {
                    return;
                }
                let Some(registry) = Self::upgrade(&weak) else {
                    return;
                };

                let _guard = registry.lock_room(&room_id).await;
                // Removed (and possibly re-added) while waiting for the lock
                if watchdog.token().is_cancelled() {
                    return;
                }

                info!(max_duration = ?max_duration, "Maximum segment duration reached");
                if let Err(e) = registry.restart_locked(&room_id).await {
                    error!(error = %e, "Failed to split recording");
                }
            }
            .instrument(span),
        );

        token
    }
}

impl std::fmt::Debug for RecorderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderRegistry")
            .field("recorders", &self.len())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}
