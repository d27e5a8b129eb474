//! Per-room polling state machine.
//!
//! A listener polls its room on a jittered interval, diffs the result against the
//! last snapshot and publishes transitions on the event bus. It never talks to the
//! recorder side directly.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::jitter::JitterTicker;
use crate::config::{ListenerConfig, SplitConfig};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::models::{Room, RoomInfo, RoomSnapshot, Transition};
use crate::source::RoomSource;

/// Lifecycle of a listener. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Stopped = 3,
}

impl ListenerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Starting,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Polling behaviour of a listener
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub interval: Duration,
    pub jitter_stddev: Duration,
    pub fetch_timeout: Duration,
    pub restart_on_rename: bool,
}

impl ListenerOptions {
    #[must_use]
    pub const fn from_config(listener: &ListenerConfig, split: &SplitConfig) -> Self {
        Self {
            interval: listener.interval(),
            jitter_stddev: listener.jitter_stddev(),
            fetch_timeout: listener.fetch_timeout(),
            restart_on_rename: split.on_room_name_changed,
        }
    }
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self::from_config(&ListenerConfig::default(), &SplitConfig::default())
    }
}

pub struct Listener {
    room: Room,
    source: Arc<dyn RoomSource>,
    bus: EventBus,
    options: ListenerOptions,
    state: AtomicU8,
    /// Held for the whole poll cycle, so only one cycle runs at a time.
    snapshot: Mutex<RoomSnapshot>,
    last_info: RwLock<Option<RoomInfo>>,
    live_since: RwLock<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl Listener {
    #[must_use]
    pub fn new(
        room: Room,
        source: Arc<dyn RoomSource>,
        bus: EventBus,
        options: ListenerOptions,
    ) -> Self {
        Self {
            room,
            source,
            bus,
            options,
            state: AtomicU8::new(ListenerState::Created as u8),
            snapshot: Mutex::new(RoomSnapshot::default()),
            last_info: RwLock::new(None),
            live_since: RwLock::new(None),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn room(&self) -> &Room {
        &self.room
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Last observed snapshot. Waits for an in-flight poll to finish.
    pub async fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.lock().await.clone()
    }

    /// Latest successfully fetched room info
    #[must_use]
    pub fn last_info(&self) -> Option<RoomInfo> {
        self.last_info.read().clone()
    }

    /// When the current live session was first observed, if the room is live
    #[must_use]
    pub fn live_since(&self) -> Option<DateTime<Utc>> {
        *self.live_since.read()
    }

    fn transition(&self, from: ListenerState, to: ListenerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Start listening. Publishes `ListenStart`, polls once, then spawns the
    /// polling loop. No-op unless the listener is freshly created.
    pub async fn start(self: &Arc<Self>) {
        if !self.transition(ListenerState::Created, ListenerState::Starting) {
            return;
        }

        info!(room_id = %self.room.id, url = %self.room.url, "Listener starting");
        self.bus.publish(Event::ListenStart {
            room: self.room.clone(),
        });

        self.refresh().await;

        let span = tracing::info_span!("listener", room_id = %self.room.id);
        tokio::spawn(Arc::clone(self).run().instrument(span));

        self.transition(ListenerState::Starting, ListenerState::Running);
    }

    /// Stop listening. Publishes `ListenStop` and signals the polling loop.
    /// No-op unless the listener is running.
    pub fn close(&self) {
        if !self.transition(ListenerState::Running, ListenerState::Stopped) {
            return;
        }

        info!(room_id = %self.room.id, url = %self.room.url, "Listener stopped");
        self.bus.publish(Event::ListenStop {
            room: self.room.clone(),
            stopped_at: Utc::now(),
        });
        self.cancel.cancel();
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = JitterTicker::new(self.options.interval, self.options.jitter_stddev);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = ticker.tick() => {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = self.refresh() => {}
                    }
                }
            }
        }

        debug!("Polling loop exited");
    }

    async fn fetch(&self, room: &Room) -> Result<RoomInfo> {
        tokio::time::timeout(self.options.fetch_timeout, self.source.fetch_status(room))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "fetching room status took longer than {:?}",
                    self.options.fetch_timeout
                ))
            })?
    }

    /// One poll-and-diff cycle.
    ///
    /// A failed fetch leaves the snapshot untouched. A completed fetch always
    /// replaces it, whether or not an event was published.
    pub(crate) async fn refresh(&self) {
        let mut snapshot = self.snapshot.lock().await;

        let info = match self.fetch(&self.room).await {
            Ok(info) => info,
            Err(e) => {
                error!(
                    room_id = %self.room.id,
                    url = %self.room.url,
                    error = %e,
                    "Failed to load room info"
                );
                return;
            }
        };

        let latest = RoomSnapshot::from(&info);
        // A poll that completes after close must not start anything new.
        let closed = self.cancel.is_cancelled();

        match snapshot.diff(&latest) {
            Transition::None => {}
            Transition::LiveStarted => {
                let started_at = Utc::now();
                *self.live_since.write() = Some(started_at);
                info!(room = %info.room_name, host = %info.host_name, "Live start");
                if !closed {
                    self.bus.publish(Event::LiveStart {
                        room: self.room.clone(),
                        started_at,
                    });
                }
            }
            Transition::LiveEnded => {
                *self.live_since.write() = None;
                info!(room = %info.room_name, host = %info.host_name, "Live end");
                if !closed {
                    self.bus.publish(Event::LiveEnd {
                        room: self.room.clone(),
                    });
                }
            }
            Transition::Renamed if self.options.restart_on_rename => {
                info!(
                    old_name = %snapshot.name,
                    room = %info.room_name,
                    host = %info.host_name,
                    "Room name was changed"
                );
                if !closed {
                    self.bus.publish(Event::RoomRenamed {
                        room: self.room.clone(),
                        old_name: snapshot.name.clone(),
                        new_name: info.room_name.clone(),
                    });
                }
            }
            Transition::Renamed => {
                debug!(old_name = %snapshot.name, room = %info.room_name, "Room name changed");
            }
        }

        *snapshot = latest;
        let initializing = info.initializing;
        *self.last_info.write() = Some(info);

        if initializing && !closed {
            self.resolve_placeholder().await;
        }
    }

    async fn resolve_placeholder(&self) {
        let resolved = match tokio::time::timeout(
            self.options.fetch_timeout,
            self.source.resolve(&self.room),
        )
        .await
        {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => {
                debug!(error = %e, "Placeholder room not resolved yet");
                return;
            }
            Err(_) => {
                warn!("Timed out resolving placeholder room");
                return;
            }
        };

        match self.fetch(&resolved).await {
            Ok(info) => {
                info!(
                    placeholder = %self.room.url,
                    resolved = %resolved.url,
                    "Placeholder room resolved"
                );
                self.bus.publish(Event::RoomResolved {
                    placeholder: self.room.clone(),
                    resolved,
                    info,
                });
            }
            Err(e) => {
                warn!(resolved = %resolved.url, error = %e, "Failed to load resolved room info");
            }
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("room", &self.room)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
