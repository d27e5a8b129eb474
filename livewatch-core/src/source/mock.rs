use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::RoomSource;
use crate::error::{Error, Result};
use crate::models::{Room, RoomId, RoomInfo};

/// Status of a live room with the given title
#[must_use]
pub fn live_info(name: &str) -> RoomInfo {
    RoomInfo {
        room_name: name.to_string(),
        host_name: "host".to_string(),
        is_live: true,
        initializing: false,
    }
}

/// Status of an offline room with the given title
#[must_use]
pub fn offline_info(name: &str) -> RoomInfo {
    RoomInfo {
        is_live: false,
        ..live_info(name)
    }
}

/// Scripted room source for tests.
///
/// Each room has a queue of responses consumed one per fetch. Once the queue is
/// empty the last successful status is repeated (offline if there never was one).
#[derive(Debug, Clone, Default)]
pub struct MockRoomSource {
    scripts: Arc<Mutex<HashMap<RoomId, VecDeque<std::result::Result<RoomInfo, String>>>>>,
    last: Arc<Mutex<HashMap<RoomId, RoomInfo>>>,
    resolutions: Arc<Mutex<HashMap<RoomId, Room>>>,
    fetches: Arc<Mutex<HashMap<RoomId, usize>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockRoomSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful status response
    pub fn push_status(&self, room: &Room, info: RoomInfo) {
        self.scripts
            .lock()
            .entry(room.id.clone())
            .or_default()
            .push_back(Ok(info));
    }

    /// Queue a failed fetch
    pub fn push_failure(&self, room: &Room, message: &str) {
        self.scripts
            .lock()
            .entry(room.id.clone())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    /// Drop any queued responses and report `info` from now on
    pub fn set_status(&self, room: &Room, info: RoomInfo) {
        self.scripts.lock().remove(&room.id);
        self.last.lock().insert(room.id.clone(), info);
    }

    /// Make `placeholder` resolve to `resolved`
    pub fn resolve_to(&self, placeholder: &Room, resolved: Room) {
        self.resolutions
            .lock()
            .insert(placeholder.id.clone(), resolved);
    }

    /// Delay every fetch, simulating a slow platform API. `None` removes the delay.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    #[must_use]
    pub fn fetch_count(&self, room_id: &RoomId) -> usize {
        self.fetches.lock().get(room_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RoomSource for MockRoomSource {
    async fn fetch_status(&self, room: &Room) -> Result<RoomInfo> {
        *self.fetches.lock().entry(room.id.clone()).or_insert(0) += 1;

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .scripts
            .lock()
            .get_mut(&room.id)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Ok(info)) => {
                self.last.lock().insert(room.id.clone(), info.clone());
                Ok(info)
            }
            Some(Err(message)) => Err(Error::Fetch(message)),
            None => Ok(self.last.lock().get(&room.id).cloned().unwrap_or_default()),
        }
    }

    async fn resolve(&self, placeholder: &Room) -> Result<Room> {
        self.resolutions
            .lock()
            .get(&placeholder.id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("placeholder {}", placeholder.url)))
    }
}
