//! Recording job abstraction.
//!
//! The process that actually captures a stream (an ffmpeg child, a native muxer, ...)
//! lives outside this crate and is reached through `RecordingJob`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::Room;

/// A recording in progress
#[async_trait]
pub trait ActiveRecording: Send + Sync {
    /// Stop capturing and release resources. Best-effort, never fails.
    async fn end(&self);

    fn started_at(&self) -> DateTime<Utc>;
}

/// Starts recordings for live rooms
#[async_trait]
pub trait RecordingJob: Send + Sync {
    async fn begin(&self, room: &Room) -> Result<Arc<dyn ActiveRecording>>;
}

/// A registered recording, one per room at most
pub struct RecordingHandle {
    pub room: Room,
    pub recording: Arc<dyn ActiveRecording>,
    pub started_at: DateTime<Utc>,
    /// Monotonic start, used for segmentation
    pub(crate) started: tokio::time::Instant,
    /// Cancels the segmentation watchdog, if one runs for this handle
    pub(crate) watchdog: Option<CancellationToken>,
}

impl RecordingHandle {
    pub(crate) fn new(room: Room, recording: Arc<dyn ActiveRecording>) -> Self {
        Self {
            started_at: recording.started_at(),
            room,
            recording,
            started: tokio::time::Instant::now(),
            watchdog: None,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl std::fmt::Debug for RecordingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingHandle")
            .field("room", &self.room)
            .field("started_at", &self.started_at)
            .field("watchdog", &self.watchdog.is_some())
            .finish_non_exhaustive()
    }
}
