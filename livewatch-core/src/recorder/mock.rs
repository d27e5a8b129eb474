use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::job::{ActiveRecording, RecordingJob};
use crate::error::{Error, Result};
use crate::models::{Room, RoomId};

#[derive(Debug, Default)]
struct MockJobState {
    begins: HashMap<RoomId, usize>,
    ends: HashMap<RoomId, usize>,
    failures: VecDeque<String>,
    begin_delay: Option<Duration>,
    issued: i64,
}

/// Recording job for tests.
///
/// Counts begin/end calls per room, can be told to fail upcoming begins, and hands
/// out strictly increasing start timestamps.
#[derive(Debug, Clone)]
pub struct MockRecordingJob {
    state: Arc<Mutex<MockJobState>>,
    epoch: DateTime<Utc>,
}

impl Default for MockRecordingJob {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRecordingJob {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockJobState::default())),
            epoch: Utc::now(),
        }
    }

    /// Make the next `begin` call fail with `message`
    pub fn fail_next_begin(&self, message: &str) {
        self.state.lock().failures.push_back(message.to_string());
    }

    /// Delay every `begin` call, simulating a slow process spawn
    pub fn set_begin_delay(&self, delay: Duration) {
        self.state.lock().begin_delay = Some(delay);
    }

    #[must_use]
    pub fn begin_count(&self, room_id: &RoomId) -> usize {
        self.state.lock().begins.get(room_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn end_count(&self, room_id: &RoomId) -> usize {
        self.state.lock().ends.get(room_id).copied().unwrap_or(0)
    }

    /// Recordings begun and not yet ended, across all rooms
    #[must_use]
    pub fn active_count(&self) -> usize {
        let state = self.state.lock();
        let begun: usize = state.begins.values().sum();
        let ended: usize = state.ends.values().sum();
        begun.saturating_sub(ended)
    }
}

struct MockRecording {
    room_id: RoomId,
    started_at: DateTime<Utc>,
    ended: AtomicBool,
    state: Arc<Mutex<MockJobState>>,
}

#[async_trait]
impl ActiveRecording for MockRecording {
    async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        *self
            .state
            .lock()
            .ends
            .entry(self.room_id.clone())
            .or_insert(0) += 1;
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[async_trait]
impl RecordingJob for MockRecordingJob {
    async fn begin(&self, room: &Room) -> Result<Arc<dyn ActiveRecording>> {
        let delay = self.state.lock().begin_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(message) = state.failures.pop_front() {
            return Err(Error::Begin(message));
        }

        *state.begins.entry(room.id.clone()).or_insert(0) += 1;
        state.issued += 1;
        let started_at = self.epoch + ChronoDuration::seconds(state.issued);

        Ok(Arc::new(MockRecording {
            room_id: room.id.clone(),
            started_at,
            ended: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_job_counts_and_fails_on_demand() {
        let job = MockRecordingJob::new();
        let room = Room::parse("https://live.example.com/1").unwrap();

        job.fail_next_begin("ffmpeg missing");
        assert!(matches!(job.begin(&room).await, Err(Error::Begin(_))));
        assert_eq!(job.begin_count(&room.id), 0);

        let first = job.begin(&room).await.unwrap();
        let second = job.begin(&room).await.unwrap();
        assert!(second.started_at() > first.started_at());
        assert_eq!(job.active_count(), 2);

        first.end().await;
        first.end().await;
        assert_eq!(job.end_count(&room.id), 1);
        assert_eq!(job.active_count(), 1);
    }
}
