//! Live room monitoring core.
//!
//! Listeners poll rooms and publish state transitions on an in-process event bus;
//! the recorder registry reacts to those events by starting, stopping and
//! segmenting recordings. [`Engine`] wires both sides together.
//!
//! The `test-util` feature exposes scripted test doubles for the room source and
//! the recording job, plus an event recorder.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod listener;
pub mod logging;
pub mod models;
pub mod recorder;
pub mod source;

pub use config::Config;
pub use engine::{Engine, RoomStatus};
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventKind, Subscription};
pub use listener::{Listener, ListenerRegistry, ListenerState};
pub use models::{Room, RoomId, RoomInfo};
pub use recorder::{ActiveRecording, RecorderRegistry, RecordingJob};
pub use source::RoomSource;

#[cfg(any(test, feature = "test-util"))]
pub use events::EventLog;
#[cfg(any(test, feature = "test-util"))]
pub use recorder::MockRecordingJob;
#[cfg(any(test, feature = "test-util"))]
pub use source::MockRoomSource;
