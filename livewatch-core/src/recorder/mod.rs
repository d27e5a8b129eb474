//! Recording lifecycle: the external job interface, the registry that reacts to
//! listener events, and duration-based segmentation

pub mod job;
pub mod registry;
pub mod watchdog;

#[cfg(any(test, feature = "test-util"))]
mod mock;

pub use job::{ActiveRecording, RecordingHandle, RecordingJob};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockRecordingJob;
pub use registry::{RecorderOptions, RecorderRegistry};
pub use watchdog::SegmentWatchdog;
