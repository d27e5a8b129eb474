//! Room listeners: polling state machines and their registry

pub mod jitter;
#[allow(clippy::module_inception)]
pub mod listener;
pub mod registry;

pub use jitter::JitterTicker;
pub use listener::{Listener, ListenerOptions, ListenerState};
pub use registry::ListenerRegistry;
