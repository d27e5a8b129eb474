//! In-process event bus decoupling listeners from recorders

pub mod bus;
pub mod event;
#[cfg(any(test, feature = "test-util"))]
pub mod log;

pub use bus::{EventBus, EventHandler, Subscription};
pub use event::{Event, EventKind};
#[cfg(any(test, feature = "test-util"))]
pub use log::EventLog;
