//! Room status source abstraction
//!
//! Platform specific fetchers implement [`RoomSource`]; listeners only see the trait.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Room, RoomInfo};

#[cfg(any(test, feature = "test-util"))]
mod mock;

#[cfg(any(test, feature = "test-util"))]
pub use mock::{live_info, offline_info, MockRoomSource};

/// Fetches the current status of a room
#[async_trait]
pub trait RoomSource: Send + Sync {
    /// Query the platform for the room's current status.
    /// Failures are expected to be transient.
    async fn fetch_status(&self, room: &Room) -> Result<RoomInfo>;

    /// Resolve a placeholder room (one reported as `initializing`) to the real room
    /// behind it.
    async fn resolve(&self, placeholder: &Room) -> Result<Room> {
        Err(Error::NotFound(format!(
            "no resolution for placeholder room {}",
            placeholder.url
        )))
    }
}
