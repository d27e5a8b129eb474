use chrono::{DateTime, Utc};

use crate::models::{Room, RoomInfo};

/// Closed set of event kinds handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ListenStart,
    ListenStop,
    LiveStart,
    LiveEnd,
    RoomRenamed,
    RoomResolved,
    RecorderStart,
    RecorderStop,
    RecorderRestart,
}

impl EventKind {
    pub const ALL: [Self; 9] = [
        Self::ListenStart,
        Self::ListenStop,
        Self::LiveStart,
        Self::LiveEnd,
        Self::RoomRenamed,
        Self::RoomResolved,
        Self::RecorderStart,
        Self::RecorderStop,
        Self::RecorderRestart,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ListenStart => "listen_start",
            Self::ListenStop => "listen_stop",
            Self::LiveStart => "live_start",
            Self::LiveEnd => "live_end",
            Self::RoomRenamed => "room_renamed",
            Self::RoomResolved => "room_resolved",
            Self::RecorderStart => "recorder_start",
            Self::RecorderStop => "recorder_stop",
            Self::RecorderRestart => "recorder_restart",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events published on the [`super::EventBus`].
///
/// The payload shape is fixed per kind, so subscribers match on the variant
/// instead of downcasting.
#[derive(Debug, Clone)]
pub enum Event {
    /// A listener started polling the room
    ListenStart { room: Room },

    /// A listener stopped polling the room. `stopped_at` is when it was closed.
    ListenStop {
        room: Room,
        stopped_at: DateTime<Utc>,
    },

    /// The room went live. `started_at` is the observed transition time.
    LiveStart {
        room: Room,
        started_at: DateTime<Utc>,
    },

    /// The room went offline
    LiveEnd { room: Room },

    /// The room title changed while live (only with rename splitting enabled)
    RoomRenamed {
        room: Room,
        old_name: String,
        new_name: String,
    },

    /// A placeholder room resolved to its real underlying room
    RoomResolved {
        placeholder: Room,
        resolved: Room,
        info: RoomInfo,
    },

    RecorderStart {
        room: Room,
        started_at: DateTime<Utc>,
    },

    RecorderStop { room: Room },

    /// A recording was segmented: stopped and started again
    RecorderRestart {
        room: Room,
        started_at: DateTime<Utc>,
    },
}

impl Event {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ListenStart { .. } => EventKind::ListenStart,
            Self::ListenStop { .. } => EventKind::ListenStop,
            Self::LiveStart { .. } => EventKind::LiveStart,
            Self::LiveEnd { .. } => EventKind::LiveEnd,
            Self::RoomRenamed { .. } => EventKind::RoomRenamed,
            Self::RoomResolved { .. } => EventKind::RoomResolved,
            Self::RecorderStart { .. } => EventKind::RecorderStart,
            Self::RecorderStop { .. } => EventKind::RecorderStop,
            Self::RecorderRestart { .. } => EventKind::RecorderRestart,
        }
    }

    /// The room the event is about. For `RoomResolved` this is the placeholder.
    #[must_use]
    pub fn room(&self) -> &Room {
        match self {
            Self::ListenStart { room }
            | Self::ListenStop { room, .. }
            | Self::LiveStart { room, .. }
            | Self::LiveEnd { room }
            | Self::RoomRenamed { room, .. }
            | Self::RecorderStart { room, .. }
            | Self::RecorderStop { room }
            | Self::RecorderRestart { room, .. } => room,
            Self::RoomResolved { placeholder, .. } => placeholder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_and_room() {
        let room = Room::parse("https://live.example.com/1").unwrap();
        let resolved = Room::parse("https://live.example.com/2").unwrap();

        let event = Event::LiveStart {
            room: room.clone(),
            started_at: Utc::now(),
        };
        assert_eq!(event.kind(), EventKind::LiveStart);
        assert_eq!(event.room(), &room);

        let event = Event::RoomResolved {
            placeholder: room.clone(),
            resolved,
            info: RoomInfo::default(),
        };
        assert_eq!(event.kind(), EventKind::RoomResolved);
        assert_eq!(event.room(), &room);
    }

    #[test]
    fn test_event_kind_names_are_unique() {
        let names: std::collections::HashSet<_> =
            EventKind::ALL.iter().map(EventKind::as_str).collect();
        assert_eq!(names.len(), EventKind::ALL.len());
    }
}
