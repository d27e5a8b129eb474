pub mod room;

pub use room::{Room, RoomId, RoomInfo, RoomSnapshot, Transition};
