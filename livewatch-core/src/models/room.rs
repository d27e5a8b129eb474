use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Error, Result};

/// Stable identity of a monitored room, derived from its canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Derive the id from a room URL.
    ///
    /// Scheme and host are already lower-cased by [`Url`]; the fragment is dropped and
    /// trailing slashes are trimmed so `https://a.tv/1/` and `https://a.tv/1` collide.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let digest = Sha256::digest(canonical_url(url).as_bytes());
        Self(hex::encode(&digest[..16]))
    }

    #[must_use]
    pub const fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn canonical_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    let trimmed = canonical.path().trim_end_matches('/').to_string();
    canonical.set_path(&trimmed);
    canonical.to_string()
}

/// A monitored live room: its identity plus the URL it was registered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub url: Url,
}

impl Room {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            id: RoomId::from_url(&url),
            url,
        }
    }

    /// Parse a room from a raw URL string. Only http(s) URLs are accepted.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "unsupported room url scheme: {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::InvalidInput(format!("room url has no host: {raw}")));
        }
        Ok(Self::new(url))
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Room status as reported by a [`crate::source::RoomSource`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_name: String,
    pub host_name: String,
    pub is_live: bool,
    /// The room is a placeholder that has not been resolved to its real room yet.
    pub initializing: bool,
}

/// Last observed status of a room, used for diffing between polls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub name: String,
    pub is_live: bool,
}

/// Outcome of comparing two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    LiveStarted,
    LiveEnded,
    /// Still live, but the room title changed.
    Renamed,
}

impl RoomSnapshot {
    #[must_use]
    pub fn diff(&self, next: &Self) -> Transition {
        match (self.is_live, next.is_live) {
            (false, false) => Transition::None,
            (false, true) => Transition::LiveStarted,
            (true, false) => Transition::LiveEnded,
            (true, true) if self.name != next.name => Transition::Renamed,
            (true, true) => Transition::None,
        }
    }
}

impl From<&RoomInfo> for RoomSnapshot {
    fn from(info: &RoomInfo) -> Self {
        Self {
            name: info.room_name.clone(),
            is_live: info.is_live,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str, is_live: bool) -> RoomSnapshot {
        RoomSnapshot {
            name: name.to_string(),
            is_live,
        }
    }

    #[test]
    fn test_room_id_is_stable_across_equivalent_urls() {
        let a = Room::parse("https://live.example.com/1030").unwrap();
        let b = Room::parse("https://LIVE.example.com/1030/").unwrap();
        let c = Room::parse("https://live.example.com/1030#player").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, c.id);
        assert_eq!(a.id.as_str().len(), 32);
    }

    #[test]
    fn test_room_id_differs_per_room() {
        let a = Room::parse("https://live.example.com/1030").unwrap();
        let b = Room::parse("https://live.example.com/493").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_room_parse_rejects_non_http() {
        assert!(matches!(
            Room::parse("ftp://live.example.com/1"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(Room::parse("::"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_diff_decision_table() {
        assert_eq!(snapshot("a", false).diff(&snapshot("a", false)), Transition::None);
        assert_eq!(snapshot("a", false).diff(&snapshot("b", false)), Transition::None);
        assert_eq!(snapshot("a", false).diff(&snapshot("a", true)), Transition::LiveStarted);
        assert_eq!(snapshot("a", false).diff(&snapshot("b", true)), Transition::LiveStarted);
        assert_eq!(snapshot("a", true).diff(&snapshot("a", false)), Transition::LiveEnded);
        assert_eq!(snapshot("a", true).diff(&snapshot("b", false)), Transition::LiveEnded);
        assert_eq!(snapshot("a", true).diff(&snapshot("b", true)), Transition::Renamed);
        assert_eq!(snapshot("a", true).diff(&snapshot("a", true)), Transition::None);
    }

    #[test]
    fn test_snapshot_from_info() {
        let info = RoomInfo {
            room_name: "Foo".to_string(),
            host_name: "host".to_string(),
            is_live: true,
            initializing: false,
        };
        assert_eq!(RoomSnapshot::from(&info), snapshot("Foo", true));
    }
}
