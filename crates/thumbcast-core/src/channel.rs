//! Bus channel names.
//!
//! A [`Channel`] names the single topic a relay subscribes to. It is shared
//! read-only between every stream session, so it is backed by an `Arc<str>`
//! and cloning is cheap.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Channel the relay listens on when nothing else is configured.
pub const DEFAULT_CHANNEL: &str = "thumbnail";

/// Immutable, validated pub/sub channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel(Arc<str>);

impl Channel {
    /// Validate and wrap a channel name.
    ///
    /// Empty names and names containing whitespace are rejected.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::InvalidChannel(name.to_string()));
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self(Arc::from(DEFAULT_CHANNEL))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channel_is_thumbnail() {
        assert_eq!(Channel::default().as_str(), "thumbnail");
    }

    #[test]
    fn rejects_empty_and_whitespace_names() {
        assert!(matches!(Channel::new(""), Err(Error::InvalidChannel(_))));
        assert!(matches!(
            Channel::new("two words"),
            Err(Error::InvalidChannel(_))
        ));
        assert!(Channel::new("thumb\n").is_err());
    }

    #[test]
    fn accepts_namespaced_names() {
        let channel: Channel = "media:thumbnails".parse().unwrap();
        assert_eq!(channel.to_string(), "media:thumbnails");
    }

    #[test]
    fn clones_share_storage() {
        let a = Channel::new("thumbnail").unwrap();
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn deserialize_validates() {
        let ok: Channel = serde_json::from_str("\"uploads\"").unwrap();
        assert_eq!(ok.as_str(), "uploads");
        assert!(serde_json::from_str::<Channel>("\"\"").is_err());
    }
}
