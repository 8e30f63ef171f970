//! Protobuf parser and content digest for GTFS Realtime feeds.

use prost::Message;
use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::Result;
use crate::gtfs_rt::FeedMessage;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns [`ValidatorError::Decode`](crate::error::ValidatorError::Decode) if
/// the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// MD5 digest of a raw feed payload, used to detect unchanged fetches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedDigest([u8; 16]);

impl FeedDigest {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<md5::Digest> for FeedDigest {
    fn from(digest: md5::Digest) -> Self {
        Self(digest.0)
    }
}

impl fmt::Display for FeedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Serialize for FeedDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Computes the content digest of a raw payload.
pub fn feed_digest(bytes: &[u8]) -> FeedDigest {
    md5::compute(bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_bytes_returns_default_feed() {
        // Required fields decode to their defaults when absent
        let feed = parse_feed(&[]).unwrap();
        assert_eq!(feed.header.gtfs_realtime_version, "");
        assert!(feed.entity.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        assert!(parse_feed(&invalid_bytes).is_err());
    }

    #[test]
    fn test_parse_valid_minimal_feed() {
        use crate::gtfs_rt::FeedHeader;

        let feed = FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp: Some(1234567890),
                incrementality: None,
                feed_version: None,
            },
            entity: vec![],
        };
        let parsed = parse_feed(&feed.encode_to_vec()).unwrap();

        assert_eq!(parsed.header.gtfs_realtime_version, "2.0");
        assert_eq!(parsed.header.timestamp, Some(1234567890));
    }

    #[test]
    fn test_digest_is_stable_and_content_sensitive() {
        let a = feed_digest(b"feed one");
        let b = feed_digest(b"feed one");
        let c = feed_digest(b"feed two");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_digest_hex_format() {
        // Well-known MD5 of the empty input
        assert_eq!(
            feed_digest(b"").to_string(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }
}
