//! Protobuf decoding for GTFS Realtime feeds.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use prost::Message;

use crate::gtfs_rt::FeedMessage;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    FeedMessage::decode(bytes).context("Failed to decode GTFS-RT FeedMessage")
}

/// Header timestamp of `feed` in seconds, or `fallback` when the producer
/// left it unset (or zero).
pub fn feed_timestamp(feed: &FeedMessage, fallback: DateTime<Utc>) -> i64 {
    match feed.header.timestamp {
        Some(ts) if ts > 0 => ts as i64,
        _ => fallback.timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{FeedEntity, FeedHeader, Position, VehiclePosition};

    fn header(timestamp: Option<u64>) -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_empty_bytes_returns_default_feed() {
        // Required fields are not enforced by prost; an empty buffer is a default feed.
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
    fn test_parse_vehicle_feed() {
        let feed = FeedMessage {
            header: header(Some(1_752_480_000)),
            entity: vec![FeedEntity {
                id: "e1".to_string(),
                vehicle: Some(VehiclePosition {
                    position: Some(Position {
                        latitude: 53.35,
                        longitude: -6.26,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }],
        };

        let parsed = parse_feed(&feed.encode_to_vec()).unwrap();
        assert_eq!(parsed.header.timestamp, Some(1_752_480_000));
        assert_eq!(parsed.entity.len(), 1);
        let position = parsed.entity[0].vehicle.as_ref().unwrap().position.as_ref().unwrap();
        assert!((position.latitude - 53.35).abs() < 1e-5);
    }

    #[test]
    fn test_feed_timestamp_falls_back() {
        let fallback = DateTime::from_timestamp(1_000, 0).unwrap();

        let stamped = FeedMessage {
            header: header(Some(2_000)),
            entity: vec![],
        };
        assert_eq!(feed_timestamp(&stamped, fallback), 2_000);

        let unstamped = FeedMessage {
            header: header(None),
            entity: vec![],
        };
        assert_eq!(feed_timestamp(&unstamped, fallback), 1_000);

        let zero = FeedMessage {
            header: header(Some(0)),
            entity: vec![],
        };
        assert_eq!(feed_timestamp(&zero, fallback), 1_000);
    }
}
