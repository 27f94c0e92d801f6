//! VehiclePositions feed → [`VehicleRecord`] rows.

use crate::gtfs_rt::FeedMessage;
use crate::records::VehicleRecord;

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Extracts one row per positioned vehicle entity.
///
/// The vehicle id is the descriptor id, else its label, else the entity id.
/// Entities without a position, deleted entities and null-island fixes are
/// skipped. Fixes without their own timestamp take `fallback_ts` (the feed
/// header time).
pub fn vehicle_records(feed: &FeedMessage, fallback_ts: i64) -> Vec<VehicleRecord> {
    let mut rows = Vec::with_capacity(feed.entity.len());

    for entity in &feed.entity {
        if entity.is_deleted() {
            continue;
        }
        let Some(v) = &entity.vehicle else {
            continue;
        };
        let Some(pos) = &v.position else {
            continue;
        };
        if pos.latitude == 0.0 && pos.longitude == 0.0 {
            continue;
        }

        let vehicle_id = v
            .vehicle
            .as_ref()
            .and_then(|d| non_empty(&d.id).or_else(|| non_empty(&d.label)))
            .unwrap_or_else(|| entity.id.clone());

        let trip = v.trip.as_ref();
        let timestamp = match v.timestamp {
            Some(ts) if ts > 0 => ts as i64,
            _ => fallback_ts,
        };

        rows.push(VehicleRecord {
            vehicle_id,
            trip_id: trip.and_then(|t| non_empty(&t.trip_id)),
            route_id: trip.and_then(|t| non_empty(&t.route_id)),
            direction_id: trip.and_then(|t| t.direction_id),
            start_date: trip.and_then(|t| non_empty(&t.start_date)),
            timestamp,
            lat: f64::from(pos.latitude),
            lon: f64::from(pos.longitude),
            bearing: pos.bearing,
            speed_mps: pos.speed,
        });
    }

    rows
}
