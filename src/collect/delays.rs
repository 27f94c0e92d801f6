//! TripUpdates feed → [`DelayRecord`] rows.

use crate::gtfs_rt::FeedMessage;
use crate::gtfs_rt::trip_descriptor::ScheduleRelationship;
use crate::records::DelayRecord;

/// Extracts one trip-level delay per trip update.
///
/// The trip's own `delay` wins; otherwise the first stop-time update that
/// carries an arrival delay (or, failing that, a departure delay) is used.
/// Canceled trips and updates without any delay are skipped.
pub fn delay_records(feed: &FeedMessage, fallback_ts: i64) -> Vec<DelayRecord> {
    let mut rows = Vec::new();

    for entity in &feed.entity {
        if entity.is_deleted() {
            continue;
        }
        let Some(tu) = &entity.trip_update else {
            continue;
        };
        let Some(trip_id) = tu.trip.trip_id.as_deref().filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        if tu.trip.schedule_relationship() == ScheduleRelationship::Canceled {
            continue;
        }

        let delay = tu.delay.or_else(|| {
            tu.stop_time_update.iter().find_map(|stu| {
                stu.arrival
                    .as_ref()
                    .and_then(|a| a.delay)
                    .or_else(|| stu.departure.as_ref().and_then(|d| d.delay))
            })
        });
        let Some(delay_sec) = delay else {
            continue;
        };

        let timestamp = match tu.timestamp {
            Some(ts) if ts > 0 => ts as i64,
            _ => fallback_ts,
        };

        rows.push(DelayRecord {
            trip_id: trip_id.to_string(),
            route_id: tu.trip.route_id.clone().filter(|r| !r.is_empty()),
            timestamp,
            delay_sec,
        });
    }

    rows
}
