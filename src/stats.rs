//! Per-poll completeness counters for GTFS-RT feeds.
//!
//! One [`FeedHealth`] row is appended to the day's `health.csv` for every
//! poll, including failed ones, so gaps in the minute dumps can be explained.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gtfs_rt::FeedMessage;
use crate::gtfs_rt::trip_descriptor::ScheduleRelationship;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FeedHealth {
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
    pub total_entities: usize,

    // vehicle positions
    pub vehicles: usize,
    pub with_trip: usize,
    pub with_position: usize,
    pub with_timestamp: usize,

    // trip updates
    pub trip_updates: usize,
    pub with_delay: usize,
    pub canceled_trips: usize,

    pub alerts: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl FeedHealth {
    pub fn from_feed(feed: &FeedMessage) -> Self {
        let mut s = FeedHealth {
            timestamp: Utc::now(),
            total_entities: feed.entity.len(),
            ..Default::default()
        };

        for e in &feed.entity {
            if let Some(v) = &e.vehicle {
                s.vehicles += 1;

                if v.trip.as_ref().is_some_and(|t| t.trip_id.is_some()) {
                    s.with_trip += 1;
                }

                if v.position.is_some() {
                    s.with_position += 1;
                }

                if v.timestamp.is_some() {
                    s.with_timestamp += 1;
                }
            }

            if let Some(tu) = &e.trip_update {
                s.trip_updates += 1;

                let has_delay = tu.delay.is_some()
                    || tu.stop_time_update.iter().any(|stu| {
                        stu.arrival.as_ref().is_some_and(|a| a.delay.is_some())
                            || stu.departure.as_ref().is_some_and(|d| d.delay.is_some())
                    });
                if has_delay {
                    s.with_delay += 1;
                }

                if tu.trip.schedule_relationship() == ScheduleRelationship::Canceled {
                    s.canceled_trips += 1;
                }
            }

            if e.alert.is_some() {
                s.alerts += 1;
            }
        }

        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of vehicle entities that carry a position, in percent.
    pub fn position_pct(&self) -> f64 {
        Self::pct(self.with_position, self.vehicles)
    }

    /// Share of trip updates that carry a usable delay, in percent.
    pub fn delay_pct(&self) -> f64 {
        Self::pct(self.with_delay, self.trip_updates)
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error_type: &str, error_message: &str) -> Self {
        FeedHealth {
            timestamp: Utc::now(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    /// Tag the record with the source label (vehicles, delay, weather).
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error_type.is_some()
    }
}
