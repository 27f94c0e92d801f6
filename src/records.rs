//! Row types written to and read from the CSV tables.
//!
//! Timestamps are POSIX seconds (UTC) throughout.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Floors a POSIX timestamp to the start of its minute.
pub fn minute_floor(ts: i64) -> i64 {
    ts - ts.rem_euclid(60)
}

/// One vehicle fix from a GTFS-RT VehiclePositions poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub vehicle_id: String,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    /// Service date from the trip descriptor, `YYYYMMDD`.
    pub start_date: Option<String>,
    pub timestamp: i64,
    pub lat: f64,
    pub lon: f64,
    pub bearing: Option<f32>,
    /// Producer-reported speed in metres per second.
    pub speed_mps: Option<f32>,
}

/// Trip-level delay from a GTFS-RT TripUpdates poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayRecord {
    pub trip_id: String,
    pub route_id: Option<String>,
    pub timestamp: i64,
    pub delay_sec: i32,
}

/// Current weather for one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub zone: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: i64,
    pub temp_c: f64,
    /// Rain over the last hour in mm; 0 when none was reported.
    pub rain_mm: f64,
    pub wind_kph: f64,
    pub humidity: Option<f64>,
    pub conditions: Option<String>,
}

/// A rolled-up vehicle fix with speed derived from the previous fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleObservation {
    pub vehicle_id: String,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub start_date: Option<String>,
    pub timestamp: i64,
    pub lat: f64,
    pub lon: f64,
    pub bearing: Option<f32>,
    pub speed_mps: Option<f32>,
    pub speed_kph: Option<f64>,
}

impl VehicleObservation {
    pub fn from_record(r: VehicleRecord) -> Self {
        Self {
            vehicle_id: r.vehicle_id,
            trip_id: r.trip_id,
            route_id: r.route_id,
            direction_id: r.direction_id,
            start_date: r.start_date,
            timestamp: r.timestamp,
            lat: r.lat,
            lon: r.lon,
            bearing: r.bearing,
            speed_mps: r.speed_mps,
            speed_kph: None,
        }
    }
}

/// The per-day analysis row. Each stage fills in more columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleMinute {
    pub vehicle_id: String,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub start_date: Option<String>,
    pub timestamp: i64,
    pub lat: f64,
    pub lon: f64,
    pub speed_kph: Option<f64>,
    pub delay_sec: Option<i32>,

    // weather
    pub zone: Option<String>,
    pub temp_c: Option<f64>,
    pub rain_mm: Option<f64>,
    pub wind_kph: Option<f64>,
    pub local_time: Option<NaiveDateTime>,

    // anomalies
    pub vanished: bool,
    pub vanish_anchor: bool,
    pub stuck: bool,
    pub severe_delay: bool,

    // norms
    pub delay_norm: Option<f64>,
    pub speed_norm: Option<f64>,
    pub rain_norm: Option<f64>,
    pub heat_norm: Option<f64>,
    pub cold_norm: Option<f64>,
    pub row_stress: Option<f64>,
}

impl VehicleMinute {
    pub fn from_observation(o: VehicleObservation) -> Self {
        Self {
            vehicle_id: o.vehicle_id,
            trip_id: o.trip_id,
            route_id: o.route_id,
            direction_id: o.direction_id,
            start_date: o.start_date,
            timestamp: o.timestamp,
            lat: o.lat,
            lon: o.lon,
            speed_kph: o.speed_kph,
            ..Default::default()
        }
    }

    /// `(vehicle_id, trip_id)` pair identifying one vehicle working one trip.
    pub fn trip_key(&self) -> Option<(&str, &str)> {
        self.trip_id
            .as_deref()
            .map(|trip| (self.vehicle_id.as_str(), trip))
    }
}

/// Free-flow speed of one route direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeFlow {
    pub route_id: String,
    pub direction_id: Option<u32>,
    pub free_kph: f64,
}
