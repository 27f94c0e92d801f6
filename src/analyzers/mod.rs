//! Daily and summary stress reports.
//!
//! This module aggregates a scored day into KPIs (stress distribution,
//! vanish rate, time-to-vanish, route leaderboards, corridor ranking) and
//! rebuilds the cross-day summary from the daily JSON files.

pub mod aggregate;
pub mod analyzer;
pub mod grade;
pub mod types;
pub mod utility;
