//! Shared types for the traffic monitor

use chrono::{NaiveTime, Timelike};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Newtype wrapper for traffic light IDs to provide type safety
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct LightId(pub u32);

impl std::fmt::Display for LightId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp format used by sensor records (no date component)
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// Parse an `HH:MM:SS` timestamp
pub fn parse_timestamp(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT).ok()
}

/// One sensor reading: vehicles counted at a light during one sampling interval
///
/// Events move producer -> queue -> consumer by value; nothing mutates one
/// after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Ingestion order, assigned by the source
    pub sequence: u64,
    /// Wall-clock reading time
    pub timestamp: NaiveTime,
    pub light_id: LightId,
    /// Vehicles observed in this reading
    pub count: u32,
}

impl Event {
    #[inline]
    pub fn new(sequence: u64, timestamp: NaiveTime, light_id: LightId, count: u32) -> Self {
        Self { sequence, timestamp, light_id, count }
    }

    /// Hour component of the timestamp (time-boundary window key)
    #[inline]
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }
}

/// Identifies a closed window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKey {
    /// Hour of day covered by a time-boundary window
    Hour(u32),
    /// Ordinal of a count-boundary window (starting at 1)
    Index(u64),
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowKey::Hour(h) => write!(f, "hour {:02}", h),
            WindowKey::Index(i) => write!(f, "window {}", i),
        }
    }
}

/// Table handed out by the aggregator when a window closes
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub key: WindowKey,
    /// Timestamp of the last event absorbed into the closed window
    pub closed_at: NaiveTime,
    /// Events absorbed into this window
    pub events: u64,
    /// Per-light value to rank (window totals or latest reading)
    pub entries: FxHashMap<LightId, u64>,
    /// Closed by the end-of-stream signal rather than a boundary crossing
    pub is_final: bool,
}

/// One row of a top-N ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankedLight {
    pub light_id: LightId,
    pub count: u64,
}

impl RankedLight {
    #[inline]
    pub fn new(light_id: LightId, count: u64) -> Self {
        Self { light_id, count }
    }
}

/// Ranked report for one closed window (the sink payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowReport {
    pub key: WindowKey,
    #[serde(serialize_with = "serialize_time")]
    pub closed_at: NaiveTime,
    pub events: u64,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub top: Vec<RankedLight>,
}

fn serialize_time<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&time.format(TIMESTAMP_FORMAT))
}
