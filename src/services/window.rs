//! Windowed aggregation of traffic readings
//!
//! The aggregator keeps per-light running totals and the latest reading per
//! light for the current window, and decides when that window closes:
//! - time boundary: the hour of the incoming reading differs from the hour of
//!   the previous one. The crossing reading opens the next window.
//! - count boundary: every `interval` absorbed readings.
//!
//! `absorb` runs add, status update, boundary check and reset under a single
//! lock, so with several consumers each boundary is observed by exactly one
//! caller and no update is lost. `absorb_with` also runs the closure callback
//! under that lock, which keeps downstream reports in closure order.

use crate::domain::error::ConfigError;
use crate::domain::types::{Event, LightId, WindowKey, WindowSnapshot};
use chrono::NaiveTime;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::num::NonZeroU64;
use tracing::debug;

/// Rule deciding when a window closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Close on hour rollover; reports summed counts per light
    TimeBoundary,
    /// Close every `interval` readings; reports the latest reading per light
    CountBoundary { interval: NonZeroU64 },
}

impl WindowPolicy {
    /// Count-boundary policy from a raw interval
    pub fn count(interval: u64) -> Result<Self, ConfigError> {
        NonZeroU64::new(interval)
            .map(|interval| WindowPolicy::CountBoundary { interval })
            .ok_or(ConfigError::ZeroWindowInterval)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowPolicy::TimeBoundary => "time-boundary",
            WindowPolicy::CountBoundary { .. } => "count-boundary",
        }
    }
}

#[derive(Default)]
struct WindowState {
    /// Summed counts since the last closure
    totals: FxHashMap<LightId, u64>,
    /// Most recent reading per light; persists across count-boundary windows
    last_status: FxHashMap<LightId, Event>,
    /// Hour of the previous reading (time boundary only)
    current_hour: Option<u32>,
    /// Readings absorbed since the last closure
    pending: u64,
    /// Timestamp of the newest reading in the open window
    last_timestamp: Option<NaiveTime>,
    /// Count-boundary windows closed so far
    windows_closed: u64,
    /// Readings absorbed over the whole run
    absorbed: u64,
    finished: bool,
}

/// Shared, lock-protected window state
pub struct WindowAggregator {
    policy: WindowPolicy,
    state: Mutex<WindowState>,
}

impl WindowAggregator {
    pub fn new(policy: WindowPolicy) -> Self {
        Self { policy, state: Mutex::new(WindowState::default()) }
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Absorb one reading; returns the closed window if a boundary was crossed
    pub fn absorb(&self, event: Event) -> Option<WindowSnapshot> {
        let mut state = self.state.lock();
        self.absorb_locked(&mut state, event)
    }

    /// Absorb one reading and hand any closed window to `on_close` before the
    /// lock is released, so closures are observed in the order they happen
    pub fn absorb_with<F>(&self, event: Event, on_close: F) -> bool
    where
        F: FnOnce(&WindowSnapshot),
    {
        let mut state = self.state.lock();
        match self.absorb_locked(&mut state, event) {
            Some(snapshot) => {
                on_close(&snapshot);
                true
            }
            None => false,
        }
    }

    fn absorb_locked(&self, state: &mut WindowState, event: Event) -> Option<WindowSnapshot> {
        state.absorbed += 1;

        match self.policy {
            WindowPolicy::TimeBoundary => {
                let hour = event.hour();
                let closed = match state.current_hour {
                    Some(previous) if previous != hour => {
                        Some(Self::close_time_window(state, previous, false))
                    }
                    _ => None,
                };
                state.current_hour = Some(hour);
                Self::record(state, event);
                closed
            }
            WindowPolicy::CountBoundary { interval } => {
                Self::record(state, event);
                if state.pending >= interval.get() {
                    Some(Self::close_count_window(state, false))
                } else {
                    None
                }
            }
        }
    }

    /// End-of-stream signal: close the trailing partial window, if any
    ///
    /// Only the first call can return a snapshot.
    pub fn finish(&self) -> Option<WindowSnapshot> {
        let mut state = self.state.lock();
        if state.finished {
            return None;
        }
        state.finished = true;

        if state.pending == 0 {
            debug!(absorbed = %state.absorbed, "window_finish_nothing_pending");
            return None;
        }

        let snapshot = match self.policy {
            WindowPolicy::TimeBoundary => {
                let hour = state.current_hour.unwrap_or_default();
                Self::close_time_window(&mut state, hour, true)
            }
            WindowPolicy::CountBoundary { .. } => Self::close_count_window(&mut state, true),
        };
        Some(snapshot)
    }

    /// Latest reading per light, ordered by light id
    pub fn last_status(&self) -> Vec<Event> {
        let state = self.state.lock();
        let mut status: Vec<Event> = state.last_status.values().cloned().collect();
        status.sort_unstable_by_key(|e| e.light_id);
        status
    }

    /// Running totals of the open window
    pub fn current_totals(&self) -> FxHashMap<LightId, u64> {
        self.state.lock().totals.clone()
    }

    /// Readings absorbed over the whole run
    pub fn absorbed(&self) -> u64 {
        self.state.lock().absorbed
    }

    fn record(state: &mut WindowState, event: Event) {
        *state.totals.entry(event.light_id).or_insert(0) += u64::from(event.count);
        state.pending += 1;
        state.last_timestamp = Some(event.timestamp);
        state.last_status.insert(event.light_id, event);
    }

    fn close_time_window(state: &mut WindowState, hour: u32, is_final: bool) -> WindowSnapshot {
        let snapshot = WindowSnapshot {
            key: WindowKey::Hour(hour),
            closed_at: state.last_timestamp.unwrap_or(NaiveTime::MIN),
            events: state.pending,
            entries: std::mem::take(&mut state.totals),
            is_final,
        };
        state.pending = 0;
        debug!(key = %snapshot.key, events = %snapshot.events, "window_closed");
        snapshot
    }

    fn close_count_window(state: &mut WindowState, is_final: bool) -> WindowSnapshot {
        state.windows_closed += 1;
        let entries = state
            .last_status
            .iter()
            .map(|(light, event)| (*light, u64::from(event.count)))
            .collect();
        let snapshot = WindowSnapshot {
            key: WindowKey::Index(state.windows_closed),
            closed_at: state.last_timestamp.unwrap_or(NaiveTime::MIN),
            events: state.pending,
            entries,
            is_final,
        };
        state.pending = 0;
        // Totals are not reported under this policy; keep them per-window anyway
        state.totals.clear();
        debug!(key = %snapshot.key, events = %snapshot.events, "window_closed");
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::parse_timestamp;
    use std::sync::Arc;
    use std::thread;

    fn event(seq: u64, ts: &str, light: u32, count: u32) -> Event {
        Event::new(seq, parse_timestamp(ts).unwrap(), LightId(light), count)
    }

    #[test]
    fn test_time_boundary_single_rollover() {
        let agg = WindowAggregator::new(WindowPolicy::TimeBoundary);

        assert!(agg.absorb(event(0, "09:58:00", 1, 5)).is_none());
        assert!(agg.absorb(event(1, "09:59:30", 2, 8)).is_none());
        let snapshot = agg.absorb(event(2, "10:00:05", 1, 100)).expect("hour rollover");

        assert_eq!(snapshot.key, WindowKey::Hour(9));
        assert_eq!(snapshot.closed_at, parse_timestamp("09:59:30").unwrap());
        assert_eq!(snapshot.events, 2);
        assert!(!snapshot.is_final);
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries[&LightId(1)], 5);
        assert_eq!(snapshot.entries[&LightId(2)], 8);

        // The crossing reading opened the next window
        let totals = agg.current_totals();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[&LightId(1)], 100);
    }

    #[test]
    fn test_first_event_does_not_close() {
        let agg = WindowAggregator::new(WindowPolicy::TimeBoundary);
        assert!(agg.absorb(event(0, "23:00:00", 3, 1)).is_none());
        assert!(agg.absorb(event(1, "23:59:59", 3, 1)).is_none());
        assert_eq!(agg.current_totals()[&LightId(3)], 2);
    }

    #[test]
    fn test_time_boundary_accumulates_per_light() {
        let agg = WindowAggregator::new(WindowPolicy::TimeBoundary);
        agg.absorb(event(0, "08:00:00", 1, 3));
        agg.absorb(event(1, "08:05:00", 1, 4));
        agg.absorb(event(2, "08:10:00", 2, 6));
        let snapshot = agg.absorb(event(3, "09:00:00", 2, 1)).unwrap();

        assert_eq!(snapshot.entries[&LightId(1)], 7);
        assert_eq!(snapshot.entries[&LightId(2)], 6);
    }

    #[test]
    fn test_time_boundary_finish_flushes_trailing_hour() {
        let agg = WindowAggregator::new(WindowPolicy::TimeBoundary);
        agg.absorb(event(0, "09:58:00", 1, 5));
        agg.absorb(event(1, "10:00:05", 2, 9));

        let last = agg.finish().expect("trailing window");
        assert_eq!(last.key, WindowKey::Hour(10));
        assert_eq!(last.events, 1);
        assert!(last.is_final);
        assert_eq!(last.entries[&LightId(2)], 9);

        assert!(agg.finish().is_none());
    }

    #[test]
    fn test_count_boundary_interval_three() {
        let agg = WindowAggregator::new(WindowPolicy::count(3).unwrap());
        let readings = [
            (1, 10),
            (2, 20),
            (3, 30),
            (1, 11),
            (2, 5),
            (3, 31),
            (1, 12),
        ];

        let mut closed_after = Vec::new();
        for (i, (light, count)) in readings.iter().enumerate() {
            if let Some(snapshot) = agg.absorb(event(i as u64, "12:00:00", *light, *count)) {
                closed_after.push((i + 1, snapshot));
            }
        }

        assert_eq!(closed_after.len(), 2);
        assert_eq!(closed_after[0].0, 3);
        assert_eq!(closed_after[1].0, 6);
        assert_eq!(closed_after[0].1.key, WindowKey::Index(1));
        assert_eq!(closed_after[1].1.key, WindowKey::Index(2));

        // Second window reports latest readings, not sums
        let second = &closed_after[1].1.entries;
        assert_eq!(second[&LightId(1)], 11);
        assert_eq!(second[&LightId(2)], 5);
        assert_eq!(second[&LightId(3)], 31);

        let last = agg.finish().expect("partial window closes at end of stream");
        assert_eq!(last.key, WindowKey::Index(3));
        assert_eq!(last.events, 1);
        assert!(last.is_final);
        // Status persists across windows
        assert_eq!(last.entries.len(), 3);
        assert_eq!(last.entries[&LightId(1)], 12);
        assert_eq!(last.entries[&LightId(3)], 31);
    }

    #[test]
    fn test_count_boundary_exact_multiple_has_no_final_window() {
        let agg = WindowAggregator::new(WindowPolicy::count(2).unwrap());
        assert!(agg.absorb(event(0, "12:00:00", 1, 1)).is_none());
        assert!(agg.absorb(event(1, "12:00:00", 2, 2)).is_some());
        assert!(agg.finish().is_none());
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert_eq!(WindowPolicy::count(0), Err(ConfigError::ZeroWindowInterval));
    }

    #[test]
    fn test_last_status_tracks_latest_reading() {
        let agg = WindowAggregator::new(WindowPolicy::TimeBoundary);
        agg.absorb(event(0, "07:00:00", 2, 4));
        agg.absorb(event(1, "07:00:00", 1, 9));
        agg.absorb(event(2, "07:05:00", 2, 6));

        let status = agg.last_status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].light_id, LightId(1));
        assert_eq!(status[1].sequence, 2);
        assert_eq!(status[1].count, 6);
    }

    #[test]
    fn test_concurrent_absorb_reports_each_boundary_once() {
        let agg = Arc::new(WindowAggregator::new(WindowPolicy::count(10).unwrap()));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let agg = agg.clone();
                thread::spawn(move || {
                    let mut closures = Vec::new();
                    for i in 0..250u64 {
                        let light = (i % 3) as u32 + 1;
                        if let Some(s) = agg.absorb(event(t * 1000 + i, "12:00:00", light, 1)) {
                            closures.push(s);
                        }
                    }
                    closures
                })
            })
            .collect();

        let closures: Vec<WindowSnapshot> =
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(closures.len(), 100);
        assert!(closures.iter().all(|s| s.events == 10));

        let mut keys: Vec<u64> = closures
            .iter()
            .map(|s| match s.key {
                WindowKey::Index(i) => i,
                WindowKey::Hour(_) => unreachable!(),
            })
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, (1..=100).collect::<Vec<_>>());
        assert_eq!(agg.absorbed(), 1000);
        assert!(agg.finish().is_none());
    }

    #[test]
    fn test_absorb_with_observes_closures_in_order() {
        let agg = Arc::new(WindowAggregator::new(WindowPolicy::count(5).unwrap()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let agg = agg.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    for i in 0..125u64 {
                        let light = (i % 3) as u32 + 1;
                        agg.absorb_with(event(t * 1000 + i, "12:00:00", light, 1), |s| {
                            seen.lock().push(s.key);
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let expected: Vec<WindowKey> = (1..=100).map(WindowKey::Index).collect();
        assert_eq!(*seen.lock(), expected);
    }
}
