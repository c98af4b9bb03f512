//! Top-N ranking of closed windows
//!
//! Order is count descending, ties broken by ascending light id, so equal
//! counts always rank the same way.

use crate::domain::types::{LightId, RankedLight, WindowReport, WindowSnapshot};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

#[inline]
fn by_rank(a: &RankedLight, b: &RankedLight) -> Ordering {
    b.count.cmp(&a.count).then_with(|| a.light_id.cmp(&b.light_id))
}

/// Rank `entries` and keep the best `min(n, entries.len())`
pub fn rank(entries: &FxHashMap<LightId, u64>, n: usize) -> Vec<RankedLight> {
    let mut ranked: Vec<RankedLight> =
        entries.iter().map(|(light, count)| RankedLight::new(*light, *count)).collect();

    let keep = n.min(ranked.len());
    if keep == 0 {
        return Vec::new();
    }

    // Partition the best `keep` to the front, then order only that prefix
    if keep < ranked.len() {
        ranked.select_nth_unstable_by(keep - 1, by_rank);
        ranked.truncate(keep);
    }
    ranked.sort_unstable_by(by_rank);
    ranked
}

/// Turn a closed-window snapshot into a ranked report
pub fn rank_snapshot(snapshot: &WindowSnapshot, n: usize) -> WindowReport {
    WindowReport {
        key: snapshot.key,
        closed_at: snapshot.closed_at,
        events: snapshot.events,
        is_final: snapshot.is_final,
        top: rank(&snapshot.entries, n),
    }
}
