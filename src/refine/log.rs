//! Bounded log of elevation adjustments.
//!
//! Every adjustment appends the mean square of its point movements. The
//! orchestration loop reads [`AdjustmentLog::recent_rms`] as a convergence
//! signal: while the mesh is still settling, recent adjustments are large.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::geometry::sum::pairwise_sum;

/// Entries kept beyond the size-dependent part of the bound.
const BASE_CAPACITY: usize = 1024;

/// Outcome of one least-squares adjustment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdjustRecord {
    /// False if any unknown had no usable pivot and fell back to its
    /// neighbors' mean.
    pub valid_matrix: bool,
    /// Mean of the squared elevation changes actually applied.
    pub ms_adjustment: f64,
    /// Largest absolute elevation change applied.
    pub max_movement: f64,
}

impl AdjustRecord {
    /// Record of an adjustment that moved nothing.
    #[must_use]
    pub const fn unmoved() -> Self {
        Self {
            valid_matrix: true,
            ms_adjustment: 0.0,
            max_movement: 0.0,
        }
    }
}

/// Ring of recent mean-square adjustments behind a reader/writer lock.
///
/// The log is compacted, dropping its older half, whenever it grows past
/// `2.5·√scale + 1024` entries, where `scale` is the cloud size given at
/// construction.
#[derive(Debug)]
pub struct AdjustmentLog {
    entries: RwLock<Vec<f64>>,
    bound: usize,
}

impl AdjustmentLog {
    /// An empty log sized for a cloud of `scale` dots.
    #[must_use]
    pub fn new(scale: usize) -> Self {
        let bound = (2.5 * (scale as f64).sqrt()) as usize + BASE_CAPACITY;
        Self {
            entries: RwLock::new(Vec::with_capacity(bound)),
            bound,
        }
    }

    /// Entries after which the log is compacted.
    #[must_use]
    pub const fn bound(&self) -> usize {
        self.bound
    }

    /// Appends one record.
    pub fn append(&self, record: AdjustRecord) {
        let mut entries = self.entries.write();
        entries.push(record.ms_adjustment);
        if entries.len() > self.bound {
            let half = entries.len() / 2;
            entries.drain(..half);
        }
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing has been logged since the last clear.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forgets every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Root mean square of the last `round(√len)` finite entries, or `None`
    /// if there are none.
    #[must_use]
    pub fn recent_rms(&self) -> Option<f64> {
        let entries = self.entries.read();
        let wanted = (entries.len() as f64).sqrt().round() as usize;
        let recent: Vec<f64> = entries
            .iter()
            .rev()
            .copied()
            .filter(|x| x.is_finite())
            .take(wanted)
            .collect();
        drop(entries);
        if recent.is_empty() {
            return None;
        }
        Some((pairwise_sum(&recent) / recent.len() as f64).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(ms: f64) -> AdjustRecord {
        AdjustRecord {
            valid_matrix: true,
            ms_adjustment: ms,
            max_movement: ms.sqrt(),
        }
    }

    #[test]
    fn rms_uses_the_most_recent_square_root_of_entries() {
        let log = AdjustmentLog::new(0);
        assert!(log.recent_rms().is_none());
        for _ in 0..12 {
            log.append(record(100.0));
        }
        for _ in 0..4 {
            log.append(record(4.0));
        }
        // √16 = 4 most recent entries.
        assert_relative_eq!(log.recent_rms().unwrap(), 2.0);
    }

    #[test]
    fn non_finite_entries_are_skipped() {
        let log = AdjustmentLog::new(0);
        log.append(record(9.0));
        log.append(record(f64::NAN));
        log.append(record(f64::INFINITY));
        log.append(record(1.0));
        assert_relative_eq!(log.recent_rms().unwrap(), (5.0_f64).sqrt());
    }

    #[test]
    fn compaction_drops_the_older_half() {
        let log = AdjustmentLog::new(10_000);
        assert_eq!(log.bound(), 250 + 1024);
        for i in 0..=log.bound() {
            log.append(record(f64::from(i as u32)));
        }
        assert_eq!(log.len(), (log.bound() + 1) - (log.bound() + 1) / 2);
        log.clear();
        assert!(log.is_empty());
    }
}
