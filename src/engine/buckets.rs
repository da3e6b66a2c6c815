//! Incremental coverage tracking.
//!
//! Triangles are spread over a power-of-two number of buckets by handle.
//! Each bucket caches the total area of its triangles, the part of it that
//! is within the stage tolerance, and the part that is within tolerance or
//! too small to subdivide. A mutation marks its triangle's bucket dirty; the
//! controller re-adds only dirty buckets.
//!
//! A bucket counts as clean after it has been re-added twice in a row
//! without being marked dirty in between: the first sum may have raced with
//! a mutation in progress.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::core::handles::TriangleId;
use crate::core::topology::Topology;
use crate::geometry::sum::pairwise_sum;

/// Clean-counter value of a bucket that is fully up to date.
const CLEAN: u8 = 2;

/// Consecutive over-budget refreshes that trigger doubling.
const OVER_BUDGET_LIMIT: u32 = 3;

/// Most buckets ever allocated.
const MAX_BUCKETS: usize = 1 << 16;

#[derive(Clone, Copy, Debug, Default)]
struct Sums {
    total: f64,
    done: f64,
    done_or_small: f64,
}

#[derive(Debug)]
struct Bucket {
    clean: AtomicU8,
    sums: Mutex<Sums>,
}

impl Bucket {
    fn dirty() -> Self {
        Self {
            clean: AtomicU8::new(0),
            sums: Mutex::new(Sums::default()),
        }
    }
}

/// Coverage estimate after a refresh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coverage {
    /// Fraction of the area within the stage tolerance.
    pub done: f64,
    /// Fraction within tolerance or below the minimum subdividable area.
    pub done_or_small: f64,
    /// True if no bucket changed since it was last summed twice.
    pub all_clean: bool,
    /// Buckets re-added in this refresh.
    pub refreshed: usize,
}

/// The bucket array.
#[derive(Debug)]
pub struct CoverageBuckets {
    buckets: RwLock<Vec<Bucket>>,
    budget: Duration,
    over_budget: Mutex<u32>,
}

impl CoverageBuckets {
    /// `initial` buckets, rounded up to a power of two, with a time budget
    /// for each refresh.
    #[must_use]
    pub fn new(initial: usize, budget: Duration) -> Self {
        let count = initial.clamp(1, MAX_BUCKETS).next_power_of_two();
        Self {
            buckets: RwLock::new((0..count).map(|_| Bucket::dirty()).collect()),
            budget,
            over_budget: Mutex::new(0),
        }
    }

    /// Current number of buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    /// Always false; there is at least one bucket.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Marks the bucket of `t` dirty.
    pub fn mark_dirty(&self, t: TriangleId) {
        let buckets = self.buckets.read();
        let mask = buckets.len() - 1;
        buckets[t.index() & mask].clean.store(0, Ordering::Release);
    }

    /// Marks every bucket dirty.
    pub fn mark_all_dirty(&self) {
        for bucket in self.buckets.read().iter() {
            bucket.clean.store(0, Ordering::Release);
        }
    }

    /// True if every bucket is clean.
    #[must_use]
    pub fn all_clean(&self) -> bool {
        self.buckets
            .read()
            .iter()
            .all(|b| b.clean.load(Ordering::Acquire) >= CLEAN)
    }

    /// Re-adds every bucket that is not clean and returns the coverage.
    ///
    /// Takes the mesh read lock for the duration. If refreshes keep running
    /// over budget the bucket count doubles, so each dirty bucket covers
    /// fewer triangles.
    pub fn refresh(&self, topo: &Topology, tolerance: f64, min_area: f64) -> Coverage {
        let started = Instant::now();
        let buckets = self.buckets.read();
        let count = buckets.len();
        let mut refreshed = 0;
        for (b, bucket) in buckets.iter().enumerate() {
            let state = bucket.clean.load(Ordering::Acquire);
            if state >= CLEAN {
                continue;
            }
            // A concurrent mark_dirty resets the counter; losing that race
            // just means this bucket is summed again next time.
            let _ = bucket
                .clean
                .compare_exchange(state, state + 1, Ordering::AcqRel, Ordering::Acquire);
            *bucket.sums.lock() = sum_bucket(topo, b, count, tolerance, min_area);
            refreshed += 1;
        }
        let (mut total, mut done, mut small) = (Vec::new(), Vec::new(), Vec::new());
        for bucket in buckets.iter() {
            let sums = *bucket.sums.lock();
            total.push(sums.total);
            done.push(sums.done);
            small.push(sums.done_or_small);
        }
        let all_clean = buckets.iter().all(|b| b.clean.load(Ordering::Acquire) >= CLEAN);
        drop(buckets);

        let total = pairwise_sum(&total);
        let ratio = |part: &[f64]| {
            if total > 0.0 {
                (pairwise_sum(part) / total).clamp(0.0, 1.0)
            } else {
                1.0
            }
        };
        let coverage = Coverage {
            done: ratio(&done),
            done_or_small: ratio(&small),
            all_clean,
            refreshed,
        };
        self.account(started.elapsed(), refreshed);
        coverage
    }

    fn account(&self, elapsed: Duration, refreshed: usize) {
        let mut strikes = self.over_budget.lock();
        if elapsed <= self.budget || refreshed == 0 {
            *strikes = 0;
            return;
        }
        *strikes += 1;
        if *strikes < OVER_BUDGET_LIMIT {
            return;
        }
        *strikes = 0;
        drop(strikes);
        let mut buckets = self.buckets.write();
        let count = buckets.len();
        if count >= MAX_BUCKETS {
            return;
        }
        *buckets = (0..count * 2).map(|_| Bucket::dirty()).collect();
        tracing::debug!(buckets = count * 2, ?elapsed, "coverage buckets doubled");
    }
}

fn sum_bucket(topo: &Topology, bucket: usize, count: usize, tolerance: f64, min_area: f64) -> Sums {
    let (mut total, mut done, mut small) = (Vec::new(), Vec::new(), Vec::new());
    for index in (bucket..topo.number_of_triangles()).step_by(count) {
        let t = TriangleId::new(index);
        let Some(tri) = topo.triangle(t) else { continue };
        let area = tri.area();
        total.push(area);
        let within = topo.triangle_error(t) <= tolerance;
        if within {
            done.push(area);
        }
        if within || area < min_area {
            small.push(area);
        }
    }
    Sums {
        total: pairwise_sum(&total),
        done: pairwise_sum(&done),
        done_or_small: pairwise_sum(&small),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Xyz;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// Unit square; triangle 0 has a dot 1 above its plane.
    fn square() -> Topology {
        let mut topo = Topology::from_triangles(
            vec![
                Xyz::new(0.0, 0.0, 0.0),
                Xyz::new(1.0, 0.0, 0.0),
                Xyz::new(1.0, 1.0, 0.0),
                Xyz::new(0.0, 1.0, 0.0),
            ],
            &[[0, 1, 2], [0, 2, 3]],
            None,
        )
        .unwrap();
        topo.install_dots(TriangleId::new(0), Arc::new(vec![Xyz::new(0.7, 0.2, 1.0)]));
        topo
    }

    #[test]
    fn rounds_to_a_power_of_two() {
        let buckets = CoverageBuckets::new(5, Duration::from_secs(1));
        assert_eq!(buckets.len(), 8);
        assert!(!buckets.all_clean());
    }

    #[test]
    fn clean_after_two_refreshes() {
        let topo = square();
        let buckets = CoverageBuckets::new(2, Duration::from_secs(1));
        let first = buckets.refresh(&topo, 0.5, 0.0);
        assert!(!first.all_clean);
        assert_eq!(first.refreshed, 2);
        assert_relative_eq!(first.done, 0.5);
        let second = buckets.refresh(&topo, 0.5, 0.0);
        assert!(second.all_clean);
        let third = buckets.refresh(&topo, 0.5, 0.0);
        assert_eq!(third.refreshed, 0);

        buckets.mark_dirty(TriangleId::new(3));
        assert!(!buckets.all_clean());
        let after = buckets.refresh(&topo, 2.0, 0.0);
        assert_eq!(after.refreshed, 1);
        // Bucket 0 keeps its sum from the tighter tolerance until it is
        // marked dirty.
        assert_relative_eq!(after.done, 0.5);
        buckets.mark_dirty(TriangleId::new(0));
        assert_relative_eq!(buckets.refresh(&topo, 2.0, 0.0).done, 1.0);
    }

    #[test]
    fn small_triangles_count_separately() {
        let topo = square();
        let buckets = CoverageBuckets::new(1, Duration::from_secs(1));
        let coverage = buckets.refresh(&topo, 0.5, 1.0);
        assert_relative_eq!(coverage.done, 0.5);
        assert_relative_eq!(coverage.done_or_small, 1.0);
    }

    #[test]
    fn repeated_overruns_double_the_buckets() {
        let topo = square();
        let buckets = CoverageBuckets::new(2, Duration::ZERO);
        for _ in 0..OVER_BUDGET_LIMIT {
            buckets.mark_all_dirty();
            let _ = buckets.refresh(&topo, 1.0, 0.0);
        }
        assert_eq!(buckets.len(), 4);
    }
}
