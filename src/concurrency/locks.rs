//! Triangle ownership for multi-step transactions.
//!
//! The holder table records, per triangle, which worker currently owns it.
//! Claims are all-or-nothing: [`LockTable::lock`] either takes every
//! requested triangle or none of them, and contention is an ordinary outcome
//! rather than an error.
//!
//! Requests are serialized per region by a fixed array of bucket mutexes:
//! each triangle corner is quantized onto a grid and hashed to a bucket, and
//! a request locks the union of its buckets in ascending order, so two
//! requests touching the same triangle always meet on a common mutex and
//! can never deadlock. The holder entries themselves are atomics; a claim
//! that loses a race is rolled back before the buckets are released.
//!
//! Callers hold the mesh read lock while locking, so corners cannot move
//! underneath the bucket computation. The mesh lock is always taken first.

use std::hash::BuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::core::handles::TriangleId;
use crate::core::topology::Topology;
use crate::geometry::point::Xy;

/// Holder entry of an unowned triangle.
const UNHELD: usize = usize::MAX;

/// Minimum bucket count regardless of thread count.
const MIN_BUCKETS: usize = 64;

/// Outcome of a lock request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum LockOutcome {
    /// Every requested triangle is now held by the caller.
    Locked,
    /// Some triangle is held by another worker; nothing was claimed.
    Contended,
}

impl LockOutcome {
    /// True for [`LockOutcome::Locked`].
    #[must_use]
    pub const fn is_locked(self) -> bool {
        matches!(self, Self::Locked)
    }
}

/// The holder table and its bucket mutexes.
#[derive(Debug)]
pub struct LockTable {
    buckets: Vec<Mutex<()>>,
    holders: RwLock<Vec<AtomicUsize>>,
    held: Vec<Mutex<Vec<TriangleId>>>,
    cell: f64,
}

impl LockTable {
    /// A table for `threads` workers with `buckets_per_thread` bucket
    /// mutexes each (at least 64 in all), quantizing corners onto a grid of
    /// `cell` units.
    #[must_use]
    pub fn new(threads: usize, buckets_per_thread: usize, cell: f64) -> Self {
        let count = (threads * buckets_per_thread).max(MIN_BUCKETS);
        Self {
            buckets: (0..count).map(|_| Mutex::new(())).collect(),
            holders: RwLock::new(Vec::new()),
            held: (0..threads.max(1)).map(|_| Mutex::new(Vec::new())).collect(),
            cell: if cell > 0.0 && cell.is_finite() { cell } else { 1.0 },
        }
    }

    /// Number of bucket mutexes.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of worker slots.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.held.len()
    }

    fn bucket_of(&self, p: Xy) -> usize {
        let key = ((p.x / self.cell).floor() as i64, (p.y / self.cell).floor() as i64);
        (FxBuildHasher.hash_one(key) % self.buckets.len() as u64) as usize
    }

    /// Grows the holder table to cover `triangles` entries.
    pub fn reserve(&self, triangles: usize) {
        if self.holders.read().len() >= triangles {
            return;
        }
        let mut holders = self.holders.write();
        while holders.len() < triangles {
            holders.push(AtomicUsize::new(UNHELD));
        }
    }

    /// Claims every triangle in `triangles` for `thread`, or nothing.
    ///
    /// Triangles the thread already holds count as available.
    pub fn lock(&self, thread: usize, topo: &Topology, triangles: &[TriangleId]) -> LockOutcome {
        if triangles.is_empty() {
            return LockOutcome::Locked;
        }
        self.reserve(topo.number_of_triangles());

        let mut buckets: SmallVec<[usize; 64]> = triangles
            .iter()
            .filter_map(|&t| topo.triangle(t))
            .flat_map(|tri| tri.corners())
            .filter_map(|c| topo.point(c))
            .map(|p| self.bucket_of(p.xy()))
            .collect();
        buckets.sort_unstable();
        buckets.dedup();
        let _guards: SmallVec<[_; 64]> = buckets.iter().map(|&b| self.buckets[b].lock()).collect();

        let holders = self.holders.read();
        let mut claimed: SmallVec<[TriangleId; 16]> = SmallVec::new();
        for &t in triangles {
            let Some(slot) = holders.get(t.index()) else {
                self.roll_back(&holders, thread, &claimed);
                return LockOutcome::Contended;
            };
            match slot.compare_exchange(UNHELD, thread, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => claimed.push(t),
                Err(current) if current == thread => {}
                Err(_) => {
                    self.roll_back(&holders, thread, &claimed);
                    return LockOutcome::Contended;
                }
            }
        }
        drop(holders);
        self.held[thread].lock().extend(claimed);
        LockOutcome::Locked
    }

    fn roll_back(&self, holders: &[AtomicUsize], thread: usize, claimed: &[TriangleId]) {
        for t in claimed {
            let _ = holders[t.index()].compare_exchange(
                thread,
                UNHELD,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Records triangles just created by `thread` as held by it.
    ///
    /// Called under the mesh write lock, before any other worker can see the
    /// new triangles.
    pub fn adopt(&self, thread: usize, triangles: &[TriangleId]) {
        if let Some(max) = triangles.iter().map(|t| t.index()).max() {
            self.reserve(max + 1);
        }
        let holders = self.holders.read();
        for t in triangles {
            holders[t.index()].store(thread, Ordering::Release);
        }
        drop(holders);
        self.held[thread].lock().extend_from_slice(triangles);
    }

    /// Releases every triangle `thread` holds.
    pub fn unlock(&self, thread: usize) {
        let released = std::mem::take(&mut *self.held[thread].lock());
        let holders = self.holders.read();
        for t in released {
            if let Some(slot) = holders.get(t.index()) {
                let _ = slot.compare_exchange(thread, UNHELD, Ordering::AcqRel, Ordering::Acquire);
            }
        }
    }

    /// Current holder of `t`.
    #[must_use]
    pub fn holder(&self, t: TriangleId) -> Option<usize> {
        let holders = self.holders.read();
        holders
            .get(t.index())
            .map(|h| h.load(Ordering::Acquire))
            .filter(|&h| h != UNHELD)
    }

    /// Triangles `thread` currently holds.
    #[must_use]
    pub fn held_by(&self, thread: usize) -> Vec<TriangleId> {
        self.held[thread].lock().clone()
    }

    /// True if `thread` holds every triangle in `triangles`.
    #[must_use]
    pub fn holds_all(&self, thread: usize, triangles: &[TriangleId]) -> bool {
        triangles.iter().all(|&t| self.holder(t) == Some(thread))
    }
}
