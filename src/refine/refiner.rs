//! State shared by every worker: the mesh, the holder table, the task queue,
//! the adjustment log, coverage buckets and the current stage.
//!
//! A transaction on the [`Refiner`] follows one shape:
//!
//! 1. under the mesh read lock, claim the triangles the decision reads
//!    (the *narrow* set) and decide whether to act;
//! 2. still under the read lock, claim every triangle around the points the
//!    change will move (the *wide* set); on contention, give up;
//! 3. partition dots without any lock;
//! 4. under the write lock, rewire, install the partition and adopt the new
//!    triangles;
//! 5. re-fit the moved points by least squares, then release everything.
//!
//! Nothing is mutated until both claims succeed, so an abandoned attempt
//! leaves no trace.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::concurrency::locks::{LockOutcome, LockTable};
use crate::concurrency::tasks::TaskPool;
use crate::core::bootstrap::ClipLimits;
use crate::core::handles::{PointId, TriangleId};
use crate::core::mesh::Mesh;
use crate::core::operations::Rewire;
use crate::core::topology::Topology;
use crate::engine::buckets::CoverageBuckets;
use crate::geometry::angle::Angle;
use crate::refine::log::AdjustmentLog;

/// Buckets per thread used for coverage tracking at start.
const COVERAGE_BUCKETS_PER_THREAD: usize = 16;

/// Time a coverage refresh may take before it counts as over budget.
const COVERAGE_BUDGET: Duration = Duration::from_millis(20);

/// Lock-grid cells per typical dot spacing.
const CELL_SPACINGS: f64 = 8.0;

// =============================================================================
// PARAMETERS
// =============================================================================

/// Tunables of the refinement operators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefineParams {
    /// Weight of the least-squares fit improvement in the flip decision.
    pub fit_weight: f64,
    /// Weight of the circumcircle measure in the flip decision.
    pub circle_weight: f64,
    /// No operator creates a triangle with a smaller interior angle.
    pub min_angle_degrees: f64,
    /// Larger values let triangles get smaller before subdivision stops.
    pub densify: f64,
    /// A touch-up counts as a change only if some point moved more than this
    /// fraction of the stage tolerance.
    pub touch_up_fraction: f64,
    /// Times a wide claim is re-validated before it counts as contention.
    pub lock_rounds: usize,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            fit_weight: 1.0,
            circle_weight: 1.0,
            min_angle_degrees: 0.5,
            densify: 1.0,
            touch_up_fraction: 1e-3,
            lock_rounds: 3,
        }
    }
}

impl RefineParams {
    /// [`min_angle_degrees`](Self::min_angle_degrees) as an [`Angle`].
    #[must_use]
    pub fn min_angle(&self) -> Angle {
        Angle::from_degrees(self.min_angle_degrees)
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// What an operator did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Rotated an interior edge.
    Flip,
    /// Grew the hull by one point.
    Bend,
    /// Inserted a centroid.
    Split,
    /// Inserted three midpoints.
    Quarter,
    /// Re-fitted the corners of a triangle too small to subdivide.
    TouchUp,
}

/// Result of one operator call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum OpOutcome {
    /// The mesh changed.
    Changed(Action),
    /// Nothing needed doing.
    Unchanged,
    /// Another worker holds something the operation needs; try later.
    Contended,
}

impl OpOutcome {
    /// True for [`OpOutcome::Changed`].
    #[must_use]
    pub const fn is_changed(self) -> bool {
        matches!(self, Self::Changed(_))
    }

    /// True for [`OpOutcome::Contended`].
    #[must_use]
    pub const fn is_contended(self) -> bool {
        matches!(self, Self::Contended)
    }
}

// =============================================================================
// REFINER
// =============================================================================

/// Shared refinement state.
#[derive(Debug)]
pub struct Refiner {
    pub(crate) mesh: Arc<Mesh>,
    pub(crate) locks: LockTable,
    pub(crate) tasks: TaskPool,
    pub(crate) log: AdjustmentLog,
    pub(crate) buckets: CoverageBuckets,
    pub(crate) params: RefineParams,
    pub(crate) clip: ClipLimits,
    tolerance: f64,
    stage: AtomicU64,
    min_area: AtomicU64,
}

impl Refiner {
    /// Shared state for `threads` workers refining `mesh` toward
    /// `tolerance`.
    ///
    /// The stage starts at `tolerance` with no minimum area; the engine sets
    /// the real first stage once the bootstrap points are adjusted.
    #[must_use]
    pub fn new(
        mesh: Arc<Mesh>,
        threads: usize,
        buckets_per_thread: usize,
        params: RefineParams,
        clip: ClipLimits,
        tolerance: f64,
    ) -> Self {
        let (dots, cell) = {
            let topo = mesh.read();
            let area: f64 = topo.triangles().map(|(_, t)| t.area()).sum();
            let dots = topo.dot_count();
            let spacing = (area / dots.max(1) as f64).sqrt();
            (dots, spacing * CELL_SPACINGS)
        };
        Self {
            locks: LockTable::new(threads, buckets_per_thread, cell),
            tasks: TaskPool::new(),
            log: AdjustmentLog::new(dots),
            buckets: CoverageBuckets::new(threads * COVERAGE_BUCKETS_PER_THREAD, COVERAGE_BUDGET),
            mesh,
            params,
            clip,
            tolerance,
            stage: AtomicU64::new(tolerance.to_bits()),
            min_area: AtomicU64::new(0.0_f64.to_bits()),
        }
    }

    /// The mesh being refined.
    #[must_use]
    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    /// The holder table.
    #[must_use]
    pub const fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// The block task queue.
    #[must_use]
    pub const fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    /// The adjustment log.
    #[must_use]
    pub const fn log(&self) -> &AdjustmentLog {
        &self.log
    }

    /// Coverage buckets.
    #[must_use]
    pub const fn buckets(&self) -> &CoverageBuckets {
        &self.buckets
    }

    /// Operator tunables.
    #[must_use]
    pub const fn params(&self) -> &RefineParams {
        &self.params
    }

    /// Elevation limits.
    #[must_use]
    pub const fn clip(&self) -> ClipLimits {
        self.clip
    }

    /// Target tolerance of the run.
    #[must_use]
    pub const fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Tolerance of the current stage.
    #[must_use]
    pub fn stage_tolerance(&self) -> f64 {
        f64::from_bits(self.stage.load(Ordering::Acquire))
    }

    /// Smallest triangle area still subdivided in this stage.
    #[must_use]
    pub fn min_area(&self) -> f64 {
        f64::from_bits(self.min_area.load(Ordering::Acquire))
    }

    /// Area below which triangles are touched up instead of subdivided.
    ///
    /// Equals [`Refiner::min_area`] in coarse stages. Once the stage has
    /// reached the target, nothing is too small to subdivide, so every
    /// triangle can still be brought within tolerance.
    #[must_use]
    pub fn subdivision_floor(&self) -> f64 {
        if self.stage_tolerance() > self.tolerance {
            self.min_area()
        } else {
            0.0
        }
    }

    /// Moves to a new stage. Every coverage bucket becomes dirty, since
    /// in-tolerance areas depend on the tolerance.
    pub fn set_stage(&self, tolerance: f64, min_area: f64) {
        self.stage.store(tolerance.to_bits(), Ordering::Release);
        self.min_area.store(min_area.to_bits(), Ordering::Release);
        self.buckets.mark_all_dirty();
    }

    // =========================================================================
    // TRANSACTION HELPERS
    // =========================================================================

    /// Claims every triangle around `points` for `thread`.
    ///
    /// After a claim succeeds the neighborhood is recomputed; if it grew, the
    /// new triangles are claimed too. Gives up as contended after
    /// `lock_rounds` rounds without a stable neighborhood.
    pub(crate) fn lock_neighborhood(
        &self,
        thread: usize,
        topo: &Topology,
        points: &[PointId],
    ) -> LockOutcome {
        let mut wanted = topo.neighborhood(points);
        for _ in 0..self.params.lock_rounds.max(1) {
            if !self.locks.lock(thread, topo, &wanted).is_locked() {
                return LockOutcome::Contended;
            }
            let current = topo.neighborhood(points);
            if self.locks.holds_all(thread, &current) {
                return LockOutcome::Locked;
            }
            wanted = current;
        }
        LockOutcome::Contended
    }

    /// Marks the buckets of `triangles` dirty.
    pub(crate) fn touch(&self, triangles: impl IntoIterator<Item = TriangleId>) {
        for t in triangles {
            self.buckets.mark_dirty(t);
        }
    }

    /// Bookkeeping after a rewiring: dirty buckets, then re-fit the points
    /// whose surroundings changed.
    pub(crate) fn settle(&self, rewire: &Rewire) {
        self.touch(rewire.triangles());
        self.touch(rewire.new_triangles.iter().copied());
        let _ = self.adjust(&rewire.points);
    }
}

/// A refiner over `topo` with default parameters, a ±100 clip band and a
/// 0.01 target, for unit tests.
#[cfg(test)]
pub(crate) fn refiner_for(topo: Topology, threads: usize) -> Refiner {
    Refiner::new(
        Arc::new(Mesh::new(topo)),
        threads,
        33,
        RefineParams::default(),
        ClipLimits { lo: -100.0, hi: 100.0 },
        0.01,
    )
}
