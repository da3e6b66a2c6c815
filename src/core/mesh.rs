//! The shared mesh: a [`Topology`] behind one reader/writer lock, plus the
//! published spatial index.
//!
//! # Locking
//!
//! The write lock is taken only while a transaction rewires pointers,
//! installs redistributed dots, or moves elevations, and never while waiting
//! for anything else. Long computations (dot partitioning, normal-equation
//! assembly) run on snapshots taken under the read lock. Triangle ownership
//! for the length of a transaction is a separate concern, handled by
//! [`LockTable`](crate::concurrency::locks::LockTable).
//!
//! Lock order is always mesh lock first, holder buckets second.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::core::handles::TriangleId;
use crate::core::quadtree::QuadIndex;
use crate::core::topology::Topology;
use crate::geometry::point::{Xy, Xyz};

/// Read-only view of one triangle for collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriangleView {
    /// Counter-clockwise corner indices into [`MeshSnapshot::points`].
    pub corners: [usize; 3],
    /// Number of dots the triangle owns.
    pub dot_count: usize,
}

/// Consistent copy of the mesh, taken under one read lock.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshSnapshot {
    /// Point positions, indexed by point handle.
    pub points: Vec<Xyz>,
    /// Triangles, indexed by triangle handle.
    pub triangles: Vec<TriangleView>,
    /// Hull point indices, counter-clockwise.
    pub hull: Vec<usize>,
}

/// The mesh shared by all workers.
#[derive(Debug)]
pub struct Mesh {
    topology: RwLock<Topology>,
    index: ArcSwap<QuadIndex>,
    generation: AtomicU64,
}

impl Mesh {
    /// Wraps a topology and builds its spatial index.
    #[must_use]
    pub fn new(topology: Topology) -> Self {
        let index = QuadIndex::build(&topology, 0);
        Self {
            topology: RwLock::new(topology),
            index: ArcSwap::from_pointee(index),
            generation: AtomicU64::new(0),
        }
    }

    /// Shared access to the topology.
    pub fn read(&self) -> RwLockReadGuard<'_, Topology> {
        self.topology.read()
    }

    /// Exclusive access to the topology. Counts as one generation of change.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Topology> {
        let guard = self.topology.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        guard
    }

    /// Number of write-lock acquisitions so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Consumes the mesh, returning its topology.
    #[must_use]
    pub fn into_topology(self) -> Topology {
        self.topology.into_inner()
    }

    // =========================================================================
    // SPATIAL INDEX
    // =========================================================================

    /// The currently published index.
    #[must_use]
    pub fn index(&self) -> Arc<QuadIndex> {
        self.index.load_full()
    }

    /// Rebuilds the index from the current topology and publishes it,
    /// unless the published one is already current.
    pub fn rebuild_index(&self) {
        let topo = self.read();
        let generation = self.generation();
        if self.index.load().generation() == generation {
            return;
        }
        let index = QuadIndex::build(&topo, generation);
        drop(topo);
        tracing::debug!(generation, squares = index.size(), "quad index rebuilt");
        self.index.store(Arc::new(index));
    }

    /// Triangle containing `p`, or `None` outside the hull.
    #[must_use]
    pub fn triangle_at(&self, p: Xy) -> Option<TriangleId> {
        let index = self.index.load();
        index.find_triangle(&self.read(), p)
    }

    /// Surface elevation at `p`, or `None` outside the hull.
    #[must_use]
    pub fn elevation_at(&self, p: Xy) -> Option<f64> {
        let index = self.index.load();
        let topo = self.read();
        let t = index.find_triangle(&topo, p)?;
        Some(topo.elevation_in(t, p))
    }

    /// Surface gradient at `p`, or `None` outside the hull.
    #[must_use]
    pub fn gradient_at(&self, p: Xy) -> Option<Xy> {
        let index = self.index.load();
        let topo = self.read();
        let t = index.find_triangle(&topo, p)?;
        Some(topo.gradient_of(t))
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Copies points, triangles and hull under one read lock.
    #[must_use]
    pub fn snapshot(&self) -> MeshSnapshot {
        let topo = self.read();
        MeshSnapshot {
            points: topo.points().map(|(_, p)| p.coords()).collect(),
            triangles: topo
                .triangles()
                .map(|(_, t)| TriangleView {
                    corners: t.corners().map(|c| c.index()),
                    dot_count: t.dots().len(),
                })
                .collect(),
            hull: topo.hull().iter().map(|p| p.index()).collect(),
        }
    }

    /// Worst residual over all triangles.
    #[must_use]
    pub fn worst_residual(&self) -> f64 {
        let topo = self.read();
        topo.triangles()
            .map(|(t, _)| topo.triangle_error(t))
            .fold(0.0, f64::max)
    }
}
