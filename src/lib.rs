//! # tinfit
//!
//! Concurrent adaptive refinement of a triangulated irregular network (TIN)
//! fitted to a point cloud.
//!
//! A cloud of 3-D samples ("dots") is wrapped in an octagon of six triangles.
//! A pool of worker threads then repeatedly visits edges and triangles,
//! flipping, bending, splitting and quartering wherever the mesh does not yet
//! fit the dots within a vertical tolerance, and re-fitting the elevations of
//! every point they touch by least squares. The tolerance is reached in
//! stages, each half the previous one.
//!
//! # Features
//!
//! - Winged-edge mesh over integer handles, growing monotonically
//! - Four structural operators (flip, bend, split, quarter), each an
//!   all-or-nothing transaction over a per-triangle holder table
//! - Block-decomposed normal-equation assembly on a shared task queue
//! - Incremental coverage tracking and stage control with livelock recovery
//! - Checkpoints with cheap integrity checksums, serializable with
//!   [serde](https://serde.rs)
//!
//! # Basic Usage
//!
//! ```rust
//! use tinfit::prelude::*;
//!
//! let cloud: Vec<Xyz> = (0..225)
//!     .map(|i| {
//!         let (x, y) = (f64::from(i % 15), f64::from(i / 15));
//!         Xyz::new(x, y, 0.3 * x + 0.1 * y)
//!     })
//!     .collect();
//! let config = EngineConfigBuilder::default()
//!     .tolerance(0.05)
//!     .threads(2_usize)
//!     .seed(3_u64)
//!     .build()
//!     .unwrap();
//!
//! let mut engine = Engine::new(&cloud, config).unwrap();
//! let report = engine.run().unwrap();
//! assert!(report.converged);
//!
//! let snapshot = engine.mesh().snapshot();
//! let dots: usize = snapshot.triangles.iter().map(|t| t.dot_count).sum();
//! assert_eq!(dots, 225);
//! assert!(engine.mesh().elevation_at(Xy::new(7.0, 7.0)).is_some());
//! ```
//!
//! # Mesh Invariants
//!
//! [`Topology::validate`](core::topology::Topology::validate) checks the
//! structural invariants every operator preserves:
//!
//! - **Orientation** – every triangle has non-negative signed area.
//! - **Edge incidence** – every interior edge has two triangles, wound
//!   consistently, with mutual neighbor pointers.
//! - **Fans** – the edges around every point turn exactly once.
//! - **Hull** – consecutive hull points are joined by boundary edges.
//!
//! Dots are conserved: every sample belongs to exactly one triangle, before
//! and after every operation.
//!
//! # Concurrency
//!
//! The mesh topology sits behind one reader/writer lock that is taken for
//! writing only while pointers are rewired. Ownership of triangles for the
//! length of a transaction is tracked separately in a holder table whose
//! updates are serialized by a spatial hash of lock buckets; see
//! [`concurrency::locks`]. A transaction that cannot claim everything it
//! needs releases what it holds and reports contention; nothing waits
//! indefinitely.

#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// The mesh model: handles, element records, topology, structural
/// operations, bootstrap, checkpoints and the spatial index.
pub mod core {
    /// Algorithms over the mesh
    pub mod algorithms {
        /// Point location by neighbor walking
        pub mod locate;
    }
    pub mod bootstrap;
    pub mod checkpoint;
    /// Collection aliases tuned for small, hot mesh buffers
    pub mod collections;
    pub mod edge;
    pub mod handles;
    pub mod mesh;
    pub mod operations;
    pub mod point;
    pub mod quadtree;
    pub mod topology;
    pub mod triangle;
    pub mod validation;
}

/// Numeric kernel: value types, angles, predicates, summation and linear
/// algebra.
pub mod geometry {
    pub mod angle;
    pub mod bounds;
    pub mod matrix;
    pub mod point;
    pub mod predicates;
    pub mod sum;
}

/// Holder table, block task queue and backoff policies.
pub mod concurrency {
    pub mod backoff;
    pub mod locks;
    pub mod tasks;
}

/// Refinement transactions and least-squares adjustment.
pub mod refine {
    pub mod adjust;
    pub mod edgeop;
    pub mod log;
    pub mod refiner;
    pub mod triop;
}

/// Worker pool, commands, coverage and stage control.
pub mod engine {
    pub mod buckets;
    pub mod command;
    pub mod config;
    pub mod controller;
    pub mod livelock;
    pub mod strides;
    pub mod worker;
}

/// A prelude module that re-exports commonly used types.
/// This makes it easier to import the most commonly used items from the crate.
pub mod prelude {
    pub use crate::core::bootstrap::{bootstrap, Bootstrap, BootstrapError, ClipLimits};
    pub use crate::core::checkpoint::{Checkpoint, CheckpointError};
    pub use crate::core::collections::{FastHashMap, FastHashSet, SmallBuffer};
    pub use crate::core::handles::{EdgeId, PointId, TriangleId};
    pub use crate::core::mesh::{Mesh, MeshSnapshot, TriangleView};
    pub use crate::core::topology::Topology;
    pub use crate::core::validation::TopologyError;

    pub use crate::geometry::angle::Angle;
    pub use crate::geometry::point::{Xy, Xyz};
    pub use crate::geometry::sum::{pairwise_mean, pairwise_sum};

    pub use crate::concurrency::backoff::{AdaptiveBackoff, BackoffPolicy, NoBackoff};
    pub use crate::concurrency::locks::{LockOutcome, LockTable};

    pub use crate::refine::log::{AdjustRecord, AdjustmentLog};
    pub use crate::refine::refiner::{Action, OpOutcome, RefineParams, Refiner};

    pub use crate::engine::command::{Control, Order, ThreadCommand, WorkerStatus};
    pub use crate::engine::config::{EngineConfig, EngineConfigBuilder, EngineConfigBuilderError};
    pub use crate::engine::controller::{
        Engine, EngineError, Progress, RefineReport, StageEvent,
    };
    pub use crate::engine::worker::ContourWorker;
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{
        core::{checkpoint::Checkpoint, mesh::Mesh, topology::Topology},
        engine::{buckets::CoverageBuckets, command::Control, controller::Progress},
        is_normal,
        refine::{log::AdjustmentLog, refiner::Refiner},
    };

    // =========================================================================
    // TYPE SAFETY TESTS
    // =========================================================================

    #[test]
    fn normal_types() {
        assert!(is_normal::<Topology>());
        assert!(is_normal::<Mesh>());
        assert!(is_normal::<Refiner>());
        assert!(is_normal::<AdjustmentLog>());
        assert!(is_normal::<CoverageBuckets>());
        assert!(is_normal::<Control>());
        assert!(is_normal::<Progress>());
        assert!(is_normal::<Checkpoint>());
    }

    #[test]
    fn prelude_exports() {
        use crate::prelude::*;

        let mut map: FastHashMap<PointId, usize> = FastHashMap::default();
        map.insert(PointId::new(3), 4);
        assert_eq!(map.get(&PointId::new(3)), Some(&4));

        let mut buffer: SmallBuffer<TriangleId, 4> = SmallBuffer::new();
        buffer.push(TriangleId::new(1));
        assert_eq!(buffer.len(), 1);

        assert_eq!(pairwise_sum(&[1.0, 2.0, 3.0]), 6.0);
        assert!(OpOutcome::Changed(Action::Flip).is_changed());
        assert_eq!(ThreadCommand::default(), ThreadCommand::Run);
    }
}
