//! Point location by walking across triangles.
//!
//! Starting from a hint triangle, the walk repeatedly crosses the side that
//! the query point is furthest outside of, until the point is inside the
//! current triangle or the walk steps off the hull. Expected cost is
//! O(√n) from an arbitrary start and O(1) from a nearby hint, which is what
//! the [`QuadIndex`](crate::core::quadtree::QuadIndex) supplies.
//!
//! # References
//!
//! - O. Devillers, S. Pion, and M. Teillaud, "Walking in a Triangulation",
//!   International Journal of Foundations of Computer Science, 2001.

use crate::core::handles::TriangleId;
use crate::core::topology::Topology;
use crate::geometry::point::Xy;
use crate::geometry::predicates::area3;

/// Result of a point location query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateResult {
    /// The point is inside or on the boundary of this triangle.
    Inside(TriangleId),
    /// The point is outside the hull; this is the last triangle visited,
    /// which lies on the hull facing the point.
    Outside(TriangleId),
}

impl LocateResult {
    /// The containing triangle, if any.
    #[must_use]
    pub const fn inside(self) -> Option<TriangleId> {
        match self {
            Self::Inside(t) => Some(t),
            Self::Outside(_) => None,
        }
    }

    /// The containing triangle, or the nearest hull triangle reached.
    #[must_use]
    pub const fn clipped(self) -> TriangleId {
        match self {
            Self::Inside(t) | Self::Outside(t) => t,
        }
    }
}

/// Error during point location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocateError {
    /// Topology has no triangles.
    #[error("cannot locate in an empty topology")]
    EmptyTopology,

    /// Hint does not name a triangle.
    #[error("invalid starting triangle {triangle}")]
    InvalidStart {
        /// The bad hint.
        triangle: TriangleId,
    },

    /// Query coordinates are NaN or infinite.
    #[error("cannot locate a non-finite point")]
    NonFinitePoint,

    /// The walk revisited a triangle without making progress.
    #[error("walk cycled after {steps} steps")]
    CycleDetected {
        /// Steps taken before the cycle was noticed.
        steps: usize,
    },
}

/// Finds the triangle containing `p`, walking from `hint` (or triangle 0).
///
/// # Errors
///
/// See [`LocateError`]. A cycle can only happen on a corrupted topology or
/// with roundoff on nearly collinear corners.
pub fn locate(
    topo: &Topology,
    p: Xy,
    hint: Option<TriangleId>,
) -> Result<LocateResult, LocateError> {
    if topo.number_of_triangles() == 0 {
        return Err(LocateError::EmptyTopology);
    }
    if !p.is_finite() {
        return Err(LocateError::NonFinitePoint);
    }
    let start = hint.unwrap_or_default();
    if topo.triangle(start).is_none() {
        return Err(LocateError::InvalidStart { triangle: start });
    }

    let mut here = start;
    // Brent-style checkpoint: a cycle must pass the saved triangle again.
    let mut checkpoint = None;
    let limit = topo.number_of_triangles() + 1;
    for steps in 0..=limit {
        let tri = topo.triangle(here).ok_or(LocateError::InvalidStart { triangle: here })?;
        let [a, b, c] = tri.corners().map(|q| topo.xy(q));
        let outside = [area3(p, b, c), area3(a, p, c), area3(a, b, p)];
        if outside.iter().all(|&s| s >= 0.0) {
            return Ok(LocateResult::Inside(here));
        }
        let mut side = 0;
        for i in 1..3 {
            if outside[i] < outside[side] {
                side = i;
            }
        }
        match tri.neighbors()[side] {
            None => return Ok(LocateResult::Outside(here)),
            Some(next) => {
                if checkpoint == Some(next) {
                    return Err(LocateError::CycleDetected { steps });
                }
                if steps & (steps.wrapping_sub(1)) == 0 {
                    checkpoint = Some(here);
                }
                here = next;
            }
        }
    }
    Err(LocateError::CycleDetected { steps: limit })
}
