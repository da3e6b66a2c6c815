//! Structural invariants of the topology.
//!
//! [`Topology::validate`] walks the whole mesh and returns the first broken
//! invariant it finds. The refinement operators never call it; they only use
//! [`topology_fault`] when a local inconsistency turns up mid-transaction.

use crate::core::handles::{EdgeId, PointId, TriangleId};
use crate::core::topology::Topology;
use crate::geometry::angle::FULL_TURN;
use thiserror::Error;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// A broken structural invariant.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TopologyError {
    /// A corner index does not name a point.
    #[error("triangle {triangle} references point {corner}, which does not exist")]
    CornerOutOfRange {
        /// Position of the triangle in the input.
        triangle: usize,
        /// The offending index.
        corner: usize,
    },

    /// A triangle uses the same point twice.
    #[error("triangle {triangle} repeats a corner")]
    RepeatedCorner {
        /// The triangle.
        triangle: TriangleId,
    },

    /// A triangle is wound clockwise.
    #[error("triangle {triangle} has negative area {area}")]
    NegativeArea {
        /// The triangle.
        triangle: TriangleId,
        /// Its signed area.
        area: f64,
    },

    /// A triangle's area vanishes at the scale of its sides.
    #[error("triangle {triangle} is flat (area {area})")]
    ZeroArea {
        /// The triangle.
        triangle: TriangleId,
        /// Its signed area.
        area: f64,
    },

    /// Two points that should be joined are not.
    #[error("no edge joins {from} and {to}")]
    MissingEdge {
        /// First point.
        from: PointId,
        /// Second point.
        to: PointId,
    },

    /// More than one triangle claims the same side of an edge.
    #[error("edge {from}–{to} has two triangles on one side")]
    NonManifoldEdge {
        /// First point.
        from: PointId,
        /// Second point.
        to: PointId,
    },

    /// An edge names a triangle that does not contain it.
    #[error("edge {edge} and triangle {triangle} disagree")]
    EdgeTriangleMismatch {
        /// The edge.
        edge: EdgeId,
        /// The triangle.
        triangle: TriangleId,
    },

    /// A triangle's neighbor pointer is not reciprocated or does not match
    /// its side edge.
    #[error("triangle {triangle} side {side} has an inconsistent neighbor")]
    NeighborMismatch {
        /// The triangle.
        triangle: TriangleId,
        /// Corner index of the side.
        side: usize,
    },

    /// The `next` links around a point leave the point or never close.
    #[error("the edge fan around {point} is broken")]
    BrokenFan {
        /// The point.
        point: PointId,
    },

    /// The bearing deltas around a point do not add to one full turn.
    #[error("edges around {point} turn through {total} instead of one full turn")]
    BearingSum {
        /// The point.
        point: PointId,
        /// Sum of counter-clockwise deltas, in binary angle units.
        total: i64,
    },

    /// An operation needing two triangles was given a hull edge.
    #[error("edge {edge} is on the hull")]
    NotInterior {
        /// The edge.
        edge: EdgeId,
    },

    /// An operation needing a hull edge was given an interior one.
    #[error("edge {edge} is not on the hull")]
    NotHull {
        /// The edge.
        edge: EdgeId,
    },

    /// A flip was asked for on a non-convex quadrilateral.
    #[error("edge {edge} is not the diagonal of a convex quadrilateral")]
    NotConvex {
        /// The edge.
        edge: EdgeId,
    },

    /// A quarter was asked for on a triangle lacking a neighbor.
    #[error("triangle {triangle} has no neighbor across side {side}")]
    MissingNeighbor {
        /// The triangle.
        triangle: TriangleId,
        /// Corner index of the side.
        side: usize,
    },

    /// The hull sequence is not a closed chain of boundary edges.
    #[error("hull is broken at position {position}")]
    BrokenHull {
        /// Index into the hull sequence.
        position: usize,
    },
}

/// Reports a topology inconsistency found while transacting.
///
/// In debug builds this panics, since it means a bug in the rewiring code. In
/// release builds it logs the error and the caller skips the operation.
///
/// # Panics
///
/// Panics in debug builds, unless `TINFIT_LENIENT_TOPOLOGY` is set.
#[track_caller]
pub fn topology_fault(err: &TopologyError) {
    if cfg!(debug_assertions) && std::env::var_os("TINFIT_LENIENT_TOPOLOGY").is_none() {
        panic!("topology fault: {err}");
    }
    tracing::error!(%err, "topology fault; operation skipped");
}

impl Topology {
    /// Checks every structural invariant.
    ///
    /// - every triangle has non-negative area;
    /// - every edge's triangles contain it, wound the right way;
    /// - the fan around every wired point visits all its edges and closes
    ///   after exactly one full turn;
    /// - neighbor pointers agree with side edges and are mutual;
    /// - consecutive hull points are joined by boundary edges with the mesh
    ///   on their left, and no other edge is a boundary edge.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for (t, _) in self.triangles() {
            let area = self.geometry(t).area();
            if area < 0.0 {
                return Err(TopologyError::NegativeArea { triangle: t, area });
            }
        }

        for (e, edge) in self.edges() {
            for (t, on_left) in [(edge.left, true), (edge.right, false)] {
                let Some(t) = t else { continue };
                let corners = self
                    .triangle(t)
                    .ok_or(TopologyError::EdgeTriangleMismatch { edge: e, triangle: t })?
                    .corners();
                let (from, to) = if on_left { (edge.a, edge.b) } else { (edge.b, edge.a) };
                let wound = (0..3).any(|i| corners[i] == from && corners[(i + 1) % 3] == to);
                if !wound {
                    return Err(TopologyError::EdgeTriangleMismatch { edge: e, triangle: t });
                }
            }
        }

        let mut degree = vec![0_usize; self.points.len()];
        for (_, edge) in self.edges() {
            degree[edge.a.index()] += 1;
            degree[edge.b.index()] += 1;
        }
        for (p, point) in self.points() {
            let Some(start) = point.line() else { continue };
            let mut total = 0_i64;
            let mut at = start;
            let mut steps = 0;
            loop {
                let edge = self.edge(at).ok_or(TopologyError::BrokenFan { point: p })?;
                let next = edge.next(p).ok_or(TopologyError::BrokenFan { point: p })?;
                total += self
                    .edge_bearing(at, p)
                    .ccw_delta(self.edge_bearing(next, p));
                steps += 1;
                if next == start {
                    break;
                }
                if steps > self.edges.len() {
                    return Err(TopologyError::BrokenFan { point: p });
                }
                at = next;
            }
            if steps != degree[p.index()] {
                return Err(TopologyError::BrokenFan { point: p });
            }
            if total != FULL_TURN {
                return Err(TopologyError::BearingSum { point: p, total });
            }
        }

        for (t, tri) in self.triangles() {
            for side in 0..3 {
                let c = tri.corners();
                let (u, v) = (c[(side + 1) % 3], c[(side + 2) % 3]);
                let e = self
                    .edge_between(u, v)
                    .ok_or(TopologyError::MissingEdge { from: u, to: v })?;
                let across = self.edges[e.index()].other_triangle(t);
                let mismatch = TopologyError::NeighborMismatch { triangle: t, side };
                if across != tri.neighbors()[side] {
                    return Err(mismatch);
                }
                if let Some(o) = across {
                    let back = self.triangle(o).ok_or_else(|| mismatch.clone())?;
                    if back.neighbor_index(t).is_none() {
                        return Err(mismatch);
                    }
                }
            }
        }

        let n = self.hull.len();
        for i in 0..n {
            let (u, v) = (self.hull[i], self.hull[(i + 1) % n]);
            let e = self
                .edge_between(u, v)
                .ok_or(TopologyError::BrokenHull { position: i })?;
            let edge = &self.edges[e.index()];
            // Counter-clockwise hull: the mesh is on the left of u → v.
            let inside = if edge.a == u { edge.left } else { edge.right };
            if edge.is_interior() || inside.is_none() {
                return Err(TopologyError::BrokenHull { position: i });
            }
        }
        let boundary = self.edges.iter().filter(|e| !e.is_interior()).count();
        if boundary != n {
            return Err(TopologyError::BrokenHull { position: n });
        }
        Ok(())
    }
}
