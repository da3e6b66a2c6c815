//! The winged-edge topology: arenas of points, edges and triangles plus the
//! convex hull sequence.
//!
//! [`Topology`] is plain data. It lives inside [`Mesh`](crate::core::mesh::Mesh)
//! behind a reader/writer lock; every method here assumes the caller already
//! holds the appropriate side of that lock.
//!
//! # Navigation
//!
//! The fan of a point is recovered by following `next` links from the point's
//! `line` edge. Whenever a rewiring changes which edges meet at a point, the
//! fan is rebuilt from scratch by sorting the incident edges by their integer
//! bearing ([`Topology::set_fan`]), so fans are always exactly
//! counter-clockwise.

use std::sync::Arc;

use crate::core::collections::{
    fast_hash_map_with_capacity, EdgeFan, FastHashMap, PointBuffer, TriangleBuffer,
};
use crate::core::edge::Edge;
use crate::core::handles::{EdgeId, PointId, TriangleId};
use crate::core::point::Point;
use crate::core::triangle::{Triangle, TriangleGeometry};
use crate::core::validation::TopologyError;
use crate::geometry::angle::{bearing, Angle};
use crate::geometry::point::{Xy, Xyz};
use crate::geometry::predicates::{segment_intersection, SegmentIntersection};

/// Signed area, relative to the square of the longest side, at or below
/// which a triangle built from raw input counts as flat.
const SLIVER_AREA: f64 = 64.0 * f64::EPSILON;

/// The quadrilateral formed by an interior edge and its two triangles.
///
/// `a → b` is the edge; `c` is the apex of the `left` triangle and `d` the
/// apex of the `right` one, so `a, d, b, c` runs counter-clockwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quad {
    /// The shared edge.
    pub edge: EdgeId,
    /// Edge start.
    pub a: PointId,
    /// Edge end.
    pub b: PointId,
    /// Apex of the left triangle.
    pub c: PointId,
    /// Apex of the right triangle.
    pub d: PointId,
    /// Triangle on the left of `a → b`.
    pub left: TriangleId,
    /// Triangle on the right of `a → b`.
    pub right: TriangleId,
}

/// Arenas and hull of one mesh.
#[derive(Debug, Default)]
pub struct Topology {
    pub(crate) points: Vec<Point>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) triangles: Vec<Triangle>,
    pub(crate) hull: Vec<PointId>,
}

impl Topology {
    // =========================================================================
    // CONSTRUCTION
    // =========================================================================

    /// Builds a topology from point positions and counter-clockwise corner
    /// triples.
    ///
    /// Edges, fans, side pointers and neighbors are derived. If `hull` is
    /// `None` it is traced from the boundary edges, counter-clockwise.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] if a corner index is out of range, a
    /// triangle is clockwise or flat at its own scale, an edge would have two triangles on the same
    /// side, or the hull cannot be traced.
    pub fn from_triangles(
        positions: Vec<Xyz>,
        corners: &[[usize; 3]],
        hull: Option<Vec<PointId>>,
    ) -> Result<Self, TopologyError> {
        let mut topo = Self {
            points: positions.into_iter().map(Point::new).collect(),
            edges: Vec::with_capacity(corners.len() * 3 / 2 + 3),
            triangles: Vec::with_capacity(corners.len()),
            hull: Vec::new(),
        };
        let mut by_ends: FastHashMap<(PointId, PointId), EdgeId> =
            fast_hash_map_with_capacity(corners.len() * 2);
        let mut fans: Vec<EdgeFan> = vec![EdgeFan::new(); topo.points.len()];

        for (index, triple) in corners.iter().enumerate() {
            for &c in triple {
                if c >= topo.points.len() {
                    return Err(TopologyError::CornerOutOfRange { triangle: index, corner: c });
                }
            }
            let ids = triple.map(PointId::new);
            if ids[0] == ids[1] || ids[1] == ids[2] || ids[2] == ids[0] {
                return Err(TopologyError::RepeatedCorner { triangle: TriangleId::new(index) });
            }
            let t = topo.add_triangle(ids);
            for i in 0..3 {
                let (u, v) = (ids[i], ids[(i + 1) % 3]);
                let key = if u < v { (u, v) } else { (v, u) };
                if !by_ends.contains_key(&key) {
                    let e = topo.add_edge(u, v);
                    by_ends.insert(key, e);
                    fans[u.index()].push(e);
                    fans[v.index()].push(e);
                }
            }
            let g = topo.geometry(t);
            let area = g.area();
            if area < 0.0 {
                return Err(TopologyError::NegativeArea { triangle: t, area });
            }
            let [a, b, c] = g.corners.map(Xyz::xy);
            let longest = a.dist(b).max(b.dist(c)).max(c.dist(a));
            if area <= SLIVER_AREA * longest * longest {
                return Err(TopologyError::ZeroArea { triangle: t, area });
            }
        }

        for (index, fan) in fans.into_iter().enumerate() {
            if !fan.is_empty() {
                topo.set_fan(PointId::new(index), &fan);
            }
        }
        for index in 0..topo.triangles.len() {
            topo.link_triangle_checked(TriangleId::new(index))?;
        }
        for index in 0..topo.triangles.len() {
            let t = TriangleId::new(index);
            topo.refresh_neighbors(t);
            topo.refresh_geometry(t);
        }
        topo.hull = match hull {
            Some(hull) => hull,
            None => topo.trace_hull()?,
        };
        Ok(topo)
    }

    /// Follows boundary edges counter-clockwise, starting at the lowest-indexed
    /// hull point.
    fn trace_hull(&self) -> Result<Vec<PointId>, TopologyError> {
        let mut successor: FastHashMap<PointId, PointId> = FastHashMap::default();
        for edge in &self.edges {
            match (edge.right, edge.left) {
                (None, Some(_)) => {
                    successor.insert(edge.a, edge.b);
                }
                (Some(_), None) => {
                    successor.insert(edge.b, edge.a);
                }
                _ => {}
            }
        }
        let Some(&start) = successor.keys().min() else {
            return Ok(Vec::new());
        };
        let mut hull = vec![start];
        let mut at = start;
        loop {
            let next = *successor
                .get(&at)
                .ok_or(TopologyError::BrokenHull { position: hull.len() })?;
            if next == start {
                break;
            }
            if hull.len() > successor.len() {
                return Err(TopologyError::BrokenHull { position: hull.len() });
            }
            hull.push(next);
            at = next;
        }
        Ok(hull)
    }

    pub(crate) fn add_point(&mut self, coords: Xyz) -> PointId {
        let id = PointId::new(self.points.len());
        self.points.push(Point::new(coords));
        id
    }

    pub(crate) fn add_edge(&mut self, a: PointId, b: PointId) -> EdgeId {
        let id = EdgeId::new(self.edges.len());
        self.edges.push(Edge::new(id, a, b));
        id
    }

    pub(crate) fn add_triangle(&mut self, corners: [PointId; 3]) -> TriangleId {
        let id = TriangleId::new(self.triangles.len());
        self.triangles.push(Triangle::new(corners));
        id
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Number of points.
    #[must_use]
    pub fn number_of_points(&self) -> usize {
        self.points.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn number_of_edges(&self) -> usize {
        self.edges.len()
    }

    /// Number of triangles.
    #[must_use]
    pub fn number_of_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Point by handle.
    #[must_use]
    pub fn point(&self, p: PointId) -> Option<&Point> {
        self.points.get(p.index())
    }

    /// Edge by handle.
    #[must_use]
    pub fn edge(&self, e: EdgeId) -> Option<&Edge> {
        self.edges.get(e.index())
    }

    /// Triangle by handle.
    #[must_use]
    pub fn triangle(&self, t: TriangleId) -> Option<&Triangle> {
        self.triangles.get(t.index())
    }

    /// All points in handle order.
    pub fn points(&self) -> impl ExactSizeIterator<Item = (PointId, &Point)> {
        self.points.iter().enumerate().map(|(i, p)| (PointId::new(i), p))
    }

    /// All edges in handle order.
    pub fn edges(&self) -> impl ExactSizeIterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().enumerate().map(|(i, e)| (EdgeId::new(i), e))
    }

    /// All triangles in handle order.
    pub fn triangles(&self) -> impl ExactSizeIterator<Item = (TriangleId, &Triangle)> {
        self.triangles.iter().enumerate().map(|(i, t)| (TriangleId::new(i), t))
    }

    /// Convex hull, counter-clockwise.
    #[must_use]
    pub fn hull(&self) -> &[PointId] {
        &self.hull
    }

    /// Total dots over all triangles.
    #[must_use]
    pub fn dot_count(&self) -> usize {
        self.triangles.iter().map(|t| t.dots.len()).sum()
    }

    #[inline]
    pub(crate) fn xyz(&self, p: PointId) -> Xyz {
        self.points[p.index()].coords
    }

    #[inline]
    pub(crate) fn xy(&self, p: PointId) -> Xy {
        self.points[p.index()].coords.xy()
    }

    pub(crate) fn set_elevation(&mut self, p: PointId, z: f64) {
        self.points[p.index()].coords.z = z;
    }

    /// Corner positions of `t`.
    ///
    /// # Panics
    ///
    /// Panics if `t` is not a handle of this topology.
    #[must_use]
    pub fn geometry(&self, t: TriangleId) -> TriangleGeometry {
        let tri = &self.triangles[t.index()];
        TriangleGeometry::new(tri.corners.map(|c| self.xyz(c)))
    }

    /// Worst residual of `t`'s dots, computed on demand and cached.
    #[must_use]
    pub fn triangle_error(&self, t: TriangleId) -> f64 {
        let tri = &self.triangles[t.index()];
        if let Some(error) = tri.cached_error() {
            return error;
        }
        let error = self.geometry(t).worst_residual(&tri.dots);
        tri.store_error(error);
        error
    }

    /// Elevation of `t`'s facet at `p`.
    #[must_use]
    pub fn elevation_in(&self, t: TriangleId, p: Xy) -> f64 {
        self.geometry(t).elevation(p)
    }

    /// Gradient of `t`'s facet.
    #[must_use]
    pub fn gradient_of(&self, t: TriangleId) -> Xy {
        let tri = &self.triangles[t.index()];
        tri.gradient(tri.corners.map(|c| self.xyz(c).z))
    }

    // =========================================================================
    // NAVIGATION
    // =========================================================================

    /// Edges around `p`, counter-clockwise starting from its `line`.
    ///
    /// Stops early if the `next` cycle is broken, so the result may be short on
    /// a corrupted topology but the call never loops forever.
    #[must_use]
    pub fn fan(&self, p: PointId) -> EdgeFan {
        let mut fan = EdgeFan::new();
        let Some(start) = self.points.get(p.index()).and_then(|pt| pt.line) else {
            return fan;
        };
        let mut at = start;
        loop {
            fan.push(at);
            match self.edges[at.index()].next(p) {
                Some(next) if next != start && fan.len() <= self.edges.len() => at = next,
                _ => break,
            }
        }
        fan
    }

    /// The edge joining `p` and `q`, if any.
    #[must_use]
    pub fn edge_between(&self, p: PointId, q: PointId) -> Option<EdgeId> {
        self.fan(p)
            .into_iter()
            .find(|&e| self.edges[e.index()].other_end(p) == Some(q))
    }

    /// Points joined to `p` by an edge.
    #[must_use]
    pub fn neighbor_points(&self, p: PointId) -> PointBuffer {
        self.fan(p)
            .into_iter()
            .filter_map(|e| self.edges[e.index()].other_end(p))
            .collect()
    }

    /// Triangles with `p` as a corner.
    #[must_use]
    pub fn triangles_around(&self, p: PointId) -> TriangleBuffer {
        let mut out = TriangleBuffer::new();
        for e in self.fan(p) {
            for t in self.edges[e.index()].triangles() {
                if !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        out
    }

    /// Union of [`triangles_around`](Self::triangles_around) over `points`.
    #[must_use]
    pub fn neighborhood(&self, points: &[PointId]) -> TriangleBuffer {
        let mut out = TriangleBuffer::new();
        for &p in points {
            for t in self.triangles_around(p) {
                if !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        out
    }

    /// Edge along the side of `t` opposite corner `i`.
    #[must_use]
    pub fn side(&self, t: TriangleId, i: usize) -> Option<EdgeId> {
        let c = self.triangles[t.index()].corners;
        self.edge_between(c[(i + 1) % 3], c[(i + 2) % 3])
    }

    /// The quadrilateral around an interior edge.
    ///
    /// # Errors
    ///
    /// [`TopologyError::NotInterior`] for a hull edge, or a mismatch error if
    /// the adjacent triangles do not contain the edge.
    pub fn quad(&self, e: EdgeId) -> Result<Quad, TopologyError> {
        let edge = &self.edges[e.index()];
        let (Some(left), Some(right)) = (edge.left, edge.right) else {
            return Err(TopologyError::NotInterior { edge: e });
        };
        let apex = |t: TriangleId| {
            let tri = &self.triangles[t.index()];
            let has_both = tri.corner_index(edge.a).is_some() && tri.corner_index(edge.b).is_some();
            has_both
                .then(|| tri.corners.into_iter().find(|&c| c != edge.a && c != edge.b))
                .flatten()
                .ok_or(TopologyError::EdgeTriangleMismatch { edge: e, triangle: t })
        };
        Ok(Quad {
            edge: e,
            a: edge.a,
            b: edge.b,
            c: apex(left)?,
            d: apex(right)?,
            left,
            right,
        })
    }

    /// True if `e` is interior and its quadrilateral is strictly convex.
    #[must_use]
    pub fn is_flippable(&self, e: EdgeId) -> bool {
        self.quad(e).is_ok_and(|q| {
            segment_intersection(self.xy(q.a), self.xy(q.b), self.xy(q.c), self.xy(q.d))
                == SegmentIntersection::Crossing
        })
    }

    /// The hull point before `p`, counter-clockwise, and the one after it.
    #[must_use]
    pub fn hull_neighbors(&self, p: PointId) -> Option<(PointId, PointId)> {
        let n = self.hull.len();
        let i = self.hull.iter().position(|&h| h == p)?;
        Some((self.hull[(i + n - 1) % n], self.hull[(i + 1) % n]))
    }

    /// Bearing of edge `e` leaving `from`.
    #[must_use]
    pub fn edge_bearing(&self, e: EdgeId, from: PointId) -> Angle {
        let edge = &self.edges[e.index()];
        let to = edge.other_end(from).unwrap_or(edge.b);
        bearing(self.xy(from), self.xy(to))
    }

    // =========================================================================
    // REWIRING PRIMITIVES
    // =========================================================================

    /// Makes `edges` the fan of `p`, ordered counter-clockwise by bearing.
    pub(crate) fn set_fan(&mut self, p: PointId, edges: &[EdgeId]) {
        let mut sorted: EdgeFan = edges.iter().copied().collect();
        sorted.sort_by_key(|&e| (self.edge_bearing(e, p), e));
        let n = sorted.len();
        for i in 0..n {
            let next = sorted[(i + 1) % n];
            self.edges[sorted[i].index()].set_next(p, next);
        }
        self.points[p.index()].line = sorted.first().copied();
    }

    /// Points each side edge of `t` back at `t` on the correct side.
    pub(crate) fn link_triangle(&mut self, t: TriangleId) {
        let corners = self.triangles[t.index()].corners;
        for i in 0..3 {
            let (u, v) = (corners[i], corners[(i + 1) % 3]);
            if let Some(e) = self.edge_between(u, v) {
                let edge = &mut self.edges[e.index()];
                if edge.a == u {
                    edge.left = Some(t);
                } else {
                    edge.right = Some(t);
                }
            }
        }
    }

    fn link_triangle_checked(&mut self, t: TriangleId) -> Result<(), TopologyError> {
        let corners = self.triangles[t.index()].corners;
        for i in 0..3 {
            let (u, v) = (corners[i], corners[(i + 1) % 3]);
            let e = self
                .edge_between(u, v)
                .ok_or(TopologyError::MissingEdge { from: u, to: v })?;
            let edge = &mut self.edges[e.index()];
            let slot = if edge.a == u { &mut edge.left } else { &mut edge.right };
            if slot.is_some() {
                return Err(TopologyError::NonManifoldEdge { from: u, to: v });
            }
            *slot = Some(t);
        }
        Ok(())
    }

    /// Recomputes `t`'s neighbors from its side edges and points each
    /// neighbor back at `t`.
    pub(crate) fn refresh_neighbors(&mut self, t: TriangleId) {
        for i in 0..3 {
            let corners = self.triangles[t.index()].corners;
            let (u, v) = (corners[(i + 1) % 3], corners[(i + 2) % 3]);
            let across = self
                .edge_between(u, v)
                .and_then(|e| self.edges[e.index()].other_triangle(t));
            self.triangles[t.index()].neighbors[i] = across;
            if let Some(o) = across {
                let other = &mut self.triangles[o.index()];
                if let Some(j) = other.corners.iter().position(|&c| c != u && c != v) {
                    other.neighbors[j] = Some(t);
                }
            }
        }
    }

    /// Recomputes the cached geometry of `t` from its corners.
    pub(crate) fn refresh_geometry(&mut self, t: TriangleId) {
        let xy = self.triangles[t.index()].corners.map(|c| self.xy(c));
        self.triangles[t.index()].flatten(xy);
    }

    /// Replaces the dots of `t`.
    pub(crate) fn install_dots(&mut self, t: TriangleId, dots: Arc<Vec<Xyz>>) {
        let tri = &mut self.triangles[t.index()];
        tri.dots = dots;
        tri.invalidate_error();
    }
}
