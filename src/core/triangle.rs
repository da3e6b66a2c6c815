//! Triangles, their cached geometry and the dots they own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::handles::{PointId, TriangleId};
use crate::geometry::angle::Angle;
use crate::geometry::point::{Xy, Xyz};
use crate::geometry::predicates::{area3, min_angle};
use crate::geometry::sum::pairwise_sum;

/// A mesh triangle.
///
/// Corners are counter-clockwise and `neighbors[i]` lies across the side
/// opposite `corners[i]`. Dots are shared copy-on-write: a transaction builds
/// the new vectors outside the mesh lock and only swaps the `Arc` in while
/// holding it.
#[derive(Debug)]
pub struct Triangle {
    pub(crate) corners: [PointId; 3],
    pub(crate) neighbors: [Option<TriangleId>; 3],
    pub(crate) area: f64,
    pub(crate) perimeter: f64,
    /// Maps corner elevations to the gradient: `grad = gradmat · z`.
    pub(crate) gradmat: [[f64; 3]; 2],
    /// Bit pattern of the cached worst residual; `NaN` when stale.
    error: AtomicU64,
    pub(crate) dots: Arc<Vec<Xyz>>,
}

impl Triangle {
    pub(crate) fn new(corners: [PointId; 3]) -> Self {
        Self {
            corners,
            neighbors: [None; 3],
            area: 0.0,
            perimeter: 0.0,
            gradmat: [[0.0; 3]; 2],
            error: AtomicU64::new(f64::NAN.to_bits()),
            dots: Arc::new(Vec::new()),
        }
    }

    /// Counter-clockwise corners.
    #[inline]
    #[must_use]
    pub const fn corners(&self) -> [PointId; 3] {
        self.corners
    }

    /// Neighbors, each opposite the corner with the same index.
    #[inline]
    #[must_use]
    pub const fn neighbors(&self) -> [Option<TriangleId>; 3] {
        self.neighbors
    }

    /// Cached area.
    #[inline]
    #[must_use]
    pub const fn area(&self) -> f64 {
        self.area
    }

    /// Cached perimeter.
    #[inline]
    #[must_use]
    pub const fn perimeter(&self) -> f64 {
        self.perimeter
    }

    /// Dots owned by this triangle.
    #[inline]
    #[must_use]
    pub fn dots(&self) -> &[Xyz] {
        &self.dots
    }

    /// Shared handle on the dots, for snapshotting outside the mesh lock.
    #[inline]
    #[must_use]
    pub fn dots_arc(&self) -> Arc<Vec<Xyz>> {
        Arc::clone(&self.dots)
    }

    /// Index of `p` among the corners.
    #[must_use]
    pub fn corner_index(&self, p: PointId) -> Option<usize> {
        self.corners.iter().position(|&c| c == p)
    }

    /// Index of the neighbor slot that holds `t`.
    #[must_use]
    pub fn neighbor_index(&self, t: TriangleId) -> Option<usize> {
        self.neighbors.iter().position(|&n| n == Some(t))
    }

    /// Cached worst residual, if it is current.
    #[must_use]
    pub fn cached_error(&self) -> Option<f64> {
        let value = f64::from_bits(self.error.load(Ordering::Acquire));
        (!value.is_nan()).then_some(value)
    }

    pub(crate) fn store_error(&self, error: f64) {
        self.error.store(error.to_bits(), Ordering::Release);
    }

    pub(crate) fn invalidate_error(&self) {
        self.error.store(f64::NAN.to_bits(), Ordering::Release);
    }

    /// Recomputes area, perimeter and gradient transform from the corners'
    /// horizontal positions, and marks the cached error stale.
    pub(crate) fn flatten(&mut self, corners: [Xy; 3]) {
        let [a, b, c] = corners;
        self.area = area3(a, b, c);
        self.perimeter = a.dist(b) + b.dist(c) + c.dist(a);
        let twice = 2.0 * self.area;
        if twice > 0.0 {
            for i in 0..3 {
                let p = corners[(i + 1) % 3];
                let q = corners[(i + 2) % 3];
                self.gradmat[0][i] = (p.y - q.y) / twice;
                self.gradmat[1][i] = (q.x - p.x) / twice;
            }
        } else {
            self.gradmat = [[0.0; 3]; 2];
        }
        self.invalidate_error();
    }

    /// Gradient of the facet for the given corner elevations.
    #[must_use]
    pub fn gradient(&self, z: [f64; 3]) -> Xy {
        let g = &self.gradmat;
        Xy::new(
            g[0][0] * z[0] + g[0][1] * z[1] + g[0][2] * z[2],
            g[1][0] * z[0] + g[1][1] * z[1] + g[1][2] * z[2],
        )
    }
}

/// Copyable snapshot of a triangle's corner positions.
///
/// Block tasks and operator decisions work on these so they never need the
/// mesh lock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleGeometry {
    /// Counter-clockwise corner positions.
    pub corners: [Xyz; 3],
}

impl TriangleGeometry {
    /// Wraps three corner positions.
    #[must_use]
    pub const fn new(corners: [Xyz; 3]) -> Self {
        Self { corners }
    }

    fn xy(&self) -> [Xy; 3] {
        self.corners.map(Xyz::xy)
    }

    /// Signed area.
    #[must_use]
    pub fn area(&self) -> f64 {
        let [a, b, c] = self.xy();
        area3(a, b, c)
    }

    /// Centroid, elevation included.
    #[must_use]
    pub fn centroid(&self) -> Xyz {
        let [a, b, c] = self.corners;
        (a + b + c) / 3.0
    }

    /// Barycentric coordinates of `p`, one per corner.
    ///
    /// All zero for a degenerate triangle.
    #[must_use]
    pub fn barycentric(&self, p: Xy) -> [f64; 3] {
        let [a, b, c] = self.xy();
        let total = area3(a, b, c);
        if total == 0.0 || !total.is_finite() {
            return [0.0; 3];
        }
        [
            area3(p, b, c) / total,
            area3(a, p, c) / total,
            area3(a, b, p) / total,
        ]
    }

    /// True if `p` is inside or on the boundary.
    #[must_use]
    pub fn contains(&self, p: Xy) -> bool {
        let [a, b, c] = self.xy();
        area3(a, b, p) >= 0.0 && area3(b, c, p) >= 0.0 && area3(c, a, p) >= 0.0
    }

    /// Elevation of the planar facet at `p`.
    #[must_use]
    pub fn elevation(&self, p: Xy) -> f64 {
        let w = self.barycentric(p);
        w[0] * self.corners[0].z + w[1] * self.corners[1].z + w[2] * self.corners[2].z
    }

    /// Smallest interior angle.
    #[must_use]
    pub fn min_angle(&self) -> Angle {
        let [a, b, c] = self.xy();
        min_angle(a, b, c)
    }

    /// Which midpoint-subdivision quadrant `p` falls in: `0` for the middle
    /// triangle, `1 + i` for the corner triangle at corner `i`.
    #[must_use]
    pub fn quadrant(&self, p: Xy) -> usize {
        let w = self.barycentric(p);
        w.iter().position(|&x| x > 0.5).map_or(0, |i| i + 1)
    }

    /// Largest absolute vertical distance from any dot to the facet.
    #[must_use]
    pub fn worst_residual(&self, dots: &[Xyz]) -> f64 {
        dots.iter()
            .map(|d| (d.z - self.elevation(d.xy())).abs())
            .fold(0.0, f64::max)
    }

    /// Sum of squared vertical residuals of `dots`.
    #[must_use]
    pub fn squared_residuals(&self, dots: &[Xyz]) -> f64 {
        let squares: Vec<f64> = dots
            .iter()
            .map(|d| (d.z - self.elevation(d.xy())).powi(2))
            .collect();
        pairwise_sum(&squares)
    }
}

/// Partitions dots among triangles that tile the region they came from.
///
/// Each dot goes to the first triangle containing it; a dot that roundoff
/// leaves outside all of them goes to the one it is least outside of, so the
/// total count is always conserved.
#[must_use]
pub fn partition_dots(dots: &[Xyz], parts: &[TriangleGeometry]) -> Vec<Vec<Xyz>> {
    let mut out: Vec<Vec<Xyz>> = vec![Vec::new(); parts.len()];
    if parts.is_empty() {
        return out;
    }
    for &dot in dots {
        let p = dot.xy();
        let slot = parts.iter().position(|g| g.contains(p)).unwrap_or_else(|| {
            let mut best = 0;
            let mut best_score = f64::NEG_INFINITY;
            for (i, g) in parts.iter().enumerate() {
                let score = g.barycentric(p).into_iter().fold(f64::INFINITY, f64::min);
                if score > best_score {
                    best = i;
                    best_score = score;
                }
            }
            best
        });
        out[slot].push(dot);
    }
    out
}
