//! Initial mesh: an octagon around the cloud, fanned into six triangles.
//!
//! The cloud is measured along eight directions 45° apart (two
//! [`BoundRect`]s, the second rotated 45° from the first). The orthogonal
//! supporting lines are pushed outward by `m = width / √n`, where `width` is
//! the larger orthogonal extent of the cloud, so no dot lies on the boundary.
//! The diagonal lines go `3m / (2√2)` out, which keeps the octagon strictly
//! convex even when the cloud fills the corners of its bounding square. The
//! octagon's corners are the intersections of consecutive lines, and
//! triangles `(0, i, i + 1)` for `i = 1..=6` tile it.
//!
//! Every point starts at the cloud's mean elevation; the caller is expected
//! to adjust all eight before refinement starts.
//!
//! # Examples
//!
//! ```rust
//! use tinfit::core::bootstrap::bootstrap;
//! use tinfit::geometry::angle::Angle;
//! use tinfit::geometry::point::Xyz;
//!
//! let cloud: Vec<Xyz> = (0..100)
//!     .map(|i| Xyz::new(f64::from(i % 10), f64::from(i / 10), 1.0))
//!     .collect();
//! let start = bootstrap(&cloud, Angle::ZERO).unwrap();
//! assert_eq!(start.topology.number_of_triangles(), 6);
//! assert_eq!(start.topology.dot_count(), 100);
//! ```

use std::f64::consts::SQRT_2;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::handles::{PointId, TriangleId};
use crate::core::topology::Topology;
use crate::core::triangle::partition_dots;
use crate::geometry::angle::{Angle, DEG45, DEG90};
use crate::geometry::bounds::BoundRect;
use crate::geometry::point::{Xy, Xyz};
use crate::geometry::predicates::bearing_intersection;
use crate::geometry::sum::pairwise_mean;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Why a cloud cannot be bootstrapped.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum BootstrapError {
    /// The cloud has no samples.
    #[error("the point cloud is empty")]
    EmptyCloud,

    /// A sample has a NaN or infinite coordinate.
    #[error("sample {index} has a non-finite coordinate")]
    NonFiniteSample {
        /// Position of the sample in the cloud.
        index: usize,
    },

    /// The cloud has zero extent in some direction: all samples coincide or
    /// lie on one line.
    #[error("the point cloud has no area")]
    NoArea,
}

/// Elevation band outside which no adjusted point may go.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipLimits {
    /// Lowest allowed elevation.
    pub lo: f64,
    /// Highest allowed elevation.
    pub hi: f64,
}

impl ClipLimits {
    /// The cloud's range widened by its own span on each side.
    #[must_use]
    pub fn around(lo: f64, hi: f64) -> Self {
        let span = hi - lo;
        Self { lo: lo - span, hi: hi + span }
    }

    /// Clamps `z` into the band.
    #[must_use]
    pub fn clamp(&self, z: f64) -> f64 {
        z.clamp(self.lo, self.hi)
    }
}

/// The bootstrapped mesh and the cloud statistics refinement needs.
#[derive(Debug)]
pub struct Bootstrap {
    /// Six triangles tiling the octagon, owning every dot.
    pub topology: Topology,
    /// Dots per unit area of the octagon.
    pub density: f64,
    /// Global elevation limits.
    pub clip: ClipLimits,
    /// Mean elevation of the cloud.
    pub mean_elevation: f64,
}

/// Builds the octagon mesh around `cloud`, with the octagon's first side
/// facing `orientation`.
///
/// # Errors
///
/// Returns [`BootstrapError`] for an empty cloud, a non-finite sample, or a
/// cloud without area.
pub fn bootstrap(cloud: &[Xyz], orientation: Angle) -> Result<Bootstrap, BootstrapError> {
    if cloud.is_empty() {
        return Err(BootstrapError::EmptyCloud);
    }
    if let Some(index) = cloud.iter().position(|d| !d.is_finite()) {
        return Err(BootstrapError::NonFiniteSample { index });
    }

    let mut orthogonal = BoundRect::new(orientation);
    let mut diagonal = BoundRect::new(orientation + Angle(DEG45));
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for dot in cloud {
        orthogonal.include(dot.xy());
        diagonal.include(dot.xy());
        lo = lo.min(dot.z);
        hi = hi.max(dot.z);
    }

    // Supporting line i faces orientation + i·45°.
    let mut reach: [f64; 8] = std::array::from_fn(|i| {
        let rect = if i % 2 == 0 { &orthogonal } else { &diagonal };
        rect.extent(i / 2)
    });
    let widths: [f64; 4] = std::array::from_fn(|i| reach[i] + reach[i + 4]);
    if widths.iter().any(|w| !(*w > 0.0 && w.is_finite())) {
        return Err(BootstrapError::NoArea);
    }
    // Diagonal lines sit between 1/√2 and √2 margins out: they cut every
    // corner of the orthogonal square and never swallow one of its sides.
    let margin = widths[0].max(widths[2]) / (cloud.len() as f64).sqrt();
    for (i, r) in reach.iter_mut().enumerate() {
        *r += if i % 2 == 0 { margin } else { 0.75 * SQRT_2 * margin };
    }

    let facing = |i: usize| orientation + Angle(DEG45.wrapping_mul(i as i32));
    let mut corners = Vec::with_capacity(8);
    for i in 0..8 {
        let j = (i + 1) % 8;
        let on_i = Xy::from_angle(facing(i)) * reach[i];
        let on_j = Xy::from_angle(facing(j)) * reach[j];
        let corner = bearing_intersection(
            on_i,
            facing(i) + Angle(DEG90),
            on_j,
            facing(j) + Angle(DEG90),
        )
        .ok_or(BootstrapError::NoArea)?;
        corners.push(corner);
    }

    let elevations: Vec<f64> = cloud.iter().map(|d| d.z).collect();
    let mean_elevation = pairwise_mean(&elevations).ok_or(BootstrapError::EmptyCloud)?;
    let fan: Vec<[usize; 3]> = (1..7).map(|i| [0, i, i + 1]).collect();
    let positions = corners.iter().map(|c| c.with_z(mean_elevation)).collect();
    let hull = (0..8).map(PointId::new).collect();
    let mut topology =
        Topology::from_triangles(positions, &fan, Some(hull)).map_err(|_| BootstrapError::NoArea)?;

    let parts: Vec<_> = (0..6).map(|i| topology.geometry(TriangleId::new(i))).collect();
    let area: f64 = parts.iter().map(|g| g.area()).sum();
    if area.is_nan() || area <= 0.0 || parts.iter().any(|g| g.area() <= 0.0) {
        return Err(BootstrapError::NoArea);
    }
    for (i, dots) in partition_dots(cloud, &parts).into_iter().enumerate() {
        topology.install_dots(TriangleId::new(i), Arc::new(dots));
    }
    tracing::debug!(
        samples = cloud.len(),
        area,
        orientation = orientation.degrees(),
        "octagon bootstrapped"
    );

    Ok(Bootstrap {
        topology,
        density: cloud.len() as f64 / area,
        clip: ClipLimits::around(lo, hi),
        mean_elevation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square_cloud() -> Vec<Xyz> {
        (0..400)
            .map(|i| {
                let (x, y) = (f64::from(i % 20), f64::from(i / 20));
                Xyz::new(x, y, 0.5 * x - 0.25 * y)
            })
            .collect()
    }

    #[test]
    fn octagon_encloses_the_cloud() {
        let cloud = square_cloud();
        for degrees in [0.0, 17.0, 45.0, 90.0, 200.0] {
            let start = bootstrap(&cloud, Angle::from_degrees(degrees)).unwrap();
            let topo = &start.topology;
            topo.validate().unwrap();
            assert_eq!(topo.number_of_points(), 8);
            assert_eq!(topo.hull().len(), 8);
            assert_eq!(topo.dot_count(), cloud.len());
            for (t, tri) in topo.triangles() {
                let g = topo.geometry(t);
                assert!(g.area() > 0.0);
                assert!(tri.dots().iter().all(|d| g.contains(d.xy())));
            }
        }
    }

    #[test]
    fn aligned_rectangles_get_a_strictly_convex_octagon() {
        let wide: Vec<Xyz> = (0..180)
            .map(|i| Xyz::new(f64::from(i % 30), f64::from(i / 30), 0.0))
            .collect();
        for cloud in [square_cloud(), wide] {
            for degrees in [0.0, 45.0, 90.0, 135.0, 180.0, 270.0] {
                let start = bootstrap(&cloud, Angle::from_degrees(degrees)).unwrap();
                let topo = &start.topology;
                let hull: Vec<Xy> = topo.hull().iter().map(|&p| topo.point(p).unwrap().xy()).collect();
                for i in 0..8 {
                    let (a, b, c) = (hull[i], hull[(i + 1) % 8], hull[(i + 2) % 8]);
                    let turn = (b - a).cross(c - b);
                    assert!(turn > 1e-6 * (b - a).length() * (c - b).length(), "corner {i} at {degrees}°");
                }
                assert_eq!(topo.dot_count(), cloud.len());
            }
        }
    }

    #[test]
    fn statistics_describe_the_cloud() {
        let cloud = square_cloud();
        let start = bootstrap(&cloud, Angle::ZERO).unwrap();
        assert_relative_eq!(start.mean_elevation, 4.75 - 2.375, epsilon = 1e-9);
        assert_relative_eq!(start.clip.lo, -4.75 - 14.25, epsilon = 1e-9);
        assert_relative_eq!(start.clip.hi, 9.5 + 14.25, epsilon = 1e-9);
        // The octagon is a little larger than the 19×19 sample square.
        assert!(start.density < 400.0 / 361.0);
        assert!(start.density > 400.0 / (2.0 * 361.0));
        for (_, p) in start.topology.points() {
            assert_relative_eq!(p.elevation(), start.mean_elevation);
        }
    }

    #[test]
    fn degenerate_clouds_are_rejected() {
        assert_eq!(bootstrap(&[], Angle::ZERO).unwrap_err(), BootstrapError::EmptyCloud);
        let same = vec![Xyz::new(3.0, 4.0, 5.0); 10];
        assert_eq!(bootstrap(&same, Angle::ZERO).unwrap_err(), BootstrapError::NoArea);
        let line: Vec<Xyz> = (0..10).map(|i| Xyz::new(f64::from(i), 0.0, 0.0)).collect();
        assert_eq!(bootstrap(&line, Angle::ZERO).unwrap_err(), BootstrapError::NoArea);
        let bad = vec![Xyz::new(0.0, 0.0, 0.0), Xyz::new(1.0, f64::NAN, 0.0)];
        assert_eq!(
            bootstrap(&bad, Angle::ZERO).unwrap_err(),
            BootstrapError::NonFiniteSample { index: 1 }
        );
    }
}
