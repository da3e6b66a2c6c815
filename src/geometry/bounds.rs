//! Directional bounding rectangles.

use crate::geometry::angle::{Angle, DEG90};
use crate::geometry::point::Xy;

/// Bounding rectangle of a point set in a rotated frame.
///
/// `extent(k)` is the largest projection of any included point onto the
/// direction `orientation + k·90°`. Two of these, rotated 45° apart, give the
/// eight supporting lines of the bootstrap octagon.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundRect {
    orientation: Angle,
    extents: [f64; 4],
}

impl BoundRect {
    /// An empty rectangle in the frame rotated by `orientation`.
    #[must_use]
    pub fn new(orientation: Angle) -> Self {
        Self {
            orientation,
            extents: [f64::NEG_INFINITY; 4],
        }
    }

    /// Direction of side `k` (taken modulo 4).
    #[must_use]
    pub fn direction(&self, k: usize) -> Angle {
        self.orientation + Angle(DEG90.wrapping_mul((k % 4) as i32))
    }

    /// Grows the rectangle to cover `p`.
    pub fn include(&mut self, p: Xy) {
        for k in 0..4 {
            let reach = p.along(self.direction(k));
            if reach > self.extents[k] {
                self.extents[k] = reach;
            }
        }
    }

    /// Largest projection in direction `k`; `-∞` while empty.
    #[must_use]
    pub fn extent(&self, k: usize) -> f64 {
        self.extents[k % 4]
    }

    /// Width across direction `k`, i.e. between the sides `k` and `k + 2`.
    #[must_use]
    pub fn width(&self, k: usize) -> f64 {
        self.extent(k) + self.extent(k + 2)
    }

    /// True if nothing has been included yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extents[0] == f64::NEG_INFINITY
    }
}
