//! Plain coordinate value types.
//!
//! [`Xy`] is a horizontal position; [`Xyz`] adds an elevation. Cloud samples
//! ("dots") and mesh point coordinates are both [`Xyz`].

use crate::geometry::angle::Angle;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// A horizontal position or vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Xy {
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
}

/// A 3-D position: horizontal coordinates plus elevation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Xyz {
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
    /// Elevation.
    pub z: f64,
}

impl Xy {
    /// Creates a new horizontal position.
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing along `angle`.
    #[inline]
    #[must_use]
    pub fn from_angle(angle: Angle) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    /// Euclidean length.
    #[inline]
    #[must_use]
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Distance to `other`.
    #[inline]
    #[must_use]
    pub fn dist(self, other: Self) -> f64 {
        (self - other).length()
    }

    /// Dot product.
    #[inline]
    #[must_use]
    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the cross product.
    #[inline]
    #[must_use]
    pub fn cross(self, other: Self) -> f64 {
        self.x * other.y - self.y * other.x
    }

    /// Signed distance of this point along the direction `angle`.
    ///
    /// The minimum of this over a cloud is the supporting line of the cloud
    /// facing the opposite way.
    #[inline]
    #[must_use]
    pub fn along(self, angle: Angle) -> f64 {
        self.dot(Self::from_angle(angle))
    }

    /// Adds an elevation.
    #[inline]
    #[must_use]
    pub const fn with_z(self, z: f64) -> Xyz {
        Xyz::new(self.x, self.y, z)
    }

    /// True if both coordinates are finite.
    #[inline]
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Xyz {
    /// Creates a new 3-D position.
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Horizontal projection.
    #[inline]
    #[must_use]
    pub const fn xy(self) -> Xy {
        Xy::new(self.x, self.y)
    }

    /// True if all three coordinates are finite.
    #[inline]
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<Xyz> for Xy {
    fn from(p: Xyz) -> Self {
        p.xy()
    }
}

impl From<[f64; 3]> for Xyz {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl Add for Xy {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Xy {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Xy {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Xy {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl Mul<f64> for Xy {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Xy {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl Add for Xyz {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Xyz {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Xyz {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f64> for Xyz {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::angle::DEG90;
    use approx::assert_relative_eq;

    #[test]
    fn arithmetic_and_metrics() {
        let a = Xy::new(3.0, 4.0);
        assert_relative_eq!(a.length(), 5.0);
        assert_relative_eq!(a.dist(Xy::default()), 5.0);
        assert_relative_eq!(a.cross(Xy::new(1.0, 0.0)), -4.0);
        assert_eq!((a + a) / 2.0, a);
        assert_eq!(-a * 2.0, Xy::new(-6.0, -8.0));
        let p = Xyz::new(1.0, 2.0, 3.0);
        assert_eq!(((p + p) / 2.0).xy(), Xy::new(1.0, 2.0));
    }

    #[test]
    fn projection_along_a_direction() {
        let p = Xy::new(2.0, 5.0);
        assert_relative_eq!(p.along(Angle::ZERO), 2.0, epsilon = 1e-12);
        assert_relative_eq!(p.along(Angle(DEG90)), 5.0, epsilon = 1e-8);
    }

    #[test]
    fn finiteness() {
        assert!(Xyz::new(0.0, 1.0, 2.0).is_finite());
        assert!(!Xyz::new(0.0, f64::NAN, 2.0).is_finite());
        assert!(!Xy::new(f64::INFINITY, 0.0).is_finite());
    }
}
