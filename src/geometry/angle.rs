//! Binary integer angles.
//!
//! An [`Angle`] is an `i32` in which half a turn is `2^30`, so one full turn
//! is `2^31` and the `i32` range covers two turns. Adding and subtracting
//! angles wraps exactly; no rounding ever accumulates, which is what lets the
//! mesh checker demand that the bearing deltas around a point sum to exactly
//! one turn.

use crate::geometry::point::Xy;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::{Add, Neg, Sub};

/// One degree, rounded.
pub const DEG1: i32 = 5_965_232;
/// 30 degrees, rounded.
pub const DEG30: i32 = 0x0AAA_AAAB;
/// 45 degrees.
pub const DEG45: i32 = 0x1000_0000;
/// 60 degrees, rounded.
pub const DEG60: i32 = 0x1555_5555;
/// 90 degrees.
pub const DEG90: i32 = 0x2000_0000;
/// 180 degrees.
pub const DEG180: i32 = 0x4000_0000;
/// One full turn, which does not fit in the `i32` of an angle.
pub const FULL_TURN: i64 = 1 << 31;

const UNITS_PER_RADIAN: f64 = (DEG180 as f64) / PI;
const UNITS_PER_DEGREE: f64 = (DEG180 as f64) / 180.0;

/// A binary angle; see the module docs for the scale.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Angle(pub i32);

impl Angle {
    /// Zero angle, pointing along +x.
    pub const ZERO: Self = Self(0);

    /// Converts radians, wrapping into the representable range.
    #[must_use]
    pub fn from_radians(radians: f64) -> Self {
        Self::wrap_units(radians * UNITS_PER_RADIAN)
    }

    /// Converts degrees, wrapping into the representable range.
    #[must_use]
    pub fn from_degrees(degrees: f64) -> Self {
        Self::wrap_units(degrees * UNITS_PER_DEGREE)
    }

    fn wrap_units(units: f64) -> Self {
        if !units.is_finite() {
            return Self::ZERO;
        }
        let turns = (units / FULL_TURN as f64).round();
        let reduced = (units - turns * FULL_TURN as f64).round();
        Self(reduced as i64 as i32)
    }

    /// Angle of the vector `(x, y)`, in `[-180°, 180°]`.
    #[must_use]
    pub fn atan2(y: f64, x: f64) -> Self {
        Self((y.atan2(x) * UNITS_PER_RADIAN).round() as i32)
    }

    /// Direction of the vector `v`.
    #[must_use]
    pub fn of(v: Xy) -> Self {
        Self::atan2(v.y, v.x)
    }

    /// Radians.
    #[inline]
    #[must_use]
    pub fn radians(self) -> f64 {
        f64::from(self.0) / UNITS_PER_RADIAN
    }

    /// Degrees.
    #[inline]
    #[must_use]
    pub fn degrees(self) -> f64 {
        f64::from(self.0) / UNITS_PER_DEGREE
    }

    /// Sine.
    #[inline]
    #[must_use]
    pub fn sin(self) -> f64 {
        self.radians().sin()
    }

    /// Cosine.
    #[inline]
    #[must_use]
    pub fn cos(self) -> f64 {
        self.radians().cos()
    }

    /// Tangent.
    #[inline]
    #[must_use]
    pub fn tan(self) -> f64 {
        self.radians().tan()
    }

    /// Same direction, folded into `(-180°, 180°]`.
    #[must_use]
    pub fn normalized(self) -> Self {
        let folded = i64::from(self.0).rem_euclid(FULL_TURN);
        if folded > i64::from(DEG180) {
            Self((folded - FULL_TURN) as i32)
        } else {
            Self(folded as i32)
        }
    }

    /// Counter-clockwise rotation from `self` to `to`, in `(0, FULL_TURN]`.
    ///
    /// Equal directions give a full turn, which is what a point with a single
    /// incident edge contributes to its bearing sum.
    #[must_use]
    pub fn ccw_delta(self, to: Self) -> i64 {
        let delta = (i64::from(to.0) - i64::from(self.0)).rem_euclid(FULL_TURN);
        if delta == 0 {
            FULL_TURN
        } else {
            delta
        }
    }

    /// Halfway between `self` and `to`, measured counter-clockwise.
    #[must_use]
    pub fn bisect_ccw(self, to: Self) -> Self {
        let half = self.ccw_delta(to) / 2;
        Self((i64::from(self.0) + half) as i32)
    }
}

impl Add for Angle {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for Angle {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl Neg for Angle {
    type Output = Self;
    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

/// Bearing of the segment `from → to`.
#[inline]
#[must_use]
pub fn bearing(from: Xy, to: Xy) -> Angle {
    Angle::of(to - from)
}

/// Interior angle at `vertex` between the rays toward `a` and `b`, in
/// `[0°, 180°]`.
#[must_use]
pub fn interior_angle(vertex: Xy, a: Xy, b: Xy) -> Angle {
    let delta = (bearing(vertex, b) - bearing(vertex, a)).normalized();
    Angle(delta.0.wrapping_abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn constants_match_their_degrees() {
        assert_relative_eq!(Angle(DEG1).degrees(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(Angle(DEG30).degrees(), 30.0, epsilon = 1e-6);
        assert_relative_eq!(Angle(DEG60).degrees(), 60.0, epsilon = 1e-6);
        assert_eq!(Angle::from_degrees(90.0), Angle(DEG90));
        assert_eq!(Angle::from_degrees(-180.0).normalized(), Angle(DEG180));
    }

    #[test]
    fn atan2_covers_the_half_turn_range() {
        assert_eq!(Angle::atan2(0.0, 1.0), Angle::ZERO);
        assert_eq!(Angle::atan2(1.0, 0.0), Angle(DEG90));
        assert_eq!(Angle::atan2(0.0, -1.0), Angle(DEG180));
        assert_eq!(Angle::atan2(-1.0, -1.0), Angle(-DEG90 - DEG45));
    }

    #[test]
    fn wrapping_arithmetic_is_exact() {
        let a = Angle(DEG180) + Angle(DEG180);
        assert_eq!(a.normalized(), Angle::ZERO);
        assert_eq!(Angle(DEG90).ccw_delta(Angle(DEG90)), FULL_TURN);
        assert_eq!(Angle(DEG90).ccw_delta(Angle(-DEG90)), i64::from(DEG180));
        assert_eq!(Angle(DEG180).ccw_delta(Angle(-DEG90)), i64::from(DEG90));
    }

    #[test]
    fn deltas_around_a_star_sum_to_one_turn() {
        let spokes = [
            bearing(Xy::default(), Xy::new(1.0, 0.1)),
            bearing(Xy::default(), Xy::new(-0.3, 2.0)),
            bearing(Xy::default(), Xy::new(-5.0, -1.0)),
            bearing(Xy::default(), Xy::new(0.2, -7.0)),
        ];
        let total: i64 = (0..spokes.len())
            .map(|i| spokes[i].ccw_delta(spokes[(i + 1) % spokes.len()]))
            .sum();
        assert_eq!(total, FULL_TURN);
    }

    #[test]
    fn interior_angles() {
        let o = Xy::default();
        let right = interior_angle(o, Xy::new(1.0, 0.0), Xy::new(0.0, 3.0));
        assert_eq!(right, Angle(DEG90));
        let straight = interior_angle(o, Xy::new(1.0, 0.0), Xy::new(-1.0, 0.0));
        assert_eq!(straight, Angle(DEG180));
        let bis = Angle(DEG90).bisect_ccw(Angle(DEG180));
        assert_eq!(bis, Angle(DEG90 + DEG45));
    }
}
