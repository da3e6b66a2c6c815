//! Planar predicates on horizontal positions.
//!
//! All of these work in plain `f64`. The mesh never needs exact answers: an
//! almost-degenerate configuration is handled by the spike guard in the
//! refinement operators, which refuses to create nearly flat triangles in the
//! first place.

use crate::geometry::angle::{interior_angle, Angle, DEG180};
use crate::geometry::point::Xy;

/// Orientation of an ordered triple of points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// Negative signed area.
    Clockwise,
    /// Zero signed area.
    Collinear,
    /// Positive signed area.
    CounterClockwise,
}

/// How two segments meet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentIntersection {
    /// The segments share no point.
    Disjoint,
    /// The segments cross at a single point interior to both.
    Crossing,
    /// An endpoint of one segment lies on the other.
    Touching,
    /// The segments lie on one line and overlap.
    Collinear,
}

/// Signed area of the triangle `a, b, c`; positive when counter-clockwise.
#[inline]
#[must_use]
pub fn area3(a: Xy, b: Xy, c: Xy) -> f64 {
    0.5 * (b - a).cross(c - a)
}

/// Orientation of `a, b, c`.
#[must_use]
pub fn orientation(a: Xy, b: Xy, c: Xy) -> Orientation {
    let area = area3(a, b, c);
    if area > 0.0 {
        Orientation::CounterClockwise
    } else if area < 0.0 {
        Orientation::Clockwise
    } else {
        Orientation::Collinear
    }
}

/// Classifies how segment `p0 p1` meets segment `q0 q1`.
#[must_use]
pub fn segment_intersection(p0: Xy, p1: Xy, q0: Xy, q1: Xy) -> SegmentIntersection {
    let d1 = area3(q0, q1, p0);
    let d2 = area3(q0, q1, p1);
    let d3 = area3(p0, p1, q0);
    let d4 = area3(p0, p1, q1);

    if d1 == 0.0 && d2 == 0.0 {
        let axis = p1 - p0;
        let span = axis.dot(axis);
        if span == 0.0 {
            return if p0 == q0 || p0 == q1 {
                SegmentIntersection::Touching
            } else {
                SegmentIntersection::Disjoint
            };
        }
        let t0 = (q0 - p0).dot(axis) / span;
        let t1 = (q1 - p0).dot(axis) / span;
        let (lo, hi) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        return if hi < 0.0 || lo > 1.0 {
            SegmentIntersection::Disjoint
        } else if hi == 0.0 || lo == 1.0 {
            SegmentIntersection::Touching
        } else {
            SegmentIntersection::Collinear
        };
    }

    let straddles_q = (d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0);
    let straddles_p = (d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0);
    if straddles_q && straddles_p {
        return SegmentIntersection::Crossing;
    }
    let touches_q = (d1 == 0.0 || d2 == 0.0) && (d3 * d4 <= 0.0);
    let touches_p = (d3 == 0.0 || d4 == 0.0) && (d1 * d2 <= 0.0);
    if touches_q || touches_p {
        SegmentIntersection::Touching
    } else {
        SegmentIntersection::Disjoint
    }
}

/// Intersection of the infinite lines `a b` and `c d`, or `None` if they are
/// parallel.
#[must_use]
pub fn line_intersection(a: Xy, b: Xy, c: Xy, d: Xy) -> Option<Xy> {
    let r = b - a;
    let s = d - c;
    let denom = r.cross(s);
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    let t = (c - a).cross(s) / denom;
    let hit = a + r * t;
    hit.is_finite().then_some(hit)
}

/// Intersection of the lines through `a` along `bearing_a` and through `b`
/// along `bearing_b`.
#[must_use]
pub fn bearing_intersection(a: Xy, bearing_a: Angle, b: Xy, bearing_b: Angle) -> Option<Xy> {
    line_intersection(a, a + Xy::from_angle(bearing_a), b, b + Xy::from_angle(bearing_b))
}

/// Sum of the two angles opposite the shared edge `a b`, at `c` and `d`,
/// as a fraction of a half turn minus one.
///
/// Positive when `d` lies inside the circumcircle of `a b c` (equivalently `c`
/// inside that of `a b d`), i.e. when the quadrilateral's other diagonal is
/// the locally Delaunay one. Ranges over `(-1, 1)`.
#[must_use]
pub fn circumcircle_excess(a: Xy, b: Xy, c: Xy, d: Xy) -> f64 {
    let at_c = interior_angle(c, a, b);
    let at_d = interior_angle(d, a, b);
    (f64::from(at_c.0) + f64::from(at_d.0)) / f64::from(DEG180) - 1.0
}

/// Smallest interior angle of the triangle `a b c`.
#[must_use]
pub fn min_angle(a: Xy, b: Xy, c: Xy) -> Angle {
    let angles = [
        interior_angle(a, b, c),
        interior_angle(b, c, a),
        interior_angle(c, a, b),
    ];
    angles.into_iter().min().unwrap_or(Angle::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::angle::DEG45;
    use approx::assert_relative_eq;

    #[test]
    fn area_sign_follows_winding() {
        let a = Xy::new(0.0, 0.0);
        let b = Xy::new(4.0, 0.0);
        let c = Xy::new(0.0, 3.0);
        assert_relative_eq!(area3(a, b, c), 6.0);
        assert_relative_eq!(area3(a, c, b), -6.0);
        assert_eq!(orientation(a, b, c), Orientation::CounterClockwise);
        assert_eq!(orientation(a, c, b), Orientation::Clockwise);
        assert_eq!(
            orientation(a, b, Xy::new(8.0, 0.0)),
            Orientation::Collinear
        );
    }

    #[test]
    fn segment_classification() {
        let o = Xy::new(0.0, 0.0);
        let e = Xy::new(2.0, 2.0);
        assert_eq!(
            segment_intersection(o, e, Xy::new(0.0, 2.0), Xy::new(2.0, 0.0)),
            SegmentIntersection::Crossing
        );
        assert_eq!(
            segment_intersection(o, e, Xy::new(1.0, 1.0), Xy::new(2.0, 0.0)),
            SegmentIntersection::Touching
        );
        assert_eq!(
            segment_intersection(o, e, Xy::new(1.0, 1.0), Xy::new(3.0, 3.0)),
            SegmentIntersection::Collinear
        );
        assert_eq!(
            segment_intersection(o, e, Xy::new(3.0, 0.0), Xy::new(4.0, 0.0)),
            SegmentIntersection::Disjoint
        );
    }

    #[test]
    fn lines_and_bearings_intersect() {
        let hit = line_intersection(
            Xy::new(0.0, 0.0),
            Xy::new(1.0, 1.0),
            Xy::new(0.0, 2.0),
            Xy::new(1.0, 1.0),
        )
        .unwrap();
        assert_relative_eq!(hit.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(hit.y, 1.0, epsilon = 1e-12);
        assert!(line_intersection(
            Xy::new(0.0, 0.0),
            Xy::new(1.0, 0.0),
            Xy::new(0.0, 1.0),
            Xy::new(1.0, 1.0)
        )
        .is_none());

        let hit = bearing_intersection(
            Xy::new(0.0, 0.0),
            Angle(DEG45),
            Xy::new(2.0, 0.0),
            Angle(DEG45 * 3),
        )
        .unwrap();
        assert_relative_eq!(hit.x, 1.0, epsilon = 1e-7);
        assert_relative_eq!(hit.y, 1.0, epsilon = 1e-7);
    }

    #[test]
    fn circumcircle_excess_of_a_square_is_zero() {
        let a = Xy::new(0.0, 0.0);
        let b = Xy::new(2.0, 2.0);
        let c = Xy::new(0.0, 2.0);
        let d = Xy::new(2.0, 0.0);
        assert_relative_eq!(circumcircle_excess(a, b, c, d), 0.0, epsilon = 1e-8);
        // Pull d toward the diagonal: it falls inside the circle through a, b, c.
        let d_in = Xy::new(1.4, 0.6);
        assert!(circumcircle_excess(a, b, c, d_in) > 0.0);
        let d_out = Xy::new(3.0, -1.0);
        assert!(circumcircle_excess(a, b, c, d_out) < 0.0);
    }

    #[test]
    fn min_angle_of_right_isoceles() {
        let angle = min_angle(Xy::new(0.0, 0.0), Xy::new(1.0, 0.0), Xy::new(0.0, 1.0));
        assert_relative_eq!(angle.degrees(), 45.0, epsilon = 1e-6);
    }
}
