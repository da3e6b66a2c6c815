//! Winged edges.
//!
//! An edge runs from `a` to `b`. Looking along that direction, `right` is the
//! triangle on the right and `left` the triangle on the left; either is `None`
//! on the convex hull. `next_a` is the next edge counter-clockwise around `a`
//! and `next_b` the next edge counter-clockwise around `b`, so following
//! `next` links from any edge at a point visits that point's whole fan.

use crate::core::handles::{EdgeId, PointId, TriangleId};

/// A winged edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub(crate) a: PointId,
    pub(crate) b: PointId,
    pub(crate) next_a: EdgeId,
    pub(crate) next_b: EdgeId,
    pub(crate) right: Option<TriangleId>,
    pub(crate) left: Option<TriangleId>,
}

impl Edge {
    /// A fresh edge whose `next` links point back at itself until its fans
    /// are rebuilt.
    pub(crate) const fn new(id: EdgeId, a: PointId, b: PointId) -> Self {
        Self {
            a,
            b,
            next_a: id,
            next_b: id,
            right: None,
            left: None,
        }
    }

    /// `(a, b)`.
    #[inline]
    #[must_use]
    pub const fn endpoints(&self) -> (PointId, PointId) {
        (self.a, self.b)
    }

    /// True if `p` is one of the endpoints.
    #[inline]
    #[must_use]
    pub fn touches(&self, p: PointId) -> bool {
        self.a == p || self.b == p
    }

    /// The endpoint that is not `p`, or `None` if `p` is not an endpoint.
    #[must_use]
    pub fn other_end(&self, p: PointId) -> Option<PointId> {
        if self.a == p {
            Some(self.b)
        } else if self.b == p {
            Some(self.a)
        } else {
            None
        }
    }

    /// Next edge counter-clockwise around the endpoint `p`.
    #[must_use]
    pub fn next(&self, p: PointId) -> Option<EdgeId> {
        if self.a == p {
            Some(self.next_a)
        } else if self.b == p {
            Some(self.next_b)
        } else {
            None
        }
    }

    pub(crate) fn set_next(&mut self, p: PointId, next: EdgeId) {
        if self.a == p {
            self.next_a = next;
        }
        if self.b == p {
            self.next_b = next;
        }
    }

    /// Triangle on the right of `a → b`.
    #[inline]
    #[must_use]
    pub const fn right(&self) -> Option<TriangleId> {
        self.right
    }

    /// Triangle on the left of `a → b`.
    #[inline]
    #[must_use]
    pub const fn left(&self) -> Option<TriangleId> {
        self.left
    }

    /// Both adjacent triangles, right first.
    #[must_use]
    pub fn triangles(&self) -> impl Iterator<Item = TriangleId> {
        self.right.into_iter().chain(self.left)
    }

    /// True if the edge has a triangle on both sides.
    #[inline]
    #[must_use]
    pub const fn is_interior(&self) -> bool {
        self.right.is_some() && self.left.is_some()
    }

    /// The triangle across this edge from `t`.
    ///
    /// `None` if `t` is not adjacent or nothing is across.
    #[must_use]
    pub fn other_triangle(&self, t: TriangleId) -> Option<TriangleId> {
        if self.right == Some(t) {
            self.left
        } else if self.left == Some(t) {
            self.right
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_by_endpoint() {
        let id = EdgeId::new(4);
        let mut e = Edge::new(id, PointId::new(1), PointId::new(2));
        assert_eq!(e.next(PointId::new(1)), Some(id));
        e.set_next(PointId::new(2), EdgeId::new(9));
        assert_eq!(e.next(PointId::new(2)), Some(EdgeId::new(9)));
        assert_eq!(e.next(PointId::new(3)), None);
        assert_eq!(e.other_end(PointId::new(2)), Some(PointId::new(1)));
        assert_eq!(e.other_end(PointId::new(7)), None);
        assert!(!e.is_interior());

        e.right = Some(TriangleId::new(0));
        e.left = Some(TriangleId::new(5));
        assert!(e.is_interior());
        assert_eq!(
            e.other_triangle(TriangleId::new(5)),
            Some(TriangleId::new(0))
        );
        assert_eq!(e.triangles().count(), 2);
    }
}
