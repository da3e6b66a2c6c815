//! Mesh points.

use crate::core::handles::EdgeId;
use crate::geometry::point::{Xy, Xyz};

/// A mesh vertex.
///
/// Only the elevation ever changes after creation, and only under the mesh
/// write lock, by the elevation adjustment of a transaction that holds every
/// triangle around the point.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub(crate) coords: Xyz,
    /// One incident edge; the rest are reached through the edges' `next` links.
    pub(crate) line: Option<EdgeId>,
}

impl Point {
    pub(crate) const fn new(coords: Xyz) -> Self {
        Self { coords, line: None }
    }

    /// Position.
    #[inline]
    #[must_use]
    pub const fn coords(&self) -> Xyz {
        self.coords
    }

    /// Horizontal position.
    #[inline]
    #[must_use]
    pub const fn xy(&self) -> Xy {
        self.coords.xy()
    }

    /// Elevation.
    #[inline]
    #[must_use]
    pub const fn elevation(&self) -> f64 {
        self.coords.z
    }

    /// Some incident edge, or `None` for a point not yet wired into the mesh.
    #[inline]
    #[must_use]
    pub const fn line(&self) -> Option<EdgeId> {
        self.line
    }
}
