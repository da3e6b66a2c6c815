//! Stable integer handles into the mesh arenas.
//!
//! Elements are never deleted, so a handle stays valid for the life of the
//! mesh. Handles are `u32` to keep edges and triangles compact; a mesh needs
//! fewer than four billion of each.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
            Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// Wraps an arena index.
            #[inline]
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Arena index.
            #[inline]
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// Handle of a mesh point.
    PointId,
    "p"
);
handle_type!(
    /// Handle of a mesh edge.
    EdgeId,
    "e"
);
handle_type!(
    /// Handle of a mesh triangle.
    TriangleId,
    "t"
);
