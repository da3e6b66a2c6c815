//! Collection aliases used across the mesh and the scheduler.
//!
//! Keys in this crate are small integer handles produced internally, so the
//! non-cryptographic `FxHasher` is safe to use everywhere.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::core::handles::{EdgeId, PointId, TriangleId};

/// `HashMap` keyed with `rustc_hash::FxHasher`.
///
/// ⚠️ **Not DoS-resistant**: only use with keys this crate generates.
///
/// # Examples
///
/// ```rust
/// use tinfit::core::collections::FastHashMap;
///
/// let mut map: FastHashMap<u32, usize> = FastHashMap::default();
/// map.insert(7, 3);
/// ```
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// `HashSet` keyed with `rustc_hash::FxHasher`.
pub type FastHashSet<T> = FxHashSet<T>;

/// Small-optimized `Vec`: inline up to `N` elements, heap beyond.
///
/// # Size Guidelines
///
/// - **N=3**: corners or neighbors of one triangle
/// - **N=8**: edges around a typical point (valence is about 6)
/// - **N=16**: triangles in a transaction's neighborhood
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

/// Edges incident to one point.
pub type EdgeFan = SmallBuffer<EdgeId, 8>;

/// Points touched by one transaction.
pub type PointBuffer = SmallBuffer<PointId, 8>;

/// Triangles touched by one transaction.
pub type TriangleBuffer = SmallBuffer<TriangleId, 16>;

/// Set of triangles, e.g. a lock request.
pub type TriangleSet = FastHashSet<TriangleId>;

/// Creates a [`FastHashMap`] with at least `capacity` slots.
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
}

/// Creates a [`FastHashSet`] with at least `capacity` slots.
#[must_use]
pub fn fast_hash_set_with_capacity<T>(capacity: usize) -> FastHashSet<T> {
    FastHashSet::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_behave_like_std() {
        let mut map = fast_hash_map_with_capacity::<PointId, usize>(16);
        assert!(map.capacity() >= 16);
        map.insert(PointId::new(3), 9);
        assert_eq!(map.get(&PointId::new(3)), Some(&9));

        let mut set = fast_hash_set_with_capacity::<TriangleId>(4);
        assert!(set.insert(TriangleId::new(1)));
        assert!(!set.insert(TriangleId::new(1)));

        let mut fan = EdgeFan::new();
        fan.extend((0..6).map(EdgeId::new));
        assert!(!fan.spilled());
    }
}
