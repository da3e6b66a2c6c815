//! Quadtree over mesh points, used to start point-location walks nearby.
//!
//! The root is a square whose side is a power of two and whose corner is a
//! multiple of a sixteenth of the side. Squares holding more than three
//! distinct points are split into four:
//!
//! ```text
//! +---+---+
//! | 2 | 3 |
//! +---+---+
//! | 0 | 1 |
//! +---+---+
//! ```
//!
//! A point on a square's bottom or left edge belongs to it; one on its top
//! or right edge does not. Each leaf remembers the triangle containing its
//! center, found by walking from the previous leaf's triangle in depth-first
//! order, so consecutive walks are short.
//!
//! The index is immutable once built; the mesh publishes a fresh one through
//! `ArcSwap` after each batch of structural changes. A stale index still
//! answers correctly, only with longer walks.

use crate::core::algorithms::locate::locate;
use crate::core::handles::TriangleId;
use crate::core::topology::Topology;
use crate::geometry::point::Xy;

/// Depth cap, reached only by points closer together than roundoff.
const MAX_DEPTH: usize = 48;

/// Leaf capacity before splitting.
const LEAF_POINTS: usize = 3;

#[derive(Clone, Debug)]
struct QuadNode {
    origin: Xy,
    side: f64,
    children: Option<[u32; 4]>,
    hint: Option<TriangleId>,
}

impl QuadNode {
    fn middle(&self) -> Xy {
        self.origin + Xy::new(self.side / 2.0, self.side / 2.0)
    }

    /// Which child square holds `p`; with `clip`, points outside map to the
    /// nearest child instead of `None`.
    fn quarter(&self, p: Xy, clip: bool) -> Option<usize> {
        if !p.is_finite() {
            return None;
        }
        let (x, y) = (p.x - self.origin.x, p.y - self.origin.y);
        if !clip && (x < 0.0 || y < 0.0 || x >= self.side || y >= self.side) {
            return None;
        }
        let half = self.side / 2.0;
        Some(usize::from(x >= half) | (usize::from(y >= half) << 1))
    }
}

/// Spatial index from a location to a nearby triangle.
#[derive(Clone, Debug, Default)]
pub struct QuadIndex {
    nodes: Vec<QuadNode>,
    generation: u64,
}

impl QuadIndex {
    /// An index with no squares; every lookup falls back to a plain walk.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Indexes the points of `topo` and assigns leaf hints.
    #[must_use]
    pub fn build(topo: &Topology, generation: u64) -> Self {
        let mut points: Vec<Xy> = topo.points().map(|(_, p)| p.xy()).filter(|p| p.is_finite()).collect();
        if points.is_empty() {
            return Self { nodes: Vec::new(), generation };
        }
        points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
        points.dedup();

        let (origin, side) = size_fit(&points);
        let mut index = Self {
            nodes: vec![QuadNode { origin, side, children: None, hint: None }],
            generation,
        };
        index.split(0, points, 0);
        index.assign_hints(topo);
        index
    }

    fn split(&mut self, node: usize, points: Vec<Xy>, depth: usize) {
        if points.len() <= LEAF_POINTS || depth >= MAX_DEPTH {
            return;
        }
        let parent = self.nodes[node].clone();
        let mut parts: [Vec<Xy>; 4] = Default::default();
        for p in points {
            if let Some(q) = parent.quarter(p, false) {
                parts[q].push(p);
            }
        }
        let half = parent.side / 2.0;
        let first = self.nodes.len() as u32;
        for i in 0..4 {
            self.nodes.push(QuadNode {
                origin: parent.origin
                    + Xy::new(half * (i & 1) as f64, half * (i >> 1) as f64),
                side: half,
                children: None,
                hint: None,
            });
        }
        self.nodes[node].children = Some([first, first + 1, first + 2, first + 3]);
        for (i, part) in parts.into_iter().enumerate() {
            self.split(first as usize + i, part, depth + 1);
        }
    }

    fn assign_hints(&mut self, topo: &Topology) {
        if topo.number_of_triangles() == 0 {
            return;
        }
        let mut last = None;
        let mut stack = vec![0_usize];
        while let Some(n) = stack.pop() {
            match self.nodes[n].children {
                Some(children) => stack.extend(children.iter().rev().map(|&c| c as usize)),
                None => {
                    let found = locate(topo, self.nodes[n].middle(), last)
                        .map_or(last, |r| Some(r.clipped()));
                    self.nodes[n].hint = found;
                    last = found;
                }
            }
        }
    }

    /// Mesh generation this index was built from.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of squares, leaves and inner nodes together.
    #[must_use]
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// True if `p` is inside the root square.
    #[must_use]
    pub fn covers(&self, p: Xy) -> bool {
        self.nodes.first().is_some_and(|root| root.quarter(p, false).is_some())
    }

    /// Starting triangle for a walk to `p`.
    #[must_use]
    pub fn hint(&self, p: Xy) -> Option<TriangleId> {
        let mut node = self.nodes.first()?;
        loop {
            match node.children {
                None => return node.hint,
                Some(children) => {
                    let q = node.quarter(p, true)?;
                    node = &self.nodes[children[q] as usize];
                }
            }
        }
    }

    /// The triangle of `topo` containing `p`, or `None` outside the hull.
    #[must_use]
    pub fn find_triangle(&self, topo: &Topology, p: Xy) -> Option<TriangleId> {
        let hint = self.hint(p).filter(|t| topo.triangle(*t).is_some());
        locate(topo, p, hint).ok()?.inside()
    }
}

/// Smallest power-of-two square, with its corner on a sixteenth-side grid,
/// that holds every point strictly inside its top and right edges.
fn size_fit(points: &[Xy]) -> (Xy, f64) {
    let (mut lo, mut hi) = (Xy::new(f64::INFINITY, f64::INFINITY), Xy::new(f64::NEG_INFINITY, f64::NEG_INFINITY));
    for p in points {
        lo = Xy::new(lo.x.min(p.x), lo.y.min(p.y));
        hi = Xy::new(hi.x.max(p.x), hi.y.max(p.y));
    }
    let span = (hi.x - lo.x).max(hi.y - lo.y);
    let mut side = if span > 0.0 { 2.0_f64.powi(span.log2().floor() as i32) } else { 1.0 };
    loop {
        let step = side / 16.0;
        let origin = Xy::new((lo.x / step).floor() * step, (lo.y / step).floor() * step);
        if origin.x + side > hi.x && origin.y + side > hi.y {
            return (origin, side);
        }
        side *= 2.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Xyz;

    fn grid(n: usize) -> Topology {
        let mut positions = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                positions.push(Xyz::new(i as f64 * 10.0, j as f64 * 10.0, 0.0));
            }
        }
        let at = |i: usize, j: usize| j * (n + 1) + i;
        let mut corners = Vec::new();
        for j in 0..n {
            for i in 0..n {
                corners.push([at(i, j), at(i + 1, j), at(i + 1, j + 1)]);
                corners.push([at(i, j), at(i + 1, j + 1), at(i, j + 1)]);
            }
        }
        Topology::from_triangles(positions, &corners, None).unwrap()
    }

    #[test]
    fn root_square_fits_the_points() {
        let (origin, side) = size_fit(&[Xy::new(3.0, 5.0), Xy::new(40.0, 9.0)]);
        assert_eq!(side, 64.0);
        assert!(origin.x <= 3.0 && origin.y <= 5.0);
        assert!(origin.x + side > 40.0);
        assert_eq!(origin.x % 4.0, 0.0);
    }

    #[test]
    fn leaves_hold_at_most_three_points() {
        let topo = grid(6);
        let index = QuadIndex::build(&topo, 1);
        assert!(index.size() > 1);
        assert_eq!(index.generation(), 1);
        for leaf in index.nodes.iter().filter(|n| n.children.is_none()) {
            let inside = topo
                .points()
                .filter(|(_, p)| leaf.quarter(p.xy(), false).is_some())
                .count();
            assert!(inside <= LEAF_POINTS);
        }
    }

    #[test]
    fn finds_containing_triangles() {
        let topo = grid(6);
        let index = QuadIndex::build(&topo, 0);
        for p in [Xy::new(1.0, 2.0), Xy::new(55.0, 31.0), Xy::new(59.9, 0.1)] {
            let t = index.find_triangle(&topo, p).unwrap();
            assert!(topo.geometry(t).contains(p));
        }
        assert_eq!(index.find_triangle(&topo, Xy::new(-5.0, 3.0)), None);
        assert!(!index.covers(Xy::new(-500.0, 0.0)));
    }

    #[test]
    fn empty_index_still_locates() {
        let topo = grid(2);
        let index = QuadIndex::empty();
        assert_eq!(index.hint(Xy::new(1.0, 1.0)), None);
        assert!(index.find_triangle(&topo, Xy::new(1.0, 1.0)).is_some());
    }
}
