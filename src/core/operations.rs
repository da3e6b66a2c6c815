//! Structural rewiring: flip, bend, split and quarter.
//!
//! Each operation comes in three phases so that a transaction can keep its
//! time under the mesh write lock short:
//!
//! 1. **plan** (read lock): compute the children's geometry and snapshot the
//!    dots of the triangles being replaced;
//! 2. [`Plan::partition`] (no lock): distribute those dots among the children;
//! 3. **apply** (write lock): rewire the pointers, then
//!    [`Topology::install_partition`] swaps the new dot vectors in.
//!
//! A plan and its apply produce children in the same order. The one-shot
//! helpers at the bottom ([`Topology::flip_edge`] and friends) run all three
//! phases back to back for callers that hold exclusive access anyway.
//!
//! Elements are never deleted: a flip reuses both triangles and the edge, a
//! split reuses the original triangle as its first child, and so on.

use std::sync::Arc;

use crate::core::collections::{EdgeFan, FastHashMap, PointBuffer, SmallBuffer, TriangleBuffer};
use crate::core::handles::{EdgeId, PointId, TriangleId};
use crate::core::topology::Topology;
use crate::core::triangle::{partition_dots, TriangleGeometry};
use crate::core::validation::TopologyError;
use crate::geometry::angle::{bearing, Angle, DEG180, DEG90};
use crate::geometry::point::{Xy, Xyz};
use crate::geometry::predicates::{area3, bearing_intersection};

/// Triangles replaced together and the children that tile the same region.
#[derive(Clone, Debug)]
pub struct Family {
    /// Triangles whose dots are pooled.
    pub sources: SmallBuffer<TriangleId, 2>,
    /// Snapshot of the sources' dots.
    pub source_dots: SmallBuffer<Arc<Vec<Xyz>>, 2>,
    /// Geometry of the children, in apply order.
    pub children: SmallBuffer<TriangleGeometry, 4>,
}

/// Planned structural change.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    /// Regions being retiled.
    pub families: SmallBuffer<Family, 4>,
    /// Positions of points the change will create.
    pub new_points: SmallBuffer<Xyz, 3>,
    /// Existing points whose surroundings change.
    pub points: PointBuffer,
}

impl Plan {
    /// Every child's geometry, flattened.
    pub fn children(&self) -> impl Iterator<Item = &TriangleGeometry> {
        self.families.iter().flat_map(|f| f.children.iter())
    }

    /// Smallest interior angle over all children.
    #[must_use]
    pub fn min_angle(&self) -> Angle {
        self.children()
            .map(TriangleGeometry::min_angle)
            .min()
            .unwrap_or(Angle(DEG180))
    }

    /// Distributes each family's pooled dots among its children.
    #[must_use]
    pub fn partition(&self) -> Vec<Vec<Vec<Xyz>>> {
        self.families
            .iter()
            .map(|family| {
                let pooled: Vec<Xyz> = family
                    .source_dots
                    .iter()
                    .flat_map(|d| d.iter().copied())
                    .collect();
                partition_dots(&pooled, &family.children)
            })
            .collect()
    }
}

/// Children actually created for one [`Family`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewiredFamily {
    /// The replaced triangles.
    pub sources: SmallBuffer<TriangleId, 2>,
    /// The children, in plan order.
    pub children: SmallBuffer<TriangleId, 4>,
}

/// Record of an applied structural change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rewire {
    /// One entry per planned family.
    pub families: SmallBuffer<RewiredFamily, 4>,
    /// Points created.
    pub new_points: PointBuffer,
    /// Triangles created.
    pub new_triangles: TriangleBuffer,
    /// Every point, old or new, whose incident triangles changed.
    pub points: PointBuffer,
}

impl Rewire {
    /// Every triangle the change touched.
    pub fn triangles(&self) -> impl Iterator<Item = TriangleId> + '_ {
        self.families.iter().flat_map(|f| f.children.iter().copied())
    }
}

impl Topology {
    fn family(&self, sources: &[TriangleId], children: &[[Xyz; 3]]) -> Family {
        Family {
            sources: sources.iter().copied().collect(),
            source_dots: sources
                .iter()
                .map(|&t| self.triangles[t.index()].dots_arc())
                .collect(),
            children: children.iter().map(|&c| TriangleGeometry::new(c)).collect(),
        }
    }

    fn fans_of(&self, points: &[PointId]) -> FastHashMap<PointId, EdgeFan> {
        points.iter().map(|&p| (p, self.fan(p))).collect()
    }

    fn commit_fans(&mut self, fans: FastHashMap<PointId, EdgeFan>) {
        for (p, fan) in fans {
            self.set_fan(p, &fan);
        }
    }

    fn finish(&mut self, triangles: &[TriangleId]) {
        for &t in triangles {
            self.link_triangle(t);
        }
        for &t in triangles {
            self.refresh_neighbors(t);
            self.refresh_geometry(t);
        }
    }

    // =========================================================================
    // FLIP
    // =========================================================================

    /// Plans rotating interior edge `e` to the quadrilateral's other diagonal.
    ///
    /// # Errors
    ///
    /// [`TopologyError::NotInterior`] for a hull edge;
    /// [`TopologyError::NotConvex`] if the quadrilateral is not strictly convex.
    pub fn plan_flip(&self, e: EdgeId) -> Result<Plan, TopologyError> {
        let q = self.quad(e)?;
        if !self.is_flippable(e) {
            return Err(TopologyError::NotConvex { edge: e });
        }
        let [a, b, c, d] = [q.a, q.b, q.c, q.d].map(|p| self.xyz(p));
        let mut plan = Plan::default();
        plan.families
            .push(self.family(&[q.right, q.left], &[[a, d, c], [b, c, d]]));
        plan.points.extend([q.a, q.b, q.c, q.d]);
        Ok(plan)
    }

    /// Rotates interior edge `e` to the quadrilateral's other diagonal.
    ///
    /// The edge becomes `c → d`; the right triangle becomes `a d c` and the
    /// left `b c d`.
    ///
    /// # Errors
    ///
    /// As [`plan_flip`](Self::plan_flip).
    pub fn apply_flip(&mut self, e: EdgeId) -> Result<Rewire, TopologyError> {
        let q = self.quad(e)?;
        if !self.is_flippable(e) {
            return Err(TopologyError::NotConvex { edge: e });
        }
        let mut fans = self.fans_of(&[q.a, q.b, q.c, q.d]);
        for p in [q.a, q.b] {
            if let Some(fan) = fans.get_mut(&p) {
                fan.retain(|x| *x != e);
            }
        }
        for p in [q.c, q.d] {
            if let Some(fan) = fans.get_mut(&p) {
                fan.push(e);
            }
        }

        let edge = &mut self.edges[e.index()];
        edge.a = q.c;
        edge.b = q.d;
        edge.left = None;
        edge.right = None;
        self.triangles[q.right.index()].corners = [q.a, q.d, q.c];
        self.triangles[q.left.index()].corners = [q.b, q.c, q.d];
        self.commit_fans(fans);
        self.finish(&[q.right, q.left]);

        let mut rewire = Rewire::default();
        rewire.families.push(RewiredFamily {
            sources: [q.right, q.left].into_iter().collect(),
            children: [q.right, q.left].into_iter().collect(),
        });
        rewire.points.extend([q.a, q.b, q.c, q.d]);
        Ok(rewire)
    }

    // =========================================================================
    // BEND
    // =========================================================================

    /// Orients hull edge `e` so that the mesh lies on the left of `u → v`.
    fn hull_direction(&self, e: EdgeId) -> Result<(PointId, PointId, TriangleId), TopologyError> {
        let edge = &self.edges[e.index()];
        match (edge.left, edge.right) {
            (Some(t), None) => Ok((edge.a, edge.b, t)),
            (None, Some(t)) => Ok((edge.b, edge.a, t)),
            _ => Err(TopologyError::NotHull { edge: e }),
        }
    }

    /// Where bending hull edge `e` would put the new point.
    ///
    /// At each end, the direction halfway between the edge and the line of
    /// the adjacent hull edge is taken; the new point is where those two
    /// lines meet, outside the hull. `None` if they are parallel or meet on
    /// the wrong side.
    #[must_use]
    pub fn bend_apex(&self, e: EdgeId) -> Option<Xy> {
        let (u, v, _) = self.hull_direction(e).ok()?;
        let (before_u, _) = self.hull_neighbors(u)?;
        let (_, after_v) = self.hull_neighbors(v)?;
        let (pu, pv) = (self.xy(u), self.xy(v));
        let along = bearing(pu, pv);
        let half_toward = |from: Xy, other: Xy| {
            let mut line = bearing(from, other);
            if (line - along).normalized().0.unsigned_abs() > DEG90.unsigned_abs() {
                line = line + Angle(DEG180);
            }
            let offset = (line - along).normalized().0 / 2;
            along + Angle(offset)
        };
        let apex = bearing_intersection(
            pu,
            half_toward(pu, self.xy(before_u)),
            pv,
            half_toward(pv, self.xy(after_v)),
        )?;
        // Must be strictly outside, i.e. right of u → v.
        (area3(pu, pv, apex) < 0.0).then_some(apex)
    }

    /// Plans bending hull edge `e` out to `apex`.
    ///
    /// # Errors
    ///
    /// [`TopologyError::NotHull`] if `e` has two triangles.
    pub fn plan_bend(&self, e: EdgeId, apex: Xy) -> Result<Plan, TopologyError> {
        let (u, v, _) = self.hull_direction(e)?;
        let (pu, pv) = (self.xyz(u), self.xyz(v));
        let p = apex.with_z((pu.z + pv.z) / 2.0);
        let mut plan = Plan::default();
        plan.families.push(self.family(&[], &[[pv, pu, p]]));
        plan.new_points.push(p);
        plan.points.extend([u, v]);
        Ok(plan)
    }

    /// Adds a hull point at `apex` and one triangle `v u apex` outside hull
    /// edge `e`, which becomes interior.
    ///
    /// # Errors
    ///
    /// [`TopologyError::NotHull`] if `e` has two triangles, or
    /// [`TopologyError::BrokenHull`] if `e`'s ends are not consecutive in the
    /// hull sequence.
    pub fn apply_bend(&mut self, e: EdgeId, apex: Xy) -> Result<Rewire, TopologyError> {
        let (u, v, _) = self.hull_direction(e)?;
        let n = self.hull.len();
        let at = self
            .hull
            .iter()
            .position(|&h| h == u)
            .filter(|&i| self.hull[(i + 1) % n] == v)
            .ok_or(TopologyError::BrokenHull { position: 0 })?;

        let z = (self.xyz(u).z + self.xyz(v).z) / 2.0;
        let mut fans = self.fans_of(&[u, v]);
        let p = self.add_point(apex.with_z(z));
        let up = self.add_edge(u, p);
        let pv = self.add_edge(p, v);
        fans.entry(u).or_default().push(up);
        fans.entry(v).or_default().push(pv);
        fans.insert(p, [up, pv].into_iter().collect());
        let t = self.add_triangle([v, u, p]);
        self.commit_fans(fans);
        self.finish(&[t]);
        if let Some(other) = self.edges[e.index()].other_triangle(t) {
            self.refresh_neighbors(other);
        }
        self.hull.insert(at + 1, p);

        let mut rewire = Rewire::default();
        rewire.families.push(RewiredFamily {
            sources: SmallBuffer::new(),
            children: [t].into_iter().collect(),
        });
        rewire.new_points.push(p);
        rewire.new_triangles.push(t);
        rewire.points.extend([u, v, p]);
        Ok(rewire)
    }

    // =========================================================================
    // SPLIT
    // =========================================================================

    /// Plans inserting the centroid of `t`.
    #[must_use]
    pub fn plan_split(&self, t: TriangleId) -> Plan {
        let g = self.geometry(t);
        let [a, b, c] = g.corners;
        let p = g.centroid();
        let mut plan = Plan::default();
        plan.families
            .push(self.family(&[t], &[[a, b, p], [b, c, p], [c, a, p]]));
        plan.new_points.push(p);
        plan.points.extend(self.triangles[t.index()].corners);
        plan
    }

    /// Inserts the centroid of `t`, turning it into `a b p` plus two new
    /// triangles `b c p` and `c a p`.
    pub fn apply_split(&mut self, t: TriangleId) -> Rewire {
        let [a, b, c] = self.triangles[t.index()].corners;
        let centroid = self.geometry(t).centroid();
        let mut fans = self.fans_of(&[a, b, c]);
        let p = self.add_point(centroid);
        let spokes = [a, b, c].map(|corner| {
            let spoke = self.add_edge(p, corner);
            fans.entry(corner).or_default().push(spoke);
            spoke
        });
        fans.insert(p, spokes.into_iter().collect());
        self.triangles[t.index()].corners = [a, b, p];
        let t1 = self.add_triangle([b, c, p]);
        let t2 = self.add_triangle([c, a, p]);
        self.commit_fans(fans);
        self.finish(&[t, t1, t2]);

        let mut rewire = Rewire::default();
        rewire.families.push(RewiredFamily {
            sources: [t].into_iter().collect(),
            children: [t, t1, t2].into_iter().collect(),
        });
        rewire.new_points.push(p);
        rewire.new_triangles.extend([t1, t2]);
        rewire.points.extend([a, b, c, p]);
        rewire
    }

    // =========================================================================
    // QUARTER
    // =========================================================================

    /// For each side `i` of `t` (from corner `i` to corner `i + 1`): the
    /// neighbor across it and that neighbor's apex.
    fn quarter_ring(&self, t: TriangleId) -> Result<[(TriangleId, PointId); 3], TopologyError> {
        let tri = &self.triangles[t.index()];
        let mut ring = [(t, tri.corners[0]); 3];
        for (i, slot) in ring.iter_mut().enumerate() {
            let opposite = (i + 2) % 3;
            let n = tri.neighbors[opposite].ok_or(TopologyError::MissingNeighbor {
                triangle: t,
                side: opposite,
            })?;
            let (u, v) = (tri.corners[i], tri.corners[(i + 1) % 3]);
            let x = self.triangles[n.index()]
                .corners
                .into_iter()
                .find(|&c| c != u && c != v)
                .ok_or(TopologyError::NeighborMismatch { triangle: t, side: opposite })?;
            *slot = (n, x);
        }
        Ok(ring)
    }

    /// Plans replacing `t` by its four midpoint sub-triangles and halving its
    /// three neighbors.
    ///
    /// # Errors
    ///
    /// [`TopologyError::MissingNeighbor`] if `t` is on the hull.
    pub fn plan_quarter(&self, t: TriangleId) -> Result<Plan, TopologyError> {
        let ring = self.quarter_ring(t)?;
        let ids = self.triangles[t.index()].corners;
        let c = ids.map(|p| self.xyz(p));
        let m: [Xyz; 3] = std::array::from_fn(|i| (c[i] + c[(i + 1) % 3]) / 2.0);
        let mut plan = Plan::default();
        plan.families.push(self.family(
            &[t],
            &[
                [m[0], m[1], m[2]],
                [c[0], m[0], m[2]],
                [m[0], c[1], m[1]],
                [m[2], m[1], c[2]],
            ],
        ));
        for (i, &(n, x)) in ring.iter().enumerate() {
            let (u, v, px) = (c[i], c[(i + 1) % 3], self.xyz(x));
            plan.families
                .push(self.family(&[n], &[[v, m[i], px], [m[i], u, px]]));
        }
        plan.new_points.extend(m);
        plan.points.extend(ids);
        for (_, x) in ring {
            if !plan.points.contains(&x) {
                plan.points.push(x);
            }
        }
        Ok(plan)
    }

    /// Replaces `t` by its four midpoint sub-triangles and halves each
    /// neighbor through the new midpoint on the shared side.
    ///
    /// # Errors
    ///
    /// As [`plan_quarter`](Self::plan_quarter).
    pub fn apply_quarter(&mut self, t: TriangleId) -> Result<Rewire, TopologyError> {
        let ring = self.quarter_ring(t)?;
        let corners = self.triangles[t.index()].corners;
        let mut sides = [EdgeId::default(); 3];
        for i in 0..3 {
            let (u, v) = (corners[i], corners[(i + 1) % 3]);
            sides[i] = self
                .edge_between(u, v)
                .ok_or(TopologyError::MissingEdge { from: u, to: v })?;
        }

        let mut touched: PointBuffer = corners.into_iter().collect();
        for (_, x) in ring {
            if !touched.contains(&x) {
                touched.push(x);
            }
        }
        let mut fans = self.fans_of(&touched);
        let mut rewire = Rewire::default();
        let mut mids = [PointId::default(); 3];

        for i in 0..3 {
            let (u, v) = (corners[i], corners[(i + 1) % 3]);
            let (_, x) = ring[i];
            let m = self.add_point((self.xyz(u) + self.xyz(v)) / 2.0);
            mids[i] = m;
            // The old side keeps its `u` half; a new edge takes the `v` half.
            let side = &mut self.edges[sides[i].index()];
            if side.a == v {
                side.a = m;
            } else {
                side.b = m;
            }
            let half = self.add_edge(m, v);
            let spoke = self.add_edge(m, x);
            let fan_v = fans.entry(v).or_default();
            fan_v.retain(|e| *e != sides[i]);
            fan_v.push(half);
            fans.entry(x).or_default().push(spoke);
            fans.insert(m, [sides[i], half, spoke].into_iter().collect());
        }
        for i in 0..3 {
            let inner = self.add_edge(mids[i], mids[(i + 1) % 3]);
            fans.entry(mids[i]).or_default().push(inner);
            fans.entry(mids[(i + 1) % 3]).or_default().push(inner);
        }

        let [a, b, c] = corners;
        let [m0, m1, m2] = mids;
        self.triangles[t.index()].corners = [m0, m1, m2];
        let inner: SmallBuffer<TriangleId, 4> = std::iter::once(t)
            .chain([[a, m0, m2], [m0, b, m1], [m2, m1, c]].map(|cs| self.add_triangle(cs)))
            .collect();
        rewire.new_triangles.extend(inner[1..].iter().copied());
        rewire.families.push(RewiredFamily {
            sources: [t].into_iter().collect(),
            children: inner.clone(),
        });
        let mut all: TriangleBuffer = inner.into_iter().collect();
        for (i, &(n, x)) in ring.iter().enumerate() {
            let (u, v) = (corners[i], corners[(i + 1) % 3]);
            self.triangles[n.index()].corners = [v, mids[i], x];
            let half = self.add_triangle([mids[i], u, x]);
            rewire.new_triangles.push(half);
            rewire.families.push(RewiredFamily {
                sources: [n].into_iter().collect(),
                children: [n, half].into_iter().collect(),
            });
            all.extend([n, half]);
        }
        self.commit_fans(fans);
        self.finish(&all);

        rewire.new_points.extend(mids);
        rewire.points = touched;
        rewire.points.extend(mids);
        Ok(rewire)
    }

    // =========================================================================
    // DOTS
    // =========================================================================

    /// Installs a partition computed by [`Plan::partition`] into the children
    /// recorded in `rewire`.
    ///
    /// # Panics
    ///
    /// Panics if `parts` does not have the shape of `rewire`, which means the
    /// plan and the applied change disagree.
    pub fn install_partition(&mut self, rewire: &Rewire, parts: Vec<Vec<Vec<Xyz>>>) {
        assert_eq!(parts.len(), rewire.families.len(), "partition shape mismatch");
        for (family, children) in rewire.families.iter().zip(parts) {
            assert_eq!(family.children.len(), children.len(), "partition shape mismatch");
            for (&t, dots) in family.children.iter().zip(children) {
                self.install_dots(t, Arc::new(dots));
            }
        }
    }

    // =========================================================================
    // ONE-SHOT HELPERS
    // =========================================================================

    /// Plans, applies and redistributes a flip.
    ///
    /// # Errors
    ///
    /// As [`plan_flip`](Self::plan_flip).
    pub fn flip_edge(&mut self, e: EdgeId) -> Result<Rewire, TopologyError> {
        let parts = self.plan_flip(e)?.partition();
        let rewire = self.apply_flip(e)?;
        self.install_partition(&rewire, parts);
        Ok(rewire)
    }

    /// Splits `t` at its centroid and redistributes its dots.
    pub fn split_triangle(&mut self, t: TriangleId) -> Rewire {
        let parts = self.plan_split(t).partition();
        let rewire = self.apply_split(t);
        self.install_partition(&rewire, parts);
        rewire
    }

    /// Quarters `t` and redistributes the dots of all four originals.
    ///
    /// # Errors
    ///
    /// As [`plan_quarter`](Self::plan_quarter).
    pub fn quarter_triangle(&mut self, t: TriangleId) -> Result<Rewire, TopologyError> {
        let parts = self.plan_quarter(t)?.partition();
        let rewire = self.apply_quarter(t)?;
        self.install_partition(&rewire, parts);
        Ok(rewire)
    }

    /// Bends hull edge `e` at its bisector apex, then flips `e` if it became
    /// the diagonal of a convex quadrilateral.
    ///
    /// # Errors
    ///
    /// [`TopologyError::NotHull`] for an interior edge, or
    /// [`TopologyError::NotConvex`] if the bisectors do not meet outside.
    pub fn bend_edge(&mut self, e: EdgeId) -> Result<Rewire, TopologyError> {
        let apex = self
            .bend_apex(e)
            .ok_or(TopologyError::NotConvex { edge: e })?;
        let mut rewire = self.apply_bend(e, apex)?;
        if self.is_flippable(e) {
            let flipped = self.flip_edge(e)?;
            for p in flipped.points {
                if !rewire.points.contains(&p) {
                    rewire.points.push(p);
                }
            }
        }
        Ok(rewire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scalene() -> Topology {
        Topology::from_triangles(
            vec![
                Xyz::new(0.0, 0.0, 0.0),
                Xyz::new(4.0, 0.0, 0.0),
                Xyz::new(0.0, 3.0, 0.0),
            ],
            &[[0, 1, 2]],
            None,
        )
        .unwrap()
    }

    /// A fan of triangles around a central triangle so quartering has all
    /// three neighbors.
    fn star() -> Topology {
        Topology::from_triangles(
            vec![
                Xyz::new(0.0, 0.0, 0.0),
                Xyz::new(4.0, 0.0, 0.0),
                Xyz::new(2.0, 3.0, 0.0),
                Xyz::new(2.0, -3.0, 0.0),
                Xyz::new(5.0, 3.0, 0.0),
                Xyz::new(-1.0, 3.0, 0.0),
            ],
            &[[0, 1, 2], [1, 0, 3], [2, 1, 4], [0, 2, 5]],
            None,
        )
        .unwrap()
    }

    #[test]
    fn split_inserts_the_centroid() {
        let mut topo = scalene();
        let rewire = topo.split_triangle(TriangleId::new(0));
        topo.validate().unwrap();
        assert_eq!(topo.number_of_triangles(), 3);
        assert_eq!(topo.number_of_edges(), 6);
        let p = topo.point(rewire.new_points[0]).unwrap().coords();
        assert_relative_eq!(p.x, 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.z, 0.0);
        let total: f64 = topo.triangles().map(|(_, t)| t.area()).sum();
        assert_relative_eq!(total, 6.0, epsilon = 1e-12);
        for (t, tri) in topo.triangles() {
            assert!(tri.corner_index(rewire.new_points[0]).is_some(), "{t}");
        }
    }

    #[test]
    fn flip_moves_the_diagonal_and_keeps_dots() {
        let mut topo = Topology::from_triangles(
            vec![
                Xyz::new(0.0, 0.0, 0.0),
                Xyz::new(2.0, 0.0, 0.0),
                Xyz::new(2.0, 2.0, 0.0),
                Xyz::new(0.0, 2.0, 0.0),
            ],
            &[[0, 1, 2], [0, 2, 3]],
            None,
        )
        .unwrap();
        let dots: Vec<Xyz> = (1..20)
            .map(|i| {
                let f = f64::from(i) / 20.0;
                Xyz::new(2.0 * f, 2.0 * (1.0 - f) * f, f)
            })
            .collect();
        topo.install_dots(TriangleId::new(0), Arc::new(dots.clone()));
        let e = topo.edge_between(PointId::new(0), PointId::new(2)).unwrap();
        topo.flip_edge(e).unwrap();
        topo.validate().unwrap();
        let (a, b) = topo.edge(e).unwrap().endpoints();
        let mut ends = [a.index(), b.index()];
        ends.sort_unstable();
        assert_eq!(ends, [1, 3]);
        assert_eq!(topo.dot_count(), dots.len());
        for (t, tri) in topo.triangles() {
            let g = topo.geometry(t);
            assert!(tri.dots().iter().all(|d| g.contains(d.xy())));
        }
    }

    #[test]
    fn flip_refuses_a_reflex_quadrilateral() {
        let mut topo = Topology::from_triangles(
            vec![
                Xyz::new(0.0, 0.0, 0.0),
                Xyz::new(4.0, 0.0, 0.0),
                Xyz::new(1.0, 1.0, 0.0),
                Xyz::new(0.0, 4.0, 0.0),
            ],
            &[[0, 1, 2], [0, 2, 3]],
            None,
        )
        .unwrap();
        let e = topo.edge_between(PointId::new(0), PointId::new(2)).unwrap();
        assert_eq!(topo.flip_edge(e), Err(TopologyError::NotConvex { edge: e }));
        topo.validate().unwrap();
    }

    #[test]
    fn quarter_creates_six_triangles() {
        let mut topo = star();
        let dots: Vec<Xyz> = [(1.0, 0.5), (3.0, 0.4), (2.0, 2.0), (2.0, -1.0), (4.0, 2.0)]
            .into_iter()
            .map(|(x, y)| Xyz::new(x, y, 1.0))
            .collect();
        let (inside, outside): (Vec<Xyz>, Vec<Xyz>) = dots
            .into_iter()
            .partition(|d| topo.geometry(TriangleId::new(0)).contains(d.xy()));
        topo.install_dots(TriangleId::new(0), Arc::new(inside));
        topo.install_dots(TriangleId::new(1), Arc::new(vec![outside[0]]));
        topo.install_dots(TriangleId::new(2), Arc::new(vec![outside[1]]));

        let before = topo.dot_count();
        let rewire = topo.quarter_triangle(TriangleId::new(0)).unwrap();
        topo.validate().unwrap();
        assert_eq!(rewire.new_triangles.len(), 6);
        assert_eq!(rewire.new_points.len(), 3);
        assert_eq!(topo.number_of_triangles(), 10);
        assert_eq!(topo.dot_count(), before);
        let total: f64 = topo.triangles().map(|(_, t)| t.area()).sum();
        assert_relative_eq!(total, 6.0 + 6.0 + 4.5 + 4.5, epsilon = 1e-9);
        assert_relative_eq!(
            topo.triangle(TriangleId::new(0)).unwrap().area(),
            1.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn quarter_needs_every_neighbor() {
        let topo = scalene();
        assert!(matches!(
            topo.plan_quarter(TriangleId::new(0)),
            Err(TopologyError::MissingNeighbor { .. })
        ));
    }

    #[test]
    fn bend_grows_the_hull() {
        // Regular octagon fanned from corner 0.
        let points: Vec<Xyz> = (0..8)
            .map(|i| {
                let a = Angle(crate::geometry::angle::DEG45 * i);
                Xyz::new(10.0 * a.cos(), 10.0 * a.sin(), 0.0)
            })
            .collect();
        let fan: Vec<[usize; 3]> = (1..7).map(|i| [0, i, i + 1]).collect();
        let mut topo = Topology::from_triangles(points, &fan, None).unwrap();
        let e = topo.edge_between(PointId::new(2), PointId::new(3)).unwrap();
        let apex = topo.bend_apex(e).unwrap();
        assert!(apex.length() > 10.0);
        let rewire = topo.bend_edge(e).unwrap();
        topo.validate().unwrap();
        assert_eq!(topo.hull().len(), 9);
        assert_eq!(topo.hull()[3], rewire.new_points[0]);
        assert_eq!(topo.number_of_triangles(), 7);
        let interior = topo.edge_between(PointId::new(0), PointId::new(4)).unwrap();
        assert_eq!(
            topo.bend_edge(interior).err(),
            Some(TopologyError::NotConvex { edge: interior })
        );
    }
}
