//! Edge operator: flip an interior edge or bend a hull edge.
//!
//! An interior edge is flipped when the quadrilateral is convex, no child
//! would be a spike, and
//!
//! ```text
//! fit_weight · fit + circle_weight · circle > 0
//! ```
//!
//! where `fit` is the relative drop in residual sum of squares of a
//! four-corner least-squares fit when the diagonal is swapped, and `circle`
//! is the circumcircle measure of [`circumcircle_excess`]. A hull edge is
//! bent outward when its triangle is out of tolerance.

use parking_lot::RwLockReadGuard;

use crate::core::handles::{EdgeId, TriangleId};
use crate::core::topology::{Quad, Topology};
use crate::core::triangle::TriangleGeometry;
use crate::core::validation::topology_fault;
use crate::geometry::matrix::NormalEquations;
use crate::geometry::point::Xyz;
use crate::geometry::predicates::circumcircle_excess;
use crate::geometry::sum::pairwise_sum;
use crate::refine::refiner::{Action, OpOutcome, Refiner};

/// Dots of one triangle in a trial fit, with the columns of its corners.
type FitGroup<'a> = (TriangleGeometry, [usize; 3], &'a [Xyz]);

/// Residual sum of squares of the best fit of four corner elevations to the
/// dots, each interpolated linearly within its triangle. `None` if the fit
/// is undetermined.
fn fit_rss(groups: &[FitGroup<'_>]) -> Option<f64> {
    let mut equations = NormalEquations::zeros(4);
    for (geometry, columns, dots) in groups {
        for dot in *dots {
            let bary = geometry.barycentric(dot.xy());
            let entries: [(usize, f64); 3] = std::array::from_fn(|i| (columns[i], bary[i]));
            equations.add_row(&entries, dot.z, dot.z);
        }
    }
    let solution = equations.solve().ok()?;
    if !solution.all_valid() {
        return None;
    }
    let mut squares = Vec::with_capacity(equations.rows);
    for (geometry, columns, dots) in groups {
        for dot in *dots {
            let bary = geometry.barycentric(dot.xy());
            let fitted: f64 = (0..3).map(|i| bary[i] * solution.values[columns[i]]).sum();
            squares.push((dot.z - fitted) * (dot.z - fitted));
        }
    }
    Some(pairwise_sum(&squares))
}

/// Relative improvement of the fit from flipping, in `[-1, 1]`.
fn fit_improvement(now: Option<f64>, flipped: Option<f64>) -> f64 {
    match (now, flipped) {
        (Some(now), Some(flipped)) if now + flipped > 0.0 => (now - flipped) / (now + flipped),
        _ => 0.0,
    }
}

impl Refiner {
    /// Flips or bends `e` if that improves the mesh.
    ///
    /// Releases everything `thread` holds before returning.
    pub fn edgeop(&self, thread: usize, e: EdgeId) -> OpOutcome {
        let outcome = self.edge_transaction(thread, e);
        self.locks.unlock(thread);
        outcome
    }

    fn edge_transaction(&self, thread: usize, e: EdgeId) -> OpOutcome {
        let topo = self.mesh.read();
        let Some(edge) = topo.edge(e) else {
            return OpOutcome::Unchanged;
        };
        let narrow: Vec<TriangleId> = edge.triangles().collect();
        if !self.locks.lock(thread, &topo, &narrow).is_locked() {
            return OpOutcome::Contended;
        }
        if edge.is_interior() {
            self.try_flip(thread, topo, e)
        } else {
            self.try_bend(thread, topo, e)
        }
    }

    /// Score of flipping `quad`'s diagonal; positive means flip.
    ///
    /// `flipped` holds the dots as they would be partitioned after the flip:
    /// first the triangle `a d c`, then `b c d`.
    pub(crate) fn flip_score(&self, topo: &Topology, quad: &Quad, flipped: &[Vec<Xyz>]) -> f64 {
        let [a, b, c, d] = [quad.a, quad.b, quad.c, quad.d].map(|p| topo.xyz(p));
        let left = topo.triangle(quad.left).map_or(&[][..], |t| t.dots());
        let right = topo.triangle(quad.right).map_or(&[][..], |t| t.dots());
        let now = fit_rss(&[
            (TriangleGeometry::new([a, b, c]), [0, 1, 2], left),
            (TriangleGeometry::new([b, a, d]), [1, 0, 3], right),
        ]);
        let empty: &[Xyz] = &[];
        let after = fit_rss(&[
            (
                TriangleGeometry::new([a, d, c]),
                [0, 3, 2],
                flipped.first().map_or(empty, Vec::as_slice),
            ),
            (
                TriangleGeometry::new([b, c, d]),
                [1, 2, 3],
                flipped.get(1).map_or(empty, Vec::as_slice),
            ),
        ]);
        let fit = fit_improvement(now, after);
        let circle = circumcircle_excess(a.xy(), b.xy(), c.xy(), d.xy());
        self.params.fit_weight * fit + self.params.circle_weight * circle
    }

    fn try_flip(&self, thread: usize, topo: RwLockReadGuard<'_, Topology>, e: EdgeId) -> OpOutcome {
        if !topo.is_flippable(e) {
            return OpOutcome::Unchanged;
        }
        let (quad, plan) = match topo.quad(e).and_then(|q| Ok((q, topo.plan_flip(e)?))) {
            Ok(found) => found,
            Err(err) => {
                topology_fault(&err);
                return OpOutcome::Unchanged;
            }
        };
        if plan.min_angle() < self.params.min_angle() {
            return OpOutcome::Unchanged;
        }
        let parts = plan.partition();
        let score = self.flip_score(&topo, &quad, parts.first().map_or(&[][..], Vec::as_slice));
        if score.is_nan() || score <= 0.0 {
            return OpOutcome::Unchanged;
        }
        if !self.lock_neighborhood(thread, &topo, &plan.points).is_locked() {
            return OpOutcome::Contended;
        }
        drop(topo);

        let rewire = {
            let mut topo = self.mesh.write();
            match topo.apply_flip(e) {
                Ok(rewire) => {
                    topo.install_partition(&rewire, parts);
                    rewire
                }
                Err(err) => {
                    drop(topo);
                    topology_fault(&err);
                    return OpOutcome::Unchanged;
                }
            }
        };
        self.settle(&rewire);
        OpOutcome::Changed(Action::Flip)
    }

    fn try_bend(&self, thread: usize, topo: RwLockReadGuard<'_, Topology>, e: EdgeId) -> OpOutcome {
        let Some(inside) = topo.edge(e).and_then(|edge| edge.triangles().next()) else {
            return OpOutcome::Unchanged;
        };
        if topo.triangle_error(inside) <= self.stage_tolerance() {
            return OpOutcome::Unchanged;
        }
        let Some(apex) = topo.bend_apex(e) else {
            return OpOutcome::Unchanged;
        };
        let plan = match topo.plan_bend(e, apex) {
            Ok(plan) => plan,
            Err(err) => {
                topology_fault(&err);
                return OpOutcome::Unchanged;
            }
        };
        if plan.min_angle() < self.params.min_angle() {
            return OpOutcome::Unchanged;
        }
        // The follow-up flip moves the inside triangle's third corner too.
        let mut wide = plan.points.clone();
        if let Some(tri) = topo.triangle(inside) {
            wide.extend(tri.corners().into_iter().filter(|c| !plan.points.contains(c)));
        }
        if !self.lock_neighborhood(thread, &topo, &wide).is_locked() {
            return OpOutcome::Contended;
        }
        drop(topo);
        let parts = plan.partition();

        let mut topo = self.mesh.write();
        let mut rewire = match topo.apply_bend(e, apex) {
            Ok(rewire) => rewire,
            Err(err) => {
                drop(topo);
                topology_fault(&err);
                return OpOutcome::Unchanged;
            }
        };
        topo.install_partition(&rewire, parts);
        self.locks.adopt(thread, &rewire.new_triangles);
        if topo.is_flippable(e) {
            match topo.flip_edge(e) {
                Ok(flipped) => {
                    for p in flipped.points {
                        if !rewire.points.contains(&p) {
                            rewire.points.push(p);
                        }
                    }
                    rewire.families.extend(flipped.families);
                }
                Err(err) => topology_fault(&err),
            }
        }
        drop(topo);
        self.settle(&rewire);
        OpOutcome::Changed(Action::Bend)
    }
}
