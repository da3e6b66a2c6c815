//! Triangle operator: quarter, split or touch up an out-of-tolerance
//! triangle.
//!
//! Quartering is preferred when the dots are bunched (they occupy at most two
//! of the four midpoint quadrants), since a centroid split would leave most
//! of them in one long child. It needs all three neighbors, each large
//! enough to halve. Everything else out of tolerance is split at its
//! centroid, after which the three original sides are offered to
//! [`Refiner::edgeop`]. In coarse stages, triangles already below the
//! stage's minimum area are not subdivided; their corners are re-fitted
//! instead. The final stage subdivides whatever is out of tolerance.

use parking_lot::RwLockReadGuard;

use crate::core::handles::{EdgeId, TriangleId};
use crate::core::operations::Plan;
use crate::core::topology::Topology;
use crate::core::validation::topology_fault;
use crate::refine::refiner::{Action, OpOutcome, Refiner};

/// How a triangle transaction ended.
enum Settled {
    Done(OpOutcome),
    /// Split; the original sides still need an edge pass.
    Split([Option<EdgeId>; 3]),
}

/// True if the dots of `t` fall into at most two midpoint quadrants.
fn bunched(topo: &Topology, t: TriangleId) -> bool {
    let Some(tri) = topo.triangle(t) else {
        return false;
    };
    let geometry = topo.geometry(t);
    let mut seen = [false; 4];
    for dot in tri.dots() {
        seen[geometry.quadrant(dot.xy())] = true;
    }
    seen.iter().filter(|&&s| s).count() <= 2
}

impl Refiner {
    /// Subdivides or touches up `t` if it is out of stage tolerance.
    ///
    /// Releases everything `thread` holds before returning.
    pub fn triop(&self, thread: usize, t: TriangleId) -> OpOutcome {
        let settled = self.triangle_transaction(thread, t);
        self.locks.unlock(thread);
        match settled {
            Settled::Done(outcome) => outcome,
            Settled::Split(sides) => {
                for e in sides.into_iter().flatten() {
                    let _ = self.edgeop(thread, e);
                }
                OpOutcome::Changed(Action::Split)
            }
        }
    }

    fn triangle_transaction(&self, thread: usize, t: TriangleId) -> Settled {
        let topo = self.mesh.read();
        let Some(tri) = topo.triangle(t) else {
            return Settled::Done(OpOutcome::Unchanged);
        };
        let stage = self.stage_tolerance();
        if topo.triangle_error(t) <= stage {
            return Settled::Done(OpOutcome::Unchanged);
        }
        if !self.locks.lock(thread, &topo, &[t]).is_locked() {
            return Settled::Done(OpOutcome::Contended);
        }

        let min_area = self.subdivision_floor();
        if tri.area() < min_area {
            return Settled::Done(self.touch_up(thread, topo, t, stage));
        }
        if let Some(plan) = self.quarter_plan(&topo, t, min_area) {
            return Settled::Done(self.quarter(thread, topo, t, &plan));
        }
        self.split(thread, topo, t)
    }

    /// Re-fits the corners of a triangle too small to subdivide this stage.
    fn touch_up(
        &self,
        thread: usize,
        topo: RwLockReadGuard<'_, Topology>,
        t: TriangleId,
        stage: f64,
    ) -> OpOutcome {
        let Some(corners) = topo.triangle(t).map(|tri| tri.corners()) else {
            return OpOutcome::Unchanged;
        };
        if !self.lock_neighborhood(thread, &topo, &corners).is_locked() {
            return OpOutcome::Contended;
        }
        drop(topo);
        let record = self.adjust(&corners);
        if record.max_movement > stage * self.params.touch_up_fraction {
            OpOutcome::Changed(Action::TouchUp)
        } else {
            OpOutcome::Unchanged
        }
    }

    /// The quarter plan of `t`, if quartering is wanted and allowed.
    fn quarter_plan(&self, topo: &Topology, t: TriangleId, min_area: f64) -> Option<Plan> {
        let tri = topo.triangle(t)?;
        if !bunched(topo, t) {
            return None;
        }
        for n in tri.neighbors() {
            if topo.triangle(n?)?.area() / 2.0 < min_area {
                return None;
            }
        }
        let plan = topo.plan_quarter(t).ok()?;
        (plan.min_angle() >= self.params.min_angle()).then_some(plan)
    }

    fn quarter(
        &self,
        thread: usize,
        topo: RwLockReadGuard<'_, Topology>,
        t: TriangleId,
        plan: &Plan,
    ) -> OpOutcome {
        if !self.lock_neighborhood(thread, &topo, &plan.points).is_locked() {
            return OpOutcome::Contended;
        }
        drop(topo);
        let parts = plan.partition();

        let mut topo = self.mesh.write();
        let rewire = match topo.apply_quarter(t) {
            Ok(rewire) => rewire,
            Err(err) => {
                drop(topo);
                topology_fault(&err);
                return OpOutcome::Unchanged;
            }
        };
        topo.install_partition(&rewire, parts);
        self.locks.adopt(thread, &rewire.new_triangles);
        drop(topo);
        self.settle(&rewire);
        OpOutcome::Changed(Action::Quarter)
    }

    fn split(&self, thread: usize, topo: RwLockReadGuard<'_, Topology>, t: TriangleId) -> Settled {
        let plan = topo.plan_split(t);
        if plan.min_angle() < self.params.min_angle() {
            return Settled::Done(OpOutcome::Unchanged);
        }
        if !self.lock_neighborhood(thread, &topo, &plan.points).is_locked() {
            return Settled::Done(OpOutcome::Contended);
        }
        let sides = [0, 1, 2].map(|i| topo.side(t, i));
        drop(topo);
        let parts = plan.partition();

        let mut topo = self.mesh.write();
        let rewire = topo.apply_split(t);
        topo.install_partition(&rewire, parts);
        self.locks.adopt(thread, &rewire.new_triangles);
        drop(topo);
        self.settle(&rewire);
        Settled::Split(sides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handles::PointId;
    use crate::geometry::point::{Xy, Xyz};
    use crate::refine::refiner::refiner_for;
    use std::sync::Arc;

    /// Grid dots strictly inside the triangle (0,0) (4,0) (0,4), with
    /// elevations from `surface(barycentric)`.
    fn corner_triangle(surface: impl Fn([f64; 3]) -> f64) -> Topology {
        let mut topo = Topology::from_triangles(
            vec![
                Xyz::new(0.0, 0.0, 0.0),
                Xyz::new(4.0, 0.0, 0.0),
                Xyz::new(0.0, 4.0, 0.0),
            ],
            &[[0, 1, 2]],
            None,
        )
        .unwrap();
        let g = topo.geometry(TriangleId::new(0));
        let mut dots = Vec::new();
        for i in 1..40 {
            for j in 1..40 - i {
                let p = Xy::new(f64::from(i) / 10.0, f64::from(j) / 10.0);
                dots.push(p.with_z(surface(g.barycentric(p))));
            }
        }
        topo.install_dots(TriangleId::new(0), Arc::new(dots));
        topo
    }

    /// A large triangle cut into its four midpoint triangles; the middle one
    /// (triangle 0) has a tight cluster of high dots near its centroid.
    fn subdivided() -> Topology {
        let mut topo = Topology::from_triangles(
            vec![
                Xyz::new(0.0, 0.0, 0.0),
                Xyz::new(8.0, 0.0, 0.0),
                Xyz::new(4.0, 8.0, 0.0),
                Xyz::new(4.0, 0.0, 0.0),
                Xyz::new(6.0, 4.0, 0.0),
                Xyz::new(2.0, 4.0, 0.0),
            ],
            &[[3, 4, 5], [0, 3, 5], [3, 1, 4], [5, 4, 2]],
            None,
        )
        .unwrap();
        let dots = vec![
            Xyz::new(4.0, 2.6, 3.0),
            Xyz::new(4.1, 2.7, 3.0),
            Xyz::new(3.9, 2.7, 3.0),
        ];
        topo.install_dots(TriangleId::new(0), Arc::new(dots));
        topo
    }

    #[test]
    fn triangles_within_tolerance_are_left_alone() {
        let refiner = refiner_for(corner_triangle(|_| 0.0), 1);
        assert_eq!(refiner.triop(0, TriangleId::new(0)), OpOutcome::Unchanged);
        assert_eq!(refiner.mesh.read().number_of_triangles(), 1);
    }

    #[test]
    fn pyramid_is_split_and_fitted_exactly() {
        // Peak 1 at the centroid, linear on each of the three split children.
        let topo = corner_triangle(|w| 3.0 * w[0].min(w[1]).min(w[2]));
        let dots = topo.dot_count();
        let refiner = refiner_for(topo, 1);
        assert_eq!(refiner.triop(0, TriangleId::new(0)), OpOutcome::Changed(Action::Split));

        let topo = refiner.mesh.read();
        assert_eq!(topo.number_of_triangles(), 3);
        assert_eq!(topo.number_of_points(), 4);
        assert_eq!(topo.dot_count(), dots);
        topo.validate().unwrap();
        for (t, _) in topo.triangles() {
            assert!(topo.triangle_error(t) < 1e-9);
        }
        assert!((topo.xyz(PointId::new(3)).z - 1.0).abs() < 1e-9);
        drop(topo);
        assert!(refiner.locks().held_by(0).is_empty());
    }

    #[test]
    fn bunched_dots_quarter_the_triangle() {
        let topo = subdivided();
        assert!(bunched(&topo, TriangleId::new(0)));
        let refiner = refiner_for(topo, 1);
        assert_eq!(refiner.triop(0, TriangleId::new(0)), OpOutcome::Changed(Action::Quarter));

        let topo = refiner.mesh.read();
        assert_eq!(topo.number_of_triangles(), 10);
        assert_eq!(topo.number_of_points(), 9);
        assert_eq!(topo.dot_count(), 3);
        topo.validate().unwrap();
    }

    #[test]
    fn small_triangles_are_touched_up() {
        let refiner = refiner_for(corner_triangle(|_| 1.0), 1);
        refiner.set_stage(0.02, 100.0);
        assert_eq!(refiner.triop(0, TriangleId::new(0)), OpOutcome::Changed(Action::TouchUp));
        assert_eq!(refiner.mesh.read().number_of_triangles(), 1);
        assert!(refiner.mesh.read().triangle_error(TriangleId::new(0)) < 1e-9);
        assert_eq!(refiner.triop(0, TriangleId::new(0)), OpOutcome::Unchanged);
    }

    #[test]
    fn final_stage_subdivides_small_triangles() {
        // A touch-up cannot fit the pyramid; only a split can.
        let topo = corner_triangle(|w| 3.0 * w[0].min(w[1]).min(w[2]));
        let refiner = refiner_for(topo, 1);
        refiner.set_stage(0.02, 100.0);
        assert_eq!(refiner.triop(0, TriangleId::new(0)), OpOutcome::Changed(Action::TouchUp));
        assert_eq!(refiner.mesh.read().number_of_triangles(), 1);

        refiner.set_stage(0.01, 100.0);
        assert_eq!(refiner.triop(0, TriangleId::new(0)), OpOutcome::Changed(Action::Split));
        let topo = refiner.mesh.read();
        assert_eq!(topo.number_of_triangles(), 3);
        for (t, _) in topo.triangles() {
            assert!(topo.triangle_error(t) <= 0.01);
        }
    }

    #[test]
    fn slivers_are_not_split() {
        let mut topo = Topology::from_triangles(
            vec![
                Xyz::new(0.0, 0.0, 0.0),
                Xyz::new(10.0, 0.0, 0.0),
                Xyz::new(5.0, 0.01, 0.0),
            ],
            &[[0, 1, 2]],
            None,
        )
        .unwrap();
        topo.install_dots(TriangleId::new(0), Arc::new(vec![Xyz::new(5.0, 0.005, 2.0)]));
        let refiner = refiner_for(topo, 1);
        assert_eq!(refiner.triop(0, TriangleId::new(0)), OpOutcome::Unchanged);
        assert_eq!(refiner.mesh.read().number_of_triangles(), 1);
    }

    #[test]
    fn held_triangle_is_contended() {
        let refiner = refiner_for(corner_triangle(|w| w[0]), 2);
        {
            let topo = refiner.mesh.read();
            assert!(refiner.locks.lock(1, &topo, &[TriangleId::new(0)]).is_locked());
        }
        assert_eq!(refiner.triop(0, TriangleId::new(0)), OpOutcome::Contended);
        assert_eq!(refiner.locks().holder(TriangleId::new(0)), Some(1));
    }
}
