//! Property-based tests for the refinement transactions.
//!
//! Arbitrary sequences of edge and triangle operations, applied to meshes
//! bootstrapped from random clouds, must keep the mesh structurally valid,
//! conserve every dot and leave no triangle held afterwards.

use std::sync::Arc;

use proptest::prelude::*;
use tinfit::prelude::*;

// =============================================================================
// TEST CONFIGURATION
// =============================================================================

// Strategy: a sample inside a 40 × 40 survey with modest relief
fn sample() -> impl Strategy<Value = Xyz> {
    (0.0..40.0_f64, 0.0..40.0_f64, -3.0..3.0_f64).prop_map(|(x, y, z)| Xyz::new(x, y, z))
}

// Strategy: an edge (false) or triangle (true) operation at an arbitrary
// position, reduced modulo the current element count
fn operation() -> impl Strategy<Value = (bool, usize)> {
    (any::<bool>(), any::<usize>())
}

fn refiner_for(cloud: &[Xyz], orientation: i32, tolerance: f64) -> Option<Refiner> {
    let Bootstrap { topology, clip, .. } = bootstrap(cloud, Angle(orientation)).ok()?;
    let refiner = Refiner::new(
        Arc::new(Mesh::new(topology)),
        1,
        64,
        RefineParams::default(),
        clip,
        tolerance,
    );
    refiner.adjust_all();
    refiner.set_stage(tolerance, 0.0);
    Some(refiner)
}

fn apply(refiner: &Refiner, (triangle, at): (bool, usize)) -> OpOutcome {
    let (edges, triangles) = {
        let topo = refiner.mesh().read();
        (topo.number_of_edges(), topo.number_of_triangles())
    };
    if triangle {
        refiner.triop(0, TriangleId::new(at % triangles))
    } else {
        refiner.edgeop(0, EdgeId::new(at % edges))
    }
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_operations_preserve_the_mesh(
        cloud in prop::collection::vec(sample(), 12..120),
        orientation in any::<i32>(),
        ops in prop::collection::vec(operation(), 1..60),
    ) {
        let Some(refiner) = refiner_for(&cloud, orientation, 0.05) else {
            return Ok(());
        };
        for op in ops {
            let outcome = apply(&refiner, op);
            prop_assert_ne!(outcome, OpOutcome::Contended);
            prop_assert!(refiner.locks().held_by(0).is_empty());

            let topo = refiner.mesh().read();
            prop_assert!(topo.validate().is_ok(), "{:?}", topo.validate());
            prop_assert_eq!(topo.dot_count(), cloud.len());
        }
    }

    #[test]
    fn prop_changes_keep_every_triangle_positive(
        cloud in prop::collection::vec(sample(), 30..100),
        orientation in any::<i32>(),
        ops in prop::collection::vec(operation(), 1..40),
    ) {
        let Some(refiner) = refiner_for(&cloud, orientation, 0.02) else {
            return Ok(());
        };
        for op in ops {
            if !apply(&refiner, op).is_changed() {
                continue;
            }
            let topo = refiner.mesh().read();
            for (t, _) in topo.triangles() {
                let g = topo.geometry(t);
                prop_assert!(g.area() > 0.0, "triangle {} has area {}", t, g.area());
            }
        }
    }

    #[test]
    fn prop_triangles_meeting_the_stage_are_left_alone(
        cloud in prop::collection::vec(sample(), 12..80),
        orientation in any::<i32>(),
    ) {
        // Corner elevations stay within the clip limits, so no residual can
        // come near 100.
        let Some(refiner) = refiner_for(&cloud, orientation, 100.0) else {
            return Ok(());
        };
        let triangles = refiner.mesh().read().number_of_triangles();
        for t in 0..triangles {
            prop_assert_eq!(refiner.triop(0, TriangleId::new(t)), OpOutcome::Unchanged);
        }
        prop_assert_eq!(refiner.mesh().read().number_of_triangles(), triangles);
    }
}
