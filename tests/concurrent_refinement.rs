//! Concurrency tests for the holder table and the refinement transactions.
//!
//! Several threads hammer one [`Refiner`] directly, without the engine, and
//! the mesh must come out valid with every dot accounted for and nothing
//! left held.

use std::sync::Arc;
use std::thread;

use tinfit::prelude::*;

// =============================================================================
// TEST HELPERS
// =============================================================================

fn ridge_cloud() -> Vec<Xyz> {
    (0..900)
        .map(|i| {
            let (x, y) = (f64::from(i % 30), f64::from(i / 30));
            Xyz::new(x, y, (x * 0.4).sin() + 0.05 * y)
        })
        .collect()
}

fn shared_refiner(cloud: &[Xyz], threads: usize, tolerance: f64) -> Refiner {
    let Bootstrap {
        topology,
        clip,
        density,
        ..
    } = bootstrap(cloud, Angle::from_degrees(12.0)).unwrap();
    let refiner = Refiner::new(
        Arc::new(Mesh::new(topology)),
        threads,
        64,
        RefineParams::default(),
        clip,
        tolerance,
    );
    refiner.adjust_all();
    refiner.set_stage(tolerance, 1.0 / density);
    refiner
}

fn pair() -> Topology {
    Topology::from_triangles(
        vec![
            Xyz::new(0.0, 0.0, 0.0),
            Xyz::new(1.0, 0.0, 0.0),
            Xyz::new(1.0, 1.0, 0.0),
            Xyz::new(0.0, 1.0, 0.0),
        ],
        &[[0, 1, 2], [0, 2, 3]],
        None,
    )
    .unwrap()
}

// =============================================================================
// HOLDER TABLE
// =============================================================================

#[test]
fn failed_claims_leave_the_table_untouched() {
    let topo = pair();
    let locks = LockTable::new(2, 32, 1.0);
    let (t0, t1) = (TriangleId::new(0), TriangleId::new(1));

    assert!(locks.lock(1, &topo, &[t1]).is_locked());
    assert_eq!(locks.lock(0, &topo, &[t0, t1]), LockOutcome::Contended);
    assert_eq!(locks.holder(t0), None);
    assert_eq!(locks.holder(t1), Some(1));
    assert!(locks.held_by(0).is_empty());

    // Claiming again what is already held changes nothing.
    assert!(locks.lock(1, &topo, &[t1]).is_locked());
    assert_eq!(locks.held_by(1), vec![t1]);

    locks.unlock(1);
    assert!(locks.lock(0, &topo, &[t0, t1]).is_locked());
    assert!(locks.holds_all(0, &[t0, t1]));
    locks.unlock(0);
    assert_eq!(locks.holder(t0), None);
    assert_eq!(locks.holder(t1), None);
}

#[test]
fn racing_claims_have_exactly_one_winner() {
    let topo = pair();
    let locks = LockTable::new(8, 32, 1.0);
    let everything = [TriangleId::new(0), TriangleId::new(1)];

    let winners: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|thread| {
                let (topo, locks) = (&topo, &locks);
                scope.spawn(move || usize::from(locks.lock(thread, topo, &everything).is_locked()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(winners, 1);
    let holder = locks.holder(everything[0]).unwrap();
    assert!(locks.holds_all(holder, &everything));
}

// =============================================================================
// STRESS
// =============================================================================

#[test]
fn concurrent_operations_keep_the_mesh_valid() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 3000;

    let cloud = ridge_cloud();
    let refiner = shared_refiner(&cloud, THREADS, 0.05);

    let changed: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|thread| {
                let refiner = &refiner;
                scope.spawn(move || {
                    let mut changed = 0;
                    let (mut e, mut t) = (thread, thread);
                    for _ in 0..ROUNDS {
                        let (edges, triangles) = {
                            let topo = refiner.mesh().read();
                            (topo.number_of_edges(), topo.number_of_triangles())
                        };
                        e = (e + 7 + thread * 2) % edges;
                        t = (t + 5 + thread * 2) % triangles;
                        let outcomes = [
                            refiner.edgeop(thread, EdgeId::new(e)),
                            refiner.triop(thread, TriangleId::new(t)),
                        ];
                        changed += outcomes.iter().filter(|o| o.is_changed()).count();
                        assert!(refiner.locks().held_by(thread).is_empty());
                    }
                    changed
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert!(changed > 0);
    let topo = refiner.mesh().read();
    topo.validate().unwrap();
    assert_eq!(topo.dot_count(), cloud.len());
    for (t, _) in topo.triangles() {
        assert_eq!(refiner.locks().holder(t), None, "triangle {t} still held");
        assert!(topo.geometry(t).area() > 0.0);
    }
}
