//! Property-based tests for the numeric helpers shared by the workers:
//! block decomposition, pairwise summation, traversal strides and the
//! adjustment log.

use proptest::prelude::*;
use tinfit::concurrency::tasks::block_sizes;
use tinfit::engine::strides::{ratio, relprime, Strides};
use tinfit::prelude::*;

// =============================================================================
// TEST CONFIGURATION
// =============================================================================

// Strategy: finite terms of mixed magnitude
fn term() -> impl Strategy<Value = f64> {
    prop_oneof![-1.0e6..1.0e6, -1.0..1.0, Just(0.0)]
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

// =============================================================================
// BLOCK SIZES
// =============================================================================

proptest! {
    #[test]
    fn prop_block_sizes_partition_the_total(total in 0usize..2_000_000) {
        let sizes = block_sizes(total);
        prop_assert_eq!(sizes.iter().sum::<usize>(), total);
        prop_assert!(sizes.iter().all(|&s| s > 0));
        prop_assert_eq!(sizes.is_empty(), total == 0);
    }

    #[test]
    fn prop_block_sizes_front_load_the_work(total in 100_000usize..2_000_000) {
        let sizes = block_sizes(total);
        prop_assert!(sizes.len() >= 2);
        prop_assert!(sizes[0] >= sizes[sizes.len() - 1]);
    }
}

// =============================================================================
// PAIRWISE SUMMATION
// =============================================================================

proptest! {
    #[test]
    fn prop_pairwise_sum_matches_naive_summation(terms in prop::collection::vec(term(), 0..500)) {
        let naive: f64 = terms.iter().sum();
        let magnitude: f64 = terms.iter().map(|t| t.abs()).sum();
        let pairwise = pairwise_sum(&terms);
        prop_assert!((pairwise - naive).abs() <= 1e-12 * magnitude.max(1.0));
    }

    #[test]
    fn prop_pairwise_sum_ignores_order_of_equal_terms(x in term(), n in 1usize..300) {
        let terms = vec![x; n];
        let expected = x * n as f64;
        prop_assert!((pairwise_sum(&terms) - expected).abs() <= 1e-12 * expected.abs().max(1.0));
        prop_assert_eq!(pairwise_mean(&terms).map(f64::is_finite), Some(true));
    }
}

#[test]
fn pairwise_mean_of_nothing_is_undefined() {
    assert_eq!(pairwise_mean(&[]), None);
    assert_eq!(pairwise_sum(&[]), 0.0);
}

// =============================================================================
// STRIDES
// =============================================================================

proptest! {
    #[test]
    fn prop_relprime_is_coprime_and_in_range(n in 3usize..100_000, thread in 0usize..16) {
        let stride = relprime(n, ratio(thread));
        prop_assert!((1..n).contains(&stride));
        prop_assert_eq!(gcd(stride, n), 1);
    }

    #[test]
    fn prop_strides_visit_every_position(n in 1usize..400, thread in 0usize..8, start in any::<usize>()) {
        let mut strides = Strides::new(thread);
        let mut seen = vec![false; n];
        let mut at = start % n;
        for _ in 0..n {
            at = strides.advance(at, n);
            seen[at] = true;
        }
        prop_assert!(seen.into_iter().all(|s| s));
    }
}

#[test]
fn thread_ratios_are_distinct() {
    let ratios: Vec<f64> = (0..12).map(ratio).collect();
    for (i, a) in ratios.iter().enumerate() {
        assert!(*a > 0.0 && *a < 1.0);
        for b in &ratios[i + 1..] {
            assert_ne!(a.to_bits(), b.to_bits());
        }
    }
}

// =============================================================================
// ADJUSTMENT LOG
// =============================================================================

proptest! {
    #[test]
    fn prop_log_stays_within_its_bound(
        scale in 0usize..1_000_000,
        entries in prop::collection::vec(0.0..1.0_f64, 0..3000),
    ) {
        let log = AdjustmentLog::new(scale);
        for ms in &entries {
            log.append(AdjustRecord {
                valid_matrix: true,
                ms_adjustment: *ms,
                max_movement: ms.sqrt(),
            });
            prop_assert!(log.len() <= log.bound());
        }
        prop_assert_eq!(log.is_empty(), entries.is_empty());
        if let Some(rms) = log.recent_rms() {
            prop_assert!((0.0..1.0).contains(&rms));
        }
    }
}
