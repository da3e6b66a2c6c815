//! Roundoff-resistant summation.
//!
//! Adding millions of residuals one after another lets the running total
//! swamp the small terms. Both functions here instead combine terms as a
//! balanced binary tree, so the error grows with `log n` rather than `n`.

/// Leaf width of the summation tree.
const LEAF: usize = 8;

/// Depth of the carry stack; enough for 2^64 leaves.
const LEVELS: usize = 64;

/// Sums a slice of `f64` by pairwise (tree-structured) addition.
///
/// Terms are added in leaves of eight, then the leaf totals are merged like a
/// binary counter: `carry[k]` holds the sum of `2^k` leaves and is merged
/// upward whenever a second sum of the same size arrives.
///
/// # Examples
///
/// ```
/// use tinfit::geometry::sum::pairwise_sum;
///
/// assert_eq!(pairwise_sum(&[]), 0.0);
/// assert_eq!(pairwise_sum(&[1.0, 2.0, 3.0]), 6.0);
/// ```
#[must_use]
pub fn pairwise_sum(terms: &[f64]) -> f64 {
    let mut carry = [0.0_f64; LEVELS];
    let mut occupied = 0_u64;

    for leaf in terms.chunks(LEAF) {
        let mut acc: f64 = leaf.iter().sum();
        let mut level = 0;
        while occupied & (1 << level) != 0 {
            acc += carry[level];
            carry[level] = 0.0;
            occupied &= !(1 << level);
            level += 1;
        }
        carry[level] = acc;
        occupied |= 1 << level;
    }

    // Smallest partial sums first.
    let mut total = 0.0;
    for (level, value) in carry.iter().enumerate() {
        if occupied & (1 << level) != 0 {
            total += value;
        }
    }
    total
}

/// Pairwise mean; `None` for an empty slice.
#[must_use]
pub fn pairwise_mean(terms: &[f64]) -> Option<f64> {
    if terms.is_empty() {
        None
    } else {
        Some(pairwise_sum(terms) / terms.len() as f64)
    }
}

/// Folds owned values together as a balanced binary tree.
///
/// Adjacent items are combined level by level (`0+1`, `2+3`, ... then the
/// results again), which is what the block scheduler uses to merge partial
/// normal equations without a long left-leaning accumulation chain.
///
/// Returns `None` when `items` is empty.
///
/// # Examples
///
/// ```
/// use tinfit::geometry::sum::pairwise_reduce;
///
/// let total = pairwise_reduce(vec![1_u32, 2, 3, 4, 5], |a, b| a + b);
/// assert_eq!(total, Some(15));
/// ```
pub fn pairwise_reduce<T, F>(mut items: Vec<T>, mut combine: F) -> Option<T>
where
    F: FnMut(T, T) -> T,
{
    while items.len() > 1 {
        let mut next = Vec::with_capacity(items.len().div_ceil(2));
        let mut drain = items.into_iter();
        while let Some(first) = drain.next() {
            match drain.next() {
                Some(second) => next.push(combine(first, second)),
                None => next.push(first),
            }
        }
        items = next;
    }
    items.pop()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sums_small_slices_exactly() {
        assert_eq!(pairwise_sum(&[]), 0.0);
        assert_eq!(pairwise_sum(&[2.5]), 2.5);
        let ints: Vec<f64> = (1..=1000).map(f64::from).collect();
        assert_eq!(pairwise_sum(&ints), 500_500.0);
    }

    #[test]
    fn beats_naive_accumulation_on_many_small_terms() {
        let terms = vec![0.1_f64; 1 << 20];
        let naive: f64 = terms.iter().fold(0.0, |acc, x| acc + x);
        let tree = pairwise_sum(&terms);
        let exact = 0.1 * f64::from(1 << 20);
        assert!((tree - exact).abs() <= (naive - exact).abs());
        assert_relative_eq!(tree, exact, max_relative = 1e-12);
    }

    #[test]
    fn mean_of_empty_is_none() {
        assert!(pairwise_mean(&[]).is_none());
        assert_relative_eq!(pairwise_mean(&[1.0, 2.0, 6.0]).unwrap(), 3.0);
    }

    #[test]
    fn reduce_visits_every_item_once() {
        let items: Vec<Vec<usize>> = (0..37).map(|i| vec![i]).collect();
        let merged = pairwise_reduce(items, |mut a, mut b| {
            a.append(&mut b);
            a
        })
        .unwrap();
        assert_eq!(merged, (0..37).collect::<Vec<_>>());
        assert!(pairwise_reduce(Vec::<u8>::new(), |a, b| a + b).is_none());
    }
}
