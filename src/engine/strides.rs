//! Per-worker visiting strides.
//!
//! A worker walks the edge and triangle arrays with a fixed stride that is
//! relatively prime to the array's length, so it visits every element once
//! per lap. Each worker's stride is the integer nearest `n·r` that is coprime
//! to `n`, with `r` the fractional part of a different quadratic irrational
//! per worker. Irrational ratios keep consecutive visits far apart; distinct
//! ratios keep workers out of each other's way.

use crate::core::collections::FastHashMap;

/// `1/φ`, the ratio of worker 0.
const INVERSE_GOLDEN: f64 = 0.618_033_988_749_894_8;

/// Ratios closer than this to 0 or 1 give strides too short to mix.
const EDGE_MARGIN: f64 = 0.1;

/// Greatest common divisor.
#[must_use]
pub const fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Ratio of worker `thread`: `1/φ` for worker 0, then the fractional parts
/// of `√2, √3, √5, √6, …`, skipping those too near 0 or 1.
#[must_use]
pub fn ratio(thread: usize) -> f64 {
    if thread == 0 {
        return INVERSE_GOLDEN;
    }
    let mut seen = 0;
    let mut n = 2_u32;
    loop {
        let root = f64::from(n).sqrt();
        let frac = root.fract();
        if frac != 0.0 && (EDGE_MARGIN..=1.0 - EDGE_MARGIN).contains(&frac) {
            seen += 1;
            if seen == thread {
                return frac;
            }
        }
        n += 1;
    }
}

/// The integer nearest `n·ratio` that is relatively prime to `n`.
///
/// Candidates are tried in order of distance, alternating sides. Returns 0
/// for `n = 0` and 1 for `n ≤ 2`.
#[must_use]
pub fn relprime(n: usize, ratio: f64) -> usize {
    if n == 0 {
        return 0;
    }
    if n <= 2 {
        return 1;
    }
    let exact = n as f64 * ratio;
    let mut below = exact.floor() as usize;
    let mut above = below + 1;
    loop {
        let below_ok = below >= 1;
        let above_ok = above < n;
        let take_below = below_ok && (!above_ok || exact - below as f64 <= above as f64 - exact);
        let candidate = if take_below { below } else { above };
        if gcd(candidate, n) == 1 {
            return candidate;
        }
        if take_below {
            below -= 1;
        } else {
            above += 1;
        }
    }
}

/// One worker's stride cache.
#[derive(Clone, Debug)]
pub struct Strides {
    ratio: f64,
    cache: FastHashMap<usize, usize>,
}

impl Strides {
    /// Strides of worker `thread`.
    #[must_use]
    pub fn new(thread: usize) -> Self {
        Self {
            ratio: ratio(thread),
            cache: FastHashMap::default(),
        }
    }

    /// Stride for an array of length `n`.
    pub fn stride(&mut self, n: usize) -> usize {
        let ratio = self.ratio;
        *self.cache.entry(n).or_insert_with(|| relprime(n, ratio))
    }

    /// `at` advanced by one stride in an array of length `n`, or 0 if the
    /// array is empty.
    pub fn advance(&mut self, at: usize, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (at % n + self.stride(n)) % n
    }
}
