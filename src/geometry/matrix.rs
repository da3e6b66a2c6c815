//! Dense linear algebra for the least-squares elevation fit.
//!
//! Storage is `nalgebra`'s heap matrices; the elimination itself is done here
//! because a rank-deficient system must not fail as a whole. Each unknown whose
//! column has no usable pivot is reported invalid and the others are still
//! solved.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Relative magnitude below which a pivot is treated as zero.
///
/// The threshold is scaled by the largest absolute entry of the matrix being
/// eliminated, so it is independent of the units of the fit.
pub const SINGULARITY_TOLERANCE: f64 = 1e-12;

/// Error type for matrix operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    /// The operands' shapes do not fit together.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Required dimension.
        expected: usize,
        /// Dimension supplied.
        found: usize,
    },
}

/// Solution of a linear system in which some unknowns may be undetermined.
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    /// Solved values; `NaN` where `valid` is false.
    pub values: DVector<f64>,
    /// Whether each unknown had a usable pivot.
    pub valid: Vec<bool>,
}

impl Solution {
    /// True if every unknown was determined.
    #[must_use]
    pub fn all_valid(&self) -> bool {
        self.valid.iter().all(|&v| v)
    }
}

/// `MᵗM` for a design matrix `M`.
#[must_use]
pub fn transpose_multiply(m: &DMatrix<f64>) -> DMatrix<f64> {
    m.tr_mul(m)
}

/// `Mᵗv` for a design matrix `M` and observation vector `v`.
///
/// # Errors
///
/// Returns [`MatrixError::DimensionMismatch`] if `v` does not have one entry
/// per row of `m`.
pub fn transpose_multiply_vector(
    m: &DMatrix<f64>,
    v: &DVector<f64>,
) -> Result<DVector<f64>, MatrixError> {
    if m.nrows() != v.len() {
        return Err(MatrixError::DimensionMismatch {
            expected: m.nrows(),
            found: v.len(),
        });
    }
    Ok(m.tr_mul(v))
}

/// Solves `a x = b` by Gaussian elimination with partial pivot search.
///
/// Both arguments are consumed as scratch. A column whose best remaining pivot
/// is negligible marks its unknown invalid; elimination then continues with the
/// next column using the same pivot row, so the determined unknowns are still
/// solved exactly.
///
/// # Errors
///
/// Returns [`MatrixError::DimensionMismatch`] if `a` is not square or `b` does
/// not match it.
pub fn gauss_eliminate(
    mut a: DMatrix<f64>,
    mut b: DVector<f64>,
) -> Result<Solution, MatrixError> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(MatrixError::DimensionMismatch {
            expected: n,
            found: a.ncols(),
        });
    }
    if b.len() != n {
        return Err(MatrixError::DimensionMismatch {
            expected: n,
            found: b.len(),
        });
    }

    let scale = a.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
    let threshold = scale * SINGULARITY_TOLERANCE;
    let mut valid = vec![false; n];
    // pivot_row[col] is the row that eliminated `col`.
    let mut pivot_row = vec![usize::MAX; n];
    let mut row = 0;

    for col in 0..n {
        if row >= n {
            break;
        }
        let (best, magnitude) = (row..n)
            .map(|r| (r, a[(r, col)].abs()))
            .fold((row, -1.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        if magnitude.is_nan() || magnitude <= threshold || !magnitude.is_finite() {
            continue;
        }
        if best != row {
            a.swap_rows(best, row);
            b.swap_rows(best, row);
        }
        let pivot = a[(row, col)];
        for r in (row + 1)..n {
            let factor = a[(r, col)] / pivot;
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                a[(r, c)] -= factor * a[(row, c)];
            }
            b[r] -= factor * b[row];
        }
        valid[col] = true;
        pivot_row[col] = row;
        row += 1;
    }

    let mut values = DVector::from_element(n, f64::NAN);
    for col in (0..n).rev() {
        if !valid[col] {
            continue;
        }
        let r = pivot_row[col];
        let mut rhs = b[r];
        for c in (col + 1)..n {
            if valid[c] {
                rhs -= a[(r, c)] * values[c];
            }
        }
        let x = rhs / a[(r, col)];
        if x.is_finite() {
            values[col] = x;
        } else {
            valid[col] = false;
        }
    }

    Ok(Solution { values, valid })
}

/// Accumulated normal equations `MᵗM x = Mᵗv` for a sparse design matrix,
/// together with the elevation range of the observations folded in.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalEquations {
    /// `MᵗM`.
    pub mtm: DMatrix<f64>,
    /// `Mᵗv`.
    pub mtv: DVector<f64>,
    /// Lowest observed elevation.
    pub lo: f64,
    /// Highest observed elevation.
    pub hi: f64,
    /// Number of rows folded in.
    pub rows: usize,
}

impl NormalEquations {
    /// Empty equations over `n` unknowns.
    #[must_use]
    pub fn zeros(n: usize) -> Self {
        Self {
            mtm: DMatrix::zeros(n, n),
            mtv: DVector::zeros(n),
            lo: f64::INFINITY,
            hi: f64::NEG_INFINITY,
            rows: 0,
        }
    }

    /// Number of unknowns.
    #[must_use]
    pub fn unknowns(&self) -> usize {
        self.mtv.len()
    }

    /// Folds in one observation row given as `(column, coefficient)` pairs.
    ///
    /// `elevation` only feeds the observed range; `residual` is the
    /// right-hand side.
    pub fn add_row(&mut self, entries: &[(usize, f64)], residual: f64, elevation: f64) {
        for &(i, wi) in entries {
            self.mtv[i] += wi * residual;
            for &(j, wj) in entries {
                self.mtm[(i, j)] += wi * wj;
            }
        }
        self.lo = self.lo.min(elevation);
        self.hi = self.hi.max(elevation);
        self.rows += 1;
    }

    /// Adds another set of partial equations over the same unknowns.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.mtm += other.mtm;
        self.mtv += other.mtv;
        self.lo = self.lo.min(other.lo);
        self.hi = self.hi.max(other.hi);
        self.rows += other.rows;
        self
    }

    /// Solves the accumulated system.
    ///
    /// # Errors
    ///
    /// Propagates [`MatrixError`] from [`gauss_eliminate`]; cannot happen for
    /// equations built by [`NormalEquations::zeros`].
    pub fn solve(&self) -> Result<Solution, MatrixError> {
        gauss_eliminate(self.mtm.clone(), self.mtv.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solves_a_well_conditioned_system() {
        let a = DMatrix::from_row_slice(3, 3, &[2.0, 1.0, -1.0, -3.0, -1.0, 2.0, -2.0, 1.0, 2.0]);
        let b = DVector::from_row_slice(&[8.0, -11.0, -3.0]);
        let sol = gauss_eliminate(a, b).unwrap();
        assert!(sol.all_valid());
        assert_relative_eq!(sol.values[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(sol.values[1], 3.0, epsilon = 1e-12);
        assert_relative_eq!(sol.values[2], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_column_marks_only_that_unknown_invalid() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 3.0]);
        let b = DVector::from_row_slice(&[9.0, 0.0, 7.0]);
        let sol = gauss_eliminate(a, b).unwrap();
        assert_eq!(sol.valid, vec![true, false, true]);
        assert!(sol.values[1].is_nan());
        assert_relative_eq!(sol.values[0], 20.0 / 11.0, epsilon = 1e-12);
        assert_relative_eq!(sol.values[2], 19.0 / 11.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let a = DMatrix::<f64>::zeros(2, 3);
        let b = DVector::<f64>::zeros(2);
        assert_eq!(
            gauss_eliminate(a, b),
            Err(MatrixError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn normal_equations_match_dense_assembly() {
        let rows: [[f64; 3]; 4] = [
            [1.0, 0.0, 0.0],
            [0.5, 0.5, 0.0],
            [0.2, 0.3, 0.5],
            [0.0, 0.0, 1.0],
        ];
        let v = [1.0, 2.0, 3.0, 4.0];
        let m = DMatrix::from_fn(4, 3, |r, c| rows[r][c]);
        let dense = transpose_multiply(&m);
        let dense_v = transpose_multiply_vector(&m, &DVector::from_row_slice(&v)).unwrap();

        let mut ne = NormalEquations::zeros(3);
        for (row, residual) in rows.iter().zip(v) {
            let entries: Vec<(usize, f64)> = row
                .iter()
                .enumerate()
                .filter(|(_, w)| **w != 0.0)
                .map(|(i, w)| (i, *w))
                .collect();
            ne.add_row(&entries, residual, residual);
        }
        assert_relative_eq!(ne.mtm, dense, epsilon = 1e-14);
        assert_relative_eq!(ne.mtv, dense_v, epsilon = 1e-14);
        assert_eq!(ne.rows, 4);
        assert_relative_eq!(ne.lo, 1.0);
        assert_relative_eq!(ne.hi, 4.0);

        let halves = NormalEquations::zeros(3).merge(ne.clone());
        assert_eq!(halves, ne);
    }
}
