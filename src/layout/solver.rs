//! Sparse symmetric linear solve for the centering system
//!
//! Compressed-row storage plus a Jacobi-preconditioned conjugate gradient.
//! The centering system is diagonal today, but the solver accepts any
//! symmetric positive definite matrix so coupled constraints can be added as
//! extra off-diagonal triplets.

use crate::error::SolverError;

/// Square matrix in compressed sparse row form
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    dim: usize,
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMatrix {
    /// Build from `(row, col, value)` triplets; duplicates are summed
    ///
    /// Triplets outside `dim x dim` are ignored.
    pub fn from_triplets(dim: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut sorted: Vec<(usize, usize, f64)> = triplets
            .iter()
            .copied()
            .filter(|&(r, c, _)| r < dim && c < dim)
            .collect();
        sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_ptr = vec![0usize; dim + 1];
        let mut cols: Vec<usize> = Vec::with_capacity(sorted.len());
        let mut values: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;

        for (row, col, value) in sorted {
            if last == Some((row, col)) {
                if let Some(v) = values.last_mut() {
                    *v += value;
                }
                continue;
            }
            last = Some((row, col));
            cols.push(col);
            values.push(value);
            row_ptr[row + 1] += 1;
        }
        for row in 0..dim {
            row_ptr[row + 1] += row_ptr[row];
        }

        Self {
            dim,
            row_ptr,
            cols,
            values,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Stored entries (after duplicate folding)
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Entry at `(row, row)`, zero when absent
    pub fn diagonal(&self, row: usize) -> f64 {
        let span = self.row_ptr[row]..self.row_ptr[row + 1];
        self.cols[span.clone()]
            .iter()
            .zip(&self.values[span])
            .find(|(c, _)| **c == row)
            .map_or(0.0, |(_, v)| *v)
    }

    /// `out = self * x`
    pub fn mul_vec(&self, x: &[f64], out: &mut [f64]) {
        for (row, slot) in out.iter_mut().enumerate().take(self.dim) {
            let span = self.row_ptr[row]..self.row_ptr[row + 1];
            *slot = self.cols[span.clone()]
                .iter()
                .zip(&self.values[span])
                .map(|(c, v)| v * x[*c])
                .sum();
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Preconditioned conjugate gradient settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConjugateGradient {
    pub max_iterations: usize,
    /// Relative residual `|r| / |b|` accepted as converged
    pub tolerance: f64,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-6,
        }
    }
}

impl ConjugateGradient {
    /// Check that the Jacobi preconditioner exists; returns inverse diagonal
    fn factorize(&self, a: &SparseMatrix) -> Result<Vec<f64>, SolverError> {
        (0..a.dim())
            .map(|row| {
                let d = a.diagonal(row);
                if d.is_finite() && d > 0.0 {
                    Ok(1.0 / d)
                } else {
                    Err(SolverError::Factorization { row, value: d })
                }
            })
            .collect()
    }

    /// Solve `a * x = b`
    pub fn solve(&self, a: &SparseMatrix, b: &[f64]) -> Result<Vec<f64>, SolverError> {
        let n = a.dim();
        if b.len() != n {
            return Err(SolverError::Dimension {
                rows: n,
                rhs: b.len(),
            });
        }
        let inv_diag = self.factorize(a)?;

        let mut x = vec![0.0; n];
        let b_norm = dot(b, b).sqrt();
        if b_norm == 0.0 {
            return Ok(x);
        }

        let mut r = b.to_vec();
        let mut z: Vec<f64> = r.iter().zip(&inv_diag).map(|(r, m)| r * m).collect();
        let mut p = z.clone();
        let mut rz = dot(&r, &z);
        let mut ap = vec![0.0; n];
        let mut residual = b_norm;

        for _ in 0..self.max_iterations {
            a.mul_vec(&p, &mut ap);
            let curvature = dot(&p, &ap);
            if !(curvature.is_finite() && curvature > 0.0) {
                break;
            }
            let alpha = rz / curvature;
            for i in 0..n {
                x[i] += alpha * p[i];
                r[i] -= alpha * ap[i];
            }

            residual = dot(&r, &r).sqrt();
            if residual <= self.tolerance * b_norm {
                return Ok(x);
            }

            for i in 0..n {
                z[i] = r[i] * inv_diag[i];
            }
            let rz_next = dot(&r, &z);
            let beta = rz_next / rz;
            rz = rz_next;
            for i in 0..n {
                p[i] = z[i] + beta * p[i];
            }
        }

        Err(SolverError::NotConverged {
            iterations: self.max_iterations,
            residual: residual / b_norm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triplets_fold_duplicates() {
        let m = SparseMatrix::from_triplets(2, &[(0, 0, 1.0), (1, 1, 2.0), (0, 0, 3.0)]);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.diagonal(0), 4.0);
        assert_eq!(m.diagonal(1), 2.0);
    }

    #[test]
    fn multiplies_vectors() {
        let m = SparseMatrix::from_triplets(
            2,
            &[(0, 0, 2.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)],
        );
        let mut out = vec![0.0; 2];
        m.mul_vec(&[1.0, 2.0], &mut out);
        assert_eq!(out, vec![4.0, 7.0]);
    }

    #[test]
    fn solves_diagonal_system() {
        let m = SparseMatrix::from_triplets(3, &[(0, 0, 2.0), (1, 1, 4.0), (2, 2, 0.5)]);
        let x = ConjugateGradient::default()
            .solve(&m, &[2.0, 2.0, 2.0])
            .unwrap();
        assert!((x[0] - 1.0).abs() < 1e-9);
        assert!((x[1] - 0.5).abs() < 1e-9);
        assert!((x[2] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn solves_coupled_spd_system() {
        // [4 1; 1 3] x = [1; 2]  =>  x = [1/11, 7/11]
        let m = SparseMatrix::from_triplets(
            2,
            &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)],
        );
        let x = ConjugateGradient::default().solve(&m, &[1.0, 2.0]).unwrap();
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-6);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-6);
    }

    #[test]
    fn zero_rhs_short_circuits() {
        let m = SparseMatrix::from_triplets(2, &[(0, 0, 1.0), (1, 1, 1.0)]);
        let x = ConjugateGradient::default().solve(&m, &[0.0, 0.0]).unwrap();
        assert_eq!(x, vec![0.0, 0.0]);
    }

    #[test]
    fn non_positive_diagonal_fails_factorization() {
        let m = SparseMatrix::from_triplets(2, &[(0, 0, 1.0), (1, 1, -0.5)]);
        let err = ConjugateGradient::default().solve(&m, &[1.0, 1.0]).unwrap_err();
        assert_eq!(err, SolverError::Factorization { row: 1, value: -0.5 });
    }

    #[test]
    fn missing_diagonal_fails_factorization() {
        let m = SparseMatrix::from_triplets(2, &[(0, 0, 1.0)]);
        assert!(matches!(
            ConjugateGradient::default().solve(&m, &[1.0, 1.0]),
            Err(SolverError::Factorization { row: 1, .. })
        ));
    }

    #[test]
    fn non_finite_rhs_does_not_converge() {
        let m = SparseMatrix::from_triplets(1, &[(0, 0, 1.0)]);
        assert!(matches!(
            ConjugateGradient::default().solve(&m, &[f64::NAN]),
            Err(SolverError::NotConverged { .. })
        ));
    }

    #[test]
    fn rejects_wrong_rhs_length() {
        let m = SparseMatrix::from_triplets(2, &[(0, 0, 1.0), (1, 1, 1.0)]);
        assert_eq!(
            ConjugateGradient::default().solve(&m, &[1.0]),
            Err(SolverError::Dimension { rows: 2, rhs: 1 })
        );
    }
}
