//! Rank-revealing factorization kernel.
//!
//! Householder QR over the scattered KKT values, owned by a reusable
//! kernel struct: construct once per solve with all buffers, refactor
//! each iteration. Beyond the plain solves, the active-set iteration
//! needs two things most factorization backends do not expose:
//!
//! - a smallest-diagonal singularity witness (which column went
//!   deficient, and by how much), and
//! - extraction of a null-space column combination associated with a
//!   deficient column, by back-substitution that skips deficient
//!   diagonals.

use thiserror::Error;

/// Factorization kernel errors.
#[derive(Error, Debug)]
pub enum QrError {
    /// Input arrays do not describe an n × n CSC matrix.
    #[error("factor input has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// A row index is outside the matrix dimension.
    #[error("row index {index} out of range for dimension {n}")]
    RowIndexOutOfRange {
        /// Offending row index
        index: usize,
        /// Matrix dimension
        n: usize,
    },
}

/// Deficiency report from [`QrFactor::diagnose`].
#[derive(Debug, Clone, Copy)]
pub struct Deficiency {
    /// Number of diagonal entries of R below the tolerance in magnitude.
    pub nullity: usize,
    /// Smallest diagonal magnitude.
    pub mina: f64,
    /// Column index of the smallest diagonal.
    pub imina: usize,
}

/// Householder QR factorization of a square matrix.
///
/// The factor storage is column-major: R on and above the diagonal,
/// normalized reflector vectors below it (implicit unit leading entry),
/// with the reflector scalars kept separately. All buffers are allocated
/// at construction and reused across refactorizations.
pub struct QrFactor {
    /// Matrix dimension
    n: usize,

    /// Dense factor storage (n * n, column-major)
    fac: Vec<f64>,

    /// Reflector scalars (one per column)
    beta: Vec<f64>,
}

impl QrFactor {
    /// Create a kernel for n × n systems.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            fac: vec![0.0; n * n],
            beta: vec![0.0; n],
        }
    }

    /// Factorize the CSC matrix given by `(colptr, rowind, values)`, or
    /// its transpose. Overwrites any previous factorization.
    pub fn factor(
        &mut self,
        colptr: &[usize],
        rowind: &[usize],
        values: &[f64],
        transpose: bool,
    ) -> Result<(), QrError> {
        let n = self.n;
        if colptr.len() != n + 1 {
            return Err(QrError::DimensionMismatch {
                expected: n + 1,
                actual: colptr.len(),
            });
        }
        if values.len() != rowind.len() || values.len() < colptr[n] {
            return Err(QrError::DimensionMismatch {
                expected: colptr[n],
                actual: values.len(),
            });
        }

        // Scatter into the dense working matrix
        self.fac.fill(0.0);
        for c in 0..n {
            for k in colptr[c]..colptr[c + 1] {
                let r = rowind[k];
                if r >= n {
                    return Err(QrError::RowIndexOutOfRange { index: r, n });
                }
                if transpose {
                    self.fac[r * n + c] = values[k];
                } else {
                    self.fac[c * n + r] = values[k];
                }
            }
        }

        // Householder elimination, column by column
        for k in 0..n {
            let colk = k * n;
            let alpha = self.fac[colk + k];
            let mut sigma = 0.0;
            for i in k + 1..n {
                sigma += self.fac[colk + i] * self.fac[colk + i];
            }
            if sigma == 0.0 {
                // Column already triangular; R[k,k] = alpha as-is
                self.beta[k] = 0.0;
                continue;
            }
            let norm = (alpha * alpha + sigma).sqrt();
            // v0 = alpha + sign(alpha) * norm avoids cancellation
            let v0 = if alpha >= 0.0 {
                alpha + norm
            } else {
                alpha - norm
            };
            for i in k + 1..n {
                self.fac[colk + i] /= v0;
            }
            self.beta[k] = 2.0 * v0 * v0 / (v0 * v0 + sigma);
            self.fac[colk + k] = if alpha >= 0.0 { -norm } else { norm };

            // Apply the reflector to the remaining columns
            for j in k + 1..n {
                let colj = j * n;
                let mut w = self.fac[colj + k];
                for i in k + 1..n {
                    w += self.fac[colk + i] * self.fac[colj + i];
                }
                w *= self.beta[k];
                self.fac[colj + k] -= w;
                for i in k + 1..n {
                    self.fac[colj + i] -= w * self.fac[colk + i];
                }
            }
        }
        Ok(())
    }

    /// Inspect the triangular factor's diagonal for rank deficiency.
    pub fn diagnose(&self, tol: f64) -> Deficiency {
        let mut mina = f64::INFINITY;
        let mut imina = 0;
        let mut nullity = 0;
        for i in 0..self.n {
            let d = self.fac[i * self.n + i].abs();
            if d < tol {
                nullity += 1;
            }
            if d < mina {
                mina = d;
                imina = i;
            }
        }
        Deficiency {
            nullity,
            mina,
            imina,
        }
    }

    /// Apply the k-th reflector to a dense vector in place.
    fn apply_reflector(&self, k: usize, x: &mut [f64]) {
        if self.beta[k] == 0.0 {
            return;
        }
        let colk = k * self.n;
        let mut w = x[k];
        for i in k + 1..self.n {
            w += self.fac[colk + i] * x[i];
        }
        w *= self.beta[k];
        x[k] -= w;
        for i in k + 1..self.n {
            x[i] -= w * self.fac[colk + i];
        }
    }

    /// Solve M x = b in place (b enters in `x`). The factorization must
    /// be nonsingular.
    pub fn solve(&self, x: &mut [f64]) {
        assert_eq!(x.len(), self.n);
        // x <- Q^T b
        for k in 0..self.n {
            self.apply_reflector(k, x);
        }
        // Back-substitute R x = Q^T b
        for i in (0..self.n).rev() {
            let mut s = x[i];
            for j in i + 1..self.n {
                s -= self.fac[j * self.n + i] * x[j];
            }
            x[i] = s / self.fac[i * self.n + i];
        }
    }

    /// Solve M^T x = b in place (b enters in `x`). The factorization
    /// must be nonsingular.
    pub fn solve_transposed(&self, x: &mut [f64]) {
        assert_eq!(x.len(), self.n);
        // Forward-substitute R^T y = b
        for i in 0..self.n {
            let mut s = x[i];
            for j in 0..i {
                s -= self.fac[i * self.n + j] * x[j];
            }
            x[i] = s / self.fac[i * self.n + i];
        }
        // x <- Q y
        for k in (0..self.n).rev() {
            self.apply_reflector(k, x);
        }
    }

    /// Write the k-th null-space column combination into `out`.
    ///
    /// `witness` is the deficient column from [`QrFactor::diagnose`]; it
    /// is used for k = 0, further deficient columns (in index order) for
    /// k > 0. The result is unit-normalized and satisfies M * out ≈ 0 to
    /// the accuracy of the deficiency.
    pub fn null_combination(&self, out: &mut [f64], witness: usize, k: usize, tol: f64) {
        let n = self.n;
        assert_eq!(out.len(), n);
        let mut target = witness;
        if k > 0 {
            let mut seen = 0;
            for i in 0..n {
                if i == witness {
                    continue;
                }
                if self.fac[i * n + i].abs() < tol {
                    seen += 1;
                    if seen == k {
                        target = i;
                        break;
                    }
                }
            }
        }

        out.fill(0.0);
        out[target] = 1.0;
        for i in (0..target).rev() {
            let d = self.fac[i * n + i];
            if d.abs() < tol {
                out[i] = 0.0;
                continue;
            }
            let mut s = 0.0;
            for j in i + 1..=target {
                s += self.fac[j * n + i] * out[j];
            }
            out[i] = -s / d;
        }

        let nrm = out.iter().map(|v| v * v).sum::<f64>().sqrt();
        if nrm > 0.0 {
            for v in out.iter_mut() {
                *v /= nrm;
            }
        }
    }
}
