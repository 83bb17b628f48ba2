//! Sparse matrix types and operations.
//!
//! Wrappers and utilities for sparse matrices in CSC (Compressed Sparse
//! Column) format, plus the handful of dense vector kernels the
//! active-set iteration is built from.

use sprs::{CsMat, TriMat};

/// Sparse matrix in CSC format (general, not necessarily symmetric).
pub type SparseCsc = CsMat<f64>;

/// Build a sparse CSC matrix from triplets (row, col, value).
///
/// # Arguments
///
/// * `nrows` - Number of rows
/// * `ncols` - Number of columns
/// * `triplets` - Iterator of (row, col, value) tuples
pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> SparseCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((nrows, ncols));
    for (i, j, v) in triplets {
        tri.add_triplet(i, j, v);
    }
    tri.to_csc()
}

/// Transpose a CSC matrix into a new CSC matrix.
pub fn transpose(a: &SparseCsc) -> SparseCsc {
    let mut tri = TriMat::new((a.cols(), a.rows()));
    for (val, (row, col)) in a.iter() {
        tri.add_triplet(col, row, *val);
    }
    tri.to_csc()
}

/// Accumulating matrix-vector product: y += A * x
pub fn spmv_acc(a: &SparseCsc, x: &[f64], y: &mut [f64]) {
    assert_eq!(a.cols(), x.len());
    assert_eq!(a.rows(), y.len());
    for (val, (row, col)) in a.iter() {
        y[row] += *val * x[col];
    }
}

/// Accumulating transpose-vector product: y += A^T * x
pub fn spmv_t_acc(a: &SparseCsc, x: &[f64], y: &mut [f64]) {
    assert_eq!(a.rows(), x.len());
    assert_eq!(a.cols(), y.len());
    for col_idx in 0..a.cols() {
        if let Some(col) = a.outer_view(col_idx) {
            for (row_idx, &val) in col.iter() {
                y[col_idx] += val * x[row_idx];
            }
        }
    }
}

/// Bilinear form x^T H y.
pub fn bilin(h: &SparseCsc, x: &[f64], y: &[f64]) -> f64 {
    assert_eq!(h.rows(), x.len());
    assert_eq!(h.cols(), y.len());
    let mut acc = 0.0;
    for (val, (row, col)) in h.iter() {
        acc += *val * x[row] * y[col];
    }
    acc
}

/// Dense dot product.
#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(ai, bi)| ai * bi).sum()
}

/// y += alpha * x
#[inline]
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x.iter()) {
        *yi += alpha * xi;
    }
}

/// x *= alpha
#[inline]
pub fn scal(alpha: f64, x: &mut [f64]) {
    for xi in x.iter_mut() {
        *xi *= alpha;
    }
}

/// Infinity norm of a dense vector.
#[inline]
pub fn inf_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x.abs()).fold(0.0_f64, f64::max)
}
