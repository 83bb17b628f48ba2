//! KKT matrix assembly and factorization.
//!
//! For each index i the KKT matrix carries either the *free* row of the
//! block system [[H, A^T], [A, -I]] or an identity row pinning the
//! index, depending on whether lam[i] is zero. The symbolic pattern is
//! the union of both alternatives per index, fixed for the whole solve;
//! only the values change with the active set.
//!
//! Storage note: the matrix is kept in CSC with *column* i holding
//! activity row i, i.e. the stored matrix is the transpose of the block
//! form above. The step computation therefore uses the transposed
//! solve, while the flip independence check uses the direct solve.

use crate::active_set::workspace::{QpData, Workspace};
use crate::active_set::RANK_TOL;
use crate::linalg::sparse::SparseCsc;
use crate::problem::QpError;

/// KKT matrix in CSC with a fixed symbolic pattern.
pub(crate) struct KktMatrix {
    /// Dimension (nx + na)
    pub n: usize,
    /// Column pointers (n + 1)
    pub colptr: Vec<usize>,
    /// Row indices, sorted within each column
    pub rowind: Vec<usize>,
    /// Nonzero values, rewritten each assembly
    pub values: Vec<f64>,
}

/// Build the symbolic pattern. Column i < nx holds the union of the
/// Hessian column, the diagonal, and the Jacobian column shifted into
/// the lower block; column nx + r holds Jacobian row r and the diagonal.
pub(crate) fn kkt_pattern(h: &SparseCsc, a: &SparseCsc, at: &SparseCsc) -> KktMatrix {
    let nx = h.cols();
    let na = at.cols();
    let n = nx + na;

    let mut colptr = Vec::with_capacity(n + 1);
    let mut rowind = Vec::new();
    colptr.push(0);

    for i in 0..nx {
        // Hessian column merged with the diagonal entry
        let mut has_diag = false;
        if let Some(col) = h.outer_view(i) {
            for (r, _) in col.iter() {
                if !has_diag && r > i {
                    rowind.push(i);
                    has_diag = true;
                } else if r == i {
                    has_diag = true;
                }
                rowind.push(r);
            }
        }
        if !has_diag {
            rowind.push(i);
        }
        // Jacobian column, shifted into the lower block
        if let Some(col) = a.outer_view(i) {
            for (r, _) in col.iter() {
                rowind.push(nx + r);
            }
        }
        colptr.push(rowind.len());
    }

    for r in 0..na {
        // Jacobian row r lives in the upper block of this column
        if let Some(col) = at.outer_view(r) {
            for (j, _) in col.iter() {
                rowind.push(j);
            }
        }
        rowind.push(nx + r);
        colptr.push(rowind.len());
    }

    let nnz = rowind.len();
    KktMatrix {
        n,
        colptr,
        rowind,
        values: vec![0.0; nnz],
    }
}

/// Refresh the KKT values for the current multiplier signs. Each
/// activity row is scattered into the dense scratch `w` by index, then
/// gathered into the CSC nonzeros while zeroing `w` again, so assembly
/// is O(nnz) with no per-row allocation.
pub(crate) fn assemble(data: &QpData, lam: &[f64], kkt: &mut KktMatrix, w: &mut [f64]) {
    let nx = data.nx;
    assert_eq!(w.len(), kkt.n);
    w.fill(0.0);
    for i in 0..data.nz {
        if i < nx {
            if lam[i] == 0.0 {
                if let Some(col) = data.h.outer_view(i) {
                    for (r, &v) in col.iter() {
                        w[r] = v;
                    }
                }
                if let Some(col) = data.a.outer_view(i) {
                    for (r, &v) in col.iter() {
                        w[nx + r] = v;
                    }
                }
            } else {
                w[i] = 1.0;
            }
        } else if lam[i] == 0.0 {
            w[i] = -1.0;
        } else if let Some(col) = data.at.outer_view(i - nx) {
            for (r, &v) in col.iter() {
                w[r] = v;
            }
        }
        for k in kkt.colptr[i]..kkt.colptr[i + 1] {
            kkt.values[k] = w[kkt.rowind[k]];
            w[kkt.rowind[k]] = 0.0;
        }
    }
}

/// Write the dense KKT column for index `i` under the hypothetical
/// activity `sign` (0 inactive, nonzero pinned) into `out`.
pub(crate) fn column(data: &QpData, out: &mut [f64], i: usize, sign: i32) {
    let nx = data.nx;
    out.fill(0.0);
    if i < nx {
        if sign == 0 {
            if let Some(col) = data.h.outer_view(i) {
                for (r, &v) in col.iter() {
                    out[r] = v;
                }
            }
            if let Some(col) = data.a.outer_view(i) {
                for (r, &v) in col.iter() {
                    out[nx + r] = v;
                }
            }
        } else {
            out[i] = 1.0;
        }
    } else if sign == 0 {
        out[i] = -1.0;
    } else if let Some(col) = data.at.outer_view(i - nx) {
        for (r, &v) in col.iter() {
            out[r] = v;
        }
    }
}

/// Dot product of `v` with the hypothetical KKT column for index `i`
/// under activity `sign`, without materializing the column.
pub(crate) fn dot(data: &QpData, v: &[f64], i: usize, sign: i32) -> f64 {
    let nx = data.nx;
    if i < nx {
        if sign == 0 {
            let mut d = 0.0;
            if let Some(col) = data.h.outer_view(i) {
                for (r, &val) in col.iter() {
                    d += v[r] * val;
                }
            }
            if let Some(col) = data.a.outer_view(i) {
                for (r, &val) in col.iter() {
                    d += v[nx + r] * val;
                }
            }
            d
        } else {
            v[i]
        }
    } else if sign == 0 {
        -v[i]
    } else {
        let mut d = 0.0;
        if let Some(col) = data.at.outer_view(i - nx) {
            for (r, &val) in col.iter() {
                d += v[r] * val;
            }
        }
        d
    }
}

/// Right-hand side of the step equation: distance to the active bound
/// for pinned indices, the multiplier (minus the stationarity residual
/// for variables) for free ones.
pub(crate) fn residual(data: &QpData, z: &[f64], lam: &[f64], infeas: &[f64], out: &mut [f64]) {
    for i in 0..data.nz {
        if lam[i] > 0.0 {
            out[i] = data.ubz[i] - z[i];
        } else if lam[i] < 0.0 {
            out[i] = data.lbz[i] - z[i];
        } else if i < data.nx {
            out[i] = lam[i] - infeas[i];
        } else {
            out[i] = lam[i];
        }
    }
}

/// Assemble and factorize the KKT matrix, recording the singularity
/// diagnosis in the workspace.
pub(crate) fn factorize(data: &QpData, ws: &mut Workspace) -> Result<(), QpError> {
    assemble(data, &ws.lam, &mut ws.kkt, &mut ws.w);
    ws.qr
        .factor(&ws.kkt.colptr, &ws.kkt.rowind, &ws.kkt.values, false)?;
    let def = ws.qr.diagnose(RANK_TOL);
    ws.nullity = def.nullity;
    ws.mina = def.mina;
    ws.imina = def.imina;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;
    use crate::problem::{QpProblem, SolverSettings};

    fn problem() -> QpProblem {
        QpProblem {
            // H = [[2, 1], [1, 2]]
            h: sparse::from_triplets(
                2,
                2,
                vec![(0, 0, 2.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 2.0)],
            ),
            g: vec![0.0, 0.0],
            // A = [[1, -1]]
            a: sparse::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, -1.0)]),
            lbx: vec![0.0, 0.0],
            ubx: vec![2.0, 2.0],
            lba: vec![-1.0],
            uba: vec![1.0],
        }
    }

    fn dense_column(kkt: &KktMatrix, i: usize) -> Vec<f64> {
        let mut col = vec![0.0; kkt.n];
        for k in kkt.colptr[i]..kkt.colptr[i + 1] {
            col[kkt.rowind[k]] = kkt.values[k];
        }
        col
    }

    #[test]
    fn test_pattern_fixed_across_activity() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let mut kkt = kkt_pattern(data.h, data.a, &data.at);
        let mut w = vec![0.0; data.nz];

        let pattern: Vec<usize> = kkt.rowind.clone();
        let colptr: Vec<usize> = kkt.colptr.clone();

        for lam in [
            vec![0.0, 0.0, 0.0],
            vec![1.0, -1.0, 1.0],
            vec![0.0, 1.0, -1.0],
        ] {
            assemble(&data, &lam, &mut kkt, &mut w);
            assert_eq!(kkt.rowind, pattern);
            assert_eq!(kkt.colptr, colptr);
            assert!(w.iter().all(|&v| v == 0.0), "scratch not cleared");
        }
    }

    #[test]
    fn test_assemble_matches_column() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let mut kkt = kkt_pattern(data.h, data.a, &data.at);
        let mut w = vec![0.0; data.nz];

        // Variable 0 free, variable 1 pinned, row 0 pinned
        let lam = vec![0.0, 2.0, -1.0];
        assemble(&data, &lam, &mut kkt, &mut w);

        for i in 0..data.nz {
            let sign = if lam[i] > 0.0 {
                1
            } else if lam[i] < 0.0 {
                -1
            } else {
                0
            };
            let mut expected = vec![0.0; data.nz];
            column(&data, &mut expected, i, sign);
            assert_eq!(dense_column(&kkt, i), expected, "column {}", i);
        }

        // Column 0 (free variable): H column 0 over the top block, the
        // Jacobian entry below
        assert_eq!(dense_column(&kkt, 0), vec![2.0, 1.0, 1.0]);
        // Column 1 (pinned variable): identity
        assert_eq!(dense_column(&kkt, 1), vec![0.0, 1.0, 0.0]);
        // Column 2 (pinned row): Jacobian row over the top block
        assert_eq!(dense_column(&kkt, 2), vec![1.0, -1.0, 0.0]);
    }

    #[test]
    fn test_dot_matches_column() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let v = vec![1.0, -2.0, 3.0];
        let mut col = vec![0.0; data.nz];
        for i in 0..data.nz {
            for sign in [-1, 0, 1] {
                column(&data, &mut col, i, sign);
                let expected: f64 = col.iter().zip(v.iter()).map(|(c, x)| c * x).sum();
                assert!(
                    (dot(&data, &v, i, sign) - expected).abs() < 1e-14,
                    "i = {}, sign = {}",
                    i,
                    sign
                );
            }
        }
    }

    #[test]
    fn test_residual_selects_by_sign() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let z = vec![0.5, 1.5, -0.5];
        let lam = vec![1.0, 0.0, -1.0];
        let infeas = vec![0.25, 0.75];
        let mut out = vec![0.0; 3];
        residual(&data, &z, &lam, &infeas, &mut out);
        // Pinned up: ubz - z; free variable: lam - infeas; pinned down: lbz - z
        assert_eq!(out, vec![1.5, -0.75, -0.5]);
    }
}
