//! Prepared problem data and the per-solve workspace.
//!
//! `QpData` holds everything that is fixed for the duration of a solve:
//! the problem matrices, the materialized Jacobian transpose, the
//! stacked bounds, and the permitted-sign masks. `Workspace` owns the
//! iterate (z, lam) and every scratch buffer; the inner routines borrow
//! its fields and nothing allocates inside the iteration.

use crate::active_set::kkt::{self, KktMatrix};
use crate::active_set::DMIN;
use crate::linalg::qr::QrFactor;
use crate::linalg::sparse::{self, SparseCsc};
use crate::problem::{QpError, QpProblem, SolverSettings, WarmStart};

/// Immutable per-solve data.
pub(crate) struct QpData<'a> {
    /// Number of primal variables
    pub nx: usize,
    /// Number of constraint rows
    pub na: usize,
    /// Stacked dimension nx + na
    pub nz: usize,

    /// Hessian (nx × nx, full symmetric storage)
    pub h: &'a SparseCsc,
    /// Jacobian (na × nx)
    pub a: &'a SparseCsc,
    /// Jacobian transpose (nx × na), materialized once per solve
    pub at: SparseCsc,
    /// Gradient (nx)
    pub g: &'a [f64],

    /// Stacked lower bounds [lbx; lba]
    pub lbz: Vec<f64>,
    /// Stacked upper bounds [ubx; uba]
    pub ubz: Vec<f64>,

    /// lbz == ubz: the multiplier must stay nonzero
    pub neverzero: Vec<bool>,
    /// ubz infinite: the multiplier may not go positive
    pub neverupper: Vec<bool>,
    /// lbz infinite: the multiplier may not go negative
    pub neverlower: Vec<bool>,

    /// Dual-to-primal error weighting
    pub du_to_pr: f64,
}

impl<'a> QpData<'a> {
    pub fn new(prob: &'a QpProblem, settings: &SolverSettings) -> Result<Self, QpError> {
        let nx = prob.num_vars();
        let na = prob.num_constraints();
        let nz = nx + na;

        let mut lbz = Vec::with_capacity(nz);
        lbz.extend_from_slice(&prob.lbx);
        lbz.extend_from_slice(&prob.lba);
        let mut ubz = Vec::with_capacity(nz);
        ubz.extend_from_slice(&prob.ubx);
        ubz.extend_from_slice(&prob.uba);

        let mut neverzero = vec![false; nz];
        let mut neverupper = vec![false; nz];
        let mut neverlower = vec![false; nz];
        for i in 0..nz {
            neverzero[i] = lbz[i] == ubz[i];
            neverupper[i] = ubz[i].is_infinite();
            neverlower[i] = lbz[i].is_infinite();
            if neverzero[i] && neverupper[i] && neverlower[i] {
                return Err(QpError::NoFeasibleSign { index: i });
            }
        }

        Ok(Self {
            nx,
            na,
            nz,
            h: &prob.h,
            a: &prob.a,
            at: sparse::transpose(&prob.a),
            g: &prob.g,
            lbz,
            ubz,
            neverzero,
            neverupper,
            neverlower,
            du_to_pr: settings.du_to_pr,
        })
    }
}

/// Mutable iterate, scratch buffers, and per-iteration metrics.
///
/// Only `z`, `lam`, and the activity they encode carry meaning across
/// iterations; the direction and scratch vectors are rewritten every
/// pass.
pub(crate) struct Workspace {
    /// Stacked iterate: z[..nx] = x, z[nx..] = A x
    pub z: Vec<f64>,
    /// Stacked multipliers; signs encode activity
    pub lam: Vec<f64>,

    /// Primal-dual step (length nz)
    pub dz: Vec<f64>,
    /// Multiplier step (length nz)
    pub dlam: Vec<f64>,
    /// General scratch (length nz)
    pub w: Vec<f64>,
    /// Sign snapshot used when applying a step (length nz)
    pub old_sign: Vec<i32>,

    /// Stationarity residual with bound multipliers folded in (length nx)
    pub infeas: Vec<f64>,
    /// Tangent of the stationarity residual along the step (length nx)
    pub tinfeas: Vec<f64>,

    /// Breakpoint step lengths (length nz + 1)
    pub bp_tau: Vec<f64>,
    /// Breakpoint constraint indices, -1 terminal (length nz + 1)
    pub bp_ind: Vec<i64>,

    /// Assembled KKT matrix (fixed pattern, refreshed values)
    pub kkt: KktMatrix,
    /// Factorization kernel
    pub qr: QrFactor,

    /// Objective value at the current iterate
    pub f: f64,
    /// Largest bound violation and its index
    pub pr: f64,
    pub ipr: Option<usize>,
    /// Largest stationarity violation and its index
    pub du: f64,
    pub idu: Option<usize>,
    /// Last accepted step length
    pub tau: f64,

    /// Nullity of the current factorization (0 when nonsingular)
    pub nullity: usize,
    /// Smallest triangular-factor diagonal and its column
    pub mina: f64,
    pub imina: usize,

    /// Note for the iteration log
    pub msg: String,
}

impl Workspace {
    pub fn new(data: &QpData, warm: Option<&WarmStart>) -> Self {
        let nz = data.nz;
        let nx = data.nx;

        let mut z = vec![0.0; nz];
        let mut lam = vec![0.0; nz];
        if let Some(warm) = warm {
            if let Some(x0) = &warm.x {
                z[..nx].copy_from_slice(x0);
            }
            if let Some(lam_x0) = &warm.lam_x {
                lam[..nx].copy_from_slice(lam_x0);
            }
            if let Some(lam_a0) = &warm.lam_a {
                lam[nx..].copy_from_slice(lam_a0);
            }
        }

        // Correct the initial active set where the warm start conflicts
        // with the permitted signs
        for i in 0..nz {
            if data.neverzero[i] && lam[i] == 0.0 {
                lam[i] = if data.neverupper[i] || z[i] - data.lbz[i] <= data.ubz[i] - z[i] {
                    -DMIN
                } else {
                    DMIN
                };
            } else if data.neverupper[i] && lam[i] > 0.0 {
                lam[i] = if data.neverzero[i] { -DMIN } else { 0.0 };
            } else if data.neverlower[i] && lam[i] < 0.0 {
                lam[i] = if data.neverzero[i] { DMIN } else { 0.0 };
            }
        }

        Self {
            z,
            lam,
            dz: vec![0.0; nz],
            dlam: vec![0.0; nz],
            w: vec![0.0; nz],
            old_sign: vec![0; nz],
            infeas: vec![0.0; nx],
            tinfeas: vec![0.0; nx],
            bp_tau: vec![0.0; nz + 1],
            bp_ind: vec![-1; nz + 1],
            kkt: kkt::kkt_pattern(data.h, data.a, &data.at),
            qr: QrFactor::new(nz),
            f: 0.0,
            pr: 0.0,
            ipr: None,
            du: 0.0,
            idu: None,
            tau: 0.0,
            nullity: 0,
            mina: 0.0,
            imina: 0,
            msg: String::new(),
        }
    }

    /// Whether the last factorization was rank-deficient.
    #[inline]
    pub fn singular(&self) -> bool {
        self.nullity > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;
    use crate::problem::{QpProblem, SolverSettings, WarmStart};

    fn problem() -> QpProblem {
        QpProblem {
            h: sparse::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]),
            g: vec![0.0, 0.0],
            a: sparse::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]),
            lbx: vec![0.0, f64::NEG_INFINITY],
            ubx: vec![f64::INFINITY, 1.0],
            lba: vec![1.0],
            uba: vec![1.0],
        }
    }

    #[test]
    fn test_masks() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        assert_eq!(data.neverzero, vec![false, false, true]);
        assert_eq!(data.neverupper, vec![true, false, false]);
        assert_eq!(data.neverlower, vec![false, true, false]);
    }

    #[test]
    fn test_initial_active_set_correction() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let warm = WarmStart {
            x: None,
            // x0 has an upper-active guess where no upper bound exists,
            // and a lower-active guess where no lower bound exists
            lam_x: Some(vec![2.0, -2.0]),
            // equality row left inactive
            lam_a: Some(vec![0.0]),
        };
        let ws = Workspace::new(&data, Some(&warm));
        assert_eq!(ws.lam[0], 0.0);
        assert_eq!(ws.lam[1], 0.0);
        // Equality must be active; z = 0 is closer to the lower side
        assert_eq!(ws.lam[2], -DMIN);
    }
}
