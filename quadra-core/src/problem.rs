//! Problem data structures and validation.
//!
//! This module defines the canonical QP representation and all associated
//! types: settings, warm start, result, status, and the error enum used
//! to reject malformed problems before the iteration starts.

use std::fmt;

use thiserror::Error;

use crate::linalg::qr::QrError;
use crate::linalg::sparse::SparseCsc;

/// Quadratic program in canonical form.
///
/// ```text
/// minimize    (1/2) x^T H x + g^T x
/// subject to  lbx <= x <= ubx
///             lba <= A x <= uba
/// ```
///
/// # Dimensions
///
/// - `n`: number of primal variables (length of g, lbx, ubx)
/// - `m`: number of constraint rows (length of lba, uba, rows of A)
/// - H: n × n, symmetric PSD, *full* symmetric storage in CSC
/// - A: m × n, CSC
///
/// Bounds may be `±f64::INFINITY`; an infinite bound means that side is
/// absent. Equal finite bounds denote an equality.
#[derive(Debug, Clone)]
pub struct QpProblem {
    /// Quadratic cost matrix H (n × n, PSD, both triangles stored).
    pub h: SparseCsc,

    /// Linear cost vector g (length n).
    pub g: Vec<f64>,

    /// Constraint Jacobian A (m × n, CSC format).
    pub a: SparseCsc,

    /// Lower variable bounds (length n).
    pub lbx: Vec<f64>,

    /// Upper variable bounds (length n).
    pub ubx: Vec<f64>,

    /// Lower constraint bounds (length m).
    pub lba: Vec<f64>,

    /// Upper constraint bounds (length m).
    pub uba: Vec<f64>,
}

/// Errors rejecting a problem or aborting a solve.
#[derive(Error, Debug)]
pub enum QpError {
    /// H is not n × n.
    #[error("H has shape {rows}x{cols}, expected {n}x{n}")]
    HessianShape { rows: usize, cols: usize, n: usize },

    /// A does not match the bound vector dimensions.
    #[error("A has shape {rows}x{cols}, expected {m}x{n}")]
    JacobianShape {
        rows: usize,
        cols: usize,
        m: usize,
        n: usize,
    },

    /// A dense input vector has the wrong length.
    #[error("{name} has length {len}, expected {expected}")]
    VectorLength {
        name: &'static str,
        len: usize,
        expected: usize,
    },

    /// Lower bound exceeds upper bound, or a bound is NaN / the wrong
    /// infinity.
    #[error("index {index}: bounds [{lower}, {upper}] are inconsistent")]
    InconsistentBounds {
        index: usize,
        lower: f64,
        upper: f64,
    },

    /// No multiplier sign is permitted for this index (empty feasible
    /// set for a single inequality pair).
    #[error("no feasible multiplier sign for index {index}")]
    NoFeasibleSign { index: usize },

    /// Factorization kernel failure.
    #[error(transparent)]
    Factorization(#[from] QrError),
}

/// Optional initial guess (primal point and multipliers).
///
/// Multiplier signs encode the initial active set; signs that conflict
/// with the permitted-sign masks are corrected at entry.
#[derive(Debug, Clone, Default)]
pub struct WarmStart {
    /// Primal variables x (length n).
    pub x: Option<Vec<f64>>,
    /// Variable bound multipliers (length n).
    pub lam_x: Option<Vec<f64>>,
    /// Constraint row multipliers (length m).
    pub lam_a: Option<Vec<f64>>,
}

/// Solver settings and parameters.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    /// Maximum number of active-set iterations.
    pub max_iter: usize,

    /// Convergence tolerance. Reported in diagnostics; the loop itself
    /// terminates when no productive active-set change remains.
    pub tol: f64,

    /// How much larger dual than primal error is acceptable when
    /// selecting which error to improve next.
    pub du_to_pr: f64,

    /// Print a banner before the solve.
    pub print_header: bool,

    /// Print a progress row per iteration.
    pub print_iter: bool,

    /// Dump vectors and directions to stderr each iteration.
    pub verbose: bool,

    /// Optional initial guess.
    pub warm_start: Option<WarmStart>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-8,
            du_to_pr: 1000.0,
            print_header: true,
            print_iter: true,
            verbose: false,
            warm_start: None,
        }
    }
}

/// Solution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// No feasibility-improving active-set change remains.
    Optimal,

    /// Maximum iterations reached; the current iterate is returned.
    MaxIters,

    /// No admissible flip restores rank under a singular KKT matrix;
    /// the current iterate is returned.
    DirectionFailure,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "Optimal"),
            SolveStatus::MaxIters => write!(f, "MaxIters"),
            SolveStatus::DirectionFailure => write!(f, "DirectionFailure"),
        }
    }
}

/// Solve result with solution and diagnostics.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Solution status.
    pub status: SolveStatus,

    /// Primal solution x (length n).
    pub x: Vec<f64>,

    /// Variable bound multipliers (length n, signs carry activity).
    pub lam_x: Vec<f64>,

    /// Constraint row multipliers (length m, signs carry activity).
    pub lam_a: Vec<f64>,

    /// Objective value at the solution.
    pub obj_val: f64,

    /// Detailed solve information.
    pub info: SolveInfo,
}

/// Detailed solve information and diagnostics.
#[derive(Debug, Clone)]
pub struct SolveInfo {
    /// Number of active-set iterations completed.
    pub iters: usize,

    /// Final maximum bound violation.
    pub primal_res: f64,

    /// Final maximum stationarity violation.
    pub dual_res: f64,

    /// Total solve time (milliseconds).
    pub solve_time_ms: u64,
}

impl QpProblem {
    /// Get the number of primal variables (n).
    pub fn num_vars(&self) -> usize {
        self.g.len()
    }

    /// Get the number of constraint rows (m).
    pub fn num_constraints(&self) -> usize {
        self.lba.len()
    }

    /// Validate problem dimensions and bound consistency.
    pub fn validate(&self) -> Result<(), QpError> {
        let n = self.num_vars();
        let m = self.num_constraints();

        if self.h.rows() != n || self.h.cols() != n {
            return Err(QpError::HessianShape {
                rows: self.h.rows(),
                cols: self.h.cols(),
                n,
            });
        }
        if self.a.rows() != m || self.a.cols() != n {
            return Err(QpError::JacobianShape {
                rows: self.a.rows(),
                cols: self.a.cols(),
                m,
                n,
            });
        }
        for (name, v, expected) in [
            ("lbx", &self.lbx, n),
            ("ubx", &self.ubx, n),
            ("lba", &self.lba, m),
            ("uba", &self.uba, m),
        ] {
            if v.len() != expected {
                return Err(QpError::VectorLength {
                    name,
                    len: v.len(),
                    expected,
                });
            }
        }

        // Stacked bound consistency: lbx/lba then ubx/uba per index
        let lower = self.lbx.iter().chain(self.lba.iter());
        let upper = self.ubx.iter().chain(self.uba.iter());
        for (index, (&l, &u)) in lower.zip(upper).enumerate() {
            if l.is_nan() || u.is_nan() || l > u {
                return Err(QpError::InconsistentBounds {
                    index,
                    lower: l,
                    upper: u,
                });
            }
            // Permitted multiplier signs: equalities forbid zero,
            // infinite bounds forbid the corresponding side.
            let neverzero = l == u;
            let neverupper = u.is_infinite();
            let neverlower = l.is_infinite();
            if neverzero && neverupper && neverlower {
                return Err(QpError::NoFeasibleSign { index });
            }
        }

        Ok(())
    }
}
