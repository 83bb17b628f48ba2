//! Quadra: a primal-dual active-set solver for sparse convex QPs
//!
//! This library solves quadratic programs of the form
//!
//! ```text
//! minimize    (1/2) x^T H x + g^T x
//! subject to  lbx <= x <= ubx,  lba <= A x <= uba
//! ```
//!
//! where H is sparse symmetric positive semidefinite, A is a sparse
//! Jacobian, and any bound may be infinite. Equal finite bounds denote
//! equalities.
//!
//! # Algorithm
//!
//! The solver maintains a working guess of which bounds hold with
//! equality, encoded in the *signs* of the multipliers: a positive
//! multiplier pins its variable or constraint row to the upper bound, a
//! negative one to the lower bound, and zero means inactive. Each
//! iteration factorizes the activity-dependent KKT matrix, computes a
//! coupled primal-dual step, runs primal and dual ratio tests, and
//! changes the active set by one flip (occasionally paired with a
//! companion flip that preserves the rank of the basis). When the KKT
//! matrix is singular, a null-space direction is scaled so that exactly
//! one constraint reaches its bound or its multiplier reaches zero,
//! restoring rank without worsening feasibility.
//!
//! # Example
//!
//! ```ignore
//! use quadra_core::{solve, QpProblem, SolverSettings};
//! use quadra_core::linalg::sparse;
//!
//! // min 1/2 (x1^2 + x2^2) - x1 - 2 x2
//! let prob = QpProblem {
//!     h: sparse::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]),
//!     g: vec![-1.0, -2.0],
//!     a: sparse::from_triplets(0, 2, vec![]),
//!     lbx: vec![f64::NEG_INFINITY; 2],
//!     ubx: vec![f64::INFINITY; 2],
//!     lba: vec![],
//!     uba: vec![],
//! };
//!
//! let result = solve(&prob, &SolverSettings::default())?;
//! println!("x = {:?}, objective = {}", result.x, result.obj_val);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // active-set kernels need many parameters

pub mod active_set;
pub mod linalg;
pub mod problem;

// Re-export main types
pub use problem::{
    QpError, QpProblem, SolveInfo, SolveResult, SolveStatus, SolverSettings, WarmStart,
};

/// Main solve entry point.
///
/// Runs the active-set iteration to convergence or the iteration cap.
/// Problem rejection (shape mismatches, inconsistent bounds, an index
/// with no feasible multiplier sign) surfaces as `Err`; hitting the
/// iteration cap or failing to compute a search direction is reported
/// through [`SolveStatus`] with the current iterate still populated.
pub fn solve(problem: &QpProblem, settings: &SolverSettings) -> Result<SolveResult, QpError> {
    active_set::solve_qp(problem, settings)
}
