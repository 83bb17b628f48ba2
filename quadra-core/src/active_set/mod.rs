//! Active-set iteration.
//!
//! The core loop: assemble and factorize the activity-dependent KKT
//! matrix, compute a coupled primal-dual step (through the factorization
//! when nonsingular, along a scaled null-space direction otherwise), run
//! the primal and dual ratio tests, and change the active set one flip
//! at a time until no productive change remains.

pub(crate) mod flip;
pub(crate) mod kkt;
pub(crate) mod ratio;
pub(crate) mod residual;
mod solve;
pub(crate) mod step;
pub(crate) mod workspace;

pub use solve::solve_qp;

/// Smallest magnitude a nonzero multiplier is allowed to take. Keeps a
/// formally active constraint active through the sign-preserving
/// multiplier updates.
pub(crate) const DMIN: f64 = f64::MIN_POSITIVE;

/// Rank-decision threshold, tied to the factorization kernel's effective
/// precision.
pub(crate) const RANK_TOL: f64 = 1e-12;

/// Steps smaller than this are treated as numerical noise and snapped to
/// zero.
pub(crate) const STEP_TOL: f64 = 1e-14;

/// Step lengths below this count as a zero step.
pub(crate) const TAU_TOL: f64 = 1e-16;

/// Pending active-set change, handed from the ratio test to the flip
/// logic and consumed by the driver's termination test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Change {
    /// A step or flip was just committed; keep iterating.
    Pending,
    /// No productive change was found.
    None,
    /// Activate (`sign` ±1) or deactivate (`sign` 0) index `index`.
    Flip { index: usize, sign: i32 },
}
