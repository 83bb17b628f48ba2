//! Ratio tests: primal blocking, the piecewise-linear dual blocking
//! walk over multiplier sign-change breakpoints, and step application
//! with sign reinforcement.

use std::fmt::Write as _;

use crate::active_set::workspace::{QpData, Workspace};
use crate::active_set::{Change, DMIN};
use crate::linalg::sparse;

/// Run both ratio tests for the current direction, apply the step, and
/// return the blocking constraint to flip (if any).
///
/// The primal test limits τ so the iterate stays within the acceptable
/// primal-error budget; the dual test walks the breakpoints of the
/// piecewise-linear dual infeasibility and shortens τ at the first
/// excursion past the dual budget. A dual block supersedes a primal
/// blocking candidate.
pub(crate) fn linesearch(data: &QpData, ws: &mut Workspace) -> Change {
    let mut change = Change::None;
    ws.tau = 1.0;

    let e_pr = ws.pr.max(ws.du / data.du_to_pr);
    primal_blocking(data, ws, e_pr, &mut change);

    let e_du = (ws.pr * data.du_to_pr).max(ws.du);
    if dual_blocking(data, ws, e_du).is_some() {
        change = Change::None;
    }

    take_step(data, ws);
    change
}

/// Detect constraints already violated at τ = 0 that the step pushes
/// further into violation.
fn zero_blocking(data: &QpData, ws: &mut Workspace, e: f64, change: &mut Change) -> bool {
    let mut hit = false;
    for i in 0..data.nz {
        if ws.dz[i] < 0.0 && ws.z[i] <= data.lbz[i] - e {
            hit = true;
            *change = Change::Flip { index: i, sign: -1 };
            ws.msg.clear();
            let _ = write!(ws.msg, "lbz[{}] violated at 0", i);
        } else if ws.dz[i] > 0.0 && ws.z[i] >= data.ubz[i] + e {
            hit = true;
            *change = Change::Flip { index: i, sign: 1 };
            ws.msg.clear();
            let _ = write!(ws.msg, "ubz[{}] violated at 0", i);
        }
    }
    hit
}

/// Shrink τ so z + τ dz stays within [lbz - e, ubz + e]. A blocking
/// bound whose multiplier already enforces that side is suppressed (no
/// flip candidate), since the constraint is active already.
fn primal_blocking(data: &QpData, ws: &mut Workspace, e: f64, change: &mut Change) {
    if zero_blocking(data, ws, e, change) {
        ws.tau = 0.0;
        return;
    }
    for i in 0..data.nz {
        if ws.dz[i] == 0.0 {
            continue;
        }
        let trial_z = ws.z[i] + ws.tau * ws.dz[i];
        if ws.dz[i] < 0.0 && trial_z < data.lbz[i] - e {
            ws.tau = (data.lbz[i] - e - ws.z[i]) / ws.dz[i];
            *change = if ws.lam[i] < 0.0 {
                Change::None
            } else {
                Change::Flip { index: i, sign: -1 }
            };
            ws.msg.clear();
            let _ = write!(ws.msg, "Enforcing lbz[{}]", i);
        } else if ws.dz[i] > 0.0 && trial_z > data.ubz[i] + e {
            ws.tau = (data.ubz[i] + e - ws.z[i]) / ws.dz[i];
            *change = if ws.lam[i] > 0.0 {
                Change::None
            } else {
                Change::Flip { index: i, sign: 1 }
            };
            ws.msg.clear();
            let _ = write!(ws.msg, "Enforcing ubz[{}]", i);
        }
        if ws.tau <= 0.0 {
            return;
        }
    }
}

/// Collect the step lengths in (0, tau) at which some active multiplier
/// crosses zero, sorted ascending, into `tau_list`/`ind_list`. The
/// terminal entry is `tau` itself with index -1. Returns the list
/// length.
pub(crate) fn dual_breakpoints(
    lam: &[f64],
    dlam: &[f64],
    tau: f64,
    tau_list: &mut [f64],
    ind_list: &mut [i64],
) -> usize {
    tau_list[0] = tau;
    ind_list[0] = -1;
    let mut n_tau = 1;
    for i in 0..lam.len() {
        if dlam[i] == 0.0 || lam[i] == 0.0 {
            continue;
        }
        let trial_lam = lam[i] + tau * dlam[i];
        // Only count strict sign changes within the interval
        if lam[i] > 0.0 {
            if trial_lam >= 0.0 {
                continue;
            }
        } else if trial_lam <= 0.0 {
            continue;
        }
        let new_tau = -lam[i] / dlam[i];
        // Keep the list sorted; the terminal entry stays last
        let mut loc = n_tau - 1;
        for (l, &t) in tau_list.iter().enumerate().take(n_tau - 1) {
            if new_tau < t {
                loc = l;
                break;
            }
        }
        n_tau += 1;
        let mut next_tau = new_tau;
        let mut next_ind = i as i64;
        for j in loc..n_tau {
            std::mem::swap(&mut tau_list[j], &mut next_tau);
            std::mem::swap(&mut ind_list[j], &mut next_ind);
        }
    }
    n_tau
}

/// Walk the breakpoints, advancing the stationarity residual interval
/// by interval. If some |infeas| would exceed `e` inside an interval,
/// shorten τ to the crossing and report the blocking variable. At each
/// crossed breakpoint the tangent loses the contribution of the
/// multiplier that reached zero (unless the index is an equality).
fn dual_blocking(data: &QpData, ws: &mut Workspace, e: f64) -> Option<usize> {
    let n_tau = dual_breakpoints(&ws.lam, &ws.dlam, ws.tau, &mut ws.bp_tau, &mut ws.bp_ind);

    let mut du_index = None;
    let mut tau_k = 0.0;
    for j in 0..n_tau {
        // Distance to the next breakpoint (may be zero)
        let dtau = ws.bp_tau[j] - tau_k;
        for k in 0..data.nx {
            let new_infeas = ws.infeas[k] + dtau * ws.tinfeas[k];
            if new_infeas.abs() > e {
                let bound = if new_infeas > 0.0 { e } else { -e };
                let tau1 = (tau_k + (bound - ws.infeas[k]) / ws.tinfeas[k]).max(0.0);
                if tau1 < ws.tau {
                    ws.tau = tau1;
                    du_index = Some(k);
                }
            }
        }
        let step = (ws.tau - tau_k).min(dtau);
        sparse::axpy(step, &ws.tinfeas, &mut ws.infeas);
        if du_index.is_some() {
            return du_index;
        }
        tau_k = ws.bp_tau[j];
        let i = ws.bp_ind[j];
        if i < 0 {
            break;
        }
        let i = i as usize;
        if !data.neverzero[i] {
            // lam[i] reaches zero here; drop its term from the tangent
            if i < data.nx {
                ws.tinfeas[i] -= ws.dlam[i];
            } else if let Some(col) = data.at.outer_view(i - data.nx) {
                for (r, &v) in col.iter() {
                    ws.tinfeas[r] -= v * ws.dlam[i];
                }
            }
        }
    }
    None
}

/// Apply the primal-dual step and reinforce multiplier signs: indices
/// that were nonzero keep at least DMIN magnitude with their prior sign
/// (equalities may swap sides), previously-zero multipliers snap back
/// to exactly zero.
fn take_step(data: &QpData, ws: &mut Workspace) {
    for i in 0..data.nz {
        ws.old_sign[i] = if ws.lam[i] > 0.0 {
            1
        } else if ws.lam[i] < 0.0 {
            -1
        } else {
            0
        };
    }
    sparse::axpy(ws.tau, &ws.dz, &mut ws.z);
    sparse::axpy(ws.tau, &ws.dlam, &mut ws.lam);
    for i in 0..data.nz {
        if data.neverzero[i]
            && (if ws.old_sign[i] < 0 {
                ws.lam[i] > 0.0
            } else {
                ws.lam[i] < 0.0
            })
        {
            ws.old_sign[i] = -ws.old_sign[i];
        }
        match ws.old_sign[i] {
            -1 => ws.lam[i] = ws.lam[i].min(-DMIN),
            1 => ws.lam[i] = ws.lam[i].max(DMIN),
            _ => ws.lam[i] = 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_set::workspace::QpData;
    use crate::linalg::sparse;
    use crate::problem::{QpProblem, SolverSettings};

    fn box_problem() -> QpProblem {
        QpProblem {
            h: sparse::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]),
            g: vec![0.0, 0.0],
            a: sparse::from_triplets(0, 2, vec![]),
            lbx: vec![0.0, 0.0],
            ubx: vec![10.0, 10.0],
            lba: vec![],
            uba: vec![],
        }
    }

    #[test]
    fn test_breakpoints_sorted() {
        let lam = [1.0, -2.0, 0.0, 0.5];
        let dlam = [-2.0, 8.0, 1.0, -0.25];
        // Crossings: 0.5 for index 0, 0.25 for index 1; index 2 is
        // inactive and index 3 would cross beyond tau = 1
        let mut tau_list = [0.0; 5];
        let mut ind_list = [-1i64; 5];
        let n = dual_breakpoints(&lam, &dlam, 1.0, &mut tau_list, &mut ind_list);
        assert_eq!(n, 3);
        assert_eq!(&tau_list[..3], &[0.25, 0.5, 1.0]);
        assert_eq!(&ind_list[..3], &[1, 0, -1]);
    }

    #[test]
    fn test_breakpoint_on_endpoint_not_counted() {
        // lam + tau * dlam = 0 exactly at tau: no strict sign change
        let lam = [1.0];
        let dlam = [-1.0];
        let mut tau_list = [0.0; 2];
        let mut ind_list = [-1i64; 2];
        let n = dual_breakpoints(&lam, &dlam, 1.0, &mut tau_list, &mut ind_list);
        assert_eq!(n, 1);
        assert_eq!(tau_list[0], 1.0);
    }

    #[test]
    fn test_dual_blocking_shortens_tau() {
        let prob = box_problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let mut ws = crate::active_set::workspace::Workspace::new(&data, None);

        // One active multiplier crossing zero at tau = 1/6. After the
        // crossing the tangent loses its -3 contribution and the first
        // residual climbs past the budget at tau = 3/7.
        ws.tau = 1.0;
        ws.lam = vec![0.5, 0.0];
        ws.dlam = vec![-3.0, 0.0];
        ws.infeas = vec![0.2, 0.8];
        ws.tinfeas = vec![-0.2, 0.1];

        let blocked = dual_blocking(&data, &mut ws, 0.9);
        assert_eq!(blocked, Some(0));
        assert!((ws.tau - 3.0 / 7.0).abs() < 1e-12, "tau = {}", ws.tau);
        // The residual was advanced exactly to the budget
        assert!((ws.infeas[0] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_take_step_sign_reinforcement() {
        let prob = box_problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let mut ws = crate::active_set::workspace::Workspace::new(&data, None);

        ws.tau = 1.0;
        ws.z = vec![1.0, 1.0];
        ws.lam = vec![0.5, 0.0];
        ws.dz = vec![0.25, 0.25];
        ws.dlam = vec![-0.5, 0.5];
        take_step(&data, &mut ws);

        assert_eq!(ws.z, vec![1.25, 1.25]);
        // Was positive, stepped to zero: floored at DMIN, still active
        assert_eq!(ws.lam[0], DMIN);
        // Was zero: snapped back to zero regardless of dlam
        assert_eq!(ws.lam[1], 0.0);
    }
}
