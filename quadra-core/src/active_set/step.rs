//! Search-direction computation and singularity recovery.
//!
//! With a nonsingular KKT factorization the step is the primal-dual
//! Newton direction. Under singularity the direction is a null-space
//! column combination; an unscaled step along it could be unbounded and
//! improve nothing, so the recovery pass picks a constraint flip whose
//! flipped column restores rank and scales the direction so that τ = 1
//! brings exactly that constraint to its bound (primal) or its
//! multiplier to zero (dual), without letting max(pr, du) grow.

use std::fmt::Write as _;

use crate::active_set::workspace::{QpData, Workspace};
use crate::active_set::{kkt, RANK_TOL, STEP_TOL, TAU_TOL};
use crate::linalg::sparse;

/// No admissible rank-restoring flip exists; the solve cannot make
/// further progress.
pub(crate) struct StepFailed;

/// Compute the primal-dual step (dz, dlam) and the stationarity tangent,
/// then scale the direction if the factorization was singular. Returns
/// the rank-restoring flip target, if any.
pub(crate) fn calc_step(
    data: &QpData,
    ws: &mut Workspace,
) -> Result<Option<(usize, i32)>, StepFailed> {
    let nx = data.nx;

    if !ws.singular() {
        kkt::residual(data, &ws.z, &ws.lam, &ws.infeas, &mut ws.dz);
        ws.qr.solve_transposed(&mut ws.dz);
    } else {
        ws.qr.null_combination(&mut ws.dz, ws.imina, 0, RANK_TOL);
    }

    // Change in the Lagrangian gradient along the step
    ws.dlam[..nx].fill(0.0);
    sparse::spmv_acc(data.h, &ws.dz[..nx], &mut ws.dlam[..nx]);
    sparse::spmv_t_acc(data.a, &ws.dz[nx..], &mut ws.dlam[..nx]);
    sparse::scal(-1.0, &mut ws.dlam[..nx]);
    for i in 0..nx {
        if ws.lam[i] == 0.0 {
            ws.dlam[i] = 0.0;
        }
    }

    // Row multiplier step is the stacked dual slot; the slot itself is
    // then overwritten with the primal constraint-value step
    let (dz_x, dz_a) = ws.dz.split_at_mut(nx);
    ws.dlam[nx..].copy_from_slice(dz_a);
    dz_a.fill(0.0);
    sparse::spmv_acc(data.a, dz_x, dz_a);

    // Avoid steps that are nonzero only through roundoff
    for v in ws.dz.iter_mut() {
        if v.abs() < STEP_TOL {
            *v = 0.0;
        }
    }

    // Tangent of the stationarity residual at tau = 0
    ws.tinfeas.fill(0.0);
    sparse::spmv_acc(data.h, &ws.dz[..nx], &mut ws.tinfeas);
    sparse::spmv_t_acc(data.a, &ws.dlam[nx..], &mut ws.tinfeas);
    sparse::axpy(1.0, &ws.dlam[..nx], &mut ws.tinfeas);

    scale_step(data, ws)
}

/// Singularity recovery: pick the flip and step scale described in the
/// module docs. Quick return when the factorization is nonsingular.
fn scale_step(data: &QpData, ws: &mut Workspace) -> Result<Option<(usize, i32)>, StepFailed> {
    if !ws.singular() {
        return Ok(None);
    }

    // Directional derivatives of pr and du along the raw direction
    let tpr = match ws.ipr {
        None => 0.0,
        Some(ipr) => {
            if ws.z[ipr] > data.ubz[ipr] {
                ws.dz[ipr] / ws.pr
            } else {
                -ws.dz[ipr] / ws.pr
            }
        }
    };
    let tdu = match ws.idu {
        None => 0.0,
        Some(idu) => ws.tinfeas[idu] / ws.infeas[idu],
    };

    // Which sign of tau keeps max(pr, du) from growing
    let mut pos_ok = true;
    let mut neg_ok = true;
    let terr;
    if ws.pr > ws.du {
        if tpr < 0.0 {
            neg_ok = false;
        } else if tpr > 0.0 {
            pos_ok = false;
        }
        terr = tpr;
    } else if ws.pr < ws.du {
        if tdu < 0.0 {
            neg_ok = false;
        } else if tdu > 0.0 {
            pos_ok = false;
        }
        terr = tdu;
    } else if (tpr > 0.0 && tdu < 0.0) || (tpr < 0.0 && tdu > 0.0) {
        // The tied maximum cannot be decreased along this direction
        pos_ok = false;
        neg_ok = false;
        terr = 0.0;
    } else if tpr.min(tdu) < 0.0 {
        neg_ok = false;
        terr = tpr.max(tdu);
    } else if tpr.max(tdu) > 0.0 {
        pos_ok = false;
        terr = tpr.min(tdu);
    } else {
        terr = 0.0;
    }

    // If primal error dominates and the violated constraint is active,
    // only let its multiplier grow in magnitude
    if data.du_to_pr * ws.pr >= ws.du {
        if let Some(ipr) = ws.ipr {
            if ws.lam[ipr] != 0.0 && ws.dlam[ipr].abs() > RANK_TOL {
                if (ws.lam[ipr] > 0.0) == (ws.dlam[ipr] > 0.0) {
                    neg_ok = false;
                } else {
                    pos_ok = false;
                }
            }
        }
    }

    // Left null vectors: refactorize the transpose of the stored KKT
    if ws
        .qr
        .factor(&ws.kkt.colptr, &ws.kkt.rowind, &ws.kkt.values, true)
        .is_err()
    {
        return Err(StepFailed);
    }
    let def_tr = ws.qr.diagnose(RANK_TOL);

    let mut tau = f64::INFINITY;
    let mut best: Option<(usize, i32)> = None;
    for nulli in 0..def_tr.nullity {
        ws.qr
            .null_combination(&mut ws.w, def_tr.imina, nulli, RANK_TOL);
        for i in 0..data.nz {
            // The flip must have a nonzero step component to play with
            let step_comp = if i < data.nx { ws.dz[i] } else { ws.dlam[i] };
            if step_comp.abs() < RANK_TOL {
                continue;
            }
            // Flipping i only raises the rank along w if the two
            // activity columns differ in the w direction
            if (kkt::dot(data, &ws.w, i, 0) - kkt::dot(data, &ws.w, i, 1)).abs() < RANK_TOL {
                continue;
            }
            if ws.lam[i] == 0.0 {
                if ws.dz[i].abs() < RANK_TOL {
                    continue;
                }
                // Step lengths that pin z[i] to either bound
                for (bound_ok, bound, sign) in [
                    (!data.neverlower[i], data.lbz[i], -1),
                    (!data.neverupper[i], data.ubz[i], 1),
                ] {
                    if !bound_ok {
                        continue;
                    }
                    let tau_test = (bound - ws.z[i]) / ws.dz[i];
                    if (terr > 0.0 && tau_test > 0.0) || (terr < 0.0 && tau_test < 0.0) {
                        continue;
                    }
                    // Pure removals only at tau = 0
                    if tau_test.abs() < TAU_TOL {
                        continue;
                    }
                    if tau_test.abs() < tau.abs() {
                        tau = tau_test;
                        best = Some((i, sign));
                        ws.msg.clear();
                        let side = if sign < 0 { "lbz" } else { "ubz" };
                        let _ = write!(ws.msg, "Enforced {}[{}] for regularity", side, i);
                    }
                }
            } else {
                if ws.dlam[i].abs() < RANK_TOL {
                    continue;
                }
                if data.neverzero[i] {
                    continue;
                }
                // Step length that brings lam[i] to zero
                let tau_test = -ws.lam[i] / ws.dlam[i];
                if (terr > 0.0 && tau_test > 0.0) || (terr < 0.0 && tau_test < 0.0) {
                    continue;
                }
                if (tau_test > 0.0 && !pos_ok) || (tau_test < 0.0 && !neg_ok) {
                    continue;
                }
                if tau_test.abs() < tau.abs() {
                    tau = tau_test;
                    best = Some((i, 0));
                    ws.msg.clear();
                    let side = if ws.lam[i] > 0.0 { "ubz" } else { "lbz" };
                    let _ = write!(ws.msg, "Dropped {}[{}] for regularity", side, i);
                }
            }
        }
    }

    let Some(flip) = best else {
        return Err(StepFailed);
    };

    // Rescale so that tau = 1 is a full step to the chosen flip
    sparse::scal(tau, &mut ws.dz);
    sparse::scal(tau, &mut ws.dlam);
    sparse::scal(tau, &mut ws.tinfeas);
    Ok(Some(flip))
}
