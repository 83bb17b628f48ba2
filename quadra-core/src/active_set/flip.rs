//! Active-set change logic.
//!
//! After a step, decide the next flip: a rank-restoring flip chosen by
//! singularity recovery takes priority, otherwise add the most violated
//! bound (primal regime) or remove the multiplier whose removal best
//! reduces the stationarity residual (dual regime). When the KKT matrix
//! is nonsingular, a candidate whose flipped column would be linearly
//! dependent on the rest of the basis is paired with a companion flip
//! that keeps the basis full rank.

use std::fmt::Write as _;

use crate::active_set::residual::{self, du_check};
use crate::active_set::workspace::{QpData, Workspace};
use crate::active_set::{kkt, Change, DMIN, RANK_TOL, TAU_TOL};
use crate::linalg::sparse;

/// Commit the next active-set change, if one exists. On commit the
/// multiplier is seeded at ±DMIN (or zeroed for a removal), dependent
/// quantities are refreshed, and `change` is reset to `Pending`. A
/// `change` left at `None` signals the driver to terminate.
pub(crate) fn flip(
    data: &QpData,
    ws: &mut Workspace,
    change: &mut Change,
    recovery: Option<(usize, i32)>,
) {
    // Acceptable dual error for activity changes
    let e = (data.du_to_pr * ws.pr).max(ws.du);

    // A rank-restoring flip takes priority when its dual cost is
    // admissible
    if let Some((r_index, r_sign)) = recovery {
        if r_sign != 0 || du_check(data, ws, r_index) <= e {
            *change = Change::Flip {
                index: r_index,
                sign: r_sign,
            };
            ws.msg.clear();
            let _ = write!(ws.msg, "{}->{} for regularity", r_index, r_sign);
        }
    }

    // Otherwise improve whichever error dominates
    if *change == Change::None && ws.tau > TAU_TOL && (ws.ipr.is_some() || ws.idu.is_some()) {
        let picked = if data.du_to_pr * ws.pr >= ws.du {
            pr_index(data, ws)
        } else {
            du_index(data, ws)
        };
        if let Some((index, sign)) = picked {
            *change = Change::Flip { index, sign };
        }
    }

    if let Change::Flip { index, sign } = *change {
        // Pair with a companion flip when the new column alone would
        // make the basis singular
        if !ws.singular() {
            if let Some((c_index, c_sign)) = flip_check(data, ws, index, sign, e) {
                ws.lam[c_index] = seed_multiplier(c_sign);
                ws.msg.clear();
                let _ = write!(ws.msg, "{}->{}, {}->{}", index, sign, c_index, c_sign);
            }
        }
        ws.lam[index] = seed_multiplier(sign);
        residual::calc_dependent(data, ws);
        *change = Change::Pending;
    }
}

#[inline]
fn seed_multiplier(sign: i32) -> f64 {
    match sign.cmp(&0) {
        std::cmp::Ordering::Greater => DMIN,
        std::cmp::Ordering::Less => -DMIN,
        std::cmp::Ordering::Equal => 0.0,
    }
}

/// Add the most violating bound, provided it is currently inactive.
pub(crate) fn pr_index(data: &QpData, ws: &mut Workspace) -> Option<(usize, i32)> {
    let ipr = ws.ipr?;
    if ws.lam[ipr] != 0.0 {
        return None;
    }
    let sign = if ws.z[ipr] < data.lbz[ipr] { -1 } else { 1 };
    ws.msg.clear();
    let _ = write!(ws.msg, "Added {} to reduce |pr|", ipr);
    Some((ipr, sign))
}

/// Find the best active constraint to remove so the dominant
/// stationarity violation shrinks: its column must touch the violated
/// entry, removal must push the residual the right way, and the
/// hypothetical dual error must not grow.
pub(crate) fn du_index(data: &QpData, ws: &mut Workspace) -> Option<(usize, i32)> {
    let idu = ws.idu?;
    // Sensitivity of infeas[idu] to each multiplier
    ws.w.fill(0.0);
    ws.w[idu] = if ws.infeas[idu] > 0.0 { -1.0 } else { 1.0 };
    {
        let (wx, wa) = ws.w.split_at_mut(data.nx);
        sparse::spmv_acc(data.a, wx, wa);
    }

    let mut best_ind = None;
    let mut best_w = 0.0;
    for i in 0..data.nz {
        if ws.w[i] == 0.0 {
            continue;
        }
        // Removal must decrease the dual infeasibility
        if ws.w[i] > 0.0 {
            if ws.lam[i] >= 0.0 {
                continue;
            }
        } else if ws.lam[i] <= 0.0 {
            continue;
        }
        // Skip if the maximum infeasibility would increase
        if du_check(data, ws, i) > ws.du {
            continue;
        }
        if ws.w[i].abs() > best_w {
            best_w = ws.w[i].abs();
            best_ind = Some(i);
        }
    }

    let best = best_ind?;
    ws.msg.clear();
    let _ = write!(ws.msg, "Removed {} to reduce |du|", best);
    Some((best, 0))
}

/// Test whether flipping `index` to `sign` alone keeps the KKT basis
/// nonsingular; if not, search for the companion flip with the largest
/// slack. Returns the companion, or `None` when the flip is safe on its
/// own or no companion exists.
pub(crate) fn flip_check(
    data: &QpData,
    ws: &mut Workspace,
    index: usize,
    sign: i32,
    e: f64,
) -> Option<(usize, i32)> {
    // Express the new column in the current basis
    kkt::column(data, &mut ws.dz, index, sign);
    ws.qr.solve(&mut ws.dz);
    if ws.dz[index].abs() >= RANK_TOL {
        return None;
    }

    // Column being replaced
    kkt::column(data, &mut ws.w, index, if sign == 0 { 1 } else { 0 });

    let mut best: Option<(usize, i32)> = None;
    let mut best_slack = f64::NEG_INFINITY;
    for i in 0..data.nz {
        if i == index {
            continue;
        }
        // Constraint must be flippable at all
        let flippable = if ws.lam[i] == 0.0 {
            !(data.neverlower[i] && data.neverupper[i])
        } else {
            !data.neverzero[i]
        };
        if !flippable {
            continue;
        }
        // Column i must participate in the dependent combination
        if ws.dz[i].abs() < RANK_TOL {
            continue;
        }
        // The flipped column i must not be orthogonal to the replaced
        // column, else the swap surely stays singular
        let flipped_sign = if ws.lam[i] == 0.0 { 1 } else { 0 };
        if kkt::dot(data, &ws.w, i, flipped_sign).abs() < RANK_TOL {
            continue;
        }
        let (new_slack, new_sign) = if ws.lam[i] == 0.0 {
            // Activate toward the nearer bound; scored below any
            // positive-slack removal
            let sign_i = if data.lbz[i] - ws.z[i] >= ws.z[i] - data.ubz[i] {
                -1
            } else {
                1
            };
            (0.0, sign_i)
        } else {
            // Skip if removing would cost too much dual feasibility
            if du_check(data, ws, i) > e {
                continue;
            }
            let slack = if ws.lam[i] > 0.0 {
                data.ubz[i] - ws.z[i]
            } else {
                ws.z[i] - data.lbz[i]
            };
            (slack, 0)
        };
        if new_slack > best_slack {
            best_slack = new_slack;
            best = Some((i, new_sign));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_set::residual::calc_dependent;
    use crate::active_set::workspace::Workspace;
    use crate::linalg::sparse;
    use crate::problem::{QpProblem, SolverSettings, WarmStart};

    fn problem() -> QpProblem {
        QpProblem {
            h: sparse::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]),
            g: vec![0.0, 0.0],
            // A = [[1, 0]]
            a: sparse::from_triplets(1, 2, vec![(0, 0, 1.0)]),
            lbx: vec![0.0, 0.0],
            ubx: vec![10.0, 10.0],
            lba: vec![f64::NEG_INFINITY],
            uba: vec![5.0],
        }
    }

    #[test]
    fn test_flip_check_independent() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let mut ws = Workspace::new(&data, None);
        kkt::factorize(&data, &mut ws).unwrap();
        assert!(!ws.singular());

        // All indices free: activating the row column [1, 0 | 0] keeps
        // the basis nonsingular, so no companion is needed
        assert_eq!(flip_check(&data, &mut ws, 2, 1, 1.0), None);
    }

    #[test]
    fn test_flip_check_picks_companion() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let warm = WarmStart {
            x: None,
            lam_x: Some(vec![crate::active_set::DMIN, 0.0]),
            lam_a: None,
        };
        let mut ws = Workspace::new(&data, Some(&warm));
        ws.infeas.fill(0.0);
        kkt::factorize(&data, &mut ws).unwrap();
        assert!(!ws.singular());

        // Variable 0 is pinned, so its column is the identity column.
        // Activating row 0 would insert [1, 0 | 0], a duplicate of that
        // identity column; the companion must release variable 0.
        assert_eq!(flip_check(&data, &mut ws, 2, 1, 1.0), Some((0, 0)));
    }

    #[test]
    fn test_pr_index_requires_inactive() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let warm = WarmStart {
            x: Some(vec![-1.0, 0.0]),
            lam_x: None,
            lam_a: None,
        };
        let mut ws = Workspace::new(&data, Some(&warm));
        calc_dependent(&data, &mut ws);
        assert_eq!(ws.ipr, Some(0));

        // Inactive: the violated lower bound is a valid addition
        assert_eq!(pr_index(&data, &mut ws), Some((0, -1)));

        // Already active: nothing to add
        ws.lam[0] = -1.0;
        assert_eq!(pr_index(&data, &mut ws), None);
    }

    #[test]
    fn test_du_index_removes_wrong_sign() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        // Variable 1 claims an upper-active bound the gradient does not
        // support: infeas[1] = lam[1] > 0, removal clears it
        let warm = WarmStart {
            x: None,
            lam_x: Some(vec![0.0, 1.0]),
            lam_a: None,
        };
        let mut ws = Workspace::new(&data, Some(&warm));
        calc_dependent(&data, &mut ws);
        assert_eq!(ws.idu, Some(1));

        assert_eq!(du_index(&data, &mut ws), Some((1, 0)));
    }
}
