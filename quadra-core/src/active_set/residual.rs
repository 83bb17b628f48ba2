//! Dependent quantities: objective, constraint values, stationarity
//! residual, and the scalar error norms with their witness indices.

use crate::active_set::workspace::{QpData, Workspace};
use crate::active_set::DMIN;
use crate::linalg::sparse;

/// Recompute everything that depends on (z, lam): the objective, the
/// constraint-value slots z[nx..], the stationarity residual, and the
/// primal/dual error norms.
///
/// Bound multipliers are updated to match the negative Lagrangian
/// gradient *without changing sign*, floored at DMIN in magnitude, so
/// the active set encoded in the signs survives while the magnitudes
/// adapt. The residual then has the bound multiplier folded in.
pub(crate) fn calc_dependent(data: &QpData, ws: &mut Workspace) {
    let nx = data.nx;

    ws.f = sparse::bilin(data.h, &ws.z[..nx], &ws.z[..nx]) / 2.0
        + sparse::dot(&ws.z[..nx], data.g);

    {
        let (zx, za) = ws.z.split_at_mut(nx);
        za.fill(0.0);
        sparse::spmv_acc(data.a, zx, za);
    }

    // Lagrangian gradient, ignoring bound multipliers
    ws.infeas.copy_from_slice(data.g);
    sparse::spmv_acc(data.h, &ws.z[..nx], &mut ws.infeas);
    sparse::spmv_t_acc(data.a, &ws.lam[nx..], &mut ws.infeas);

    for i in 0..nx {
        if ws.lam[i] > 0.0 {
            ws.lam[i] = (-ws.infeas[i]).max(DMIN);
        } else if ws.lam[i] < 0.0 {
            ws.lam[i] = (-ws.infeas[i]).min(-DMIN);
        }
        ws.infeas[i] += ws.lam[i];
    }

    primal_error(data, ws);
    dual_error(data, ws);
}

/// Largest bound violation and its index.
pub(crate) fn primal_error(data: &QpData, ws: &mut Workspace) {
    ws.pr = 0.0;
    ws.ipr = None;
    for i in 0..data.nz {
        if ws.z[i] > data.ubz[i] + ws.pr {
            ws.pr = ws.z[i] - data.ubz[i];
            ws.ipr = Some(i);
        } else if ws.z[i] < data.lbz[i] - ws.pr {
            ws.pr = data.lbz[i] - ws.z[i];
            ws.ipr = Some(i);
        }
    }
}

/// Largest stationarity violation and its index.
pub(crate) fn dual_error(data: &QpData, ws: &mut Workspace) {
    ws.du = 0.0;
    ws.idu = None;
    for i in 0..data.nx {
        if ws.infeas[i] > ws.du {
            ws.du = ws.infeas[i];
            ws.idu = Some(i);
        } else if ws.infeas[i] < -ws.du {
            ws.du = -ws.infeas[i];
            ws.idu = Some(i);
        }
    }
}

/// Maximum stationarity violation that would result from zeroing
/// lam[i], leaving everything else fixed.
pub(crate) fn du_check(data: &QpData, ws: &Workspace, i: usize) -> f64 {
    if i < data.nx {
        (ws.infeas[i] - ws.lam[i]).abs()
    } else {
        let mut new_du = 0.0_f64;
        if let Some(col) = data.at.outer_view(i - data.nx) {
            for (r, &v) in col.iter() {
                new_du = new_du.max((ws.infeas[r] - v * ws.lam[i]).abs());
            }
        }
        new_du
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
            g: vec![-1.0, -2.0],
            a: sparse::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]),
            lbx: vec![0.0, 0.0],
            ubx: vec![2.0, 2.0],
            lba: vec![0.0],
            uba: vec![1.0],
        }
    }

    #[test]
    fn test_calc_dependent_values() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let warm = WarmStart {
            x: Some(vec![1.0, 2.0]),
            lam_x: None,
            lam_a: None,
        };
        let mut ws = crate::active_set::workspace::Workspace::new(&data, Some(&warm));
        calc_dependent(&data, &mut ws);

        // f = 0.5 * (1 + 4) - 1 - 4 = -2.5
        assert!((ws.f + 2.5).abs() < 1e-14);
        // Constraint value slot: A x = 3
        assert!((ws.z[2] - 3.0).abs() < 1e-14);
        // infeas = g + H x = (0, 0)
        assert!(ws.infeas.iter().all(|&v| v.abs() < 1e-14));
        assert_eq!(ws.du, 0.0);
        assert!(ws.idu.is_none());
        // Row violation 3 - 1 = 2 dominates the variable bounds
        assert!((ws.pr - 2.0).abs() < 1e-14);
        assert_eq!(ws.ipr, Some(2));
    }

    #[test]
    fn test_calc_dependent_idempotent() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let warm = WarmStart {
            x: Some(vec![0.5, 1.5]),
            lam_x: Some(vec![0.5, -0.5]),
            lam_a: Some(vec![1.0]),
        };
        let mut ws = crate::active_set::workspace::Workspace::new(&data, Some(&warm));

        calc_dependent(&data, &mut ws);
        let snapshot = (
            ws.f,
            ws.pr,
            ws.du,
            ws.ipr,
            ws.idu,
            ws.z.clone(),
            ws.lam.clone(),
            ws.infeas.clone(),
        );
        calc_dependent(&data, &mut ws);
        assert_eq!(ws.f, snapshot.0);
        assert_eq!(ws.pr, snapshot.1);
        assert_eq!(ws.du, snapshot.2);
        assert_eq!(ws.ipr, snapshot.3);
        assert_eq!(ws.idu, snapshot.4);
        assert_eq!(ws.z, snapshot.5);
        assert_eq!(ws.lam, snapshot.6);
        assert_eq!(ws.infeas, snapshot.7);
    }

    #[test]
    fn test_sign_preserving_clamp() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let warm = WarmStart {
            x: Some(vec![1.0, 2.0]),
            // Claimed active with the "wrong" magnitude; infeas here is
            // zero, so the clamp floors the multipliers at +-DMIN
            lam_x: Some(vec![5.0, -5.0]),
            lam_a: None,
        };
        let mut ws = crate::active_set::workspace::Workspace::new(&data, Some(&warm));
        calc_dependent(&data, &mut ws);
        assert_eq!(ws.lam[0], DMIN);
        assert_eq!(ws.lam[1], -DMIN);
    }

    #[test]
    fn test_du_check() {
        let prob = problem();
        let data = QpData::new(&prob, &SolverSettings::default()).unwrap();
        let warm = WarmStart {
            x: None,
            lam_x: None,
            lam_a: Some(vec![2.0]),
        };
        let mut ws = crate::active_set::workspace::Workspace::new(&data, Some(&warm));
        calc_dependent(&data, &mut ws);
        // infeas = g + A^T lam_a = (1, 0); zeroing the row multiplier
        // would leave |g| = (1, 2) through the row's entries
        let check = du_check(&data, &ws, 2);
        assert!((check - 2.0).abs() < 1e-14, "check = {}", check);
    }
}
