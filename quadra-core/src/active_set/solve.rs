//! Driver loop: sequence dependent-quantity computation, flips,
//! factorization, step computation, and the line search until no
//! productive active-set change remains or the iteration cap is hit.

use std::time::Instant;

use crate::active_set::workspace::{QpData, Workspace};
use crate::active_set::{flip, kkt, ratio, residual, step, Change};
use crate::problem::{
    QpError, QpProblem, SolveInfo, SolveResult, SolveStatus, SolverSettings,
};

/// Solve the QP with the active-set iteration.
pub fn solve_qp(prob: &QpProblem, settings: &SolverSettings) -> Result<SolveResult, QpError> {
    prob.validate()?;
    if let Some(warm) = &settings.warm_start {
        validate_warm_start(prob, warm)?;
    }

    let start = Instant::now();
    let data = QpData::new(prob, settings)?;
    let mut ws = Workspace::new(&data, settings.warm_start.as_ref());

    if settings.print_header {
        println!("-------------------------------------------");
        println!("This is quadra-core, an active-set QP solver.");
        println!("Number of variables:   {:>9}", data.nx);
        println!("Number of constraints: {:>9}", data.na);
    }
    if settings.verbose {
        dump_vector("lbz", &data.lbz);
        dump_vector("ubz", &data.ubz);
        dump_vector("nz_h", data.h.data());
        dump_vector("nz_a", data.a.data());
    }

    let mut change = Change::Pending;
    let mut recovery: Option<(usize, i32)> = None;
    let mut iter = 0usize;

    let status = loop {
        residual::calc_dependent(&data, &mut ws);

        // Make an active-set change
        flip::flip(&data, &mut ws, &mut change, recovery);

        if settings.verbose {
            dump_vector("z", &ws.z);
            dump_vector("lam", &ws.lam);
        }

        // Form and factorize the KKT system
        kkt::factorize(&data, &mut ws)?;

        if settings.print_iter {
            if iter % 10 == 0 {
                println!(
                    "{:>5} {:>5} {:>9} {:>9} {:>5} {:>9} {:>5} {:>9} {:>5} {:>9}  {}",
                    "Iter", "Sing", "fk", "|pr|", "con", "|du|", "var", "min_R", "con",
                    "last_tau", "Note"
                );
            }
            println!(
                "{:>5} {:>5} {:>9.2e} {:>9.2e} {:>5} {:>9.2e} {:>5} {:>9.2e} {:>5} {:>9.2e}  {}",
                iter,
                ws.nullity,
                ws.f,
                ws.pr,
                ws.ipr.map_or(-1, |i| i as i64),
                ws.du,
                ws.idu.map_or(-1, |i| i as i64),
                ws.mina,
                ws.imina,
                ws.tau,
                ws.msg
            );
        }

        // Successful return if still no change
        if change == Change::None {
            break SolveStatus::Optimal;
        }

        if iter >= settings.max_iter {
            eprintln!("quadra-core: maximum number of iterations reached");
            break SolveStatus::MaxIters;
        }
        iter += 1;
        ws.msg.clear();

        // Calculate the search direction
        recovery = match step::calc_step(&data, &mut ws) {
            Ok(recovery) => recovery,
            Err(step::StepFailed) => {
                eprintln!("quadra-core: failed to calculate search direction");
                break SolveStatus::DirectionFailure;
            }
        };

        if settings.verbose {
            dump_vector("dz", &ws.dz);
            dump_vector("dlam", &ws.dlam);
        }

        // Line search in the calculated direction
        change = ratio::linesearch(&data, &mut ws);
    };

    Ok(SolveResult {
        status,
        x: ws.z[..data.nx].to_vec(),
        lam_x: ws.lam[..data.nx].to_vec(),
        lam_a: ws.lam[data.nx..].to_vec(),
        obj_val: ws.f,
        info: SolveInfo {
            iters: iter,
            primal_res: ws.pr,
            dual_res: ws.du,
            solve_time_ms: start.elapsed().as_millis() as u64,
        },
    })
}

fn validate_warm_start(prob: &QpProblem, warm: &crate::problem::WarmStart) -> Result<(), QpError> {
    let n = prob.num_vars();
    let m = prob.num_constraints();
    for (name, v, expected) in [
        ("x0", &warm.x, n),
        ("lam_x0", &warm.lam_x, n),
        ("lam_a0", &warm.lam_a, m),
    ] {
        if let Some(v) = v {
            if v.len() != expected {
                return Err(QpError::VectorLength {
                    name,
                    len: v.len(),
                    expected,
                });
            }
        }
    }
    Ok(())
}

fn dump_vector(id: &str, v: &[f64]) {
    eprintln!("{}: {:?}", id, v);
}
