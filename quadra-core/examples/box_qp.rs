//! Box-constrained QP example.
//!
//! Solves:
//!   minimize    1/2 (x1^2 + x2^2) - 3 x1 - 3 x2
//!   subject to  0 <= x1 <= 1, 0 <= x2 <= 1
//!               x1 + x2 <= 1.5
//!
//! Optimal solution: x1 = x2 = 0.75, objective = -3.9375

use quadra_core::linalg::sparse;
use quadra_core::{solve, QpProblem, SolverSettings};

fn main() {
    let prob = QpProblem {
        h: sparse::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]),
        g: vec![-3.0, -3.0],
        a: sparse::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]),
        lbx: vec![0.0, 0.0],
        ubx: vec![1.0, 1.0],
        lba: vec![f64::NEG_INFINITY],
        uba: vec![1.5],
    };

    let settings = SolverSettings::default();

    match solve(&prob, &settings) {
        Ok(res) => {
            println!();
            println!("Status:     {}", res.status);
            println!("x:          {:?}", res.x);
            println!("lam_x:      {:?}", res.lam_x);
            println!("lam_a:      {:?}", res.lam_a);
            println!("Objective:  {}", res.obj_val);
            println!("Iterations: {}", res.info.iters);
        }
        Err(e) => eprintln!("solve failed: {}", e),
    }
}
