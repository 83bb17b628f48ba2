//! Linear algebra layer.
//!
//! Sparse matrix helpers and the rank-revealing factorization kernel
//! used for the KKT system.

pub mod qr;
pub mod sparse;
