//! Sparse linear algebra.
//!
//! - [`CsrMatrix`] - the sparse matrix format every operator is assembled in
//! - [`PositionBuffer`] - X/Y/Z channels indexed by matrix row
//! - [`MatrixSolver`] - one interface over direct ([`DirectSolver`]) and
//!   iterative ([`PcgSolver`], [`BiCgStabSolver`]) backends, created with
//!   [`create_solver`]

mod buffer;
mod direct;
pub mod iterative;
mod solver;
mod sparse;

pub use buffer::PositionBuffer;
pub use direct::DirectSolver;
pub use iterative::{BiCgStabSolver, PcgSolver};
pub use solver::{create_solver, IterativeSolver, MatrixSolver, MatrixSolverType, SolverSettings};
pub use sparse::CsrMatrix;
