//! Laplacian-based mesh processing.
//!
//! Data flows through the modules in this order:
//!
//! - [`linearize`]: map vertices and triangles to matrix rows
//! - [`laplacian`]: assemble the Laplacian blocks for a weighting scheme
//! - [`constrained`] and [`deform`]: soft-constrained biharmonic deformers,
//!   smoothers and the ARAP deformer
//! - [`diffusion`] and [`smooth`]: explicit and implicit diffusion flows
//! - [`qp`]: quadratic programs with fixed rows
//!
//! All linear systems are solved through [`crate::linalg::MatrixSolver`].

pub mod constrained;
pub mod deform;
pub mod diffusion;
pub mod laplacian;
pub mod linearize;
pub mod qp;
pub mod smooth;
