//! # lapdeform
//!
//! Laplacian mesh deformation and smoothing.
//!
//! lapdeform assembles discrete Laplacians over triangle meshes and solves
//! the linear systems built from them: soft-constrained biharmonic
//! deformation, as-rigid-as-possible deformation, explicit and implicit
//! diffusion flows, and quadratic programs with fixed rows.
//!
//! ## Features
//!
//! - **Six weighting schemes**: uniform, umbrella, valence, cotangent,
//!   clamped cotangent and mean value, plus an area-rescaled cotangent
//! - **Pluggable solvers**: sparse LU, QR and Cholesky through faer,
//!   Jacobi-preconditioned CG and ILU(0)-preconditioned BiCGStab
//! - **Incremental constraints**: moving a handle only rebuilds the
//!   right-hand side; changing a weight refactorizes
//! - **Parallel channels**: X/Y/Z solves run on the rayon pool
//!
//! ## Quick Start
//!
//! ```
//! use lapdeform::prelude::*;
//! use nalgebra::Point3;
//!
//! let mesh = generators::grid(6, 6, 1.0);
//! let mut deformer = construct_mesh_deformer(LaplacianScheme::Cotangent, &mesh);
//!
//! // Lift the middle vertex; the open boundary stays fixed
//! let handle = VertexId::new(24);
//! deformer.add_constraint(handle, 10.0, Point3::new(3.0, 3.0, 1.0), true);
//!
//! let mut positions = Vec::new();
//! deformer.deform(&mut positions).unwrap();
//! assert_eq!(positions[24], Point3::new(3.0, 3.0, 1.0));
//! ```
//!
//! ## Building Meshes Programmatically
//!
//! ```
//! use lapdeform::prelude::*;
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//!     Point3::new(0.5, 0.5, 1.0),
//! ];
//!
//! let faces = vec![
//!     [0, 2, 1],  // bottom
//!     [0, 1, 3],  // front
//!     [1, 2, 3],  // right
//!     [2, 0, 3],  // left
//! ];
//!
//! let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
//! assert_eq!(mesh.num_vertices(), 4);
//! assert_eq!(mesh.num_faces(), 4);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod error;
pub mod linalg;
pub mod mesh;

/// Prelude module for convenient imports.
///
/// ```
/// use lapdeform::prelude::*;
/// ```
pub mod prelude {
    pub use crate::algo::constrained::{ConstrainedMeshSolver, OperatorKind, OperatorOptions};
    pub use crate::algo::deform::{construct_arap_deformer, construct_mesh_deformer, construct_mesh_smoother};
    pub use crate::algo::diffusion::{BiHarmonicDiffusion, DiffusionIntegrator, LaplacianDiffusion};
    pub use crate::algo::laplacian::{construct_laplacian, LaplacianOptions, LaplacianPair, LaplacianScheme};
    pub use crate::algo::linearize::{TriangleLinearization, VertexLinearization};
    pub use crate::algo::qp::QuadraticProgram;
    pub use crate::error::{MeshError, Result};
    pub use crate::linalg::{create_solver, CsrMatrix, MatrixSolver, MatrixSolverType, PositionBuffer, SolverSettings};
    pub use crate::mesh::{
        build_from_triangles, generators, EdgeId, FaceId, HalfEdgeId, HalfEdgeMesh, MeshTopology, RowIndex, VertexId,
    };
}

// Re-export nalgebra types for convenience
pub use nalgebra;
