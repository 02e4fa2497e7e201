//! Core mesh data structures.
//!
//! This module provides the half-edge mesh the solvers run on and the
//! [`MeshTopology`] trait that is the only view of a mesh the solvers use.
//!
//! # Index Types
//!
//! Mesh elements and matrix rows are identified by type-safe index wrappers:
//! - [`VertexId`] - Identifies a vertex
//! - [`HalfEdgeId`] - Identifies a half-edge
//! - [`FaceId`] - Identifies a triangle
//! - [`EdgeId`] - Identifies a full edge
//! - [`RowIndex`] - Identifies a row/column of a linear system
//!
//! # Construction
//!
//! ```
//! use lapdeform::mesh::{build_from_triangles, HalfEdgeMesh};
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//! ];
//! let faces = vec![[0, 1, 2]];
//!
//! let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
//! ```

mod builder;
pub mod generators;
mod halfedge;
mod index;
mod topology;

pub use builder::{build_from_triangles, to_face_vertex};
pub use halfedge::{Face, HalfEdge, HalfEdgeMesh, Vertex, VertexHalfEdgeIter};
pub use index::{EdgeId, FaceId, HalfEdgeId, RowIndex, VertexId};
pub use topology::MeshTopology;
