//! Error types for lapdeform.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias using [`MeshError`].
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors that can occur while building meshes or solving mesh systems.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// The mesh has no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices (degenerate triangle).
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// A directed edge is used by more than one face.
    #[error("edge ({v0}, {v1}) has more than two incident faces")]
    NonManifoldEdge {
        /// First vertex of the edge.
        v0: usize,
        /// Second vertex of the edge.
        v1: usize,
    },

    /// A vector, matrix or buffer does not have the expected size.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The expected size.
        expected: usize,
        /// The size that was supplied.
        actual: usize,
    },

    /// A solver that needs a symmetric matrix was handed a non-symmetric one.
    #[error("{solver} requires a symmetric matrix")]
    NotSymmetric {
        /// Name of the solver backend.
        solver: &'static str,
    },

    /// Numeric factorization of the system matrix failed.
    #[error("{solver} factorization failed: {message}")]
    FactorizationFailed {
        /// Name of the solver backend.
        solver: &'static str,
        /// Backend-specific failure description.
        message: String,
    },

    /// A solve was requested before a successful factorization.
    #[error("solver has not been factorized")]
    NotFactorized,

    /// Algorithm failed to converge.
    #[error("algorithm failed to converge after {iterations} iterations")]
    ConvergenceFailed {
        /// Number of iterations attempted.
        iterations: usize,
    },

    /// A quadratic program was solved without fixed constraints.
    #[error("fixed constraints have not been set")]
    MissingFixedConstraints,

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl MeshError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        MeshError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }

    /// Create a dimension mismatch error.
    pub(crate) fn mismatch(expected: usize, actual: usize) -> Self {
        MeshError::DimensionMismatch { expected, actual }
    }
}
