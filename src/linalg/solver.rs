//! The matrix solver interface and its factory.

use nalgebra::DVector;

use super::buffer::PositionBuffer;
use super::direct::DirectSolver;
use super::iterative::{BiCgStabSolver, PcgSolver};
use super::sparse::CsrMatrix;
use crate::error::{MeshError, Result};

/// Available solver backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixSolverType {
    /// Sparse LU; any non-singular square matrix.
    Lu,
    /// Sparse QR; general matrices, least-squares on rank deficiency.
    Qr,
    /// Sparse LLᵀ; symmetric positive-definite matrices only.
    Cholesky,
    /// Jacobi-preconditioned conjugate gradient; symmetric positive
    /// (semi-)definite matrices.
    Pcg,
    /// ILU(0)-preconditioned BiCGStab; general matrices.
    BiCgStab,
}

impl MatrixSolverType {
    /// Whether this backend iterates and accepts warm starts.
    pub fn is_iterative(self) -> bool {
        matches!(self, MatrixSolverType::Pcg | MatrixSolverType::BiCgStab)
    }

    /// Whether this backend rejects non-symmetric matrices.
    pub fn requires_symmetric(self) -> bool {
        matches!(self, MatrixSolverType::Cholesky | MatrixSolverType::Pcg)
    }

    /// The cheapest iterative backend valid for a matrix of the given
    /// symmetry.
    pub fn fastest_for(symmetric: bool) -> Self {
        if symmetric {
            MatrixSolverType::Pcg
        } else {
            MatrixSolverType::BiCgStab
        }
    }
}

/// Iteration limits and threading for solver backends.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    /// Maximum Krylov iterations per solve.
    pub max_iterations: usize,
    /// Relative residual at which an iterative solve stops.
    pub tolerance: f64,
    /// Solve the three coordinate channels in parallel.
    pub parallel: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-8,
            parallel: true,
        }
    }
}

impl SolverSettings {
    /// Set the iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Enable or disable parallel channel solves.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(MeshError::invalid_param("max_iterations", self.max_iterations, "must be positive"));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(MeshError::invalid_param("tolerance", self.tolerance, "must be positive"));
        }
        Ok(())
    }
}

/// A linear solver bound to one factorized matrix.
///
/// `factorize` must be called again whenever the matrix values change;
/// any number of right-hand sides can then be solved against it. Every call
/// updates [`succeeded`](MatrixSolver::succeeded).
pub trait MatrixSolver: Send + Sync {
    /// Which backend this is.
    fn solver_type(&self) -> MatrixSolverType;

    /// Factorize (or, for iterative backends, prepare) `matrix`.
    ///
    /// `symmetric` is the caller's knowledge of the matrix structure;
    /// symmetric-only backends fail with [`MeshError::NotSymmetric`] when it
    /// is false.
    fn factorize(&mut self, matrix: &CsrMatrix, symmetric: bool) -> Result<()>;

    /// Whether the last factorization or solve succeeded.
    fn succeeded(&self) -> bool;

    /// Solve `A x = rhs`.
    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>>;

    /// Settings this solver was created with.
    fn settings(&self) -> &SolverSettings;

    /// Whether this backend is iterative.
    fn is_iterative(&self) -> bool {
        self.solver_type().is_iterative()
    }

    /// View as an iterative solver.
    fn as_iterative(&self) -> Option<&dyn IterativeSolver> {
        None
    }

    /// Mutable view as an iterative solver.
    fn as_iterative_mut(&mut self) -> Option<&mut dyn IterativeSolver> {
        None
    }

    /// Solve one system per coordinate channel.
    ///
    /// `guess` warm-starts iterative backends and is ignored by direct ones.
    /// Channels run in parallel when the settings allow it.
    fn solve_positions(
        &self,
        rhs: &PositionBuffer,
        guess: Option<&PositionBuffer>,
    ) -> Result<PositionBuffer> {
        if !rhs.is_valid() {
            return Err(MeshError::mismatch(rhs.len(), rhs.channel(1).len()));
        }
        if let Some(g) = guess {
            if g.len() != rhs.len() || !g.is_valid() {
                return Err(MeshError::mismatch(rhs.len(), g.len()));
            }
        }

        let solve_axis = |axis: usize| -> Result<DVector<f64>> {
            match (guess, self.as_iterative()) {
                (Some(g), Some(iterative)) => {
                    iterative.solve_with_guess(g.channel(axis), rhs.channel(axis))
                }
                _ => self.solve(rhs.channel(axis)),
            }
        };

        let [x, y, z] = if self.settings().parallel {
            let (x, (y, z)) =
                rayon::join(|| solve_axis(0), || rayon::join(|| solve_axis(1), || solve_axis(2)));
            [x?, y?, z?]
        } else {
            [solve_axis(0)?, solve_axis(1)?, solve_axis(2)?]
        };

        PositionBuffer::from_channels([x, y, z])
    }
}

/// Controls specific to iterative backends.
pub trait IterativeSolver: MatrixSolver {
    /// Set the iteration budget of later solves.
    fn set_max_iterations(&mut self, max_iterations: usize);

    /// Set the relative residual target of later solves.
    fn set_tolerance(&mut self, tolerance: f64);

    /// Solve `A x = rhs` starting from `guess`.
    fn solve_with_guess(&self, guess: &DVector<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>>;
}

/// Create an unfactorized solver of the given type.
pub fn create_solver(solver_type: MatrixSolverType, settings: SolverSettings) -> Box<dyn MatrixSolver> {
    match solver_type {
        MatrixSolverType::Pcg => Box::new(PcgSolver::new(settings)),
        MatrixSolverType::BiCgStab => Box::new(BiCgStabSolver::new(settings)),
        MatrixSolverType::Lu | MatrixSolverType::Qr | MatrixSolverType::Cholesky => {
            Box::new(DirectSolver::new(solver_type, settings))
        }
    }
}
