//! Krylov solvers for sparse systems.
//!
//! - Preconditioned conjugate gradient with a Jacobi preconditioner, for
//!   symmetric positive (semi-)definite systems.
//! - BiCGStab with an ILU(0) preconditioner, for general systems.
//!
//! Both solvers keep no factorization beyond the preconditioner, so
//! "factorizing" amounts to storing the matrix and building the
//! preconditioner.

use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::DVector;

use super::solver::{IterativeSolver, MatrixSolver, MatrixSolverType, SolverSettings};
use super::sparse::CsrMatrix;
use crate::error::{MeshError, Result};

/// Pivots smaller than this are replaced during ILU(0).
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Inner products below this magnitude are treated as a breakdown.
const BREAKDOWN_TOLERANCE: f64 = 1e-300;

/// Approximate inverse applied to residuals.
pub trait Preconditioner: Send + Sync {
    /// Compute `z = M⁻¹ r`.
    fn apply(&self, r: &DVector<f64>) -> DVector<f64>;
}

/// Diagonal (Jacobi) preconditioner.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner {
    inv_diagonal: DVector<f64>,
}

impl JacobiPreconditioner {
    /// Build from the diagonal of `matrix`; zero diagonal entries are left
    /// unscaled.
    pub fn new(matrix: &CsrMatrix) -> Self {
        let inv_diagonal = matrix
            .diagonal()
            .map(|d| if d.abs() > f64::EPSILON { 1.0 / d } else { 1.0 });
        Self { inv_diagonal }
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn apply(&self, r: &DVector<f64>) -> DVector<f64> {
        r.component_mul(&self.inv_diagonal)
    }
}

/// Incomplete LU factorization with zero fill-in.
///
/// `L` (unit lower) and `U` share the sparsity pattern of the input matrix.
#[derive(Debug, Clone)]
pub struct Ilu0Preconditioner {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    lu_values: Vec<f64>,
    diag_ptr: Vec<usize>,
}

impl Ilu0Preconditioner {
    /// Factorize `matrix`.
    ///
    /// # Errors
    /// Fails if the matrix is not square or a row has no stored diagonal.
    pub fn new(matrix: &CsrMatrix) -> Result<Self> {
        let n = matrix.nrows();
        if matrix.ncols() != n {
            return Err(MeshError::mismatch(n, matrix.ncols()));
        }

        let row_ptr = matrix.row_ptr().to_vec();
        let col_idx = matrix.col_idx().to_vec();
        let mut lu_values = matrix.values().to_vec();

        let mut diag_ptr = Vec::with_capacity(n);
        for i in 0..n {
            let k = (row_ptr[i]..row_ptr[i + 1])
                .find(|&k| col_idx[k] == i)
                .ok_or_else(|| MeshError::FactorizationFailed {
                    solver: "ILU(0)",
                    message: format!("row {i} has no diagonal entry"),
                })?;
            diag_ptr.push(k);
        }

        for i in 1..n {
            for k_idx in row_ptr[i]..row_ptr[i + 1] {
                let k = col_idx[k_idx];
                if k >= i {
                    break;
                }

                let mut pivot = lu_values[diag_ptr[k]];
                if pivot.abs() < PIVOT_TOLERANCE {
                    pivot = if pivot < 0.0 { -PIVOT_TOLERANCE } else { PIVOT_TOLERANCE };
                    lu_values[diag_ptr[k]] = pivot;
                }

                let factor = lu_values[k_idx] / pivot;
                lu_values[k_idx] = factor;

                // Update the rest of row i, restricted to its own pattern
                for j_idx in (k_idx + 1)..row_ptr[i + 1] {
                    let j = col_idx[j_idx];
                    let row_k = &col_idx[row_ptr[k]..row_ptr[k + 1]];
                    if let Ok(m) = row_k.binary_search(&j) {
                        lu_values[j_idx] -= factor * lu_values[row_ptr[k] + m];
                    }
                }
            }
        }

        Ok(Self {
            n,
            row_ptr,
            col_idx,
            lu_values,
            diag_ptr,
        })
    }
}

impl Preconditioner for Ilu0Preconditioner {
    fn apply(&self, r: &DVector<f64>) -> DVector<f64> {
        // L y = r
        let mut z = r.clone();
        for i in 0..self.n {
            for k in self.row_ptr[i]..self.diag_ptr[i] {
                z[i] -= self.lu_values[k] * z[self.col_idx[k]];
            }
        }
        // U z = y
        for i in (0..self.n).rev() {
            for k in (self.diag_ptr[i] + 1)..self.row_ptr[i + 1] {
                z[i] -= self.lu_values[k] * z[self.col_idx[k]];
            }
            let d = self.lu_values[self.diag_ptr[i]];
            if d.abs() > PIVOT_TOLERANCE {
                z[i] /= d;
            }
        }
        z
    }
}

/// Outcome of a converged iterative solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationStats {
    /// Iterations performed.
    pub iterations: usize,
    /// Final relative residual `‖b - Ax‖ / ‖b‖`.
    pub relative_residual: f64,
}

fn check_system(a: &CsrMatrix, b: &DVector<f64>, x0: Option<&DVector<f64>>) -> Result<()> {
    if a.nrows() != a.ncols() {
        return Err(MeshError::mismatch(a.nrows(), a.ncols()));
    }
    if b.len() != a.nrows() {
        return Err(MeshError::mismatch(a.nrows(), b.len()));
    }
    if let Some(x0) = x0 {
        if x0.len() != a.nrows() {
            return Err(MeshError::mismatch(a.nrows(), x0.len()));
        }
    }
    Ok(())
}

/// Solve `A x = b` with the preconditioned conjugate gradient method.
///
/// # Arguments
///
/// * `a` - The system matrix (must be symmetric positive semi-definite)
/// * `b` - The right-hand side vector
/// * `x0` - Optional initial guess (zeros if None)
/// * `precond` - Preconditioner applied to every residual
/// * `max_iter` - Maximum number of iterations
/// * `tolerance` - Convergence tolerance (relative residual norm)
///
/// # Returns
///
/// The solution vector and iteration statistics, or
/// [`MeshError::ConvergenceFailed`] if the residual does not drop below the
/// tolerance within `max_iter` iterations.
pub fn preconditioned_conjugate_gradient<P: Preconditioner + ?Sized>(
    a: &CsrMatrix,
    b: &DVector<f64>,
    x0: Option<&DVector<f64>>,
    precond: &P,
    max_iter: usize,
    tolerance: f64,
) -> Result<(DVector<f64>, IterationStats)> {
    check_system(a, b, x0)?;
    let n = b.len();

    let mut x = match x0 {
        Some(x0) => x0.clone(),
        None => DVector::zeros(n),
    };

    let b_norm = b.norm();
    if b_norm < 1e-15 {
        // Homogeneous system: zero is a solution
        return Ok((DVector::zeros(n), IterationStats { iterations: 0, relative_residual: 0.0 }));
    }

    let mut r = b - a.mul_vec(&x);
    let mut rel = r.norm() / b_norm;
    if rel < tolerance {
        return Ok((x, IterationStats { iterations: 0, relative_residual: rel }));
    }

    let mut z = precond.apply(&r);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for iter in 0..max_iter {
        let ap = a.mul_vec(&p);
        let p_ap = p.dot(&ap);
        if p_ap.abs() < BREAKDOWN_TOLERANCE {
            log::debug!("PCG breakdown at iteration {}: pᵀAp = {:.3e}", iter, p_ap);
            break;
        }
        let alpha = rz / p_ap;

        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);

        rel = r.norm() / b_norm;
        log::trace!("PCG iter {}: residual = {:.6e}", iter + 1, rel);
        if rel < tolerance {
            return Ok((x, IterationStats { iterations: iter + 1, relative_residual: rel }));
        }

        z = precond.apply(&r);
        let rz_new = r.dot(&z);
        let beta = rz_new / rz;
        p = &z + beta * &p;
        rz = rz_new;
    }

    log::warn!("PCG did not converge: relative residual {:.3e} after {} iterations", rel, max_iter);
    Err(MeshError::ConvergenceFailed { iterations: max_iter })
}

/// Solve `A x = b` with the preconditioned BiCGStab method.
///
/// Handles non-symmetric systems. Returns [`MeshError::ConvergenceFailed`] on
/// breakdown or when the iteration budget runs out.
pub fn bicgstab<P: Preconditioner + ?Sized>(
    a: &CsrMatrix,
    b: &DVector<f64>,
    x0: Option<&DVector<f64>>,
    precond: &P,
    max_iter: usize,
    tolerance: f64,
) -> Result<(DVector<f64>, IterationStats)> {
    check_system(a, b, x0)?;
    let n = b.len();

    let mut x = match x0 {
        Some(x0) => x0.clone(),
        None => DVector::zeros(n),
    };

    let b_norm = b.norm();
    if b_norm < 1e-15 {
        return Ok((DVector::zeros(n), IterationStats { iterations: 0, relative_residual: 0.0 }));
    }

    let mut r = b - a.mul_vec(&x);
    let mut rel = r.norm() / b_norm;
    if rel < tolerance {
        return Ok((x, IterationStats { iterations: 0, relative_residual: rel }));
    }

    // Shadow residual stays fixed
    let r_hat = r.clone();
    let mut rho_old = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;
    let mut v = DVector::zeros(n);
    let mut p = DVector::zeros(n);

    for iter in 0..max_iter {
        let rho = r_hat.dot(&r);
        if rho.abs() < BREAKDOWN_TOLERANCE {
            log::debug!("BiCGStab breakdown at iteration {}: rho = {:.3e}", iter, rho);
            break;
        }

        if iter == 0 {
            p.copy_from(&r);
        } else {
            let beta = (rho / rho_old) * (alpha / omega);
            p = &r + beta * (&p - omega * &v);
        }
        rho_old = rho;

        let p_hat = precond.apply(&p);
        v = a.mul_vec(&p_hat);

        let r_hat_v = r_hat.dot(&v);
        if r_hat_v.abs() < BREAKDOWN_TOLERANCE {
            log::debug!("BiCGStab breakdown at iteration {}: r̂ᵀv = {:.3e}", iter, r_hat_v);
            break;
        }
        alpha = rho / r_hat_v;

        let s = &r - alpha * &v;
        rel = s.norm() / b_norm;
        if rel < tolerance {
            x.axpy(alpha, &p_hat, 1.0);
            return Ok((x, IterationStats { iterations: iter + 1, relative_residual: rel }));
        }

        let s_hat = precond.apply(&s);
        let t = a.mul_vec(&s_hat);
        let tt = t.dot(&t);
        omega = if tt.abs() < BREAKDOWN_TOLERANCE { 0.0 } else { t.dot(&s) / tt };

        x.axpy(alpha, &p_hat, 1.0);
        x.axpy(omega, &s_hat, 1.0);
        r = &s - omega * &t;

        rel = r.norm() / b_norm;
        log::trace!("BiCGStab iter {}: residual = {:.6e}", iter + 1, rel);
        if rel < tolerance {
            return Ok((x, IterationStats { iterations: iter + 1, relative_residual: rel }));
        }

        if omega.abs() < BREAKDOWN_TOLERANCE {
            log::debug!("BiCGStab breakdown at iteration {}: omega vanished", iter);
            break;
        }
    }

    log::warn!(
        "BiCGStab did not converge: relative residual {:.3e} after at most {} iterations",
        rel,
        max_iter
    );
    Err(MeshError::ConvergenceFailed { iterations: max_iter })
}

/// Conjugate gradient backend with Jacobi preconditioning.
#[derive(Debug)]
pub struct PcgSolver {
    settings: SolverSettings,
    system: Option<(CsrMatrix, JacobiPreconditioner)>,
    ok: AtomicBool,
}

impl PcgSolver {
    /// Create an unfactorized solver.
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            system: None,
            ok: AtomicBool::new(false),
        }
    }

    fn run(&self, rhs: &DVector<f64>, guess: Option<&DVector<f64>>) -> Result<DVector<f64>> {
        let Some((matrix, precond)) = &self.system else {
            self.ok.store(false, Ordering::Relaxed);
            return Err(MeshError::NotFactorized);
        };
        let result = preconditioned_conjugate_gradient(
            matrix,
            rhs,
            guess,
            precond,
            self.settings.max_iterations,
            self.settings.tolerance,
        );
        self.ok.store(result.is_ok(), Ordering::Relaxed);
        result.map(|(x, _)| x)
    }
}

impl MatrixSolver for PcgSolver {
    fn solver_type(&self) -> MatrixSolverType {
        MatrixSolverType::Pcg
    }

    fn factorize(&mut self, matrix: &CsrMatrix, symmetric: bool) -> Result<()> {
        self.system = None;
        self.ok.store(false, Ordering::Relaxed);
        if !symmetric {
            log::warn!("PCG handed a matrix flagged non-symmetric");
            return Err(MeshError::NotSymmetric { solver: "PCG" });
        }
        if matrix.nrows() != matrix.ncols() {
            return Err(MeshError::mismatch(matrix.nrows(), matrix.ncols()));
        }
        log::debug!("PCG setup: {}x{} matrix, {} non-zeros", matrix.nrows(), matrix.ncols(), matrix.nnz());
        let precond = JacobiPreconditioner::new(matrix);
        self.system = Some((matrix.clone(), precond));
        self.ok.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn succeeded(&self) -> bool {
        self.ok.load(Ordering::Relaxed)
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        self.run(rhs, None)
    }

    fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    fn as_iterative(&self) -> Option<&dyn IterativeSolver> {
        Some(self)
    }

    fn as_iterative_mut(&mut self) -> Option<&mut dyn IterativeSolver> {
        Some(self)
    }
}

impl IterativeSolver for PcgSolver {
    fn set_max_iterations(&mut self, max_iterations: usize) {
        self.settings.max_iterations = max_iterations;
    }

    fn set_tolerance(&mut self, tolerance: f64) {
        self.settings.tolerance = tolerance;
    }

    fn solve_with_guess(&self, guess: &DVector<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        self.run(rhs, Some(guess))
    }
}

/// BiCGStab backend with ILU(0) preconditioning.
#[derive(Debug)]
pub struct BiCgStabSolver {
    settings: SolverSettings,
    system: Option<(CsrMatrix, Ilu0Preconditioner)>,
    ok: AtomicBool,
}

impl BiCgStabSolver {
    /// Create an unfactorized solver.
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            system: None,
            ok: AtomicBool::new(false),
        }
    }

    fn run(&self, rhs: &DVector<f64>, guess: Option<&DVector<f64>>) -> Result<DVector<f64>> {
        let Some((matrix, precond)) = &self.system else {
            self.ok.store(false, Ordering::Relaxed);
            return Err(MeshError::NotFactorized);
        };
        let result = bicgstab(
            matrix,
            rhs,
            guess,
            precond,
            self.settings.max_iterations,
            self.settings.tolerance,
        );
        self.ok.store(result.is_ok(), Ordering::Relaxed);
        result.map(|(x, _)| x)
    }
}

impl MatrixSolver for BiCgStabSolver {
    fn solver_type(&self) -> MatrixSolverType {
        MatrixSolverType::BiCgStab
    }

    fn factorize(&mut self, matrix: &CsrMatrix, _symmetric: bool) -> Result<()> {
        self.system = None;
        self.ok.store(false, Ordering::Relaxed);
        log::debug!(
            "BiCGStab setup: {}x{} matrix, {} non-zeros",
            matrix.nrows(),
            matrix.ncols(),
            matrix.nnz()
        );
        let precond = Ilu0Preconditioner::new(matrix).inspect_err(|e| {
            log::warn!("ILU(0) preconditioner failed: {}", e);
        })?;
        self.system = Some((matrix.clone(), precond));
        self.ok.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn succeeded(&self) -> bool {
        self.ok.load(Ordering::Relaxed)
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        self.run(rhs, None)
    }

    fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    fn as_iterative(&self) -> Option<&dyn IterativeSolver> {
        Some(self)
    }

    fn as_iterative_mut(&mut self) -> Option<&mut dyn IterativeSolver> {
        Some(self)
    }
}

impl IterativeSolver for BiCgStabSolver {
    fn set_max_iterations(&mut self, max_iterations: usize) {
        self.settings.max_iterations = max_iterations;
    }

    fn set_tolerance(&mut self, tolerance: f64) {
        self.settings.tolerance = tolerance;
    }

    fn solve_with_guess(&self, guess: &DVector<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        self.run(rhs, Some(guess))
    }
}
