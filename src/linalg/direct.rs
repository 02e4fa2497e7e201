//! Direct sparse solvers backed by `faer`.
//!
//! The system matrix is converted from [`CsrMatrix`] to faer's CSC format,
//! then analysed symbolically and factorized numerically once. Every later
//! solve reuses the cached factors, which is what makes right-hand-side-only
//! updates cheap.
//!
//! QR keeps a copy of the matrix: when the sparse factors cannot produce a
//! least-squares solution (rank-deficient systems), the solve falls back to
//! the minimum-norm solution of a dense SVD, computed once and cached.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use faer::linalg::solvers::{Solve, SolveLstsq};
use faer::sparse::linalg::solvers::{Llt, Lu, Qr, SymbolicLlt, SymbolicLu};
use faer::sparse::{SparseColMat, Triplet};
use faer::Side;
use nalgebra::{DMatrix, DVector, SVD};

use super::solver::{MatrixSolver, MatrixSolverType, SolverSettings};
use super::sparse::CsrMatrix;
use crate::error::{MeshError, Result};

/// Relative tolerance for the symmetry check performed before Cholesky.
const SYMMETRY_TOLERANCE: f64 = 1e-10;

/// Singular values below this fraction of the largest are treated as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// Relative bound on the normal-equation residual `‖Aᵀ(Ax - b)‖` accepted
/// from the sparse QR solve.
const LSTSQ_TOLERANCE: f64 = 1e-8;

/// Least-squares state of a QR factorization.
struct LeastSquares {
    /// `None` when the sparse factorization itself failed.
    qr: Option<Qr<usize, f64>>,
    matrix: CsrMatrix,
    transpose: CsrMatrix,
    frobenius: f64,
    svd: OnceLock<SVD<f64, nalgebra::Dyn, nalgebra::Dyn>>,
}

impl LeastSquares {
    fn new(qr: Option<Qr<usize, f64>>, matrix: &CsrMatrix) -> Self {
        let frobenius = matrix.triplets().map(|(_, _, v)| v * v).sum::<f64>().sqrt();
        Self {
            qr,
            matrix: matrix.clone(),
            transpose: matrix.transpose(),
            frobenius,
            svd: OnceLock::new(),
        }
    }

    /// Whether `x` satisfies the normal equations of `‖Ax - b‖` without
    /// implying a condition number above `1 / RANK_TOLERANCE`.
    fn is_least_squares(&self, x: &DVector<f64>, b: &DVector<f64>) -> bool {
        if x.iter().any(|v| !v.is_finite()) {
            return false;
        }
        // A near-zero pivot in R blows up the null-space component
        if self.frobenius * x.norm() * RANK_TOLERANCE > b.norm() {
            return false;
        }
        let residual = self.matrix.mul_vec(x) - b;
        let gradient = self.transpose.mul_vec(&residual);
        let scale = self.frobenius * (self.frobenius * x.norm() + b.norm());
        gradient.norm() <= LSTSQ_TOLERANCE * scale.max(f64::MIN_POSITIVE)
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        if let Some(qr) = &self.qr {
            let b = faer::Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
            let sol = qr.solve_lstsq(&b);
            let x = DVector::from_fn(rhs.len(), |i, _| sol[(i, 0)]);
            if self.is_least_squares(&x, rhs) {
                return Ok(x);
            }
            log::debug!("sparse QR solve is rank deficient; using the minimum-norm solution");
        }

        let svd = self
            .svd
            .get_or_init(|| SVD::new(self.matrix.to_dense(), true, true));
        let eps = svd.singular_values.max() * RANK_TOLERANCE;
        let x: DMatrix<f64> = svd
            .solve(&DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice()), eps)
            .map_err(|e| MeshError::FactorizationFailed {
                solver: "QR",
                message: e.to_string(),
            })?;
        Ok(x.column(0).into_owned())
    }
}

enum Factorization {
    /// 0×0 system; every solve returns an empty vector.
    Empty,
    Lu(Lu<usize, f64>),
    Qr(Box<LeastSquares>),
    Llt(Llt<usize, f64>),
}

/// LU, QR or Cholesky (LLᵀ) factorization of a sparse matrix.
pub struct DirectSolver {
    kind: MatrixSolverType,
    settings: SolverSettings,
    factorization: Option<Factorization>,
    dimension: usize,
    ok: AtomicBool,
}

impl std::fmt::Debug for DirectSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectSolver")
            .field("kind", &self.kind)
            .field("dimension", &self.dimension)
            .field("factorized", &self.factorization.is_some())
            .finish()
    }
}

fn backend_name(kind: MatrixSolverType) -> &'static str {
    match kind {
        MatrixSolverType::Lu => "LU",
        MatrixSolverType::Qr => "QR",
        _ => "Cholesky",
    }
}

/// Convert a CSR matrix to faer's CSC matrix.
fn to_faer(matrix: &CsrMatrix) -> Result<SparseColMat<usize, f64>> {
    let triplets: Vec<Triplet<usize, usize, f64>> = matrix
        .triplets()
        .map(|(row, col, val)| Triplet { row, col, val })
        .collect();

    SparseColMat::try_new_from_triplets(matrix.nrows(), matrix.ncols(), &triplets).map_err(|e| {
        MeshError::FactorizationFailed {
            solver: "faer",
            message: format!("failed to assemble CSC matrix: {e:?}"),
        }
    })
}

/// Message carried by a caught panic.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "numerical breakdown".to_string()
    }
}

impl DirectSolver {
    /// Create an unfactorized direct solver.
    ///
    /// `kind` selects the factorization; iterative kinds fall back to
    /// Cholesky.
    pub fn new(kind: MatrixSolverType, settings: SolverSettings) -> Self {
        let kind = match kind {
            MatrixSolverType::Lu | MatrixSolverType::Qr => kind,
            _ => MatrixSolverType::Cholesky,
        };
        Self {
            kind,
            settings,
            factorization: None,
            dimension: 0,
            ok: AtomicBool::new(false),
        }
    }

    fn factor(&self, matrix: &CsrMatrix, csc: &SparseColMat<usize, f64>) -> Result<Factorization> {
        let name = backend_name(self.kind);
        let fail = |message: String| MeshError::FactorizationFailed { solver: name, message };

        match self.kind {
            MatrixSolverType::Lu => {
                let symbolic = SymbolicLu::try_new(csc.symbolic().as_ref())
                    .map_err(|e| fail(format!("symbolic analysis: {e:?}")))?;
                let lu = Lu::try_new_with_symbolic(symbolic, csc.as_ref())
                    .map_err(|e| fail(format!("{e:?}")))?;
                Ok(Factorization::Lu(lu))
            }
            MatrixSolverType::Qr => {
                let qr = csc
                    .sp_qr()
                    .inspect_err(|e| log::debug!("sparse QR failed ({e:?}); solves use the SVD"))
                    .ok();
                Ok(Factorization::Qr(Box::new(LeastSquares::new(qr, matrix))))
            }
            _ => {
                let symbolic = SymbolicLlt::try_new(csc.symbolic().as_ref(), Side::Lower)
                    .map_err(|e| fail(format!("symbolic analysis: {e:?}")))?;
                let llt = Llt::try_new_with_symbolic(symbolic, csc.as_ref(), Side::Lower)
                    .map_err(|e| fail(format!("{e:?}")))?;
                Ok(Factorization::Llt(llt))
            }
        }
    }

    /// Run [`Self::factor`], turning a numerical panic inside the backend
    /// (e.g. a zero LU pivot) into an error.
    fn factor_guarded(&self, matrix: &CsrMatrix, csc: &SparseColMat<usize, f64>) -> Result<Factorization> {
        panic::catch_unwind(AssertUnwindSafe(|| self.factor(matrix, csc))).unwrap_or_else(|payload| {
            Err(MeshError::FactorizationFailed {
                solver: backend_name(self.kind),
                message: format!("singular matrix: {}", panic_message(payload.as_ref())),
            })
        })
    }

    fn solve_factorized(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let Some(factorization) = &self.factorization else {
            return Err(MeshError::NotFactorized);
        };
        if rhs.len() != self.dimension {
            return Err(MeshError::mismatch(self.dimension, rhs.len()));
        }

        let b = faer::Mat::from_fn(self.dimension, 1, |i, _| rhs[i]);
        let sol = match factorization {
            Factorization::Empty => return Ok(DVector::zeros(0)),
            Factorization::Lu(lu) => lu.solve(&b),
            Factorization::Qr(lstsq) => return lstsq.solve(rhs),
            Factorization::Llt(llt) => llt.solve(&b),
        };

        let x = DVector::from_fn(self.dimension, |i, _| sol[(i, 0)]);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(MeshError::FactorizationFailed {
                solver: backend_name(self.kind),
                message: "solution is not finite".to_string(),
            });
        }
        Ok(x)
    }
}

impl MatrixSolver for DirectSolver {
    fn solver_type(&self) -> MatrixSolverType {
        self.kind
    }

    fn factorize(&mut self, matrix: &CsrMatrix, symmetric: bool) -> Result<()> {
        self.factorization = None;
        self.ok.store(false, Ordering::Relaxed);

        let name = backend_name(self.kind);
        if self.kind == MatrixSolverType::Cholesky
            && !(symmetric && matrix.is_symmetric(SYMMETRY_TOLERANCE))
        {
            log::warn!("{} requires a symmetric matrix", name);
            return Err(MeshError::NotSymmetric { solver: name });
        }
        if matrix.nrows() != matrix.ncols() {
            return Err(MeshError::mismatch(matrix.nrows(), matrix.ncols()));
        }

        self.dimension = matrix.nrows();
        if self.dimension == 0 {
            self.factorization = Some(Factorization::Empty);
            self.ok.store(true, Ordering::Relaxed);
            return Ok(());
        }

        log::debug!(
            "{} factorization: {}x{} matrix, {} non-zeros",
            name,
            matrix.nrows(),
            matrix.ncols(),
            matrix.nnz()
        );
        let csc = to_faer(matrix)?;
        let factorization = self
            .factor_guarded(matrix, &csc)
            .inspect_err(|e| log::warn!("{}", e))?;

        self.factorization = Some(factorization);
        self.ok.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn succeeded(&self) -> bool {
        self.ok.load(Ordering::Relaxed)
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let result = self.solve_factorized(rhs);
        if let Err(e) = &result {
            log::warn!("{} solve failed: {}", backend_name(self.kind), e);
        }
        self.ok.store(result.is_ok(), Ordering::Relaxed);
        result
    }

    fn settings(&self) -> &SolverSettings {
        &self.settings
    }
}
