//! Quadratic programs with fixed (Dirichlet) rows.
//!
//! Minimizes `trace(½ XᵗQX + XᵗF)` subject to `X[F, :] = X_F` for a
//! symmetric positive (semi)definite `Q`. Setting the gradient over the
//! variable rows `V` to zero gives
//!
//! ```text
//! Q_vv · X[V, :] = -(F_v + Q_vf · X_F)
//! ```
//!
//! so one factorization of `Q_vv` serves every column of `X`.
//!
//! # Example
//!
//! ```
//! use lapdeform::algo::qp::QuadraticProgram;
//! use lapdeform::linalg::{CsrMatrix, MatrixSolverType};
//! use nalgebra::DMatrix;
//!
//! // Path graph 0-1-2-3 with the ends pinned
//! let q = CsrMatrix::from_triplets(4, 4, vec![
//!     (0, 0, 1.0), (0, 1, -1.0),
//!     (1, 0, -1.0), (1, 1, 2.0), (1, 2, -1.0),
//!     (2, 1, -1.0), (2, 2, 2.0), (2, 3, -1.0),
//!     (3, 2, -1.0), (3, 3, 1.0),
//! ]);
//! let fixed = DMatrix::from_column_slice(2, 1, &[0.0, 3.0]);
//! let x = QuadraticProgram::solve_with_fixed_constraints(&q, None, &[0, 3], &fixed, MatrixSolverType::Cholesky).unwrap();
//!
//! assert!((x[(1, 0)] - 1.0).abs() < 1e-10);
//! assert!((x[(2, 0)] - 2.0).abs() < 1e-10);
//! ```

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::{MeshError, Result};
use crate::linalg::{create_solver, CsrMatrix, MatrixSolver, MatrixSolverType, SolverSettings};

/// A quadratic program over the rows of `Q`.
pub struct QuadraticProgram {
    q: CsrMatrix,
    linear: Option<DMatrix<f64>>,
    settings: SolverSettings,

    fixed_rows: Vec<usize>,
    variable_rows: Vec<usize>,
    fixed_values: Option<DMatrix<f64>>,

    /// `Q_vf`, cut when the constraints are set.
    coupling: CsrMatrix,
    solver: Option<Box<dyn MatrixSolver>>,
}

impl std::fmt::Debug for QuadraticProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadraticProgram")
            .field("size", &self.q.nrows())
            .field("fixed", &self.fixed_rows.len())
            .field("factorized", &self.solver.as_ref().is_some_and(|s| s.succeeded()))
            .finish()
    }
}

impl QuadraticProgram {
    /// Create a program for the square matrix `q` with no linear term.
    ///
    /// # Errors
    /// Returns [`MeshError::DimensionMismatch`] if `q` is not square.
    pub fn new(q: CsrMatrix) -> Result<Self> {
        if q.nrows() != q.ncols() {
            return Err(MeshError::mismatch(q.nrows(), q.ncols()));
        }
        let n = q.nrows();
        Ok(Self {
            q,
            linear: None,
            settings: SolverSettings::default(),
            fixed_rows: Vec::new(),
            variable_rows: (0..n).collect(),
            fixed_values: None,
            coupling: CsrMatrix::zeros(n, 0),
            solver: None,
        })
    }

    /// Set the linear term `F`, one column per right-hand side.
    ///
    /// # Errors
    /// Returns [`MeshError::DimensionMismatch`] if `f` does not have one row
    /// per row of `Q`.
    pub fn set_linear_term(&mut self, f: DMatrix<f64>) -> Result<()> {
        if f.nrows() != self.q.nrows() {
            return Err(MeshError::mismatch(self.q.nrows(), f.nrows()));
        }
        self.linear = Some(f);
        Ok(())
    }

    /// Use `settings` for later factorizations and solves.
    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Pin `rows` to the matching rows of `values`.
    ///
    /// Invalidates any previous factorization.
    ///
    /// # Errors
    /// Fails with [`MeshError::InvalidParameter`] if a row is out of range or
    /// repeated, and with [`MeshError::DimensionMismatch`] if `values` does
    /// not have one row per fixed row.
    pub fn set_fixed_constraints(&mut self, rows: &[usize], values: DMatrix<f64>) -> Result<()> {
        let n = self.q.nrows();
        if values.nrows() != rows.len() {
            return Err(MeshError::mismatch(rows.len(), values.nrows()));
        }

        let mut is_fixed = vec![false; n];
        for &r in rows {
            if r >= n {
                return Err(MeshError::invalid_param("fixed row", r, "out of range"));
            }
            if is_fixed[r] {
                return Err(MeshError::invalid_param("fixed row", r, "listed twice"));
            }
            is_fixed[r] = true;
        }

        self.fixed_rows = rows.to_vec();
        self.variable_rows = (0..n).filter(|&r| !is_fixed[r]).collect();
        self.fixed_values = Some(values);
        self.coupling = self.q.submatrix(&self.variable_rows, &self.fixed_rows);
        self.solver = None;
        Ok(())
    }

    /// Rows solved for, in ascending order.
    pub fn variable_rows(&self) -> &[usize] {
        &self.variable_rows
    }

    /// Pinned rows, in the order they were given.
    pub fn fixed_rows(&self) -> &[usize] {
        &self.fixed_rows
    }

    /// Factorize `Q_vv` with `solver_type`.
    ///
    /// # Errors
    /// [`MeshError::MissingFixedConstraints`] before
    /// [`set_fixed_constraints`](Self::set_fixed_constraints), otherwise any
    /// factorization error of the backend.
    pub fn pre_factorize(&mut self, solver_type: MatrixSolverType) -> Result<()> {
        if self.fixed_values.is_none() {
            return Err(MeshError::MissingFixedConstraints);
        }
        self.settings.validate()?;

        let q_vv = self.q.submatrix(&self.variable_rows, &self.variable_rows);
        let mut solver = create_solver(solver_type, self.settings.clone());
        log::debug!(
            "factorizing {}x{} variable block with {:?}",
            q_vv.nrows(),
            q_vv.ncols(),
            solver_type
        );
        solver.factorize(&q_vv, true)?;
        self.solver = Some(solver);
        Ok(())
    }

    /// Solve for every column, returning the full `n × k` solution with the
    /// fixed rows copied in.
    ///
    /// # Errors
    /// [`MeshError::MissingFixedConstraints`] or [`MeshError::NotFactorized`]
    /// when a setup step is missing, [`MeshError::DimensionMismatch`] if the
    /// linear term and fixed values disagree on the column count, or the
    /// first failing column solve.
    pub fn solve(&self) -> Result<DMatrix<f64>> {
        let fixed_values = self.fixed_values.as_ref().ok_or(MeshError::MissingFixedConstraints)?;
        let solver = self.solver.as_deref().ok_or(MeshError::NotFactorized)?;

        let columns = fixed_values.ncols();
        if let Some(f) = &self.linear {
            if f.ncols() != columns {
                return Err(MeshError::mismatch(columns, f.ncols()));
            }
        }

        let solve_column = |c: usize| -> Result<DVector<f64>> {
            let x_f = fixed_values.column(c).into_owned();
            let mut rhs = self.coupling.mul_vec(&x_f);
            if let Some(f) = &self.linear {
                for (k, &r) in self.variable_rows.iter().enumerate() {
                    rhs[k] += f[(r, c)];
                }
            }
            rhs.neg_mut();
            solver.solve(&rhs)
        };

        let solved: Vec<DVector<f64>> = if self.settings.parallel {
            (0..columns).into_par_iter().map(solve_column).collect::<Result<_>>()?
        } else {
            (0..columns).map(solve_column).collect::<Result<_>>()?
        };

        let mut x = DMatrix::zeros(self.q.nrows(), columns);
        for (c, column) in solved.iter().enumerate() {
            for (k, &r) in self.variable_rows.iter().enumerate() {
                x[(r, c)] = column[k];
            }
            for (k, &r) in self.fixed_rows.iter().enumerate() {
                x[(r, c)] = fixed_values[(k, c)];
            }
        }
        Ok(x)
    }

    /// Set up, factorize and solve in one call.
    pub fn solve_with_fixed_constraints(
        q: &CsrMatrix,
        f: Option<&DMatrix<f64>>,
        fixed_rows: &[usize],
        fixed_values: &DMatrix<f64>,
        solver_type: MatrixSolverType,
    ) -> Result<DMatrix<f64>> {
        let mut qp = Self::new(q.clone())?;
        if let Some(f) = f {
            qp.set_linear_term(f.clone())?;
        }
        qp.set_fixed_constraints(fixed_rows, fixed_values.clone())?;
        qp.pre_factorize(solver_type)?;
        qp.solve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_laplacian(n: usize) -> CsrMatrix {
        let mut triplets = Vec::new();
        for i in 0..n - 1 {
            triplets.extend([(i, i, 1.0), (i + 1, i + 1, 1.0), (i, i + 1, -1.0), (i + 1, i, -1.0)]);
        }
        CsrMatrix::from_triplets(n, n, triplets)
    }

    #[test]
    fn test_identity_frees_to_zero() {
        let q = CsrMatrix::identity(4);
        let fixed = DMatrix::from_column_slice(2, 1, &[1.0, 2.0]);
        let x = QuadraticProgram::solve_with_fixed_constraints(&q, None, &[0, 2], &fixed, MatrixSolverType::Cholesky)
            .unwrap();

        assert_eq!(x[(0, 0)], 1.0);
        assert_eq!(x[(2, 0)], 2.0);
        assert!(x[(1, 0)].abs() < 1e-12);
        assert!(x[(3, 0)].abs() < 1e-12);
    }

    #[test]
    fn test_path_interpolates_linearly() {
        let q = path_laplacian(5);
        // Two columns: 0..4 and 4..0
        let fixed = DMatrix::from_row_slice(2, 2, &[0.0, 4.0, 4.0, 0.0]);

        for solver in [MatrixSolverType::Lu, MatrixSolverType::Cholesky, MatrixSolverType::Pcg] {
            let x = QuadraticProgram::solve_with_fixed_constraints(&q, None, &[0, 4], &fixed, solver).unwrap();
            for r in 0..5 {
                assert!((x[(r, 0)] - r as f64).abs() < 1e-6, "{:?}", solver);
                assert!((x[(r, 1)] - (4 - r) as f64).abs() < 1e-6, "{:?}", solver);
            }
        }
    }

    #[test]
    fn test_linear_term_shifts_minimum() {
        // min ½x² + f·x  =>  x = -f
        let q = CsrMatrix::identity(3);
        let f = DMatrix::from_column_slice(3, 1, &[0.0, 2.0, -1.0]);
        let fixed = DMatrix::from_column_slice(1, 1, &[5.0]);

        let x = QuadraticProgram::solve_with_fixed_constraints(&q, Some(&f), &[0], &fixed, MatrixSolverType::Lu)
            .unwrap();
        assert_eq!(x[(0, 0)], 5.0);
        assert!((x[(1, 0)] + 2.0).abs() < 1e-12);
        assert!((x[(2, 0)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let q = path_laplacian(6);
        let fixed = DMatrix::from_row_slice(2, 3, &[0.0, 1.0, -2.0, 5.0, 1.0, 3.0]);

        let solve = |parallel: bool| {
            let mut qp = QuadraticProgram::new(q.clone())
                .unwrap()
                .with_settings(SolverSettings::default().with_parallel(parallel));
            qp.set_fixed_constraints(&[0, 5], fixed.clone()).unwrap();
            qp.pre_factorize(MatrixSolverType::Cholesky).unwrap();
            qp.solve().unwrap()
        };
        assert_eq!(solve(true), solve(false));
    }

    #[test]
    fn test_setup_order_is_enforced() {
        let mut qp = QuadraticProgram::new(CsrMatrix::identity(3)).unwrap();
        assert!(matches!(qp.solve(), Err(MeshError::MissingFixedConstraints)));
        assert!(matches!(
            qp.pre_factorize(MatrixSolverType::Lu),
            Err(MeshError::MissingFixedConstraints)
        ));

        qp.set_fixed_constraints(&[1], DMatrix::from_element(1, 1, 1.0)).unwrap();
        assert!(matches!(qp.solve(), Err(MeshError::NotFactorized)));
        assert_eq!(qp.variable_rows(), &[0, 2]);
        assert_eq!(qp.fixed_rows(), &[1]);
    }

    #[test]
    fn test_rejects_bad_fixed_rows() {
        let mut qp = QuadraticProgram::new(CsrMatrix::identity(3)).unwrap();
        let values = DMatrix::zeros(2, 1);

        assert!(matches!(
            qp.set_fixed_constraints(&[0, 3], values.clone()),
            Err(MeshError::InvalidParameter { .. })
        ));
        assert!(matches!(
            qp.set_fixed_constraints(&[1, 1], values),
            Err(MeshError::InvalidParameter { .. })
        ));
        assert!(matches!(
            qp.set_fixed_constraints(&[1], DMatrix::zeros(2, 1)),
            Err(MeshError::DimensionMismatch { .. })
        ));
        assert!(QuadraticProgram::new(CsrMatrix::zeros(2, 3)).is_err());
    }
}
