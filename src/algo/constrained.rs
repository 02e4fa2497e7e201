//! Constrained biharmonic solves over a mesh.
//!
//! A [`ConstrainedMeshOperator`] owns everything derived from one mesh
//! snapshot (linearization, Laplacian, biharmonic operator, original
//! positions) plus a set of per-vertex soft constraints, and solves
//!
//! ```text
//! (A + diag(w²)) p = s + w² t
//! ```
//!
//! for the interior positions `p`, where `A` is the biharmonic operator,
//! `w`/`t` the constraint weights and targets and `s` a source term that
//! depends on the [`OperatorKind`].
//!
//! Weights and target positions are tracked separately: changing a weight
//! changes the system matrix and forces a refactorization, while changing a
//! target only rebuilds the right-hand side.

use std::collections::BTreeMap;

use nalgebra::Point3;

use super::laplacian::{
    biharmonic_operator, construct_laplacian_with, LaplacianOptions, LaplacianPair, LaplacianScheme,
};
use super::linearize::VertexLinearization;
use crate::error::{MeshError, Result};
use crate::linalg::{create_solver, CsrMatrix, MatrixSolver, MatrixSolverType, PositionBuffer, SolverSettings};
use crate::mesh::{MeshTopology, RowIndex, VertexId};

/// Which dirty flags are raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyState {
    /// System and right-hand side are current.
    #[default]
    Clean,
    /// Weights changed: refactorize and rebuild the right-hand side.
    WeightsDirty,
    /// Only targets changed: rebuild the right-hand side.
    PositionsDirty,
    /// Both changed.
    BothDirty,
}

impl DirtyState {
    /// Whether the weights flag is raised.
    #[inline]
    pub fn weights_dirty(self) -> bool {
        matches!(self, DirtyState::WeightsDirty | DirtyState::BothDirty)
    }

    /// Whether the positions flag is raised.
    #[inline]
    pub fn positions_dirty(self) -> bool {
        matches!(self, DirtyState::PositionsDirty | DirtyState::BothDirty)
    }

    /// Raise the weights flag.
    #[must_use]
    pub fn with_weights(self) -> Self {
        match self {
            DirtyState::Clean | DirtyState::WeightsDirty => DirtyState::WeightsDirty,
            DirtyState::PositionsDirty | DirtyState::BothDirty => DirtyState::BothDirty,
        }
    }

    /// Raise the positions flag.
    #[must_use]
    pub fn with_positions(self) -> Self {
        match self {
            DirtyState::Clean | DirtyState::PositionsDirty => DirtyState::PositionsDirty,
            DirtyState::WeightsDirty | DirtyState::BothDirty => DirtyState::BothDirty,
        }
    }
}

/// What the unconstrained system reproduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    /// Source `A·p₀`: without constraints the original shape is the
    /// solution. Iterative solves are warm-started from the incoming
    /// positions.
    Deformer,
    /// Source `-B·p_B`: the interior is the biharmonic surface spanned by
    /// the boundary. No warm start.
    Smoother,
}

/// Solver and Laplacian configuration of a constrained operator.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorOptions {
    /// Backend for the constrained system.
    pub solver: MatrixSolverType,
    /// Backend settings.
    pub settings: SolverSettings,
    /// Laplacian tunables.
    pub laplacian: LaplacianOptions,
}

impl Default for OperatorOptions {
    fn default() -> Self {
        Self {
            solver: MatrixSolverType::Pcg,
            settings: SolverSettings::default(),
            laplacian: LaplacianOptions::default(),
        }
    }
}

impl OperatorOptions {
    /// Default options for an operator kind: PCG for deformers, Cholesky for
    /// smoothers.
    pub fn for_kind(kind: OperatorKind) -> Self {
        let solver = match kind {
            OperatorKind::Deformer => MatrixSolverType::Pcg,
            OperatorKind::Smoother => MatrixSolverType::Cholesky,
        };
        Self::default().with_solver(solver)
    }

    /// Set the solver backend.
    pub fn with_solver(mut self, solver: MatrixSolverType) -> Self {
        self.solver = solver;
        self
    }

    /// Set the solver settings.
    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the Laplacian options.
    pub fn with_laplacian(mut self, laplacian: LaplacianOptions) -> Self {
        self.laplacian = laplacian;
        self
    }
}

/// Target of a position constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionConstraint {
    /// Target position.
    pub position: Point3<f64>,
    /// Overwrite the solved position with the target after the solve.
    pub post_fix: bool,
}

/// Handle returned by the deformer and smoother factories.
///
/// Constraint mutators never fail: IDs that are out of range or name a
/// boundary vertex are ignored.
pub trait ConstrainedMeshSolver: Send {
    /// Constrain `vertex` towards `position` with `weight`; returns whether
    /// the constraint was recorded.
    fn add_constraint(&mut self, vertex: VertexId, weight: f64, position: Point3<f64>, post_fix: bool) -> bool;

    /// Replace the target of `vertex`; returns whether it already has a
    /// weight.
    fn update_constraint_position(&mut self, vertex: VertexId, position: Point3<f64>, post_fix: bool) -> bool;

    /// Replace the weight of `vertex`; returns whether it already has a
    /// target.
    fn update_constraint_weight(&mut self, vertex: VertexId, weight: f64) -> bool;

    /// Drop all weights and targets.
    fn clear_constraints(&mut self);

    /// Drop all weights.
    fn clear_constraint_weights(&mut self);

    /// Drop all targets.
    fn clear_constraint_positions(&mut self);

    /// Whether `vertex` has a weight.
    fn is_constrained(&self, vertex: VertexId) -> bool;

    /// Solve and write new positions into `positions`, indexed by vertex ID.
    ///
    /// If `positions` already covers the vertex ID space its interior
    /// entries warm-start iterative deformers. On return it is resized to
    /// the ID space; slots of unused IDs are not meaningful.
    fn deform(&mut self, positions: &mut Vec<Point3<f64>>) -> Result<()>;
}

/// Soft-constrained biharmonic system over one mesh snapshot.
pub struct ConstrainedMeshOperator {
    kind: OperatorKind,
    scheme: LaplacianScheme,
    options: OperatorOptions,

    linearization: VertexLinearization,
    laplacian: LaplacianPair,
    biharmonic: CsrMatrix,
    boundary_operator: CsrMatrix,

    original_interior: PositionBuffer,
    boundary_positions: PositionBuffer,
    source: PositionBuffer,

    weights: BTreeMap<RowIndex, f64>,
    targets: BTreeMap<RowIndex, PositionConstraint>,
    dirty: DirtyState,

    solver: Box<dyn MatrixSolver>,
    rhs: PositionBuffer,
}

impl std::fmt::Debug for ConstrainedMeshOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstrainedMeshOperator")
            .field("kind", &self.kind)
            .field("scheme", &self.scheme)
            .field("interior", &self.linearization.num_interior())
            .field("boundary", &self.linearization.num_boundary())
            .field("constraints", &self.weights.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl ConstrainedMeshOperator {
    /// Build the operator for `mesh`.
    ///
    /// Nothing is factorized until the first solve.
    pub fn new<M: MeshTopology>(
        kind: OperatorKind,
        scheme: LaplacianScheme,
        mesh: &M,
        options: OperatorOptions,
    ) -> Self {
        let solver = create_solver(options.solver, options.settings.clone());
        let mut op = Self {
            kind,
            scheme,
            options,
            linearization: VertexLinearization::default(),
            laplacian: LaplacianPair {
                interior: CsrMatrix::zeros(0, 0),
                boundary: CsrMatrix::zeros(0, 0),
            },
            biharmonic: CsrMatrix::zeros(0, 0),
            boundary_operator: CsrMatrix::zeros(0, 0),
            original_interior: PositionBuffer::zeros(0),
            boundary_positions: PositionBuffer::zeros(0),
            source: PositionBuffer::zeros(0),
            weights: BTreeMap::new(),
            targets: BTreeMap::new(),
            dirty: DirtyState::BothDirty,
            solver,
            rhs: PositionBuffer::zeros(0),
        };
        op.reset(mesh);
        op
    }

    /// Rebuild everything from `mesh` and drop all constraints.
    pub fn reset<M: MeshTopology>(&mut self, mesh: &M) {
        let linearization = VertexLinearization::new(mesh);
        let n = linearization.num_interior();
        let laplacian = construct_laplacian_with(self.scheme, mesh, &linearization, &self.options.laplacian);
        let (biharmonic, boundary_operator) = biharmonic_operator(&laplacian, self.scheme.is_symmetric());

        let original_interior = PositionBuffer::from_mesh(mesh, &linearization, 0..n);
        let boundary_positions = PositionBuffer::from_mesh(mesh, &linearization, n..linearization.num_rows());

        let source = match self.kind {
            OperatorKind::Deformer => original_interior.map_channels(|c| biharmonic.mul_vec(c)),
            OperatorKind::Smoother => boundary_positions.map_channels(|c| -boundary_operator.mul_vec(c)),
        };

        log::debug!(
            "{:?} operator ({:?}): {} interior, {} boundary vertices",
            self.kind,
            self.scheme,
            n,
            linearization.num_boundary()
        );

        self.linearization = linearization;
        self.laplacian = laplacian;
        self.biharmonic = biharmonic;
        self.boundary_operator = boundary_operator;
        self.original_interior = original_interior;
        self.boundary_positions = boundary_positions;
        self.rhs = source.clone();
        self.source = source;
        self.weights.clear();
        self.targets.clear();
        self.dirty = DirtyState::BothDirty;
        self.solver = create_solver(self.options.solver, self.options.settings.clone());
    }

    /// The operator kind.
    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    /// The Laplacian weighting scheme.
    pub fn scheme(&self) -> LaplacianScheme {
        self.scheme
    }

    /// Current dirty flags.
    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    /// The vertex ordering.
    pub fn linearization(&self) -> &VertexLinearization {
        &self.linearization
    }

    /// The Laplacian blocks.
    pub fn laplacian(&self) -> &LaplacianPair {
        &self.laplacian
    }

    /// The interior biharmonic block `A`.
    pub fn biharmonic(&self) -> &CsrMatrix {
        &self.biharmonic
    }

    /// Original interior positions.
    pub fn original_interior(&self) -> &PositionBuffer {
        &self.original_interior
    }

    /// Boundary positions, which never move.
    pub fn boundary_positions(&self) -> &PositionBuffer {
        &self.boundary_positions
    }

    /// Number of weighted vertices.
    pub fn num_constraints(&self) -> usize {
        self.weights.len()
    }

    fn interior_row(&self, vertex: VertexId) -> Option<RowIndex> {
        self.linearization.interior_index(vertex)
    }

    /// Target of a weighted row: its position constraint or, lacking one,
    /// its original position.
    fn target(&self, row: RowIndex) -> Point3<f64> {
        self.targets
            .get(&row)
            .map(|c| c.position)
            .unwrap_or_else(|| self.original_interior.point(row.index()))
    }

    /// Bring the factorization and right-hand side up to date.
    ///
    /// A weight change refactorizes `A + diag(w²)`; a target change only
    /// rebuilds the right-hand side.
    pub fn sync(&mut self) -> Result<()> {
        self.options.settings.validate()?;

        if self.dirty.weights_dirty() {
            let diagonal: Vec<(usize, f64)> = self.weights.iter().map(|(row, w)| (row.index(), w * w)).collect();
            let system = self.biharmonic.with_added_diagonal(&diagonal);
            log::debug!("refactorizing constrained system with {} weights", diagonal.len());
            self.solver.factorize(&system, true)?;
            self.rhs = self.constrained_rhs(&self.source);
        } else if self.dirty.positions_dirty() {
            log::trace!("rebuilding right-hand side for {} targets", self.targets.len());
            self.rhs = self.constrained_rhs(&self.source);
        }
        self.dirty = DirtyState::Clean;
        Ok(())
    }

    /// `source + w²·t` over the weighted rows.
    pub fn constrained_rhs(&self, source: &PositionBuffer) -> PositionBuffer {
        let mut rhs = source.clone();
        for (&row, &w) in &self.weights {
            let t = self.target(row);
            let i = row.index();
            for axis in 0..3 {
                rhs.channel_mut(axis)[i] += w * w * t[axis];
            }
        }
        rhs
    }

    /// Solve the synced system for `rhs`.
    pub fn solve_interior(
        &self,
        rhs: &PositionBuffer,
        guess: Option<&PositionBuffer>,
    ) -> Result<PositionBuffer> {
        if self.dirty != DirtyState::Clean {
            return Err(MeshError::NotFactorized);
        }
        let guess = match self.kind {
            OperatorKind::Deformer => guess,
            OperatorKind::Smoother => None,
        };
        self.solver.solve_positions(rhs, guess)
    }

    /// Overwrite hard-constrained rows with their targets, whether or not
    /// the row still carries a weight.
    pub fn apply_post_fix(&self, solution: &mut PositionBuffer) {
        for (row, c) in &self.targets {
            if c.post_fix {
                solution.set_point(row.index(), &c.position);
            }
        }
    }

    /// Scatter interior `solution` and the cached boundary into `positions`.
    pub fn write_positions(&self, solution: &PositionBuffer, positions: &mut Vec<Point3<f64>>) -> Result<()> {
        let n = self.linearization.num_interior();
        if solution.len() != n {
            return Err(MeshError::mismatch(n, solution.len()));
        }
        positions.resize(self.linearization.id_space(), Point3::origin());
        solution.copy_to_points(&self.linearization, 0, positions)?;
        self.boundary_positions.copy_to_points(&self.linearization, n, positions)
    }

    /// Interior warm start taken from mesh-indexed `positions`, or the
    /// original positions when the array does not cover the ID space.
    pub fn warm_start(&self, positions: &[Point3<f64>]) -> PositionBuffer {
        let n = self.linearization.num_interior();
        PositionBuffer::from_points(positions, &self.linearization, 0..n)
            .unwrap_or_else(|_| self.original_interior.clone())
    }

    /// Run one full solve against the cached right-hand side.
    pub fn solve(&mut self, positions: &[Point3<f64>]) -> Result<PositionBuffer> {
        self.sync()?;
        let guess = self.warm_start(positions);
        let mut solution = self.solve_interior(&self.rhs, Some(&guess))?;
        self.apply_post_fix(&mut solution);
        Ok(solution)
    }
}

impl ConstrainedMeshSolver for ConstrainedMeshOperator {
    fn add_constraint(&mut self, vertex: VertexId, weight: f64, position: Point3<f64>, post_fix: bool) -> bool {
        let Some(row) = self.interior_row(vertex) else {
            return false;
        };
        if !weight.is_finite() {
            return false;
        }
        self.weights.insert(row, weight);
        self.targets.insert(row, PositionConstraint { position, post_fix });
        self.dirty = self.dirty.with_weights().with_positions();
        true
    }

    fn update_constraint_position(&mut self, vertex: VertexId, position: Point3<f64>, post_fix: bool) -> bool {
        let Some(row) = self.interior_row(vertex) else {
            return false;
        };
        self.targets.insert(row, PositionConstraint { position, post_fix });
        self.dirty = self.dirty.with_positions();
        self.weights.contains_key(&row)
    }

    fn update_constraint_weight(&mut self, vertex: VertexId, weight: f64) -> bool {
        let Some(row) = self.interior_row(vertex) else {
            return false;
        };
        if !weight.is_finite() {
            return false;
        }
        self.weights.insert(row, weight);
        self.dirty = self.dirty.with_weights();
        self.targets.contains_key(&row)
    }

    fn clear_constraints(&mut self) {
        self.weights.clear();
        self.targets.clear();
        self.dirty = self.dirty.with_weights().with_positions();
    }

    fn clear_constraint_weights(&mut self) {
        self.weights.clear();
        self.dirty = self.dirty.with_weights();
    }

    fn clear_constraint_positions(&mut self) {
        self.targets.clear();
        self.dirty = self.dirty.with_positions();
    }

    fn is_constrained(&self, vertex: VertexId) -> bool {
        self.interior_row(vertex)
            .is_some_and(|row| self.weights.contains_key(&row))
    }

    fn deform(&mut self, positions: &mut Vec<Point3<f64>>) -> Result<()> {
        let solution = self.solve(positions)?;
        self.write_positions(&solution, positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generators;

    fn deformer(mesh: &crate::mesh::HalfEdgeMesh) -> ConstrainedMeshOperator {
        ConstrainedMeshOperator::new(
            OperatorKind::Deformer,
            LaplacianScheme::Uniform,
            mesh,
            OperatorOptions::for_kind(OperatorKind::Deformer),
        )
    }

    #[test]
    fn test_dirty_state_transitions() {
        let s = DirtyState::Clean;
        assert_eq!(s.with_weights(), DirtyState::WeightsDirty);
        assert_eq!(s.with_positions(), DirtyState::PositionsDirty);
        assert_eq!(s.with_weights().with_positions(), DirtyState::BothDirty);
        assert!(DirtyState::BothDirty.weights_dirty());
        assert!(DirtyState::BothDirty.positions_dirty());
        assert!(!DirtyState::PositionsDirty.weights_dirty());
    }

    #[test]
    fn test_boundary_constraint_ignored() {
        let mesh = generators::grid(3, 3, 1.0);
        let mut op = deformer(&mesh);
        op.sync().unwrap();

        assert!(!op.add_constraint(VertexId::new(0), 1.0, Point3::origin(), false));
        assert!(!op.is_constrained(VertexId::new(0)));
        assert!(!op.add_constraint(VertexId::new(999), 1.0, Point3::origin(), false));
        assert_eq!(op.dirty_state(), DirtyState::Clean);
    }

    #[test]
    fn test_position_update_does_not_raise_weights() {
        let mesh = generators::grid(3, 3, 1.0);
        let mut op = deformer(&mesh);
        let v = VertexId::new(5);

        assert!(op.add_constraint(v, 2.0, Point3::new(1.0, 1.0, 1.0), false));
        op.sync().unwrap();

        assert!(op.update_constraint_position(v, Point3::new(1.0, 1.0, 2.0), false));
        assert_eq!(op.dirty_state(), DirtyState::PositionsDirty);
        op.sync().unwrap();

        assert!(op.update_constraint_weight(v, 3.0));
        assert_eq!(op.dirty_state(), DirtyState::WeightsDirty);
    }

    #[test]
    fn test_weight_without_position_anchors_original() {
        let mesh = generators::grid(3, 3, 1.0);
        let mut op = deformer(&mesh);
        let v = VertexId::new(6);

        assert!(!op.update_constraint_weight(v, 10.0));
        assert!(op.is_constrained(v));

        let mut positions = Vec::new();
        op.deform(&mut positions).unwrap();
        assert!((positions[6] - mesh.vertex_position(v)).norm() < 1e-6);
    }

    #[test]
    fn test_post_fix_overrides_solution() {
        let mesh = generators::grid(3, 3, 1.0);
        let mut op = deformer(&mesh);
        let target = Point3::new(1.2, 1.1, 0.7);
        op.add_constraint(VertexId::new(5), 0.1, target, true);

        let mut positions = Vec::new();
        op.deform(&mut positions).unwrap();

        assert_eq!(positions[5], target);
        // Boundary is copied through untouched
        assert_eq!(positions[0], mesh.vertex_position(VertexId::new(0)));
        assert_eq!(positions.len(), 16);
    }

    #[test]
    fn test_post_fix_survives_cleared_weights() {
        let mesh = generators::grid(3, 3, 1.0);
        let mut op = deformer(&mesh);
        let v = VertexId::new(5);
        let target = Point3::new(1.0, 1.0, 2.0);
        op.add_constraint(v, 1.0, target, true);
        op.clear_constraint_weights();
        assert!(!op.is_constrained(v));

        let mut positions = Vec::new();
        op.deform(&mut positions).unwrap();
        assert_eq!(positions[5], target);
        // The unweighted system leaves the other rows where they were
        assert!((positions[6] - mesh.vertex_position(VertexId::new(6))).norm() < 1e-6);
    }

    #[test]
    fn test_smoother_flattens_bump() {
        let mut mesh = generators::grid(4, 4, 1.0);
        let center = VertexId::new(12);
        mesh.set_position(center, Point3::new(2.0, 2.0, 1.0));

        let mut op = ConstrainedMeshOperator::new(
            OperatorKind::Smoother,
            LaplacianScheme::Uniform,
            &mesh,
            OperatorOptions::for_kind(OperatorKind::Smoother),
        );
        let mut positions = Vec::new();
        op.deform(&mut positions).unwrap();

        // Flat boundary spans a flat biharmonic interior
        for p in &positions {
            assert!(p.z.abs() < 1e-8);
        }
    }

    #[test]
    fn test_reset_clears_constraints() {
        let mesh = generators::grid(3, 3, 1.0);
        let mut op = deformer(&mesh);
        op.add_constraint(VertexId::new(5), 1.0, Point3::origin(), false);

        op.reset(&generators::grid(4, 4, 1.0));
        assert_eq!(op.num_constraints(), 0);
        assert_eq!(op.linearization().num_interior(), 9);
        assert_eq!(op.dirty_state(), DirtyState::BothDirty);
    }
}
