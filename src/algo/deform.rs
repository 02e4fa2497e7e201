//! Deformer and smoother factories, and the ARAP deformer.
//!
//! # Example
//!
//! ```
//! use lapdeform::algo::deform::construct_mesh_deformer;
//! use lapdeform::algo::laplacian::LaplacianScheme;
//! use lapdeform::mesh::{generators, VertexId};
//! use nalgebra::Point3;
//!
//! let mesh = generators::grid(4, 4, 1.0);
//! let mut deformer = construct_mesh_deformer(LaplacianScheme::Cotangent, &mesh);
//!
//! // Pull the center up; the boundary stays put
//! deformer.add_constraint(VertexId::new(12), 10.0, Point3::new(2.0, 2.0, 1.0), false);
//!
//! let mut positions = Vec::new();
//! deformer.deform(&mut positions).unwrap();
//! assert!(positions[12].z > 0.9);
//! ```
//!
//! # References
//!
//! - Sorkine, O., & Alexa, M. (2007). "As-Rigid-As-Possible Surface
//!   Modeling." SGP 2007.

use nalgebra::{DVector, Matrix3, Point3, Vector3};

use super::constrained::{
    ConstrainedMeshOperator, ConstrainedMeshSolver, OperatorKind, OperatorOptions,
};
use super::laplacian::LaplacianScheme;
use crate::error::Result;
use crate::linalg::{CsrMatrix, PositionBuffer};
use crate::mesh::{MeshTopology, VertexId};

/// Create a biharmonic deformer with default options.
pub fn construct_mesh_deformer<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
) -> Box<dyn ConstrainedMeshSolver> {
    construct_mesh_deformer_with(scheme, mesh, OperatorOptions::for_kind(OperatorKind::Deformer))
}

/// Create a biharmonic deformer.
pub fn construct_mesh_deformer_with<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
    options: OperatorOptions,
) -> Box<dyn ConstrainedMeshSolver> {
    Box::new(ConstrainedMeshOperator::new(OperatorKind::Deformer, scheme, mesh, options))
}

/// Create a biharmonic smoother with default options.
pub fn construct_mesh_smoother<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
) -> Box<dyn ConstrainedMeshSolver> {
    construct_mesh_smoother_with(scheme, mesh, OperatorOptions::for_kind(OperatorKind::Smoother))
}

/// Create a biharmonic smoother.
pub fn construct_mesh_smoother_with<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
    options: OperatorOptions,
) -> Box<dyn ConstrainedMeshSolver> {
    Box::new(ConstrainedMeshOperator::new(OperatorKind::Smoother, scheme, mesh, options))
}

/// Create an as-rigid-as-possible deformer running `iterations`
/// local/global rounds per [`deform`](ConstrainedMeshSolver::deform).
pub fn construct_arap_deformer<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
    iterations: usize,
) -> Box<dyn ConstrainedMeshSolver> {
    Box::new(ArapDeformer::new(scheme, mesh, iterations, OperatorOptions::for_kind(OperatorKind::Deformer)))
}

/// Biharmonic deformer that rotates the differential coordinates of each
/// vertex towards the deformed shape.
///
/// Each round fits one rotation per interior vertex to its weighted
/// one-ring (local step), then re-solves the constrained system with the
/// rotated differential coordinates as source (global step). The system
/// matrix does not change between rounds, so only the first solve can
/// trigger a factorization.
#[derive(Debug)]
pub struct ArapDeformer {
    operator: ConstrainedMeshOperator,
    iterations: usize,
    /// Off-diagonal Laplacian weights per interior row, as (row, weight).
    neighbors: Vec<Vec<(usize, f64)>>,
    laplacian_transpose: CsrMatrix,
}

impl ArapDeformer {
    /// Build the deformer for `mesh`.
    pub fn new<M: MeshTopology>(
        scheme: LaplacianScheme,
        mesh: &M,
        iterations: usize,
        options: OperatorOptions,
    ) -> Self {
        let operator = ConstrainedMeshOperator::new(OperatorKind::Deformer, scheme, mesh, options);
        let laplacian = operator.laplacian();
        let n = laplacian.num_interior();

        let neighbors = (0..n)
            .map(|i| {
                laplacian
                    .interior
                    .row(i)
                    .filter(|&(j, _)| j != i)
                    .chain(laplacian.boundary.row(i).map(|(j, w)| (j + n, w)))
                    .collect()
            })
            .collect();
        let laplacian_transpose = laplacian.interior.transpose();

        Self {
            operator,
            iterations,
            neighbors,
            laplacian_transpose,
        }
    }

    /// Local/global rounds per deform.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// The underlying constrained operator.
    pub fn operator(&self) -> &ConstrainedMeshOperator {
        &self.operator
    }

    /// Position of `row` in the original mesh.
    fn original(&self, row: usize) -> Vector3<f64> {
        let n = self.neighbors.len();
        if row < n {
            self.operator.original_interior().point(row).coords
        } else {
            self.operator.boundary_positions().point(row - n).coords
        }
    }

    /// Position of `row` given the current interior.
    fn current(&self, interior: &PositionBuffer, row: usize) -> Vector3<f64> {
        let n = self.neighbors.len();
        if row < n {
            interior.point(row).coords
        } else {
            self.operator.boundary_positions().point(row - n).coords
        }
    }

    /// Local step: best-fit rotation of each interior one-ring.
    fn fit_rotations(&self, interior: &PositionBuffer) -> Vec<Matrix3<f64>> {
        (0..self.neighbors.len())
            .map(|i| {
                let p0_i = self.original(i);
                let p_i = self.current(interior, i);

                let mut covariance = Matrix3::zeros();
                for &(j, w) in &self.neighbors[i] {
                    let e0 = self.original(j) - p0_i;
                    let e = self.current(interior, j) - p_i;
                    covariance += w * e * e0.transpose();
                }
                closest_rotation(&covariance)
            })
            .collect()
    }

    /// Global step source: `Lᵗ(δ' - L_B·p_B)` for the rotated differential
    /// coordinates `δ'`.
    fn rotated_source(&self, rotations: &[Matrix3<f64>]) -> Result<PositionBuffer> {
        let n = self.neighbors.len();
        let mut delta = PositionBuffer::zeros(n);
        for i in 0..n {
            let p0_i = self.original(i);
            let mut d = Vector3::zeros();
            for &(j, w) in &self.neighbors[i] {
                let r = if j < n { (rotations[i] + rotations[j]) * 0.5 } else { rotations[i] };
                d += w * (r * (self.original(j) - p0_i));
            }
            delta.set_point(i, &Point3::from(d));
        }

        let laplacian = self.operator.laplacian();
        let boundary = self.operator.boundary_positions();
        let channels: [DVector<f64>; 3] = [0, 1, 2].map(|axis| {
            let rhs = delta.channel(axis) - laplacian.boundary.mul_vec(boundary.channel(axis));
            self.laplacian_transpose.mul_vec(&rhs)
        });
        PositionBuffer::from_channels(channels)
    }
}

/// Closest proper rotation to `m` in the Frobenius sense.
fn closest_rotation(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = m.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Matrix3::identity();
    };

    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        // Flip the axis of the smallest singular value
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        rotation = u_fixed * v_t;
    }
    rotation
}

impl ConstrainedMeshSolver for ArapDeformer {
    fn add_constraint(&mut self, vertex: VertexId, weight: f64, position: Point3<f64>, post_fix: bool) -> bool {
        self.operator.add_constraint(vertex, weight, position, post_fix)
    }

    fn update_constraint_position(&mut self, vertex: VertexId, position: Point3<f64>, post_fix: bool) -> bool {
        self.operator.update_constraint_position(vertex, position, post_fix)
    }

    fn update_constraint_weight(&mut self, vertex: VertexId, weight: f64) -> bool {
        self.operator.update_constraint_weight(vertex, weight)
    }

    fn clear_constraints(&mut self) {
        self.operator.clear_constraints();
    }

    fn clear_constraint_weights(&mut self) {
        self.operator.clear_constraint_weights();
    }

    fn clear_constraint_positions(&mut self) {
        self.operator.clear_constraint_positions();
    }

    fn is_constrained(&self, vertex: VertexId) -> bool {
        self.operator.is_constrained(vertex)
    }

    fn deform(&mut self, positions: &mut Vec<Point3<f64>>) -> Result<()> {
        let mut current = self.operator.solve(positions)?;

        for round in 0..self.iterations {
            let rotations = self.fit_rotations(&current);
            let source = self.rotated_source(&rotations)?;
            let rhs = self.operator.constrained_rhs(&source);

            let mut next = self.operator.solve_interior(&rhs, Some(&current))?;
            self.operator.apply_post_fix(&mut next);
            log::trace!("ARAP round {} done", round + 1);
            current = next;
        }

        self.operator.write_positions(&current, positions)
    }
}
