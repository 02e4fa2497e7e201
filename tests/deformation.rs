//! End-to-end behavior of the public API.

use approx::assert_relative_eq;
use lapdeform::algo::constrained::{ConstrainedMeshOperator, DirtyState};
use lapdeform::algo::deform::construct_mesh_deformer_with;
use lapdeform::algo::laplacian::biharmonic_operator;
use lapdeform::prelude::*;
use nalgebra::{DMatrix, Point3};

/// Irregular open patch: mixed valences and jittered positions.
fn irregular_patch() -> HalfEdgeMesh {
    let mut mesh = generators::checkerboard_grid(5, 5, 1.0);
    generators::jitter(&mut mesh, 0.2);
    mesh
}

/// Quad strip of three vertex rows whose middle column is doubled at a
/// distance of 1e-6, producing near-zero-area slivers.
fn sliver_strip() -> HalfEdgeMesh {
    let xs = [0.0, 1.0, 2.0, 2.0 + 1e-6, 3.0, 4.0];
    let cols = xs.len();
    let vertices: Vec<Point3<f64>> = (0..3)
        .flat_map(|j| xs.iter().map(move |&x| Point3::new(x, j as f64, 0.0)))
        .collect();

    let mut faces = Vec::new();
    for j in 0..2 {
        for i in 0..cols - 1 {
            let v00 = j * cols + i;
            let v10 = v00 + 1;
            let v01 = v00 + cols;
            let v11 = v01 + 1;
            faces.push([v00, v10, v11]);
            faces.push([v00, v11, v01]);
        }
    }
    build_from_triangles(&vertices, &faces).unwrap()
}

fn mesh_positions(mesh: &HalfEdgeMesh) -> Vec<Point3<f64>> {
    mesh.vertex_ids().map(|v| mesh.vertex_position(v)).collect()
}

#[test]
fn laplacian_rows_sum_to_zero() {
    let mesh = irregular_patch();
    let lin = VertexLinearization::new(&mesh);

    for scheme in LaplacianScheme::ALL {
        let pair = construct_laplacian(scheme, &mesh, &lin);
        for i in 0..pair.num_interior() {
            let sum: f64 = pair.interior.row(i).chain(pair.boundary.row(i)).map(|(_, w)| w).sum();
            let scale: f64 = pair.interior.row(i).map(|(_, w)| w.abs()).sum();
            assert!(sum.abs() <= 1e-10 * scale.max(1.0), "{:?} row {} sums to {}", scheme, i, sum);
        }
    }
}

#[test]
fn only_uniform_and_valence_are_symmetric() {
    let mesh = irregular_patch();
    let lin = VertexLinearization::new(&mesh);

    for scheme in LaplacianScheme::ALL {
        let pair = construct_laplacian(scheme, &mesh, &lin);
        assert_eq!(scheme.is_symmetric(), pair.interior.is_symmetric(1e-10), "{:?}", scheme);
    }
}

#[test]
fn biharmonic_operator_is_symmetric_for_every_scheme() {
    let mesh = irregular_patch();
    let lin = VertexLinearization::new(&mesh);

    for scheme in LaplacianScheme::ALL {
        let pair = construct_laplacian(scheme, &mesh, &lin);
        let (a, b) = biharmonic_operator(&pair, scheme.is_symmetric());
        assert!(a.is_symmetric(1e-10), "{:?}", scheme);
        assert_eq!(b.nrows(), lin.num_interior());
        assert_eq!(b.ncols(), lin.num_boundary());
    }
}

#[test]
fn boundary_constraint_is_ignored() {
    let mesh = generators::grid(4, 4, 1.0);
    let corner = VertexId::new(0);
    assert!(mesh.is_boundary_vertex(corner));

    let mut deformer = construct_mesh_deformer(LaplacianScheme::Uniform, &mesh);
    assert!(!deformer.add_constraint(corner, 5.0, Point3::new(0.0, 0.0, 1.0), false));
    assert!(!deformer.is_constrained(corner));

    // Out-of-range IDs are ignored too
    assert!(!deformer.add_constraint(VertexId::new(1000), 5.0, Point3::origin(), false));
}

#[test]
fn weight_update_reports_missing_position() {
    let mesh = generators::grid(4, 4, 1.0);
    let v = VertexId::new(6);
    let mut deformer = construct_mesh_deformer(LaplacianScheme::Uniform, &mesh);

    assert!(!deformer.update_constraint_weight(v, 2.0));
    assert!(deformer.is_constrained(v));
    assert!(deformer.update_constraint_position(v, Point3::new(1.0, 1.0, 0.5), false));
    assert!(deformer.update_constraint_weight(v, 3.0));
}

#[test]
fn heavy_self_constraints_reproduce_the_mesh() {
    let mesh = irregular_patch();
    let original = mesh_positions(&mesh);

    for scheme in LaplacianScheme::ALL {
        let mut deformer = construct_mesh_deformer(scheme, &mesh);
        let mut smoother = construct_mesh_smoother(scheme, &mesh);
        for v in mesh.vertex_ids() {
            deformer.add_constraint(v, 1e3, original[v.index()], false);
            smoother.add_constraint(v, 1e3, original[v.index()], false);
        }

        let mut deformed = Vec::new();
        let mut smoothed = Vec::new();
        deformer.deform(&mut deformed).unwrap();
        smoother.deform(&mut smoothed).unwrap();

        for v in mesh.vertex_ids() {
            let p = original[v.index()];
            assert_relative_eq!(deformed[v.index()], p, epsilon = 1e-6);
            assert_relative_eq!(smoothed[v.index()], p, epsilon = 1e-2);
        }
    }
}

#[test]
fn forward_euler_at_zero_speed_changes_nothing() {
    let mesh = irregular_patch();
    let original = mesh_positions(&mesh);

    for scheme in LaplacianScheme::ALL {
        let mut second = LaplacianDiffusion::new(&mesh, scheme);
        let mut fourth = BiHarmonicDiffusion::new(&mesh, scheme);
        second.integrate_forward_euler(25, 0.0);
        fourth.integrate_forward_euler(25, 0.0);

        assert_eq!(second.positions().unwrap(), original);
        assert_eq!(fourth.positions().unwrap(), original);
    }
}

#[test]
fn unconstrained_icosahedron_keeps_its_shape() {
    let mesh = generators::icosahedron();
    assert_eq!(mesh.vertex_count(), 12);

    let mut deformer = construct_mesh_deformer(LaplacianScheme::Uniform, &mesh);
    let mut positions = Vec::new();
    deformer.deform(&mut positions).unwrap();

    assert_eq!(positions.len(), 12);
    for v in mesh.vertex_ids() {
        assert_relative_eq!(positions[v.index()], mesh.vertex_position(v), epsilon = 1e-9);
    }
}

#[test]
fn cotangent_survives_slivers() {
    let mesh = sliver_strip();
    let lin = VertexLinearization::new(&mesh);
    assert_eq!(lin.num_interior(), 4);

    for scheme in [LaplacianScheme::Cotangent, LaplacianScheme::ClampedCotangent, LaplacianScheme::MeanValue] {
        let pair = construct_laplacian(scheme, &mesh, &lin);
        for (_, _, w) in pair.interior.triplets().chain(pair.boundary.triplets()) {
            assert!(w.is_finite(), "{:?} produced {}", scheme, w);
        }
    }

    let options = OperatorOptions::default().with_solver(MatrixSolverType::Lu);
    let mut deformer = construct_mesh_deformer_with(LaplacianScheme::Cotangent, &mesh, options);
    deformer.add_constraint(VertexId::new(7), 1.0, Point3::new(1.0, 1.0, 0.3), false);

    let mut positions = Vec::new();
    deformer.deform(&mut positions).unwrap();
    assert!(positions.iter().all(|p| p.coords.iter().all(|c| c.is_finite())));
}

#[test]
fn quadratic_program_frees_identity_rows_to_zero() {
    let q = CsrMatrix::identity(4);
    let fixed = DMatrix::from_column_slice(2, 1, &[1.0, 2.0]);

    for solver in [MatrixSolverType::Cholesky, MatrixSolverType::Lu, MatrixSolverType::Pcg] {
        let x = QuadraticProgram::solve_with_fixed_constraints(&q, None, &[0, 2], &fixed, solver).unwrap();
        assert_relative_eq!(x[(0, 0)], 1.0);
        assert_relative_eq!(x[(2, 0)], 2.0);
        assert_relative_eq!(x[(1, 0)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(x[(3, 0)], 0.0, epsilon = 1e-12);
    }
}

#[test]
fn moving_a_handle_only_dirties_positions() {
    let mesh = generators::grid(4, 4, 1.0);
    let handle = VertexId::new(12);
    let mut op = ConstrainedMeshOperator::new(
        OperatorKind::Deformer,
        LaplacianScheme::Cotangent,
        &mesh,
        OperatorOptions::for_kind(OperatorKind::Deformer),
    );

    op.add_constraint(handle, 10.0, Point3::new(2.0, 2.0, 1.0), false);
    assert_eq!(op.dirty_state(), DirtyState::BothDirty);

    let mut positions = Vec::new();
    op.deform(&mut positions).unwrap();
    assert_eq!(op.dirty_state(), DirtyState::Clean);
    let first = positions[12];

    op.update_constraint_position(handle, Point3::new(2.0, 2.0, 2.0), false);
    assert_eq!(op.dirty_state(), DirtyState::PositionsDirty);
    op.deform(&mut positions).unwrap();
    assert!(positions[12].z > first.z);

    op.update_constraint_weight(handle, 20.0);
    assert_eq!(op.dirty_state(), DirtyState::WeightsDirty);
}

#[test]
fn cholesky_reports_indefinite_matrix() {
    let mesh = generators::grid(4, 4, 1.0);
    let lin = VertexLinearization::new(&mesh);
    // The interior Laplacian is negative definite
    let pair = construct_laplacian(LaplacianScheme::Uniform, &mesh, &lin);

    let mut solver = create_solver(MatrixSolverType::Cholesky, SolverSettings::default());
    assert!(solver.factorize(&pair.interior, true).is_err());
    assert!(!solver.succeeded());
}

#[test]
fn arap_keeps_the_handle_and_boundary() {
    let mesh = generators::grid(6, 6, 1.0);
    let handle = VertexId::new(24);
    let target = Point3::new(3.0, 3.0, 1.5);

    let mut deformer = construct_arap_deformer(LaplacianScheme::Cotangent, &mesh, 4);
    deformer.add_constraint(handle, 10.0, target, true);

    let mut positions = Vec::new();
    deformer.deform(&mut positions).unwrap();

    assert_eq!(positions[24], target);
    for v in mesh.vertex_ids().filter(|&v| mesh.is_boundary_vertex(v)) {
        assert_eq!(positions[v.index()], mesh.vertex_position(v));
    }
}

#[test]
fn quadratic_program_with_singular_free_block() {
    // Fixing row 2 leaves the free block [[1, -1], [-1, 1]], which is singular
    let q = CsrMatrix::from_triplets(
        3,
        3,
        vec![(0, 0, 1.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 1.0), (2, 2, 1.0)],
    );
    let fixed = DMatrix::from_column_slice(1, 1, &[3.0]);

    let lu = QuadraticProgram::solve_with_fixed_constraints(&q, None, &[2], &fixed, MatrixSolverType::Lu);
    assert!(matches!(lu, Err(MeshError::FactorizationFailed { .. })));

    // QR picks the minimum-norm minimizer
    let x = QuadraticProgram::solve_with_fixed_constraints(&q, None, &[2], &fixed, MatrixSolverType::Qr).unwrap();
    assert_relative_eq!(x[(0, 0)], 0.0, epsilon = 1e-9);
    assert_relative_eq!(x[(1, 0)], 0.0, epsilon = 1e-9);
    assert_relative_eq!(x[(2, 0)], 3.0);
}
