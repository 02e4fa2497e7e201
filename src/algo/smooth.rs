//! One-call smoothing of a whole mesh.
//!
//! Each entry point builds its operator, runs it, and returns new positions
//! indexed by vertex ID. Boundary vertices never move.
//!
//! # Example
//!
//! ```
//! use lapdeform::algo::laplacian::LaplacianScheme;
//! use lapdeform::algo::smooth::compute_smoothing_diffusion;
//! use lapdeform::mesh::generators;
//!
//! let mesh = generators::grid(4, 4, 1.0);
//! let smoothed = compute_smoothing_diffusion(LaplacianScheme::Uniform, &mesh, true, 0.5, 1.0, 10).unwrap();
//! assert_eq!(smoothed.len(), 25);
//! ```

use nalgebra::Point3;

use super::constrained::{OperatorKind, OperatorOptions};
use super::deform::construct_mesh_smoother_with;
use super::diffusion::{BiHarmonicDiffusion, DiffusionIntegrator, LaplacianDiffusion};
use super::laplacian::LaplacianScheme;
use crate::error::{MeshError, Result};
use crate::linalg::{MatrixSolverType, SolverSettings};
use crate::mesh::MeshTopology;

fn check_rate(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(MeshError::invalid_param(name, value, "must be finite and non-negative"))
    }
}

fn integrate<D: DiffusionIntegrator>(
    flow: &mut D,
    solver: MatrixSolverType,
    use_explicit: bool,
    speed: f64,
    intensity: f64,
    iterations: usize,
) -> Result<Vec<Point3<f64>>> {
    check_rate("speed", speed)?;
    check_rate("intensity", intensity)?;

    if use_explicit {
        flow.integrate_forward_euler(iterations, speed);
    } else {
        flow.integrate_backward_euler(solver, iterations, speed * intensity)?;
    }
    flow.positions()
}

/// Laplacian diffusion smoothing.
///
/// With `use_explicit` each of the `iterations` forward Euler steps takes
/// the fraction `speed` of the stable step. Otherwise backward Euler runs
/// with `Δt = speed · intensity` on the fastest backend for the scheme.
pub fn compute_smoothing_diffusion<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
    use_explicit: bool,
    speed: f64,
    intensity: f64,
    iterations: usize,
) -> Result<Vec<Point3<f64>>> {
    let mut flow = LaplacianDiffusion::new(mesh, scheme);
    let solver = MatrixSolverType::fastest_for(scheme.is_symmetric());
    integrate(&mut flow, solver, use_explicit, speed, intensity, iterations)
}

/// Biharmonic diffusion smoothing; parameters as in
/// [`compute_smoothing_diffusion`]. The implicit system is always
/// symmetric and solved with PCG.
pub fn compute_smoothing_biharmonic<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
    use_explicit: bool,
    speed: f64,
    intensity: f64,
    iterations: usize,
) -> Result<Vec<Point3<f64>>> {
    let mut flow = BiHarmonicDiffusion::new(mesh, scheme);
    integrate(&mut flow, MatrixSolverType::Pcg, use_explicit, speed, intensity, iterations)
}

/// Implicit biharmonic smoothing through a soft-constrained smoother.
///
/// Every interior vertex is pulled towards its original position with
/// `weight`, the smoother is solved with PCG in at most `max_iterations`
/// iterations, and the result is blended with the original positions by
/// `speed` clamped to `[0, 1]`. Larger weights keep more detail.
pub fn compute_smoothing_implicit_biharmonic_pcg<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
    speed: f64,
    weight: f64,
    max_iterations: usize,
) -> Result<Vec<Point3<f64>>> {
    check_rate("weight", weight)?;
    if !speed.is_finite() {
        return Err(MeshError::invalid_param("speed", speed, "must be finite"));
    }

    let options = OperatorOptions::for_kind(OperatorKind::Smoother)
        .with_solver(MatrixSolverType::Pcg)
        .with_settings(SolverSettings::default().with_max_iterations(max_iterations));
    let mut smoother = construct_mesh_smoother_with(scheme, mesh, options);
    for v in mesh.vertex_ids() {
        // Boundary vertices are rejected by the smoother
        smoother.update_constraint_weight(v, weight);
    }

    let mut smoothed = Vec::new();
    smoother.deform(&mut smoothed)?;

    let blend = speed.clamp(0.0, 1.0);
    let mut positions = vec![Point3::origin(); mesh.vertex_id_space()];
    for v in mesh.vertex_ids() {
        let original = mesh.vertex_position(v);
        positions[v.index()] = original + (smoothed[v.index()] - original) * blend;
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::laplacian::uniform_laplacian;
    use crate::algo::linearize::VertexLinearization;
    use crate::linalg::PositionBuffer;
    use crate::mesh::{generators, HalfEdgeMesh};

    fn bumpy_grid() -> HalfEdgeMesh {
        let mut mesh = generators::grid(5, 5, 1.0);
        generators::jitter(&mut mesh, 0.2);
        mesh
    }

    /// Norm of the uniform Laplacian of the interior.
    fn roughness(mesh: &HalfEdgeMesh, positions: &[Point3<f64>]) -> f64 {
        let lin = VertexLinearization::new(mesh);
        let n = lin.num_interior();
        let pair = uniform_laplacian(mesh, &lin);
        let interior = PositionBuffer::from_points(positions, &lin, 0..n).unwrap();
        let boundary = PositionBuffer::from_points(positions, &lin, n..lin.num_rows()).unwrap();
        let delta = pair.apply_positions(&interior, &boundary);
        (0..3).map(|axis| delta.channel(axis).norm_squared()).sum::<f64>().sqrt()
    }

    fn original(mesh: &HalfEdgeMesh) -> Vec<Point3<f64>> {
        mesh.vertex_ids().map(|v| mesh.vertex_position(v)).collect()
    }

    #[test]
    fn test_boundary_is_kept() {
        let mesh = bumpy_grid();
        let before = original(&mesh);
        let runs = [
            compute_smoothing_diffusion(LaplacianScheme::Cotangent, &mesh, false, 0.5, 1.0, 3).unwrap(),
            compute_smoothing_biharmonic(LaplacianScheme::Uniform, &mesh, false, 0.1, 1.0, 3).unwrap(),
            compute_smoothing_implicit_biharmonic_pcg(LaplacianScheme::Uniform, &mesh, 1.0, 0.1, 500).unwrap(),
        ];

        for smoothed in &runs {
            for v in mesh.vertex_ids().filter(|&v| mesh.is_boundary_vertex(v)) {
                assert!((smoothed[v.index()] - before[v.index()]).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn test_explicit_and_implicit_both_flatten() {
        let mesh = bumpy_grid();
        let before = roughness(&mesh, &original(&mesh));

        let explicit = compute_smoothing_diffusion(LaplacianScheme::Uniform, &mesh, true, 0.5, 1.0, 50).unwrap();
        let implicit = compute_smoothing_diffusion(LaplacianScheme::Uniform, &mesh, false, 1.0, 5.0, 10).unwrap();

        assert!(roughness(&mesh, &explicit) < 0.1 * before);
        assert!(roughness(&mesh, &implicit) < 0.1 * before);
    }

    #[test]
    fn test_zero_speed_blend_is_identity() {
        let mesh = bumpy_grid();
        let smoothed = compute_smoothing_implicit_biharmonic_pcg(LaplacianScheme::Uniform, &mesh, 0.0, 1.0, 500).unwrap();

        for (a, b) in smoothed.iter().zip(original(&mesh)) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_heavy_weight_keeps_shape() {
        let mesh = bumpy_grid();
        let smoothed = compute_smoothing_implicit_biharmonic_pcg(LaplacianScheme::Uniform, &mesh, 1.0, 1e3, 1000).unwrap();

        for (a, b) in smoothed.iter().zip(original(&mesh)) {
            assert!((a - b).norm() < 1e-3);
        }
    }

    #[test]
    fn test_rejects_negative_rates() {
        let mesh = bumpy_grid();
        assert!(compute_smoothing_diffusion(LaplacianScheme::Uniform, &mesh, true, -1.0, 1.0, 1).is_err());
        assert!(compute_smoothing_biharmonic(LaplacianScheme::Uniform, &mesh, false, 1.0, f64::NAN, 1).is_err());
        assert!(compute_smoothing_implicit_biharmonic_pcg(LaplacianScheme::Uniform, &mesh, 1.0, -1.0, 10).is_err());
    }
}
