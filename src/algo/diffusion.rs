//! Diffusion flows over mesh positions.
//!
//! Integrates `dp/dt = A·p + B·b` for interior positions `p` with fixed
//! boundary positions `b`. [`LaplacianDiffusion`] uses the Laplacian blocks
//! (`A = L`, `B = L_B`); [`BiHarmonicDiffusion`] uses the negated
//! biharmonic blocks, a fourth-order flow that smooths more aggressively
//! while keeping the boundary tangent.
//!
//! Positions are double buffered: a step reads one buffer and writes the
//! other.

use nalgebra::Point3;

use super::laplacian::{biharmonic_operator, construct_laplacian, LaplacianScheme};
use super::linearize::VertexLinearization;
use crate::error::{MeshError, Result};
use crate::linalg::{create_solver, CsrMatrix, MatrixSolverType, PositionBuffer, SolverSettings};
use crate::mesh::MeshTopology;

/// State shared by every diffusion integrator.
#[derive(Debug, Clone)]
pub struct DiffusionState {
    linearization: VertexLinearization,
    operator: CsrMatrix,
    boundary_operator: CsrMatrix,
    symmetric: bool,
    boundary_positions: PositionBuffer,
    /// `B·b`, constant over the flow.
    boundary_source: PositionBuffer,
    buffers: [PositionBuffer; 2],
    current: usize,
    settings: SolverSettings,
}

impl DiffusionState {
    fn new<M: MeshTopology>(
        mesh: &M,
        linearization: VertexLinearization,
        operator: CsrMatrix,
        boundary_operator: CsrMatrix,
        symmetric: bool,
    ) -> Self {
        let n = linearization.num_interior();
        let interior = PositionBuffer::from_mesh(mesh, &linearization, 0..n);
        let boundary_positions = PositionBuffer::from_mesh(mesh, &linearization, n..linearization.num_rows());
        let boundary_source = boundary_positions.map_channels(|c| boundary_operator.mul_vec(c));

        Self {
            linearization,
            operator,
            boundary_operator,
            symmetric,
            boundary_positions,
            boundary_source,
            buffers: [interior.clone(), interior],
            current: 0,
            settings: SolverSettings::default(),
        }
    }

    /// Interior positions after the last step.
    pub fn interior(&self) -> &PositionBuffer {
        &self.buffers[self.current]
    }

    /// The flow operator `A`.
    pub fn operator(&self) -> &CsrMatrix {
        &self.operator
    }

    /// The boundary coupling `B`.
    pub fn boundary_operator(&self) -> &CsrMatrix {
        &self.boundary_operator
    }

    /// The vertex ordering.
    pub fn linearization(&self) -> &VertexLinearization {
        &self.linearization
    }

    /// Settings used by backward Euler solves.
    pub fn set_solver_settings(&mut self, settings: SolverSettings) {
        self.settings = settings;
    }

    fn swap(&mut self) {
        self.current = 1 - self.current;
    }
}

/// Time integration of a diffusion flow.
pub trait DiffusionIntegrator {
    /// Shared integrator state.
    fn state(&self) -> &DiffusionState;

    /// Mutable shared integrator state.
    fn state_mut(&mut self) -> &mut DiffusionState;

    /// Explicit step size for `speed`: `speed / |min diag A|`, clamped to
    /// `[0, speed]`.
    fn stable_time_step(&self, speed: f64) -> f64 {
        let speed = speed.max(0.0);
        let min_diagonal = self.state().operator.diagonal().iter().copied().fold(0.0_f64, f64::min);
        if min_diagonal.abs() <= f64::EPSILON {
            return speed;
        }
        (speed / min_diagonal.abs()).clamp(0.0, speed)
    }

    /// Take `steps` forward Euler steps `p ← p + Δt·(A·p + B·b)` with the
    /// stable step size for `speed`.
    fn integrate_forward_euler(&mut self, steps: usize, speed: f64) {
        let dt = self.stable_time_step(speed);
        log::debug!("forward Euler: {} steps, dt = {:.3e}", steps, dt);

        let state = self.state_mut();
        for _ in 0..steps {
            let (src, dst) = if state.current == 0 { (0, 1) } else { (1, 0) };
            for axis in 0..3 {
                let p = state.buffers[src].channel(axis);
                let mut velocity = state.operator.mul_vec(p);
                velocity += state.boundary_source.channel(axis);
                let next = p + velocity * dt;
                *state.buffers[dst].channel_mut(axis) = next;
            }
            state.swap();
        }
    }

    /// Take `steps` backward Euler steps `(I - Δt·A)·p' = p + Δt·B·b`.
    ///
    /// The matrix is factorized once; iterative backends are warm-started
    /// from the previous step.
    fn integrate_backward_euler(&mut self, solver_type: MatrixSolverType, steps: usize, dt: f64) -> Result<()> {
        if !(dt >= 0.0 && dt.is_finite()) {
            return Err(MeshError::invalid_param("dt", dt, "must be finite and non-negative"));
        }

        let state = self.state_mut();
        let n = state.linearization.num_interior();
        let system = CsrMatrix::identity(n).add_scaled(1.0, &state.operator, -dt);

        let mut solver = create_solver(solver_type, state.settings.clone());
        solver.factorize(&system, state.symmetric)?;
        log::debug!("backward Euler: {} steps, dt = {:.3e}, {:?}", steps, dt, solver_type);

        let forcing = state.boundary_source.map_channels(|c| c * dt);
        for _ in 0..steps {
            let p = &state.buffers[state.current];
            let rhs = PositionBuffer::from_channels([0, 1, 2].map(|axis| p.channel(axis) + forcing.channel(axis)))?;
            let next = solver.solve_positions(&rhs, Some(p))?;

            let dst = 1 - state.current;
            state.buffers[dst] = next;
            state.swap();
        }
        Ok(())
    }

    /// Current positions indexed by vertex ID; boundary vertices keep their
    /// original positions.
    ///
    /// Fails if the interior buffer no longer matches the linearization.
    fn positions(&self) -> Result<Vec<Point3<f64>>> {
        let state = self.state();
        let n = state.linearization.num_interior();
        let mut points = vec![Point3::origin(); state.linearization.id_space()];
        state.interior().copy_to_points(&state.linearization, 0, &mut points)?;
        state.boundary_positions.copy_to_points(&state.linearization, n, &mut points)?;
        Ok(points)
    }
}

/// Second-order diffusion `dp/dt = L·p + L_B·b`.
#[derive(Debug, Clone)]
pub struct LaplacianDiffusion {
    state: DiffusionState,
}

impl LaplacianDiffusion {
    /// Set up the flow of `scheme` on `mesh`.
    pub fn new<M: MeshTopology>(mesh: &M, scheme: LaplacianScheme) -> Self {
        let lin = VertexLinearization::new(mesh);
        let pair = construct_laplacian(scheme, mesh, &lin);
        Self {
            state: DiffusionState::new(mesh, lin, pair.interior, pair.boundary, scheme.is_symmetric()),
        }
    }
}

impl DiffusionIntegrator for LaplacianDiffusion {
    fn state(&self) -> &DiffusionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DiffusionState {
        &mut self.state
    }
}

/// Fourth-order diffusion `dp/dt = -(A·p + B·b)` with the biharmonic blocks.
#[derive(Debug, Clone)]
pub struct BiHarmonicDiffusion {
    state: DiffusionState,
}

impl BiHarmonicDiffusion {
    /// Set up the flow of `scheme` on `mesh`.
    pub fn new<M: MeshTopology>(mesh: &M, scheme: LaplacianScheme) -> Self {
        let lin = VertexLinearization::new(mesh);
        let pair = construct_laplacian(scheme, mesh, &lin);
        let (mut a, mut b) = biharmonic_operator(&pair, scheme.is_symmetric());
        a.scale(-1.0);
        b.scale(-1.0);
        Self {
            state: DiffusionState::new(mesh, lin, a, b, true),
        }
    }
}

impl DiffusionIntegrator for BiHarmonicDiffusion {
    fn state(&self) -> &DiffusionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DiffusionState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generators;

    fn bumpy_grid() -> crate::mesh::HalfEdgeMesh {
        let mut mesh = generators::grid(5, 5, 1.0);
        generators::jitter(&mut mesh, 0.2);
        mesh
    }

    /// Norm of the flow velocity `A·p + B·b`.
    fn roughness<D: DiffusionIntegrator>(flow: &D) -> f64 {
        let state = flow.state();
        (0..3)
            .map(|axis| {
                let v = state.operator.mul_vec(state.interior().channel(axis)) + state.boundary_source.channel(axis);
                v.norm_squared()
            })
            .sum::<f64>()
            .sqrt()
    }

    #[test]
    fn test_forward_euler_zero_speed_is_identity() {
        let mesh = bumpy_grid();
        let mut flow = LaplacianDiffusion::new(&mesh, LaplacianScheme::Cotangent);
        let before = flow.positions().unwrap();

        flow.integrate_forward_euler(10, 0.0);
        assert_eq!(flow.positions().unwrap(), before);
    }

    #[test]
    fn test_stable_time_step() {
        let mesh = generators::grid(2, 2, 1.0);
        let flow = LaplacianDiffusion::new(&mesh, LaplacianScheme::Uniform);

        // Single interior vertex of valence 6
        assert!((flow.stable_time_step(1.0) - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(flow.stable_time_step(-1.0), 0.0);
    }

    #[test]
    fn test_forward_euler_smooths() {
        let mesh = bumpy_grid();
        let mut flow = LaplacianDiffusion::new(&mesh, LaplacianScheme::Uniform);
        let before = roughness(&flow);

        flow.integrate_forward_euler(20, 0.5);
        assert!(roughness(&flow) < before);
    }

    #[test]
    fn test_backward_euler_smooths_all_schemes() {
        let mesh = bumpy_grid();
        for scheme in LaplacianScheme::ALL {
            let mut flow = LaplacianDiffusion::new(&mesh, scheme);
            let before = flow.positions().unwrap();
            let rough = roughness(&flow);
            let solver = MatrixSolverType::fastest_for(scheme.is_symmetric());
            flow.integrate_backward_euler(solver, 10, 1.0).unwrap();

            let after = flow.positions().unwrap();
            assert!(roughness(&flow) < rough, "{:?} did not smooth", scheme);

            // Boundary never moves
            let lin = flow.state().linearization();
            for &v in &lin.ids()[lin.num_interior()..] {
                assert_eq!(after[v.index()], before[v.index()]);
            }
        }
    }

    #[test]
    fn test_backward_euler_direct_matches_iterative() {
        let mesh = bumpy_grid();
        let mut direct = BiHarmonicDiffusion::new(&mesh, LaplacianScheme::Uniform);
        let mut iterative = direct.clone();

        direct.integrate_backward_euler(MatrixSolverType::Lu, 3, 0.05).unwrap();
        iterative.state_mut().set_solver_settings(SolverSettings::default().with_tolerance(1e-12));
        iterative.integrate_backward_euler(MatrixSolverType::Pcg, 3, 0.05).unwrap();

        for (a, b) in direct.positions().unwrap().iter().zip(iterative.positions().unwrap()) {
            assert!((a - b).norm() < 1e-8);
        }
    }

    #[test]
    fn test_positions_report_resized_buffer() {
        let mesh = generators::grid(3, 3, 1.0);
        let mut flow = LaplacianDiffusion::new(&mesh, LaplacianScheme::Uniform);
        assert_eq!(flow.positions().unwrap().len(), 16);

        let current = flow.state().current;
        flow.state_mut().buffers[current] = PositionBuffer::zeros(2);
        assert!(matches!(flow.positions(), Err(MeshError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_backward_euler_rejects_bad_dt() {
        let mesh = generators::grid(2, 2, 1.0);
        let mut flow = LaplacianDiffusion::new(&mesh, LaplacianScheme::Uniform);

        assert!(matches!(
            flow.integrate_backward_euler(MatrixSolverType::Lu, 1, f64::NAN),
            Err(MeshError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_pcg_rejects_nonsymmetric_flow() {
        let mesh = bumpy_grid();
        let mut flow = LaplacianDiffusion::new(&mesh, LaplacianScheme::Cotangent);

        assert!(matches!(
            flow.integrate_backward_euler(MatrixSolverType::Pcg, 1, 0.1),
            Err(MeshError::NotSymmetric { .. })
        ));
    }
}
