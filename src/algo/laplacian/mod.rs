//! Discrete Laplacian operators.
//!
//! Every builder returns a [`LaplacianPair`]: the interior-interior block
//! `L` and the interior-boundary block `L_B` of the full operator, with rows
//! and columns numbered by a [`VertexLinearization`]. Off-diagonal weights
//! are positive for the non-geometric schemes and the diagonal always holds
//! the negated row sum, so the Laplacian of a constant field is exactly zero.
//!
//! # Schemes
//!
//! | Scheme | Weight of edge `ij` in row `i` | Symmetric |
//! |---|---|---|
//! | Uniform | `1` | yes |
//! | Umbrella | `1 / valence(i)` | no |
//! | Valence | `1 / sqrt(valence(i) + valence(j))` | yes |
//! | Cotangent | `(cot α + cot β) / (2 A_i)` | no |
//! | ClampedCotangent | Cotangent, clamped to `±c·A_i` | no |
//! | MeanValue | `(tan(θ₁/2) + tan(θ₂/2)) / ‖e_ij‖` | no |
//!
//! # Example
//!
//! ```
//! use lapdeform::algo::laplacian::{construct_laplacian, LaplacianScheme};
//! use lapdeform::algo::linearize::VertexLinearization;
//! use lapdeform::mesh::generators;
//!
//! let mesh = generators::grid(4, 4, 1.0);
//! let lin = VertexLinearization::new(&mesh);
//! let pair = construct_laplacian(LaplacianScheme::Uniform, &mesh, &lin);
//!
//! assert_eq!(pair.interior.nrows(), lin.num_interior());
//! assert_eq!(pair.boundary.ncols(), lin.num_boundary());
//! ```

mod weights;

pub use weights::{
    triangle_geometry, vertex_areas, TriangleGeometry, MEAN_VALUE_EPSILON, SMALL_EDGE_LENGTH,
    SMALL_TRIANGLE_AREA,
};

use nalgebra::DVector;

use super::linearize::VertexLinearization;
use crate::linalg::{CsrMatrix, PositionBuffer};
use crate::mesh::{EdgeId, MeshTopology, RowIndex, VertexId};
use weights::corner_of;

/// Edge weighting scheme of a Laplacian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaplacianScheme {
    /// Unit weight per neighbor.
    Uniform,
    /// Unit weights normalized by the row valence.
    Umbrella,
    /// `1 / sqrt(valence(i) + valence(j))`.
    Valence,
    /// Cotangent weights normalized by the vertex area.
    Cotangent,
    /// Cotangent weights with bounded magnitude.
    ClampedCotangent,
    /// Floater's mean-value weights.
    MeanValue,
}

impl LaplacianScheme {
    /// Every scheme, in declaration order.
    pub const ALL: [LaplacianScheme; 6] = [
        LaplacianScheme::Uniform,
        LaplacianScheme::Umbrella,
        LaplacianScheme::Valence,
        LaplacianScheme::Cotangent,
        LaplacianScheme::ClampedCotangent,
        LaplacianScheme::MeanValue,
    ];

    /// Whether the interior block built with this scheme equals its
    /// transpose.
    pub fn is_symmetric(self) -> bool {
        matches!(self, LaplacianScheme::Uniform | LaplacianScheme::Valence)
    }
}

/// Tunables of the geometric schemes.
#[derive(Debug, Clone, PartialEq)]
pub struct LaplacianOptions {
    /// Clamped cotangent weights are limited to `±weight_clamp × area`.
    pub weight_clamp: f64,
    /// Range of the per-row area ratio of the scaled cotangent Laplacian.
    pub area_ratio_range: (f64, f64),
    /// Use Meyer's mixed Voronoi areas instead of barycentric thirds.
    pub mixed_voronoi: bool,
}

impl Default for LaplacianOptions {
    fn default() -> Self {
        Self {
            weight_clamp: 1e5,
            area_ratio_range: (0.5, 5.0),
            mixed_voronoi: true,
        }
    }
}

impl LaplacianOptions {
    /// Set the clamped cotangent bound.
    pub fn with_weight_clamp(mut self, weight_clamp: f64) -> Self {
        self.weight_clamp = weight_clamp.abs();
        self
    }

    /// Set the scaled cotangent area ratio range.
    pub fn with_area_ratio_range(mut self, min: f64, max: f64) -> Self {
        self.area_ratio_range = (min.min(max), min.max(max));
        self
    }

    /// Choose between mixed Voronoi and barycentric vertex areas.
    pub fn with_mixed_voronoi(mut self, mixed_voronoi: bool) -> Self {
        self.mixed_voronoi = mixed_voronoi;
        self
    }
}

/// The interior rows of a Laplacian, split by column block.
#[derive(Debug, Clone, PartialEq)]
pub struct LaplacianPair {
    /// `N × N` block over interior columns.
    pub interior: CsrMatrix,
    /// `N × M` block over boundary columns.
    pub boundary: CsrMatrix,
}

impl LaplacianPair {
    /// Number of interior rows.
    #[inline]
    pub fn num_interior(&self) -> usize {
        self.interior.nrows()
    }

    /// Number of boundary columns.
    #[inline]
    pub fn num_boundary(&self) -> usize {
        self.boundary.ncols()
    }

    /// Apply the full operator: `L·interior + L_B·boundary`.
    pub fn apply(&self, interior: &DVector<f64>, boundary: &DVector<f64>) -> DVector<f64> {
        let mut y = self.interior.mul_vec(interior);
        self.boundary.mul_vec_add(boundary, &mut y);
        y
    }

    /// Apply the full operator to each coordinate channel.
    pub fn apply_positions(&self, interior: &PositionBuffer, boundary: &PositionBuffer) -> PositionBuffer {
        let mut out = PositionBuffer::zeros(self.num_interior());
        for axis in 0..3 {
            *out.channel_mut(axis) = self.apply(interior.channel(axis), boundary.channel(axis));
        }
        out
    }
}

/// Assemble a Laplacian from a per-edge weight.
///
/// `weight(i, e, j)` is the off-diagonal entry of row `i` for the edge `e`
/// to neighbor `j`.
fn assemble<M, F>(mesh: &M, lin: &VertexLinearization, mut weight: F) -> LaplacianPair
where
    M: MeshTopology,
    F: FnMut(VertexId, EdgeId, VertexId) -> f64,
{
    let n = lin.num_interior();
    let m = lin.num_boundary();
    let mut interior = Vec::new();
    let mut boundary = Vec::new();

    for row in 0..n {
        let vi = lin.to_id(RowIndex::new(row));
        let mut sum = 0.0;

        for e in mesh.vertex_edges(vi) {
            let [a, b] = mesh.edge_vertices(e);
            let vj = if a == vi { b } else { a };
            let Some(col) = lin.to_index(vj) else {
                continue;
            };

            let w = weight(vi, e, vj);
            debug_assert!(w.is_finite(), "non-finite weight on edge {:?}", e);
            sum += w;

            if lin.is_boundary_row(col) {
                boundary.push((row, col.index() - n, w));
            } else {
                interior.push((row, col.index(), w));
            }
        }

        interior.push((row, row, -sum));
    }

    log::trace!(
        "assembled Laplacian: {} interior rows, {} boundary columns, {} entries",
        n,
        m,
        interior.len() + boundary.len()
    );

    LaplacianPair {
        interior: CsrMatrix::from_triplets(n, n, interior),
        boundary: CsrMatrix::from_triplets(n, m, boundary),
    }
}

/// Build the Laplacian of `scheme` with default options.
pub fn construct_laplacian<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
    lin: &VertexLinearization,
) -> LaplacianPair {
    construct_laplacian_with(scheme, mesh, lin, &LaplacianOptions::default())
}

/// Build the Laplacian of `scheme`.
pub fn construct_laplacian_with<M: MeshTopology>(
    scheme: LaplacianScheme,
    mesh: &M,
    lin: &VertexLinearization,
    options: &LaplacianOptions,
) -> LaplacianPair {
    log::debug!("building {:?} Laplacian over {} vertices", scheme, lin.num_rows());
    match scheme {
        LaplacianScheme::Uniform => uniform_laplacian(mesh, lin),
        LaplacianScheme::Umbrella => umbrella_laplacian(mesh, lin),
        LaplacianScheme::Valence => valence_laplacian(mesh, lin),
        LaplacianScheme::Cotangent => cotangent_laplacian(mesh, lin, options),
        LaplacianScheme::ClampedCotangent => clamped_cotangent_laplacian(mesh, lin, options),
        LaplacianScheme::MeanValue => mean_value_laplacian(mesh, lin),
    }
}

/// Unit weight per neighbor.
pub fn uniform_laplacian<M: MeshTopology>(mesh: &M, lin: &VertexLinearization) -> LaplacianPair {
    assemble(mesh, lin, |_, _, _| 1.0)
}

/// Unit weights divided by the valence of the row vertex.
pub fn umbrella_laplacian<M: MeshTopology>(mesh: &M, lin: &VertexLinearization) -> LaplacianPair {
    assemble(mesh, lin, |vi, _, _| {
        let valence = mesh.vertex_valence(vi);
        if valence == 0 {
            0.0
        } else {
            1.0 / valence as f64
        }
    })
}

/// `1 / sqrt(valence(i) + valence(j))`.
pub fn valence_laplacian<M: MeshTopology>(mesh: &M, lin: &VertexLinearization) -> LaplacianPair {
    let valence: Vec<usize> = (0..mesh.vertex_id_space())
        .map(|i| {
            let v = VertexId::new(i);
            if mesh.is_vertex(v) {
                mesh.vertex_valence(v)
            } else {
                0
            }
        })
        .collect();

    assemble(mesh, lin, |vi, _, vj| {
        1.0 / ((valence[vi.index()] + valence[vj.index()]) as f64).sqrt()
    })
}

/// Half the sum of the cotangents of the angles opposite `e`.
fn edge_cotangent<M: MeshTopology>(mesh: &M, geometry: &[Option<TriangleGeometry>], e: EdgeId) -> f64 {
    let mut sum = 0.0;
    for t in mesh.edge_triangles(e) {
        if !t.is_valid() {
            continue;
        }
        let Some(g) = &geometry[t.index()] else {
            continue;
        };
        let opposite = mesh.opposite_vertex(t, e);
        if let Some(k) = corner_of(mesh, t, opposite) {
            sum += g.cot[k];
        }
    }
    0.5 * sum
}

/// Vertex areas floored so that no row divides by zero.
fn safe_vertex_areas<M: MeshTopology>(
    mesh: &M,
    geometry: &[Option<TriangleGeometry>],
    mixed: bool,
) -> Vec<f64> {
    let floor = SMALL_TRIANGLE_AREA / 6.0;
    vertex_areas(mesh, geometry, mixed)
        .into_iter()
        .map(|a| a.max(floor))
        .collect()
}

/// Cotangent weights divided by the vertex area of the row.
pub fn cotangent_laplacian<M: MeshTopology>(
    mesh: &M,
    lin: &VertexLinearization,
    options: &LaplacianOptions,
) -> LaplacianPair {
    let geometry = triangle_geometry(mesh);
    let areas = safe_vertex_areas(mesh, &geometry, options.mixed_voronoi);

    assemble(mesh, lin, |vi, e, _| edge_cotangent(mesh, &geometry, e) / areas[vi.index()])
}

/// Cotangent weights limited to `±options.weight_clamp × area`.
pub fn clamped_cotangent_laplacian<M: MeshTopology>(
    mesh: &M,
    lin: &VertexLinearization,
    options: &LaplacianOptions,
) -> LaplacianPair {
    let geometry = triangle_geometry(mesh);
    let areas = safe_vertex_areas(mesh, &geometry, options.mixed_voronoi);

    assemble(mesh, lin, |vi, e, _| {
        let area = areas[vi.index()];
        let bound = options.weight_clamp * area;
        (edge_cotangent(mesh, &geometry, e) / area).clamp(-bound, bound)
    })
}

/// Cotangent weights rescaled per row towards the average vertex area.
///
/// Row `i` gets the raw cotangent weights times
/// `clamp(Ā / A_i, range)`, where `Ā` is the mean vertex area over all
/// vertices. Returns the Laplacian and `Ā`.
pub fn scaled_cotangent_laplacian<M: MeshTopology>(
    mesh: &M,
    lin: &VertexLinearization,
    options: &LaplacianOptions,
) -> (LaplacianPair, f64) {
    let geometry = triangle_geometry(mesh);
    let areas = safe_vertex_areas(mesh, &geometry, options.mixed_voronoi);

    let count = lin.num_rows().max(1);
    let average = lin.ids().iter().map(|v| areas[v.index()]).sum::<f64>() / count as f64;
    let (lo, hi) = options.area_ratio_range;

    let pair = assemble(mesh, lin, |vi, e, _| {
        let ratio = (average / areas[vi.index()]).clamp(lo, hi);
        edge_cotangent(mesh, &geometry, e) * ratio
    });
    (pair, average)
}

/// Mean-value weights: half-angle tangents at the row vertex over the edge
/// length.
pub fn mean_value_laplacian<M: MeshTopology>(mesh: &M, lin: &VertexLinearization) -> LaplacianPair {
    let geometry = triangle_geometry(mesh);

    assemble(mesh, lin, |vi, e, vj| {
        let length = (mesh.vertex_position(vj) - mesh.vertex_position(vi))
            .norm()
            .max(SMALL_EDGE_LENGTH);

        let mut sum = 0.0;
        for t in mesh.edge_triangles(e) {
            if !t.is_valid() {
                continue;
            }
            if let (Some(g), Some(k)) = (&geometry[t.index()], corner_of(mesh, t, vi)) {
                sum += g.tan_half[k];
            }
        }
        sum / length
    })
}

/// The biharmonic operator of a Laplacian pair.
///
/// Returns `(A, B)` where `A = L·L` for symmetric schemes and `Lᵗ·L`
/// otherwise, and `B` is the matching product with the boundary block, so
/// that `A·x + B·b` is the biharmonic of interior values `x` with boundary
/// values `b`.
pub fn biharmonic_operator(pair: &LaplacianPair, symmetric: bool) -> (CsrMatrix, CsrMatrix) {
    if symmetric {
        let a = pair.interior.mul(&pair.interior);
        let b = pair.interior.mul(&pair.boundary);
        (a, b)
    } else {
        let lt = pair.interior.transpose();
        (lt.mul(&pair.interior), lt.mul(&pair.boundary))
    }
}
