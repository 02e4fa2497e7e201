//! Per-triangle geometry used by the geometric weighting schemes.
//!
//! All degenerate-geometry handling lives here: triangles whose doubled area
//! falls below [`SMALL_TRIANGLE_AREA`] are treated as equilateral (cot 60°,
//! a third of the area per corner) and edge lengths are floored at
//! [`SMALL_EDGE_LENGTH`], so downstream weights are always finite.

use nalgebra::{Point3, Vector3};

use crate::mesh::{FaceId, MeshTopology, VertexId};

/// Doubled triangle area below which a triangle is treated as degenerate.
pub const SMALL_TRIANGLE_AREA: f64 = 1e-4;

/// Edge length floor used wherever an edge length divides.
pub const SMALL_EDGE_LENGTH: f64 = 1e-5;

/// Regularizer of the half-angle tangent near 180° corners.
pub const MEAN_VALUE_EPSILON: f64 = 1e-6;

/// cot(60°).
const COT_60: f64 = 0.577_350_269_189_625_8;

/// Corner quantities of one triangle.
///
/// Corner `k` is the `k`-th vertex in winding order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleGeometry {
    /// Triangle area (floored for degenerate triangles).
    pub area: f64,
    /// Cotangent of the interior angle at each corner.
    pub cot: [f64; 3],
    /// Tangent of half the interior angle at each corner.
    pub tan_half: [f64; 3],
    /// Squared length of the edge opposite each corner.
    pub opposite_length_sq: [f64; 3],
    /// Whether the equilateral fallback was used.
    pub degenerate: bool,
}

impl TriangleGeometry {
    /// Compute the corner quantities of the triangle `p`.
    pub fn new(p: &[Point3<f64>; 3]) -> Self {
        let edge = |k: usize| -> Vector3<f64> { p[(k + 2) % 3] - p[(k + 1) % 3] };
        let opposite_length_sq = [edge(0).norm_squared(), edge(1).norm_squared(), edge(2).norm_squared()];

        let double_area = (p[1] - p[0]).cross(&(p[2] - p[0])).norm();
        let tan_half = [0, 1, 2].map(|k| tan_half_angle(&p[k], &p[(k + 1) % 3], &p[(k + 2) % 3]));

        if double_area < SMALL_TRIANGLE_AREA {
            return Self {
                area: 0.5 * SMALL_TRIANGLE_AREA,
                cot: [COT_60; 3],
                tan_half,
                opposite_length_sq,
                degenerate: true,
            };
        }

        let cot = [0, 1, 2].map(|k| {
            let u = p[(k + 1) % 3] - p[k];
            let v = p[(k + 2) % 3] - p[k];
            u.dot(&v) / double_area
        });

        Self {
            area: 0.5 * double_area,
            cot,
            tan_half,
            opposite_length_sq,
            degenerate: false,
        }
    }

    /// Compute the geometry of triangle `t` of `mesh`.
    pub fn of<M: MeshTopology>(mesh: &M, t: FaceId) -> Self {
        Self::new(&mesh.triangle_positions(t))
    }

    /// Whether the interior angle at corner `k` exceeds 90°.
    #[inline]
    pub fn is_obtuse_at(&self, k: usize) -> bool {
        self.cot[k] < 0.0
    }

    /// Share of the triangle area assigned to corner `k`.
    ///
    /// With `mixed` set this is Meyer's mixed Voronoi area: the true Voronoi
    /// region for non-obtuse triangles, otherwise half the area for the
    /// obtuse corner and a quarter for the others. Without it, and for
    /// degenerate triangles, each corner gets a third.
    pub fn corner_area(&self, k: usize, mixed: bool) -> f64 {
        if self.degenerate || !mixed {
            return self.area / 3.0;
        }
        if self.is_obtuse_at(k) {
            return self.area / 2.0;
        }
        if (0..3).any(|j| self.is_obtuse_at(j)) {
            return self.area / 4.0;
        }
        let (j, l) = ((k + 1) % 3, (k + 2) % 3);
        (self.opposite_length_sq[j] * self.cot[j] + self.opposite_length_sq[l] * self.cot[l]) / 8.0
    }
}

/// tan(θ/2) for the angle θ at `apex` between the edges to `a` and `b`.
fn tan_half_angle(apex: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let u = (a - apex) / (a - apex).norm().max(SMALL_EDGE_LENGTH);
    let v = (b - apex) / (b - apex).norm().max(SMALL_EDGE_LENGTH);
    u.cross(&v).norm() / (1.0 + u.dot(&v) + MEAN_VALUE_EPSILON)
}

/// Geometry of every triangle, indexed by triangle ID.
pub fn triangle_geometry<M: MeshTopology>(mesh: &M) -> Vec<Option<TriangleGeometry>> {
    let mut geometry = vec![None; mesh.triangle_id_space()];
    for t in mesh.triangle_ids() {
        geometry[t.index()] = Some(TriangleGeometry::of(mesh, t));
    }
    geometry
}

/// Per-vertex area, indexed by vertex ID.
pub fn vertex_areas<M: MeshTopology>(
    mesh: &M,
    geometry: &[Option<TriangleGeometry>],
    mixed: bool,
) -> Vec<f64> {
    let mut areas = vec![0.0; mesh.vertex_id_space()];
    for t in mesh.triangle_ids() {
        let Some(g) = &geometry[t.index()] else {
            continue;
        };
        for (k, v) in mesh.triangle_vertices(t).into_iter().enumerate() {
            areas[v.index()] += g.corner_area(k, mixed);
        }
    }
    areas
}

/// Position of `v` among the corners of `t`.
#[inline]
pub fn corner_of<M: MeshTopology>(mesh: &M, t: FaceId, v: VertexId) -> Option<usize> {
    mesh.triangle_vertices(t).iter().position(|&c| c == v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn right_triangle() -> [Point3<f64>; 3] {
        [Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)]
    }

    #[test]
    fn test_right_triangle_cotangents() {
        let g = TriangleGeometry::new(&right_triangle());

        assert!((g.area - 0.5).abs() < 1e-12);
        assert!(g.cot[0].abs() < 1e-12);
        assert!((g.cot[1] - 1.0).abs() < 1e-12);
        assert!((g.cot[2] - 1.0).abs() < 1e-12);
        assert!(!g.degenerate);
    }

    #[test]
    fn test_mixed_areas_partition_triangle() {
        let tris = [
            right_triangle(),
            [Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0), Point3::new(1.0, 0.2, 0.0)],
            [Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), Point3::new(0.5, 0.8, 0.0)],
        ];
        for p in &tris {
            let g = TriangleGeometry::new(p);
            let total: f64 = (0..3).map(|k| g.corner_area(k, true)).sum();
            assert!((total - g.area).abs() < 1e-12, "mixed areas must sum to the triangle area");
        }
    }

    #[test]
    fn test_obtuse_corner_gets_half() {
        let g = TriangleGeometry::new(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(1.0, 0.2, 0.0),
        ]);
        assert!(g.is_obtuse_at(2));
        assert!((g.corner_area(2, true) - g.area / 2.0).abs() < 1e-12);
        assert!((g.corner_area(0, true) - g.area / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_falls_back_to_equilateral() {
        let g = TriangleGeometry::new(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0 + 1e-6, 1e-7, 0.0),
        ]);

        assert!(g.degenerate);
        assert_eq!(g.cot, [COT_60; 3]);
        assert!(g.area > 0.0);
        assert!(g.tan_half.iter().all(|t| t.is_finite()));
    }

    #[test]
    fn test_tan_half_straight_angle_is_finite() {
        let t = tan_half_angle(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(-1.0, 0.0, 0.0),
        );
        assert!(t.is_finite());

        let right = tan_half_angle(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(0.0, 1.0, 0.0),
        );
        assert!((right - 1.0).abs() < 1e-5);
    }
}
