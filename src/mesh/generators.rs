//! Procedural meshes for tests, benchmarks and examples.
//!
//! The generators are deterministic and produce consistently oriented
//! (counter-clockwise seen from outside) triangle meshes.

use nalgebra::{Point3, Vector3};

use super::builder::build_from_triangles;
use super::halfedge::HalfEdgeMesh;

/// A regular icosahedron inscribed in the unit sphere (12 vertices, 20 faces,
/// closed, every vertex of valence 5).
pub fn icosahedron() -> HalfEdgeMesh {
    let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let raw = [
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ];
    let scale = 1.0 / (1.0 + t * t).sqrt();
    let vertices: Vec<Point3<f64>> = raw
        .iter()
        .map(|p| Point3::new(p[0] * scale, p[1] * scale, p[2] * scale))
        .collect();

    let faces = [
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    build_from_triangles(&vertices, &faces).expect("icosahedron connectivity is valid")
}

/// A closed tetrahedron with one irregular apex.
pub fn tetrahedron() -> HalfEdgeMesh {
    let vertices = [
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.5, 1.0, 0.0),
        Point3::new(0.5, 0.5, 1.0),
    ];
    let faces = [[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];

    build_from_triangles(&vertices, &faces).expect("tetrahedron connectivity is valid")
}

/// A flat `cols × rows` grid of quads in the XY plane, each split into two
/// triangles along the same diagonal.
///
/// Vertex `(i, j)` has ID `j * (cols + 1) + i` and sits at
/// `(i * spacing, j * spacing, 0)`.
///
/// # Panics
/// Panics if `cols` or `rows` is zero.
pub fn grid(cols: usize, rows: usize, spacing: f64) -> HalfEdgeMesh {
    assert!(cols > 0 && rows > 0, "grid needs at least one quad");

    let mut vertices = Vec::with_capacity((cols + 1) * (rows + 1));
    let mut faces = Vec::with_capacity(cols * rows * 2);

    for j in 0..=rows {
        for i in 0..=cols {
            vertices.push(Point3::new(i as f64 * spacing, j as f64 * spacing, 0.0));
        }
    }

    for j in 0..rows {
        for i in 0..cols {
            let v00 = j * (cols + 1) + i;
            let v10 = v00 + 1;
            let v01 = v00 + (cols + 1);
            let v11 = v01 + 1;

            faces.push([v00, v10, v11]);
            faces.push([v00, v11, v01]);
        }
    }

    build_from_triangles(&vertices, &faces).expect("grid connectivity is valid")
}

/// A flat grid like [`grid`] whose quads alternate between the two
/// diagonals, so interior vertices alternate between valence 4 and 8.
///
/// # Panics
/// Panics if `cols` or `rows` is zero.
pub fn checkerboard_grid(cols: usize, rows: usize, spacing: f64) -> HalfEdgeMesh {
    assert!(cols > 0 && rows > 0, "grid needs at least one quad");

    let vertices: Vec<Point3<f64>> = (0..=rows)
        .flat_map(|j| (0..=cols).map(move |i| Point3::new(i as f64 * spacing, j as f64 * spacing, 0.0)))
        .collect();

    let mut faces = Vec::with_capacity(cols * rows * 2);
    for j in 0..rows {
        for i in 0..cols {
            let v00 = j * (cols + 1) + i;
            let v10 = v00 + 1;
            let v01 = v00 + (cols + 1);
            let v11 = v01 + 1;

            if (i + j) % 2 == 0 {
                faces.push([v00, v10, v11]);
                faces.push([v00, v11, v01]);
            } else {
                faces.push([v00, v10, v01]);
                faces.push([v10, v11, v01]);
            }
        }
    }

    build_from_triangles(&vertices, &faces).expect("grid connectivity is valid")
}

/// Displace every vertex by a deterministic pseudo-random offset of at most
/// `amplitude` per axis.
pub fn jitter(mesh: &mut HalfEdgeMesh, amplitude: f64) {
    let ids: Vec<_> = mesh.vertex_ids().collect();
    for v in ids {
        let seed = v.index() as f64 + 1.0;
        let offset = Vector3::new(
            (seed * 12.9898).sin().fract(),
            (seed * 78.233).sin().fract(),
            (seed * 37.719).sin().fract(),
        );
        let p = *mesh.position(v) + offset * amplitude;
        mesh.set_position(v, p);
    }
}
