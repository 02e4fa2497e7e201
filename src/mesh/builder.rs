//! Mesh construction utilities.
//!
//! Builds half-edge meshes from face-vertex lists and converts them back.

use std::collections::HashMap;

use nalgebra::Point3;

use super::halfedge::{Face, HalfEdge, HalfEdgeMesh};
use super::index::{EdgeId, FaceId, HalfEdgeId, VertexId};
use crate::error::{MeshError, Result};

/// Build a half-edge mesh from vertices and triangle faces.
///
/// Vertices that no face references are kept; they have an empty one-ring and
/// classify as boundary vertices.
///
/// # Arguments
/// * `vertices` - List of vertex positions
/// * `faces` - List of triangle faces, each as [v0, v1, v2] indices
///
/// # Errors
/// Fails on an empty face list, out-of-range or repeated vertex indices, and
/// on directed edges shared by two faces (non-manifold or inconsistently
/// oriented input).
///
/// # Example
/// ```
/// use lapdeform::mesh::{build_from_triangles, HalfEdgeMesh};
/// use nalgebra::Point3;
///
/// let vertices = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.5, 1.0, 0.0),
/// ];
/// let faces = vec![[0, 1, 2]];
///
/// let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
/// assert_eq!(mesh.num_vertices(), 3);
/// assert_eq!(mesh.num_edges(), 3);
/// ```
pub fn build_from_triangles(
    vertices: &[Point3<f64>],
    faces: &[[usize; 3]],
) -> Result<HalfEdgeMesh> {
    if faces.is_empty() {
        return Err(MeshError::EmptyMesh);
    }

    for (fi, face) in faces.iter().enumerate() {
        if let Some(&vi) = face.iter().find(|&&vi| vi >= vertices.len()) {
            return Err(MeshError::InvalidVertexIndex { face: fi, vertex: vi });
        }
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            return Err(MeshError::DegenerateFace { face: fi });
        }
    }

    let mut mesh = HalfEdgeMesh::with_capacity(vertices.len(), faces.len());
    let vertex_ids: Vec<VertexId> = vertices.iter().map(|&p| mesh.add_vertex(p)).collect();

    // Directed edge (v0, v1) -> half-edge
    let mut edge_map: HashMap<(usize, usize), HalfEdgeId> = HashMap::with_capacity(faces.len() * 3);

    for face in faces {
        let base = mesh.num_halfedges();
        let face_id = FaceId::new(mesh.num_faces());
        mesh.faces.push(Face {
            halfedge: HalfEdgeId::new(base),
        });

        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            let he = HalfEdgeId::new(base + k);
            mesh.halfedges.push(HalfEdge {
                origin: vertex_ids[a],
                next: HalfEdgeId::new(base + (k + 1) % 3),
                prev: HalfEdgeId::new(base + (k + 2) % 3),
                face: face_id,
                ..HalfEdge::default()
            });
            mesh.vertex_mut(vertex_ids[a]).halfedge = he;

            if edge_map.insert((a, b), he).is_some() {
                return Err(MeshError::NonManifoldEdge { v0: a, v1: b });
            }
        }
    }

    // Link twins; unmatched half-edges get a boundary twin. Sorted so that
    // edge numbering is deterministic.
    let mut directed: Vec<((usize, usize), HalfEdgeId)> =
        edge_map.iter().map(|(&k, &he)| (k, he)).collect();
    directed.sort_unstable_by_key(|&(_, he)| he);

    for ((v0, v1), he) in directed {
        if mesh.twin(he).is_valid() {
            continue;
        }
        let twin = match edge_map.get(&(v1, v0)) {
            Some(&twin) => twin,
            None => {
                let boundary_he = HalfEdgeId::new(mesh.num_halfedges());
                mesh.halfedges.push(HalfEdge {
                    origin: vertex_ids[v1],
                    ..HalfEdge::default()
                });
                boundary_he
            }
        };

        let edge = EdgeId::new(mesh.num_edges());
        mesh.edges.push(he);
        mesh.halfedge_mut(he).twin = twin;
        mesh.halfedge_mut(he).edge = edge;
        mesh.halfedge_mut(twin).twin = he;
        mesh.halfedge_mut(twin).edge = edge;
    }

    link_boundary_loops(&mut mesh);
    fix_boundary_vertex_halfedges(&mut mesh);

    Ok(mesh)
}

/// Link boundary half-edges into loops.
fn link_boundary_loops(mesh: &mut HalfEdgeMesh) {
    let boundary_hes: Vec<HalfEdgeId> = (0..mesh.num_halfedges())
        .map(HalfEdgeId::new)
        .filter(|&he| mesh.is_boundary_halfedge(he))
        .collect();

    let outgoing: HashMap<VertexId, HalfEdgeId> = boundary_hes
        .iter()
        .map(|&he| (mesh.origin(he), he))
        .collect();

    for &he in &boundary_hes {
        // The next boundary half-edge starts where this one ends
        if let Some(&next_he) = outgoing.get(&mesh.dest(he)) {
            mesh.halfedge_mut(he).next = next_he;
            mesh.halfedge_mut(next_he).prev = he;
        }
    }
}

/// Point every boundary vertex at an outgoing boundary half-edge so that
/// one-ring iteration starts (and ends) on the open side.
fn fix_boundary_vertex_halfedges(mesh: &mut HalfEdgeMesh) {
    for he in (0..mesh.num_halfedges()).map(HalfEdgeId::new) {
        if mesh.is_boundary_halfedge(he) {
            let origin = mesh.origin(he);
            mesh.vertex_mut(origin).halfedge = he;
        }
    }
}

/// Convert a half-edge mesh back to a face-vertex representation.
///
/// Returns (vertices, faces) tuple.
pub fn to_face_vertex(mesh: &HalfEdgeMesh) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let vertices: Vec<Point3<f64>> = mesh.vertex_ids().map(|v| *mesh.position(v)).collect();

    let faces: Vec<[usize; 3]> = mesh
        .face_ids()
        .map(|f| mesh.face_triangle(f).map(|v| v.index()))
        .collect();

    (vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_triangles() -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, -1.0, 0.0),
        ];
        let faces = vec![[0, 1, 2], [1, 0, 3]];
        (vertices, faces)
    }

    #[test]
    fn test_single_triangle() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
        ];
        let mesh = build_from_triangles(&vertices, &[[0, 1, 2]]).unwrap();

        assert_eq!(mesh.num_faces(), 1);
        // 3 interior half-edges + 3 boundary half-edges
        assert_eq!(mesh.num_halfedges(), 6);
        assert_eq!(mesh.num_edges(), 3);
        assert!(mesh.is_valid());

        for v in mesh.vertex_ids() {
            assert!(mesh.is_boundary_vertex(v));
            assert_eq!(mesh.valence(v), 2);
        }
    }

    #[test]
    fn test_two_triangles_shared_edge() {
        let (vertices, faces) = two_triangles();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();

        assert_eq!(mesh.num_halfedges(), 10);
        assert_eq!(mesh.num_edges(), 5);
        assert!(mesh.is_valid());

        let interior: Vec<EdgeId> = mesh.edge_ids().filter(|&e| !mesh.is_boundary_edge(e)).collect();
        assert_eq!(interior.len(), 1);

        // The shared edge's representative half-edge is an interior one
        let he = mesh.edge_halfedge(interior[0]);
        assert!(!mesh.is_boundary_halfedge(he));
        assert!(!mesh.is_boundary_halfedge(mesh.twin(he)));
    }

    #[test]
    fn test_roundtrip() {
        let (vertices, faces) = two_triangles();
        let mesh = build_from_triangles(&vertices, &faces).unwrap();

        let (out_verts, out_faces) = to_face_vertex(&mesh);

        assert_eq!(out_faces, faces);
        for (v_in, v_out) in vertices.iter().zip(out_verts.iter()) {
            assert!((v_in - v_out).norm() < 1e-10);
        }
    }

    #[test]
    fn test_unreferenced_vertex_kept() {
        let (mut vertices, faces) = two_triangles();
        vertices.push(Point3::new(5.0, 5.0, 5.0));
        let mesh = build_from_triangles(&vertices, &faces).unwrap();

        let lonely = VertexId::new(4);
        assert_eq!(mesh.num_vertices(), 5);
        assert!(mesh.is_boundary_vertex(lonely));
        assert_eq!(mesh.vertex_neighbors(lonely).count(), 0);
    }

    #[test]
    fn test_invalid_vertex_index() {
        let vertices = vec![Point3::new(0.0, 0.0, 0.0)];
        let result = build_from_triangles(&vertices, &[[0, 1, 2]]);
        assert_eq!(result.unwrap_err(), MeshError::InvalidVertexIndex { face: 0, vertex: 1 });
    }

    #[test]
    fn test_degenerate_face() {
        let (vertices, _) = two_triangles();
        let result = build_from_triangles(&vertices, &[[0, 0, 2]]);
        assert!(matches!(result, Err(MeshError::DegenerateFace { face: 0 })));
    }

    #[test]
    fn test_non_manifold_edge() {
        let (vertices, _) = two_triangles();
        // Both faces use the directed edge 0 -> 1
        let result = build_from_triangles(&vertices, &[[0, 1, 2], [0, 1, 3]]);
        assert!(matches!(result, Err(MeshError::NonManifoldEdge { .. })));
    }
}
