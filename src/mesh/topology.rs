//! The mesh interface consumed by the solvers.
//!
//! Laplacian assembly, linearization and the deformers never touch the
//! half-edge representation directly; they only ask the questions listed on
//! [`MeshTopology`]. Any manifold triangle mesh that can answer them can be
//! deformed or smoothed.

use nalgebra::Point3;

use super::halfedge::HalfEdgeMesh;
use super::index::{EdgeId, FaceId, VertexId};

/// Read-only topology and geometry queries over a manifold triangle mesh.
///
/// Element IDs live in an ID space `0..*_id_space()` that may contain unused
/// slots; `is_vertex`/`is_triangle` tell them apart. Invalid neighbor slots
/// (e.g. the missing triangle of a boundary edge) are reported with the
/// `invalid()` sentinel of the index type.
pub trait MeshTopology {
    /// Size of the vertex ID space (one past the largest vertex ID).
    fn vertex_id_space(&self) -> usize;

    /// Number of live vertices.
    fn vertex_count(&self) -> usize;

    /// Whether `v` refers to a live vertex.
    fn is_vertex(&self, v: VertexId) -> bool;

    /// Iterate over live vertex IDs in increasing order.
    fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_;

    /// Position of a vertex.
    fn vertex_position(&self, v: VertexId) -> Point3<f64>;

    /// Iterate over the one-ring vertices of `v`.
    fn vertex_neighbors(&self, v: VertexId) -> impl Iterator<Item = VertexId> + '_;

    /// Iterate over the edges incident to `v`.
    fn vertex_edges(&self, v: VertexId) -> impl Iterator<Item = EdgeId> + '_;

    /// Iterate over the triangles incident to `v`.
    fn vertex_triangles(&self, v: VertexId) -> impl Iterator<Item = FaceId> + '_;

    /// Whether `v` lies on an open boundary or has an empty one-ring.
    fn is_boundary_vertex(&self, v: VertexId) -> bool;

    /// Number of one-ring neighbors.
    fn vertex_valence(&self, v: VertexId) -> usize {
        self.vertex_neighbors(v).count()
    }

    /// Size of the triangle ID space.
    fn triangle_id_space(&self) -> usize;

    /// Whether `t` refers to a live triangle.
    fn is_triangle(&self, t: FaceId) -> bool;

    /// Iterate over live triangle IDs in increasing order.
    fn triangle_ids(&self) -> impl Iterator<Item = FaceId> + '_;

    /// The three corners of a triangle, in winding order.
    fn triangle_vertices(&self, t: FaceId) -> [VertexId; 3];

    /// The three edges of a triangle; edge `k` joins corners `k` and `k + 1`.
    fn triangle_edges(&self, t: FaceId) -> [EdgeId; 3];

    /// The two endpoints of an edge.
    fn edge_vertices(&self, e: EdgeId) -> [VertexId; 2];

    /// The triangles on either side of an edge; the second slot is invalid
    /// for boundary edges.
    fn edge_triangles(&self, e: EdgeId) -> [FaceId; 2];

    /// Whether an edge has only one incident triangle.
    fn is_boundary_edge(&self, e: EdgeId) -> bool {
        !self.edge_triangles(e)[1].is_valid()
    }

    /// Corner positions of a triangle.
    fn triangle_positions(&self, t: FaceId) -> [Point3<f64>; 3] {
        self.triangle_vertices(t).map(|v| self.vertex_position(v))
    }

    /// The vertex of triangle `t` that is not an endpoint of edge `e`.
    fn opposite_vertex(&self, t: FaceId, e: EdgeId) -> VertexId {
        let [a, b] = self.edge_vertices(e);
        self.triangle_vertices(t)
            .into_iter()
            .find(|&v| v != a && v != b)
            .unwrap_or_default()
    }
}

impl MeshTopology for HalfEdgeMesh {
    fn vertex_id_space(&self) -> usize {
        self.num_vertices()
    }

    fn vertex_count(&self) -> usize {
        self.num_vertices()
    }

    fn is_vertex(&self, v: VertexId) -> bool {
        v.is_valid() && v.index() < self.num_vertices()
    }

    fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        HalfEdgeMesh::vertex_ids(self)
    }

    fn vertex_position(&self, v: VertexId) -> Point3<f64> {
        *self.position(v)
    }

    fn vertex_neighbors(&self, v: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        HalfEdgeMesh::vertex_neighbors(self, v)
    }

    fn vertex_edges(&self, v: VertexId) -> impl Iterator<Item = EdgeId> + '_ {
        HalfEdgeMesh::vertex_edges(self, v)
    }

    fn vertex_triangles(&self, v: VertexId) -> impl Iterator<Item = FaceId> + '_ {
        self.vertex_faces(v)
    }

    fn is_boundary_vertex(&self, v: VertexId) -> bool {
        HalfEdgeMesh::is_boundary_vertex(self, v)
    }

    fn vertex_valence(&self, v: VertexId) -> usize {
        self.valence(v)
    }

    fn triangle_id_space(&self) -> usize {
        self.num_faces()
    }

    fn is_triangle(&self, t: FaceId) -> bool {
        t.is_valid() && t.index() < self.num_faces()
    }

    fn triangle_ids(&self) -> impl Iterator<Item = FaceId> + '_ {
        self.face_ids()
    }

    fn triangle_vertices(&self, t: FaceId) -> [VertexId; 3] {
        self.face_triangle(t)
    }

    fn triangle_edges(&self, t: FaceId) -> [EdgeId; 3] {
        self.face_halfedges(t).map(|he| self.edge_of(he))
    }

    fn edge_vertices(&self, e: EdgeId) -> [VertexId; 2] {
        let he = self.edge_halfedge(e);
        [self.origin(he), self.dest(he)]
    }

    fn edge_triangles(&self, e: EdgeId) -> [FaceId; 2] {
        let he = self.edge_halfedge(e);
        [self.face_of(he), self.face_of(self.twin(he))]
    }

    fn is_boundary_edge(&self, e: EdgeId) -> bool {
        HalfEdgeMesh::is_boundary_edge(self, e)
    }
}
