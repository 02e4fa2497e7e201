//! Mapping between mesh element IDs and matrix rows.
//!
//! Solvers work on dense `0..n` row indices while meshes hand out IDs from
//! a possibly sparse ID space. A linearization is the bidirectional table
//! between the two, built once per mesh snapshot.

use crate::mesh::{FaceId, MeshTopology, RowIndex, VertexId};

/// Vertex ordering with all interior vertices first and boundary vertices
/// last.
///
/// Within each group vertices keep increasing ID order. A vertex counts as
/// boundary if it lies on an open edge or has an empty one-ring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexLinearization {
    to_id: Vec<VertexId>,
    to_index: Vec<RowIndex>,
    num_boundary: usize,
}

impl VertexLinearization {
    /// Build the linearization of `mesh`.
    pub fn new<M: MeshTopology>(mesh: &M) -> Self {
        let mut to_id = Vec::with_capacity(mesh.vertex_count());
        let mut boundary = Vec::new();

        for v in mesh.vertex_ids() {
            if mesh.is_boundary_vertex(v) {
                boundary.push(v);
            } else {
                to_id.push(v);
            }
        }
        let num_boundary = boundary.len();
        to_id.extend(boundary);

        let mut to_index = vec![RowIndex::invalid(); mesh.vertex_id_space()];
        for (row, v) in to_id.iter().enumerate() {
            to_index[v.index()] = RowIndex::new(row);
        }

        Self {
            to_id,
            to_index,
            num_boundary,
        }
    }

    /// Total number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.to_id.len()
    }

    /// Number of interior rows (`0..num_interior()`).
    #[inline]
    pub fn num_interior(&self) -> usize {
        self.to_id.len() - self.num_boundary
    }

    /// Number of boundary rows (the tail of the ordering).
    #[inline]
    pub fn num_boundary(&self) -> usize {
        self.num_boundary
    }

    /// Size of the vertex ID space this table was built for.
    #[inline]
    pub fn id_space(&self) -> usize {
        self.to_index.len()
    }

    /// The vertex at `row`.
    ///
    /// # Panics
    /// Panics if `row` is out of range.
    #[inline]
    pub fn to_id(&self, row: RowIndex) -> VertexId {
        self.to_id[row.index()]
    }

    /// The row of vertex `v`, or `None` for IDs outside the table.
    #[inline]
    pub fn to_index(&self, v: VertexId) -> Option<RowIndex> {
        self.to_index
            .get(v.index())
            .copied()
            .filter(|row| row.is_valid())
    }

    /// Whether `row` lies in the boundary tail.
    #[inline]
    pub fn is_boundary_row(&self, row: RowIndex) -> bool {
        row.index() >= self.num_interior()
    }

    /// Row of `v` if it is an interior vertex.
    #[inline]
    pub fn interior_index(&self, v: VertexId) -> Option<RowIndex> {
        self.to_index(v).filter(|&row| !self.is_boundary_row(row))
    }

    /// Row-ordered vertex IDs.
    #[inline]
    pub fn ids(&self) -> &[VertexId] {
        &self.to_id
    }
}

/// Compact row numbering of the live triangles of a mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleLinearization {
    to_id: Vec<FaceId>,
    to_index: Vec<RowIndex>,
}

impl TriangleLinearization {
    /// Build the linearization of `mesh`.
    pub fn new<M: MeshTopology>(mesh: &M) -> Self {
        let to_id: Vec<FaceId> = mesh.triangle_ids().collect();
        let mut to_index = vec![RowIndex::invalid(); mesh.triangle_id_space()];
        for (row, t) in to_id.iter().enumerate() {
            to_index[t.index()] = RowIndex::new(row);
        }
        Self { to_id, to_index }
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.to_id.len()
    }

    /// The triangle at `row`.
    #[inline]
    pub fn to_id(&self, row: RowIndex) -> FaceId {
        self.to_id[row.index()]
    }

    /// The row of triangle `t`, or `None` for IDs outside the table.
    #[inline]
    pub fn to_index(&self, t: FaceId) -> Option<RowIndex> {
        self.to_index
            .get(t.index())
            .copied()
            .filter(|row| row.is_valid())
    }

    /// Row-ordered triangle IDs.
    #[inline]
    pub fn ids(&self) -> &[FaceId] {
        &self.to_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generators;

    #[test]
    fn test_interior_first() {
        let mesh = generators::grid(3, 3, 1.0);
        let lin = VertexLinearization::new(&mesh);

        assert_eq!(lin.num_rows(), 16);
        assert_eq!(lin.num_interior(), 4);
        assert_eq!(lin.num_boundary(), 12);

        for (row, &v) in lin.ids().iter().enumerate() {
            let row = RowIndex::new(row);
            assert_eq!(lin.is_boundary_row(row), mesh.is_boundary_vertex(v));
            assert_eq!(lin.to_index(v), Some(row));
            assert_eq!(lin.to_id(row), v);
        }
    }

    #[test]
    fn test_interior_rows_keep_id_order() {
        let mesh = generators::grid(3, 3, 1.0);
        let lin = VertexLinearization::new(&mesh);
        let interior: Vec<usize> = lin.ids()[..lin.num_interior()].iter().map(|v| v.index()).collect();

        assert_eq!(interior, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_lookup_outside_table() {
        let mesh = generators::tetrahedron();
        let lin = VertexLinearization::new(&mesh);

        assert_eq!(lin.to_index(VertexId::new(100)), None);
        assert_eq!(lin.to_index(VertexId::invalid()), None);
        assert_eq!(lin.num_boundary(), 0);
    }

    #[test]
    fn test_boundary_vertex_has_no_interior_index() {
        let mesh = generators::grid(2, 2, 1.0);
        let lin = VertexLinearization::new(&mesh);

        assert!(lin.interior_index(VertexId::new(0)).is_none());
        assert_eq!(lin.interior_index(VertexId::new(4)), Some(RowIndex::new(0)));
    }

    #[test]
    fn test_triangle_linearization() {
        let mesh = generators::icosahedron();
        let lin = TriangleLinearization::new(&mesh);

        assert_eq!(lin.num_rows(), 20);
        for (row, &t) in lin.ids().iter().enumerate() {
            assert_eq!(lin.to_index(t), Some(RowIndex::new(row)));
            assert_eq!(lin.to_id(RowIndex::new(row)), t);
        }
    }
}
