//! Struct-of-arrays vertex positions indexed by matrix row.

use nalgebra::{DVector, Point3};

use crate::algo::linearize::VertexLinearization;
use crate::error::{MeshError, Result};
use crate::mesh::{MeshTopology, RowIndex};

/// Three coordinate channels (X, Y, Z) of equal length, indexed by
/// [`RowIndex`] rather than by mesh vertex ID.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionBuffer {
    channels: [DVector<f64>; 3],
}

impl PositionBuffer {
    /// Create a buffer of `len` points at the origin.
    pub fn zeros(len: usize) -> Self {
        Self {
            channels: [DVector::zeros(len), DVector::zeros(len), DVector::zeros(len)],
        }
    }

    /// Wrap three channels.
    ///
    /// # Errors
    /// Returns [`MeshError::DimensionMismatch`] if the channels differ in
    /// length.
    pub fn from_channels(channels: [DVector<f64>; 3]) -> Result<Self> {
        let len = channels[0].len();
        for c in &channels[1..] {
            if c.len() != len {
                return Err(MeshError::mismatch(len, c.len()));
            }
        }
        Ok(Self { channels })
    }

    /// Gather the positions of the rows `rows` of a linearization from the
    /// mesh.
    pub fn from_mesh<M: MeshTopology>(
        mesh: &M,
        linearization: &VertexLinearization,
        rows: std::ops::Range<usize>,
    ) -> Self {
        let mut buffer = Self::zeros(rows.len());
        for (k, row) in rows.enumerate() {
            let p = mesh.vertex_position(linearization.to_id(RowIndex::new(row)));
            buffer.set_point(k, &p);
        }
        buffer
    }

    /// Gather the rows `rows` of a linearization from a vertex-ID indexed
    /// array.
    ///
    /// # Errors
    /// Returns [`MeshError::DimensionMismatch`] if `points` does not cover the
    /// vertex ID space.
    pub fn from_points(
        points: &[Point3<f64>],
        linearization: &VertexLinearization,
        rows: std::ops::Range<usize>,
    ) -> Result<Self> {
        if points.len() < linearization.id_space() {
            return Err(MeshError::mismatch(linearization.id_space(), points.len()));
        }
        let mut buffer = Self::zeros(rows.len());
        for (k, row) in rows.enumerate() {
            let v = linearization.to_id(RowIndex::new(row));
            buffer.set_point(k, &points[v.index()]);
        }
        Ok(buffer)
    }

    /// Whether all three channels have the same length.
    pub fn is_valid(&self) -> bool {
        let len = self.channels[0].len();
        self.channels.iter().all(|c| c.len() == len)
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    /// Whether the buffer holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One coordinate channel (0 = X, 1 = Y, 2 = Z).
    #[inline]
    pub fn channel(&self, axis: usize) -> &DVector<f64> {
        &self.channels[axis]
    }

    /// Mutable access to one coordinate channel.
    #[inline]
    pub fn channel_mut(&mut self, axis: usize) -> &mut DVector<f64> {
        &mut self.channels[axis]
    }

    /// All three channels.
    #[inline]
    pub fn channels(&self) -> &[DVector<f64>; 3] {
        &self.channels
    }

    /// Consume the buffer and return its channels.
    pub fn into_channels(self) -> [DVector<f64>; 3] {
        self.channels
    }

    /// The point stored at row `i`.
    #[inline]
    pub fn point(&self, i: usize) -> Point3<f64> {
        Point3::new(self.channels[0][i], self.channels[1][i], self.channels[2][i])
    }

    /// Overwrite the point stored at row `i`.
    #[inline]
    pub fn set_point(&mut self, i: usize, p: &Point3<f64>) {
        for axis in 0..3 {
            self.channels[axis][i] = p[axis];
        }
    }

    /// Apply `f` to every channel, producing a new buffer.
    pub fn map_channels<F>(&self, f: F) -> PositionBuffer
    where
        F: Fn(&DVector<f64>) -> DVector<f64>,
    {
        Self {
            channels: [f(&self.channels[0]), f(&self.channels[1]), f(&self.channels[2])],
        }
    }

    /// Scatter the buffer into a vertex-ID indexed array, treating buffer
    /// entry `k` as linearization row `first_row + k`.
    ///
    /// # Errors
    /// Returns [`MeshError::DimensionMismatch`] before writing anything if the
    /// buffer is malformed, does not fit the linearization, or `points` does
    /// not cover the vertex ID space.
    pub fn copy_to_points(
        &self,
        linearization: &VertexLinearization,
        first_row: usize,
        points: &mut [Point3<f64>],
    ) -> Result<()> {
        if !self.is_valid() {
            let bad = self.channels.iter().map(|c| c.len()).max().unwrap_or(0);
            return Err(MeshError::mismatch(self.len(), bad));
        }
        if first_row + self.len() > linearization.num_rows() {
            return Err(MeshError::mismatch(linearization.num_rows(), first_row + self.len()));
        }
        if points.len() < linearization.id_space() {
            return Err(MeshError::mismatch(linearization.id_space(), points.len()));
        }

        for k in 0..self.len() {
            let v = linearization.to_id(RowIndex::new(first_row + k));
            points[v.index()] = self.point(k);
        }
        Ok(())
    }
}
