//! Compressed sparse row matrices.
//!
//! [`CsrMatrix`] carries exactly the operations the mesh operators need:
//! triplet assembly, products (`LᵗL`, `L·L_B`), sums (`I - Δt·A`), diagonal
//! updates for constraint weights, and block slicing for the fixed/variable
//! split of quadratic programs.

use nalgebra::{DMatrix, DVector};

/// Compressed Sparse Row (CSR) matrix.
///
/// Column indices within a row are sorted and unique.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    /// `row_ptr[i]..row_ptr[i + 1]` indexes row `i` in `col_idx`/`values`.
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Create an all-zero matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            row_ptr: vec![0; rows + 1],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Create the `n × n` identity matrix.
    pub fn identity(n: usize) -> Self {
        Self::from_diagonal(&vec![1.0; n])
    }

    /// Create a square diagonal matrix.
    pub fn from_diagonal(diagonal: &[f64]) -> Self {
        let n = diagonal.len();
        Self {
            rows: n,
            cols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: diagonal.to_vec(),
        }
    }

    /// Create a CSR matrix from triplets (row, col, value).
    ///
    /// Duplicate entries at the same (row, col) are summed.
    pub fn from_triplets(rows: usize, cols: usize, mut triplets: Vec<(usize, usize, f64)>) -> Self {
        if triplets.is_empty() {
            return Self::zeros(rows, cols);
        }
        debug_assert!(triplets.iter().all(|&(r, c, _)| r < rows && c < cols));

        triplets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_idx = Vec::with_capacity(triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());

        let mut prev_row = usize::MAX;
        let mut prev_col = usize::MAX;

        for (row, col, val) in triplets {
            if row == prev_row && col == prev_col {
                if let Some(last) = values.last_mut() {
                    *last += val;
                }
            } else {
                col_idx.push(col);
                values.push(val);
                // Rows skipped since the previous entry start here too
                for r in (prev_row.wrapping_add(1))..=row {
                    row_ptr[r] = col_idx.len() - 1;
                }
                prev_row = row;
                prev_col = col;
            }
        }

        let nnz = col_idx.len();
        for r in (prev_row + 1)..=rows {
            row_ptr[r] = nnz;
        }

        Self {
            rows,
            cols,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Get the number of rows.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.rows
    }

    /// Get the number of columns.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.cols
    }

    /// Get the number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub(crate) fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    #[inline]
    pub(crate) fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }

    #[inline]
    pub(crate) fn values(&self) -> &[f64] {
        &self.values
    }

    /// Iterate over the stored `(column, value)` pairs of a row.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        self.col_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Iterate over all stored entries as `(row, col, value)`.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.rows).flat_map(move |i| self.row(i).map(move |(j, v)| (i, j, v)))
    }

    /// Get the entry at `(i, j)`; zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        match self.col_idx[range.clone()].binary_search(&j) {
            Ok(k) => self.values[range.start + k],
            Err(_) => 0.0,
        }
    }

    /// Extract the main diagonal.
    pub fn diagonal(&self) -> DVector<f64> {
        let n = self.rows.min(self.cols);
        DVector::from_fn(n, |i, _| self.get(i, i))
    }

    /// Multiply matrix by vector: y = A * x.
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(self.rows);
        self.mul_vec_add(x, &mut y);
        y
    }

    /// Multiply matrix by vector, adding to existing vector: y += A * x.
    pub fn mul_vec_add(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        assert_eq!(x.len(), self.cols, "Vector dimension mismatch");
        assert_eq!(y.len(), self.rows, "Output dimension mismatch");

        for i in 0..self.rows {
            let mut sum = 0.0;
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                sum += self.values[k] * x[self.col_idx[k]];
            }
            y[i] += sum;
        }
    }

    /// Compute the transpose.
    pub fn transpose(&self) -> CsrMatrix {
        let mut counts = vec![0usize; self.cols + 1];
        for &c in &self.col_idx {
            counts[c + 1] += 1;
        }
        for c in 0..self.cols {
            counts[c + 1] += counts[c];
        }
        let row_ptr = counts.clone();

        let mut cursor = counts;
        let mut col_idx = vec![0usize; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        // Rows are visited in order, so every transposed row comes out sorted
        for i in 0..self.rows {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                let c = self.col_idx[k];
                let dst = cursor[c];
                col_idx[dst] = i;
                values[dst] = self.values[k];
                cursor[c] += 1;
            }
        }

        CsrMatrix {
            rows: self.cols,
            cols: self.rows,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Sparse matrix product `self * other`.
    pub fn mul(&self, other: &CsrMatrix) -> CsrMatrix {
        assert_eq!(self.cols, other.rows, "Matrix dimension mismatch");

        // Gustavson's row-by-row product with a dense accumulator
        let mut accumulator = vec![0.0; other.cols];
        let mut marker = vec![usize::MAX; other.cols];
        let mut touched: Vec<usize> = Vec::new();

        let mut row_ptr = Vec::with_capacity(self.rows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);

        for i in 0..self.rows {
            touched.clear();
            for (k, a_ik) in self.row(i) {
                for (j, b_kj) in other.row(k) {
                    if marker[j] != i {
                        marker[j] = i;
                        accumulator[j] = 0.0;
                        touched.push(j);
                    }
                    accumulator[j] += a_ik * b_kj;
                }
            }
            touched.sort_unstable();
            for &j in &touched {
                col_idx.push(j);
                values.push(accumulator[j]);
            }
            row_ptr.push(col_idx.len());
        }

        CsrMatrix {
            rows: self.rows,
            cols: other.cols,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Linear combination `alpha * self + beta * other`.
    pub fn add_scaled(&self, alpha: f64, other: &CsrMatrix, beta: f64) -> CsrMatrix {
        assert_eq!(self.rows, other.rows, "Matrix dimension mismatch");
        assert_eq!(self.cols, other.cols, "Matrix dimension mismatch");

        let triplets = self
            .triplets()
            .map(|(i, j, v)| (i, j, alpha * v))
            .chain(other.triplets().map(|(i, j, v)| (i, j, beta * v)))
            .collect();
        CsrMatrix::from_triplets(self.rows, self.cols, triplets)
    }

    /// Multiply every entry by `s`.
    pub fn scale(&mut self, s: f64) {
        self.values.iter_mut().for_each(|v| *v *= s);
    }

    /// Return a copy with `diagonal[i]` added to entry `(i, i)`.
    pub fn with_added_diagonal(&self, diagonal: &[(usize, f64)]) -> CsrMatrix {
        let triplets = self
            .triplets()
            .chain(diagonal.iter().map(|&(i, v)| (i, i, v)))
            .collect();
        CsrMatrix::from_triplets(self.rows, self.cols, triplets)
    }

    /// Extract the block made of the given rows and columns, in the given
    /// order.
    pub fn submatrix(&self, rows: &[usize], cols: &[usize]) -> CsrMatrix {
        let mut col_map = vec![usize::MAX; self.cols];
        for (new_j, &j) in cols.iter().enumerate() {
            col_map[j] = new_j;
        }

        let mut triplets = Vec::new();
        for (new_i, &i) in rows.iter().enumerate() {
            for (j, v) in self.row(i) {
                if col_map[j] != usize::MAX {
                    triplets.push((new_i, col_map[j], v));
                }
            }
        }
        CsrMatrix::from_triplets(rows.len(), cols.len(), triplets)
    }

    /// Check whether the matrix equals its transpose up to `tolerance`
    /// (relative to the largest stored magnitude).
    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        if self.rows != self.cols {
            return false;
        }
        let scale = self.values.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
        self.triplets()
            .all(|(i, j, v)| (v - self.get(j, i)).abs() <= tolerance * scale)
    }

    /// Convert to a dense matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.rows, self.cols);
        for (i, j, v) in self.triplets() {
            dense[(i, j)] += v;
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CsrMatrix {
        // [ 4  1  0 ]
        // [ 0  3  2 ]
        CsrMatrix::from_triplets(2, 3, vec![(0, 0, 4.0), (0, 1, 1.0), (1, 1, 3.0), (1, 2, 2.0)])
    }

    #[test]
    fn test_csr_from_triplets_with_duplicates() {
        let triplets = vec![(0, 0, 2.0), (0, 0, 2.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)];
        let a = CsrMatrix::from_triplets(2, 2, triplets);

        assert_eq!(a.nnz(), 4);
        assert_eq!(a.get(0, 0), 4.0);
        assert_eq!(a.get(1, 1), 3.0);
    }

    #[test]
    fn test_csr_empty_rows() {
        let a = CsrMatrix::from_triplets(4, 4, vec![(1, 2, 5.0), (3, 0, 1.0)]);
        assert_eq!(a.row(0).count(), 0);
        assert_eq!(a.row(2).count(), 0);
        assert_eq!(a.get(1, 2), 5.0);
        assert_eq!(a.get(3, 0), 1.0);
    }

    #[test]
    fn test_csr_mul_vec() {
        let a = sample();
        let x = DVector::from_vec(vec![1.0, 1.0, 1.0]);
        let y = a.mul_vec(&x);

        assert!((y[0] - 5.0).abs() < 1e-10);
        assert!((y[1] - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_transpose() {
        let a = sample();
        let at = a.transpose();

        assert_eq!(at.nrows(), 3);
        assert_eq!(at.ncols(), 2);
        assert_eq!(at.to_dense(), a.to_dense().transpose());
    }

    #[test]
    fn test_product_matches_dense() {
        let a = sample();
        let ata = a.transpose().mul(&a);

        let dense = a.to_dense();
        let expected = dense.transpose() * &dense;
        assert!((ata.to_dense() - expected).norm() < 1e-12);
        assert!(ata.is_symmetric(1e-12));
    }

    #[test]
    fn test_add_scaled_and_diagonal() {
        let i = CsrMatrix::identity(3);
        let d = CsrMatrix::from_diagonal(&[1.0, 2.0, 3.0]);
        let m = i.add_scaled(1.0, &d, -0.5);

        assert!((m.diagonal() - DVector::from_vec(vec![0.5, 0.0, -0.5])).norm() < 1e-12);

        let w = m.with_added_diagonal(&[(2, 1.5)]);
        assert!((w.get(2, 2) - 1.0).abs() < 1e-12);
        assert!((w.get(0, 0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_submatrix() {
        let a = CsrMatrix::from_triplets(
            3,
            3,
            vec![(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0), (2, 0, 4.0), (2, 2, 5.0)],
        );
        let block = a.submatrix(&[2, 0], &[0, 2]);

        assert_eq!(block.to_dense(), DMatrix::from_row_slice(2, 2, &[4.0, 5.0, 1.0, 2.0]));
    }

    #[test]
    fn test_is_symmetric() {
        let sym = CsrMatrix::from_triplets(2, 2, vec![(0, 1, 2.0), (1, 0, 2.0), (0, 0, 1.0)]);
        let asym = CsrMatrix::from_triplets(2, 2, vec![(0, 1, 2.0), (1, 0, 1.0)]);

        assert!(sym.is_symmetric(1e-12));
        assert!(!asym.is_symmetric(1e-12));
        assert!(!sample().is_symmetric(1e-12));
    }
}
