//! CSR (Compressed Sparse Row) table storage

use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::tensor::Storage;
use std::sync::Arc;

/// CSR sparse matrix data
///
/// Indices are zero-based. The constructor enforces:
/// - `row_offsets.len() == rows + 1`, first entry 0, non-decreasing,
///   last entry equal to the non-zero count
/// - `col_indices.len() == values.len() == nnz`
/// - every column index `< cols`
#[derive(Debug, Clone)]
pub struct CsrData<T: Element> {
    row_offsets: Arc<[usize]>,
    col_indices: Arc<[usize]>,
    values: Storage<T>,
    shape: [usize; 2],
}

impl<T: Element> CsrData<T> {
    /// Create a new CSR matrix from components
    ///
    /// # Arguments
    ///
    /// * `row_offsets` - Row pointers (length: rows + 1)
    /// * `col_indices` - Column index of each non-zero
    /// * `values` - Value of each non-zero
    /// * `shape` - Matrix shape [rows, cols]
    pub fn new(
        row_offsets: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<T>,
        shape: [usize; 2],
    ) -> Result<Self> {
        let [rows, cols] = shape;
        let nnz = values.len();

        if row_offsets.len() != rows + 1 {
            return Err(Error::shape_mismatch(
                "row_offsets",
                &[rows + 1],
                &[row_offsets.len()],
            ));
        }
        if col_indices.len() != nnz {
            return Err(Error::shape_mismatch(
                "col_indices",
                &[nnz],
                &[col_indices.len()],
            ));
        }
        if row_offsets[0] != 0 {
            return Err(Error::invalid_argument(
                "row_offsets",
                format!("first offset must be 0, got {}", row_offsets[0]),
            ));
        }
        if let Some(w) = row_offsets.windows(2).position(|w| w[0] > w[1]) {
            return Err(Error::invalid_argument(
                "row_offsets",
                format!("offsets decrease at row {w}"),
            ));
        }
        if row_offsets[rows] != nnz {
            return Err(Error::invalid_argument(
                "row_offsets",
                format!("last offset {} does not match nnz {nnz}", row_offsets[rows]),
            ));
        }
        if let Some(&bad) = col_indices.iter().find(|&&c| c >= cols) {
            return Err(Error::IndexOutOfBounds {
                index: bad,
                size: cols,
            });
        }

        Ok(Self {
            row_offsets: row_offsets.into(),
            col_indices: col_indices.into(),
            values: Storage::from_vec(values),
            shape,
        })
    }

    /// Build from a dense row-major slice, keeping entries that are not zero
    pub fn from_dense(data: &[T], rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::shape_mismatch("data", &[rows, cols], &[data.len()]));
        }
        let mut row_offsets = Vec::with_capacity(rows + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        row_offsets.push(0);
        for row in data.chunks_exact(cols.max(1)).take(rows) {
            for (j, &v) in row.iter().enumerate() {
                if v != T::zero() {
                    col_indices.push(j);
                    values.push(v);
                }
            }
            row_offsets.push(values.len());
        }
        // cols == 0 yields no chunks
        row_offsets.resize(rows + 1, values.len());
        Self::new(row_offsets, col_indices, values, [rows, cols])
    }

    /// Returns the shape as [rows, cols]
    #[inline]
    pub fn shape(&self) -> [usize; 2] {
        self.shape
    }

    /// Number of stored non-zeros
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Row pointers
    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// Column index of each non-zero
    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    /// Value of each non-zero
    pub fn values(&self) -> &[T] {
        self.values.as_slice()
    }

    /// Column indices and values stored in `row`
    pub fn row_entries(&self, row: usize) -> (&[usize], &[T]) {
        let start = self.row_offsets[row];
        let end = self.row_offsets[row + 1];
        (
            &self.col_indices[start..end],
            &self.values.as_slice()[start..end],
        )
    }

    /// Value at (row, col); zero when not stored
    pub fn value(&self, row: usize, col: usize) -> T {
        let (cols, vals) = self.row_entries(row);
        cols.iter()
            .position(|&c| c == col)
            .map_or(T::zero(), |k| vals[k])
    }

    /// Rows `start..end` as a new CSR matrix
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        let base = self.row_offsets[start];
        let top = self.row_offsets[end];
        let row_offsets = self.row_offsets[start..=end]
            .iter()
            .map(|&o| o - base)
            .collect();
        Self::new(
            row_offsets,
            self.col_indices[base..top].to_vec(),
            self.values.as_slice()[base..top].to_vec(),
            [end - start, self.shape[1]],
        )
    }
}

impl<T: Element> PartialEq for CsrData<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self.row_offsets == other.row_offsets
            && self.col_indices == other.col_indices
            && self.values.as_slice() == other.values.as_slice()
    }
}
