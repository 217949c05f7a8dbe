//! Two-dimensional numeric tables
//!
//! A [`NumericTable`] is a rows × cols buffer in one of three layouts plus a
//! [`DataDictionary`] describing what each column means. Algorithms read
//! tables through the accessors here so that one kernel body can serve the
//! dense layouts; methods that only make sense for one layout check
//! [`NumericTable::layout`] up front.

mod csr;
mod dictionary;

pub use csr::CsrData;
pub use dictionary::{DataDictionary, FeatureDescriptor, FeatureKind};

use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::tensor::Storage;
use std::fmt;

/// Physical layout of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageLayout {
    /// Rows stored contiguously
    DenseRowMajor,
    /// Columns stored contiguously
    DenseColumnMajor,
    /// Compressed sparse rows
    Csr,
}

impl StorageLayout {
    /// True for the two dense layouts
    #[inline]
    pub fn is_dense(self) -> bool {
        !matches!(self, StorageLayout::Csr)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            StorageLayout::DenseRowMajor => 0,
            StorageLayout::DenseColumnMajor => 1,
            StorageLayout::Csr => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(StorageLayout::DenseRowMajor),
            1 => Some(StorageLayout::DenseColumnMajor),
            2 => Some(StorageLayout::Csr),
            _ => None,
        }
    }
}

impl fmt::Display for StorageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageLayout::DenseRowMajor => "dense row-major",
            StorageLayout::DenseColumnMajor => "dense column-major",
            StorageLayout::Csr => "CSR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
enum TableData<T: Element> {
    RowMajor(Storage<T>),
    ColumnMajor(Storage<T>),
    Csr(CsrData<T>),
}

/// rows × cols homogeneous table
///
/// The row count is fixed once data is attached; the dictionary always has
/// exactly `cols` entries. Cloning shares the underlying buffers.
#[derive(Debug, Clone)]
pub struct NumericTable<T: Element> {
    rows: usize,
    cols: usize,
    dictionary: DataDictionary,
    data: TableData<T>,
}

impl<T: Element> NumericTable<T> {
    fn check_dense_len(len: usize, rows: usize, cols: usize) -> Result<()> {
        let expected = rows
            .checked_mul(cols)
            .ok_or(Error::OutOfMemory { size: usize::MAX })?;
        if len != expected {
            return Err(Error::shape_mismatch("data", &[rows, cols], &[len]));
        }
        Ok(())
    }

    /// Dense row-major table from owned data
    pub fn from_row_major(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        Self::check_dense_len(data.len(), rows, cols)?;
        Ok(Self {
            rows,
            cols,
            dictionary: DataDictionary::homogeneous(cols, T::DTYPE),
            data: TableData::RowMajor(Storage::from_vec(data)),
        })
    }

    /// Dense column-major table from owned data
    pub fn from_column_major(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        Self::check_dense_len(data.len(), rows, cols)?;
        Ok(Self {
            rows,
            cols,
            dictionary: DataDictionary::homogeneous(cols, T::DTYPE),
            data: TableData::ColumnMajor(Storage::from_vec(data)),
        })
    }

    /// Sparse table over validated CSR data
    pub fn from_csr(csr: CsrData<T>) -> Self {
        let [rows, cols] = csr.shape();
        Self {
            rows,
            cols,
            dictionary: DataDictionary::homogeneous(cols, T::DTYPE),
            data: TableData::Csr(csr),
        }
    }

    /// Zero-filled dense row-major table
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = rows
            .checked_mul(cols)
            .ok_or(Error::OutOfMemory { size: usize::MAX })?;
        Ok(Self {
            rows,
            cols,
            dictionary: DataDictionary::homogeneous(cols, T::DTYPE),
            data: TableData::RowMajor(Storage::zeroed(len)?),
        })
    }

    /// Replace the dictionary; its length must equal the column count
    pub fn with_dictionary(mut self, dictionary: DataDictionary) -> Result<Self> {
        if dictionary.len() != self.cols {
            return Err(Error::shape_mismatch(
                "dictionary",
                &[self.cols],
                &[dictionary.len()],
            ));
        }
        self.dictionary = dictionary;
        Ok(self)
    }

    /// Number of rows
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `[rows, cols]`
    #[inline]
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// Physical layout tag
    pub fn layout(&self) -> StorageLayout {
        match self.data {
            TableData::RowMajor(_) => StorageLayout::DenseRowMajor,
            TableData::ColumnMajor(_) => StorageLayout::DenseColumnMajor,
            TableData::Csr(_) => StorageLayout::Csr,
        }
    }

    /// Column descriptors
    pub fn dictionary(&self) -> &DataDictionary {
        &self.dictionary
    }

    /// CSR data, when the table is sparse
    pub fn as_csr(&self) -> Option<&CsrData<T>> {
        match &self.data {
            TableData::Csr(csr) => Some(csr),
            _ => None,
        }
    }

    /// Raw dense buffer, in the table's own dense order
    pub fn dense_values(&self) -> Option<&[T]> {
        match &self.data {
            TableData::RowMajor(s) | TableData::ColumnMajor(s) => Some(s.as_slice()),
            TableData::Csr(_) => None,
        }
    }

    /// Row-major buffer, when the table is dense row-major
    pub fn as_row_major(&self) -> Option<&[T]> {
        match &self.data {
            TableData::RowMajor(s) => Some(s.as_slice()),
            _ => None,
        }
    }

    /// Mutable row-major buffer; copies first if the buffer is shared
    pub fn as_row_major_mut(&mut self) -> Result<&mut [T]> {
        let layout = self.layout();
        match &mut self.data {
            TableData::RowMajor(s) => Ok(s.make_mut()),
            _ => Err(Error::invalid_argument(
                "table",
                format!("expected dense row-major storage, found {layout}"),
            )),
        }
    }

    fn check_cell(&self, i: usize, j: usize) -> Result<()> {
        if i >= self.rows {
            return Err(Error::IndexOutOfBounds {
                index: i,
                size: self.rows,
            });
        }
        if j >= self.cols {
            return Err(Error::IndexOutOfBounds {
                index: j,
                size: self.cols,
            });
        }
        Ok(())
    }

    /// Element at row `i`, column `j`
    pub fn value(&self, i: usize, j: usize) -> Result<T> {
        self.check_cell(i, j)?;
        Ok(match &self.data {
            TableData::RowMajor(s) => s.as_slice()[i * self.cols + j],
            TableData::ColumnMajor(s) => s.as_slice()[j * self.rows + i],
            TableData::Csr(csr) => csr.value(i, j),
        })
    }

    /// Write row `i` densely into `out` (length `cols`)
    pub fn read_row(&self, i: usize, out: &mut [T]) -> Result<()> {
        if i >= self.rows {
            return Err(Error::IndexOutOfBounds {
                index: i,
                size: self.rows,
            });
        }
        if out.len() != self.cols {
            return Err(Error::shape_mismatch("row", &[self.cols], &[out.len()]));
        }
        match &self.data {
            TableData::RowMajor(s) => {
                out.copy_from_slice(&s.as_slice()[i * self.cols..(i + 1) * self.cols]);
            }
            TableData::ColumnMajor(s) => {
                let data = s.as_slice();
                for (j, o) in out.iter_mut().enumerate() {
                    *o = data[j * self.rows + i];
                }
            }
            TableData::Csr(csr) => {
                out.fill(T::zero());
                let (cols, vals) = csr.row_entries(i);
                for (&c, &v) in cols.iter().zip(vals) {
                    out[c] = v;
                }
            }
        }
        Ok(())
    }

    /// Row `i` as a dense vector
    pub fn row(&self, i: usize) -> Result<Vec<T>> {
        let mut out = vec![T::zero(); self.cols];
        self.read_row(i, &mut out)?;
        Ok(out)
    }

    /// Call `f(col, value)` for every stored entry of row `i`
    ///
    /// Dense layouts visit every column; CSR visits only stored entries.
    pub fn for_each_nonzero_in_row(&self, i: usize, mut f: impl FnMut(usize, T)) -> Result<()> {
        if i >= self.rows {
            return Err(Error::IndexOutOfBounds {
                index: i,
                size: self.rows,
            });
        }
        match &self.data {
            TableData::Csr(csr) => {
                let (cols, vals) = csr.row_entries(i);
                for (&c, &v) in cols.iter().zip(vals) {
                    f(c, v);
                }
            }
            TableData::RowMajor(s) => {
                for (j, &v) in s.as_slice()[i * self.cols..(i + 1) * self.cols]
                    .iter()
                    .enumerate()
                {
                    f(j, v);
                }
            }
            TableData::ColumnMajor(s) => {
                let data = s.as_slice();
                for j in 0..self.cols {
                    f(j, data[j * self.rows + i]);
                }
            }
        }
        Ok(())
    }

    /// Column `j` as a dense vector
    pub fn column(&self, j: usize) -> Result<Vec<T>> {
        if j >= self.cols {
            return Err(Error::IndexOutOfBounds {
                index: j,
                size: self.cols,
            });
        }
        Ok(match &self.data {
            TableData::ColumnMajor(s) => s.as_slice()[j * self.rows..(j + 1) * self.rows].to_vec(),
            TableData::RowMajor(s) => s
                .as_slice()
                .iter()
                .skip(j)
                .step_by(self.cols)
                .copied()
                .collect(),
            TableData::Csr(csr) => (0..self.rows).map(|i| csr.value(i, j)).collect(),
        })
    }

    /// Dense row-major copy of this table (shares the buffer when already row-major)
    pub fn to_row_major(&self) -> Result<Self> {
        if let TableData::RowMajor(_) = self.data {
            return Ok(self.clone());
        }
        let mut out = Vec::new();
        out.try_reserve_exact(self.rows * self.cols)
            .map_err(|_| Error::OutOfMemory {
                size: self.rows * self.cols,
            })?;
        out.resize(self.rows * self.cols, T::zero());
        if self.cols > 0 {
            for (i, row) in out.chunks_exact_mut(self.cols).enumerate() {
                self.read_row(i, row)?;
            }
        }
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            dictionary: self.dictionary.clone(),
            data: TableData::RowMajor(Storage::from_vec(out)),
        })
    }

    /// Rows `start..end` as a new table in the same layout
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        if start > end || end > self.rows {
            return Err(Error::invalid_argument(
                "rows",
                format!("range {start}..{end} out of bounds for {} rows", self.rows),
            ));
        }
        let n = end - start;
        let data = match &self.data {
            TableData::RowMajor(s) => TableData::RowMajor(Storage::from_vec(
                s.as_slice()[start * self.cols..end * self.cols].to_vec(),
            )),
            TableData::ColumnMajor(s) => {
                let src = s.as_slice();
                let mut out = Vec::with_capacity(n * self.cols);
                for j in 0..self.cols {
                    out.extend_from_slice(&src[j * self.rows + start..j * self.rows + end]);
                }
                TableData::ColumnMajor(Storage::from_vec(out))
            }
            TableData::Csr(csr) => TableData::Csr(csr.slice_rows(start, end)?),
        };
        Ok(Self {
            rows: n,
            cols: self.cols,
            dictionary: self.dictionary.clone(),
            data,
        })
    }
}

impl<T: Element> PartialEq for NumericTable<T> {
    /// Structural equality: same layout, shape, dictionary and content
    fn eq(&self, other: &Self) -> bool {
        if self.shape() != other.shape() || self.dictionary != other.dictionary {
            return false;
        }
        match (&self.data, &other.data) {
            (TableData::RowMajor(a), TableData::RowMajor(b))
            | (TableData::ColumnMajor(a), TableData::ColumnMajor(b)) => {
                a.as_slice() == b.as_slice()
            }
            (TableData::Csr(a), TableData::Csr(b)) => a == b,
            _ => false,
        }
    }
}
