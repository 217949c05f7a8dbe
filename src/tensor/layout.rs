//! Row-major layout of a tensor buffer

use super::shape::{STACK_DIMS, Shape};
use smallvec::SmallVec;
use std::fmt;

/// Element offsets between neighbours along each dimension
pub type Strides = SmallVec<[usize; STACK_DIMS]>;

/// Shape plus the row-major strides derived from it
///
/// Tensors here are always dense and C-ordered, so the strides are a pure
/// function of the shape; they are cached because axis kernels read them on
/// every row.
#[derive(Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Strides,
}

impl Layout {
    /// Row-major layout of `shape`
    ///
    /// ```
    /// use algokit::tensor::Layout;
    /// let layout = Layout::contiguous(&[2, 3, 4]);
    /// assert_eq!(layout.strides(), &[12, 4, 1]);
    /// ```
    pub fn contiguous(shape: &[usize]) -> Self {
        let shape: Shape = shape.into();
        let mut strides: Strides = SmallVec::from_elem(1, shape.len());
        for d in (0..shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1].saturating_mul(shape[d + 1]);
        }
        Self { shape, strides }
    }

    /// Dimensions
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub(crate) fn shape_owned(&self) -> Shape {
        self.shape.clone()
    }

    /// Strides in elements
    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Rank
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Element count; 1 for a rank-0 layout
    #[inline]
    pub fn elem_count(&self) -> usize {
        self.shape.numel()
    }

    /// Buffer offset of `indices`, `None` when any index is out of range
    pub fn index(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.ndim() {
            return None;
        }
        indices
            .iter()
            .zip(self.shape.iter().zip(&self.strides))
            .try_fold(0usize, |offset, (&i, (&dim, &stride))| {
                (i < dim).then_some(offset + i * stride)
            })
    }

    /// `(outer, axis, inner)` element counts around `axis`
    ///
    /// Walking `outer × axis × inner` visits the buffer in order, with
    /// consecutive elements along `axis` `inner` apart.
    pub fn split_at_axis(&self, axis: usize) -> (usize, usize, usize) {
        let outer = self.shape[..axis].iter().product();
        let inner = self.shape[axis + 1..].iter().product();
        (outer, self.shape[axis], inner)
    }

    /// Same elements under `new_shape`; `None` when the counts differ
    pub fn reshape(&self, new_shape: &[usize]) -> Option<Self> {
        let count = new_shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
        (count == Some(self.elem_count()))
            .then(|| Self::contiguous(new_shape))
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layout")
            .field("shape", &self.shape.as_slice())
            .field("strides", &self.strides.as_slice())
            .finish()
    }
}
