//! Core Tensor type

use super::layout::Layout;
use super::shape::Shape;
use super::storage::Storage;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use std::fmt;

/// N-dimensional, homogeneous, row-major buffer
///
/// A tensor always knows its dimensions; its storage may be absent. A
/// *declared* tensor (shape only) supports two-phase allocate-then-fill: a
/// result slot is declared during shape inference and allocated right before
/// the kernel writes it. The dimension vector never changes after creation.
///
/// Cloning a tensor is cheap and shares the underlying storage.
#[derive(Clone)]
pub struct Tensor<T: Element> {
    layout: Layout,
    storage: Option<Storage<T>>,
}

impl<T: Element> Tensor<T> {
    /// Create an allocated, zero-filled tensor
    pub fn new(shape: &[usize]) -> Result<Self> {
        let layout = Layout::contiguous(shape);
        let len = layout.shape_owned().checked_numel()?;
        Ok(Self {
            layout,
            storage: Some(Storage::zeroed(len)?),
        })
    }

    /// Declare a tensor whose storage is attached later with [`Tensor::allocate`]
    pub fn declare(shape: &[usize]) -> Self {
        Self {
            layout: Layout::contiguous(shape),
            storage: None,
        }
    }

    /// Create a tensor from owned data in row-major order
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let layout = Layout::contiguous(shape);
        let len = layout.shape_owned().checked_numel()?;
        if data.len() != len {
            return Err(Error::ShapeMismatch {
                arg: "data",
                expected: vec![len],
                got: vec![data.len()],
            });
        }
        Ok(Self {
            layout,
            storage: Some(Storage::from_vec(data)),
        })
    }

    /// Create a tensor by copying a slice in row-major order
    pub fn from_slice(data: &[T], shape: &[usize]) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Create a tensor filled with `value`
    pub fn full(shape: &[usize], value: T) -> Result<Self> {
        let mut t = Self::new(shape)?;
        t.fill(value)?;
        Ok(t)
    }

    /// Attach zeroed storage to a declared tensor; no-op when already allocated
    pub fn allocate(&mut self) -> Result<()> {
        if self.storage.is_none() {
            let len = self.layout.shape_owned().checked_numel()?;
            self.storage = Some(Storage::zeroed(len)?);
        }
        Ok(())
    }

    /// True once storage is attached
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.storage.is_some()
    }

    /// Dimensions
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    /// Dimensions as an owned [`Shape`]
    #[inline]
    pub fn dims(&self) -> Shape {
        self.layout.shape_owned()
    }

    /// Memory layout
    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    /// Total number of elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.layout.elem_count()
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Read-only element view
    pub fn as_slice(&self) -> Result<&[T]> {
        self.storage
            .as_ref()
            .map(Storage::as_slice)
            .ok_or(Error::NotAllocated { arg: "tensor" })
    }

    /// Mutable element view; copies the buffer first if it is shared
    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        self.storage
            .as_mut()
            .map(Storage::make_mut)
            .ok_or(Error::NotAllocated { arg: "tensor" })
    }

    /// Set every element to `value`
    pub fn fill(&mut self, value: T) -> Result<()> {
        self.as_mut_slice()?.fill(value);
        Ok(())
    }

    /// Element at `indices`
    pub fn get(&self, indices: &[usize]) -> Result<T> {
        let idx = self.layout.index(indices).ok_or_else(|| {
            Error::invalid_argument(
                "indices",
                format!("{:?} out of range for shape {:?}", indices, self.shape()),
            )
        })?;
        Ok(self.as_slice()?[idx])
    }

    /// Copy elements out in row-major order
    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.as_slice()?.to_vec())
    }

    /// View with different dimensions over the same storage
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let layout = self
            .layout
            .reshape(shape)
            .ok_or_else(|| Error::shape_mismatch("reshape", self.shape(), shape))?;
        Ok(Self {
            layout,
            storage: self.storage.clone(),
        })
    }

    /// True when both tensors share one buffer
    pub fn shares_storage(&self, other: &Self) -> bool {
        match (&self.storage, &other.storage) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Reference count of the underlying buffer (0 when unallocated)
    pub fn ref_count(&self) -> usize {
        self.storage.as_ref().map_or(0, Storage::ref_count)
    }

    /// Fail unless `self` has exactly `expected` dimensions
    pub fn expect_shape(&self, arg: &'static str, expected: &[usize]) -> Result<()> {
        if self.shape() != expected {
            return Err(Error::shape_mismatch(arg, expected, self.shape()));
        }
        Ok(())
    }

    /// Fail unless `self` has rank `expected`
    pub fn expect_rank(&self, arg: &'static str, expected: usize) -> Result<()> {
        if self.ndim() != expected {
            return Err(Error::RankMismatch {
                arg,
                expected,
                got: self.ndim(),
            });
        }
        Ok(())
    }
}

impl<T: Element> PartialEq for Tensor<T> {
    /// Structural equality: same dimensions and same content
    fn eq(&self, other: &Self) -> bool {
        self.shape() == other.shape()
            && match (&self.storage, &other.storage) {
                (Some(a), Some(b)) => a.as_slice() == b.as_slice(),
                (None, None) => true,
                _ => false,
            }
    }
}

impl<T: Element> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("dtype", &T::DTYPE)
            .field("allocated", &self.is_allocated())
            .finish()
    }
}
