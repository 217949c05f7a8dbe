//! Shared element buffer behind a tensor

use crate::dtype::Element;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Reference-counted element buffer
///
/// Clones alias the same allocation. Inputs keep aliases of caller buffers
/// and never write through them; writers call [`Storage::make_mut`], which
/// detaches a private copy while other aliases are alive. Result buffers
/// have a single owner, so kernels fill them without copying.
pub struct Storage<T: Element> {
    data: Arc<Vec<T>>,
}

impl<T: Element> Storage<T> {
    /// `len` zeroed elements, `OutOfMemory` when the reservation fails
    pub fn zeroed(len: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory {
                size: len.saturating_mul(T::DTYPE.size_in_bytes()),
            })?;
        data.resize(len, T::zeroed());
        Ok(Self::from_vec(data))
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Writable elements; detaches from other aliases first
    #[inline]
    pub fn make_mut(&mut self) -> &mut [T] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Number of live aliases
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl<T: Element> Clone for Storage<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Element> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Storage<{}>(len={}, aliases={})",
            T::DTYPE,
            self.len(),
            self.ref_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed() {
        let storage = Storage::<f32>::zeroed(8).unwrap();
        assert_eq!(storage.len(), 8);
        assert!(storage.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_writer_detaches_from_aliases() {
        let mut a = Storage::from_vec(vec![1.0f64, 2.0]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(b.ref_count(), 2);

        a.make_mut()[0] = 5.0;
        assert_eq!(a.as_slice(), &[5.0, 2.0]);
        assert_eq!(b.as_slice(), &[1.0, 2.0]);
        assert_eq!(a.ref_count(), 1);
    }

    #[test]
    fn test_refused_allocation_is_reported() {
        let err = Storage::<f64>::zeroed(usize::MAX / 4).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
    }
}
