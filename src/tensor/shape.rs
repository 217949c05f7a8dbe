//! Dimension vector of a tensor

use crate::error::{Error, Result};
use smallvec::SmallVec;
use std::fmt;
use std::ops::Deref;

/// Dimensions kept inline before spilling to the heap
///
/// Locally connected weights are the highest-rank tensors (6).
pub(crate) const STACK_DIMS: usize = 6;

/// Tensor dimensions, fixed once the tensor exists
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(SmallVec<[usize; STACK_DIMS]>);

impl Shape {
    /// Rank-0 shape
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    /// Dimensions as a slice
    pub fn as_slice(&self) -> &[usize] {
        self.0.as_slice()
    }

    /// Rank
    #[inline]
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Product of the dimensions, saturating at `usize::MAX`
    #[inline]
    pub fn numel(&self) -> usize {
        self.0.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
    }

    /// Product of the dimensions; `OutOfMemory` when it overflows
    pub fn checked_numel(&self) -> Result<usize> {
        self.0
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or(Error::OutOfMemory { size: usize::MAX })
    }
}

impl Deref for Shape {
    type Target = [usize];

    fn deref(&self) -> &[usize] {
        self.0.as_slice()
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl From<&[usize]> for Shape {
    fn from(value: &[usize]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(value: [usize; N]) -> Self {
        Self(value.into_iter().collect())
    }
}

impl FromIterator<usize> for Shape {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> PartialEq<[usize; N]> for Shape {
    fn eq(&self, other: &[usize; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numel() {
        let shape = Shape::from([2, 3, 4]);
        assert_eq!(shape.numel(), 24);
        assert_eq!(shape.ndim(), 3);
        assert_eq!(Shape::new().numel(), 1);
    }

    #[test]
    fn test_checked_numel_overflow() {
        let shape = Shape::from([usize::MAX, 2]);
        assert!(matches!(
            shape.checked_numel(),
            Err(Error::OutOfMemory { .. })
        ));
        assert_eq!(shape.numel(), usize::MAX);
    }

    #[test]
    fn test_collects_and_compares() {
        let shape: Shape = (1..=3).collect();
        assert_eq!(shape, [1, 2, 3]);
        assert_eq!(format!("{shape:?}"), "[1, 2, 3]");
    }
}
