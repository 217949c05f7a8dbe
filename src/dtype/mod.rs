//! Data type system for algokit buffers
//!
//! `DType` describes the element type of a table column or tensor at runtime,
//! `Precision` is the floating-point half of a kernel key.

mod element;

pub use element::{Element, FloatElement};

use std::fmt;

/// Runtime tag of a buffer's element type
///
/// The discriminants are written into archives and must stay fixed: floats
/// occupy 0-9, signed integers 10-19, unsigned integers 20-29.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum DType {
    /// 64-bit floating point
    F64 = 0,
    /// 32-bit floating point
    F32 = 1,
    /// 64-bit signed integer
    I64 = 10,
    /// 32-bit signed integer
    I32 = 11,
    /// 8-bit unsigned integer
    U8 = 23,
}

impl DType {
    /// Size of one element in bytes
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F64 | Self::I64 => 8,
            Self::F32 | Self::I32 => 4,
            Self::U8 => 1,
        }
    }

    /// Rust spelling of the element type
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::I64 => "i64",
            Self::I32 => "i32",
            Self::U8 => "u8",
        }
    }

    /// Stable discriminant used in persisted data
    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`DType::to_u8`]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::F64),
            1 => Some(Self::F32),
            10 => Some(Self::I64),
            11 => Some(Self::I32),
            23 => Some(Self::U8),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Floating-point precision a kernel is specialized for
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Precision {
    /// Single precision
    F32,
    /// Double precision
    F64,
}

impl Precision {
    /// Matching element dtype
    #[inline]
    pub const fn dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::F64 => DType::F64,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dtype().short_name())
    }
}
