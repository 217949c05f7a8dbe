//! Element traits tying Rust scalars to runtime dtypes and kernel precisions

use super::{DType, Precision};
use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Scalar stored in a table column or tensor
///
/// `Pod` lets archives copy whole buffers through bytemuck; `Send + Sync`
/// lets kernel tasks share them.
pub trait Element:
    Copy
    + Send
    + Sync
    + Debug
    + Pod
    + Zeroable
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + PartialOrd
{
    /// Runtime tag written into archives
    const DTYPE: DType;

    /// Widen for accumulation in double precision
    fn to_f64(self) -> f64;

    /// Narrow, truncating toward zero for integers
    fn from_f64(v: f64) -> Self;

    fn zero() -> Self;

    fn one() -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr, $zero:expr, $one:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $ty
            }

            #[inline]
            fn zero() -> Self {
                $zero
            }

            #[inline]
            fn one() -> Self {
                $one
            }
        }
    };
}

impl_element!(f64, DType::F64, 0.0, 1.0);
impl_element!(f32, DType::F32, 0.0, 1.0);
impl_element!(i64, DType::I64, 0, 1);
impl_element!(i32, DType::I32, 0, 1);
impl_element!(u8, DType::U8, 0, 1);

/// Floating-point element a kernel can be specialized for
///
/// Kernels are written once against this trait and monomorphized per
/// precision; the registry keys them by [`FloatElement::PRECISION`].
pub trait FloatElement: Element + Neg<Output = Self> + AddAssign + Sum {
    /// Kernel precision of this type
    const PRECISION: Precision;

    /// Machine epsilon as f64
    fn epsilon_val() -> f64;
    /// Largest finite value
    fn max_value() -> Self;
    /// Negative infinity
    fn neg_infinity() -> Self;
    /// Absolute value
    fn abs_val(self) -> Self;
    /// Square root
    fn sqrt_val(self) -> Self;
    /// Natural exponential
    fn exp_val(self) -> Self;
    /// Natural logarithm
    fn ln_val(self) -> Self;
    /// True unless NaN or infinite
    fn is_finite_val(self) -> bool;
}

macro_rules! impl_float_element {
    ($ty:ident, $precision:expr) => {
        impl FloatElement for $ty {
            const PRECISION: Precision = $precision;

            #[inline]
            fn epsilon_val() -> f64 {
                $ty::EPSILON as f64
            }
            #[inline]
            fn max_value() -> Self {
                $ty::MAX
            }
            #[inline]
            fn neg_infinity() -> Self {
                $ty::NEG_INFINITY
            }
            #[inline]
            fn abs_val(self) -> Self {
                self.abs()
            }
            #[inline]
            fn sqrt_val(self) -> Self {
                self.sqrt()
            }
            #[inline]
            fn exp_val(self) -> Self {
                self.exp()
            }
            #[inline]
            fn ln_val(self) -> Self {
                self.ln()
            }
            #[inline]
            fn is_finite_val(self) -> bool {
                self.is_finite()
            }
        }
    };
}

impl_float_element!(f32, Precision::F32);
impl_float_element!(f64, Precision::F64);
