//! Tensor types
//!
//! This module provides the `Tensor` type, an n-dimensional row-major buffer
//! with reference-counted storage, used by the layer algorithms.

mod core;
mod layout;
mod shape;
mod storage;

pub use core::Tensor;
pub use layout::{Layout, Strides};
pub use shape::Shape;
pub use storage::Storage;
