//! Error types for algokit

use crate::dtype::{DType, Precision};
use crate::runtime::{AlgorithmId, Method};
use crate::table::StorageLayout;
use std::fmt;
use thiserror::Error;

/// Result type alias using algokit's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Broad class of an [`Error`]
///
/// Configuration errors are raised when an algorithm object is built or its
/// parameter is checked, structural errors before any kernel runs, numeric
/// errors by the kernel itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unregistered kernel or invalid parameter value
    Configuration,
    /// Input/result shape, rank, layout or slot problems
    Structural,
    /// Result buffer allocation failure
    Allocation,
    /// Persisted byte stream does not decode into the requested object
    Deserialization,
    /// Ill-conditioned or non-convergent computation
    Numeric,
    /// Several independent errors collected in a [`Status`]
    Composite,
}

/// Errors that can occur in algokit operations
#[derive(Error, Debug)]
pub enum Error {
    /// No kernel registered for the requested (algorithm, precision, method)
    #[error("No kernel registered for {algorithm:?} with precision {precision} and method {method:?}")]
    UnregisteredKernel {
        /// Algorithm being constructed
        algorithm: AlgorithmId,
        /// Requested precision
        precision: Precision,
        /// Requested computation method
        method: Method,
    },

    /// Parameter value out of range or inconsistent
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter field name
        name: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Invalid runtime configuration value
    #[error("Invalid configuration '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key (environment variable or field)
        key: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Shape mismatch between a buffer and what the algorithm expects
    #[error("Shape mismatch for '{arg}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Input or result slot name
        arg: &'static str,
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Wrong number of dimensions
    #[error("Rank mismatch for '{arg}': expected {expected}D, got {got}D")]
    RankMismatch {
        /// Input or result slot name
        arg: &'static str,
        /// Expected rank
        expected: usize,
        /// Actual rank
        got: usize,
    },

    /// A required input slot was never set
    #[error("Missing required input '{slot}'")]
    MissingInput {
        /// Slot name
        slot: &'static str,
    },

    /// Backward pass lacks state that only the forward pass produces
    #[error("Missing auxiliary data '{slot}' for layer '{layer}': forward pass has not been computed")]
    MissingAuxiliaryData {
        /// Layer name
        layer: &'static str,
        /// Auxiliary slot name
        slot: &'static str,
    },

    /// Table layout not accepted by the computation method
    #[error("Layout {layout:?} of '{arg}' is not supported by method {method:?}")]
    UnsupportedLayout {
        /// Input slot name
        arg: &'static str,
        /// Actual layout
        layout: StorageLayout,
        /// Method that rejected it
        method: Method,
    },

    /// Output shape rule produced a non-positive or non-integral size
    #[error("Shape inference failed for '{dim}': {reason}")]
    ShapeInference {
        /// Dimension being inferred
        dim: &'static str,
        /// Description of the failure
        reason: String,
    },

    /// A declared buffer was used before storage was attached
    #[error("Buffer '{arg}' is declared but not allocated")]
    NotAllocated {
        /// Buffer name
        arg: &'static str,
    },

    /// Invalid argument that does not fit a more specific variant
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Index out of bounds
    #[error("Index {index} out of bounds for dimension of size {size}")]
    IndexOutOfBounds {
        /// The invalid index
        index: usize,
        /// Size of the dimension
        size: usize,
    },

    /// Element type mismatch
    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },

    /// Out of memory
    #[error("Out of memory: failed to allocate {size} elements")]
    OutOfMemory {
        /// Requested size in elements
        size: usize,
    },

    /// Malformed byte stream
    #[error("Deserialization failed: {reason}")]
    Deserialization {
        /// Description of the failure
        reason: String,
    },

    /// Byte stream encodes a different object type
    #[error("Type tag mismatch: expected {expected:#06x}, got {got:#06x}")]
    TypeTagMismatch {
        /// Tag of the requested type
        expected: u16,
        /// Tag found in the stream
        got: u16,
    },

    /// Byte stream written by an unsupported format version
    #[error("Unsupported format version {version} for type tag {type_tag:#06x}")]
    UnsupportedVersion {
        /// Tag of the encoded type
        type_tag: u16,
        /// Version found in the stream
        version: u16,
    },

    /// Decoded shapes disagree with the shapes the target declares
    #[error("Deserialized '{what}' has shape {got:?}, target declares {expected:?}")]
    DeserializationMismatch {
        /// Object or field name
        what: &'static str,
        /// Declared shape
        expected: Vec<usize>,
        /// Decoded shape
        got: Vec<usize>,
    },

    /// Iterative method did not converge
    #[error("{algorithm} did not converge after {iterations} iterations")]
    NonConvergence {
        /// Algorithm name
        algorithm: &'static str,
        /// Iterations performed
        iterations: usize,
    },

    /// Ill-conditioned input reported by a kernel
    #[error("Numeric error in {algorithm}: {reason}")]
    Numeric {
        /// Algorithm name
        algorithm: &'static str,
        /// Description of the failure
        reason: String,
    },

    /// Several errors collected by one validation pass
    #[error("{0}")]
    Composite(Status),
}

impl Error {
    /// Create a shape mismatch error
    pub fn shape_mismatch(arg: &'static str, expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            arg,
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }

    /// Create a generic deserialization error
    pub fn deserialization(reason: impl Into<String>) -> Self {
        Self::Deserialization {
            reason: reason.into(),
        }
    }

    /// Create a numeric error
    pub fn numeric(algorithm: &'static str, reason: impl Into<String>) -> Self {
        Self::Numeric {
            algorithm,
            reason: reason.into(),
        }
    }

    /// Taxonomy class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnregisteredKernel { .. }
            | Self::InvalidParameter { .. }
            | Self::InvalidConfig { .. } => ErrorKind::Configuration,
            Self::ShapeMismatch { .. }
            | Self::RankMismatch { .. }
            | Self::MissingInput { .. }
            | Self::MissingAuxiliaryData { .. }
            | Self::UnsupportedLayout { .. }
            | Self::ShapeInference { .. }
            | Self::NotAllocated { .. }
            | Self::InvalidArgument { .. }
            | Self::IndexOutOfBounds { .. }
            | Self::DTypeMismatch { .. } => ErrorKind::Structural,
            Self::OutOfMemory { .. } => ErrorKind::Allocation,
            Self::Deserialization { .. }
            | Self::TypeTagMismatch { .. }
            | Self::UnsupportedVersion { .. }
            | Self::DeserializationMismatch { .. } => ErrorKind::Deserialization,
            Self::NonConvergence { .. } | Self::Numeric { .. } => ErrorKind::Numeric,
            Self::Composite(_) => ErrorKind::Composite,
        }
    }
}

/// Composite status: zero or more structured error entries
///
/// Validation passes that can find several independent problems push every
/// problem here and convert to a single `Result` at the end.
#[derive(Debug, Default)]
pub struct Status {
    errors: Vec<Error>,
}

impl Status {
    /// Create an empty (successful) status
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error
    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Record the error of `result`, if any
    pub fn add<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    /// True when no error has been recorded
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Recorded errors in insertion order
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Number of recorded errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when no error has been recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into a `Result`: `Ok` when empty, the error itself when there
    /// is exactly one, `Error::Composite` otherwise.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Composite(self)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("ok");
        }
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        Self {
            errors: vec![error],
        }
    }
}
