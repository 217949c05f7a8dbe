//! # algokit
//!
//! **Numerical building blocks for machine-learning pipelines, with kernels
//! chosen at run time for the host CPU.**
//!
//! Every computation is an *algorithm object* that keeps three concerns
//! apart:
//!
//! - **What** is computed: typed input, parameter and result slots
//! - **How** it is computed: a kernel resolved from the
//!   [`KernelRegistry`](runtime::KernelRegistry) for the best SIMD tier the
//!   host supports (scalar, NEON, AVX2, AVX-512)
//! - **When** it runs: [`Batch`](algorithm::Batch),
//!   [`Online`](algorithm::Online) or the two distributed steps
//!
//! ## Contents
//!
//! - **Buffers**: [`Tensor`](tensor::Tensor) and
//!   [`NumericTable`](table::NumericTable) (dense row/column-major or CSR)
//! - **Layers**: locally connected 2-D, PReLU, softmax, each with a forward
//!   and a backward pass
//! - **Algorithms**: multinomial naive Bayes, PCA (correlation and SVD methods),
//!   gradient boosted regression trees
//! - **Serialization**: versioned binary archives of models and partial
//!   results
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use algokit::prelude::*;
//! use algokit::naive_bayes::{NaiveBayesParameter, NaiveBayesTraining, TrainingInput};
//!
//! let mut training = Batch::<NaiveBayesTraining<f64>>::with_parameter(NaiveBayesParameter::new(2))?;
//! training.set_input(TrainingInput::new(data, labels));
//! let model = training.compute()?.model.clone();
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): kernel-internal parallel loops

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod algorithm;
pub mod config;
pub mod dtype;
pub mod error;
pub mod gbt;
pub mod layers;
pub mod naive_bayes;
pub mod pca;
pub mod runtime;
pub mod serialization;
pub mod table;
pub mod tensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::algorithm::{
        Algorithm, Batch, DistributedStep1Local, DistributedStep2Master, Online, Partial,
        SlotMapped, Training,
    };
    pub use crate::config::RuntimeConfig;
    pub use crate::dtype::{DType, Element, FloatElement, Precision};
    pub use crate::error::{Error, ErrorKind, Result, Status};
    pub use crate::runtime::{KernelRegistry, Method, Runtime, SimdLevel};
    pub use crate::serialization::{Serializable, deserialize, deserialize_into, serialize};
    pub use crate::table::{CsrData, NumericTable, StorageLayout};
    pub use crate::tensor::Tensor;
}
