//! Kernel registry
//!
//! An explicit, deterministic map from (algorithm, precision, method) to the
//! tier-tagged kernels available for it. The registry is built once, usually
//! through [`KernelRegistry::with_default_kernels`], and shared behind an
//! `Arc` by every container of a [`Runtime`](super::Runtime).

use super::simd::SimdLevel;
use crate::algorithm::Algorithm;
use crate::dtype::{FloatElement, Precision};
use crate::error::{Error, Result};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Every algorithm object hosted by the crate
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlgorithmId {
    /// Locally connected 2-D layer, forward pass
    LocallyConnected2dForward,
    /// Locally connected 2-D layer, backward pass
    LocallyConnected2dBackward,
    /// Parametric ReLU, forward pass
    PreluForward,
    /// Parametric ReLU, backward pass
    PreluBackward,
    /// Softmax layer, forward pass
    SoftmaxForward,
    /// Softmax layer, backward pass
    SoftmaxBackward,
    /// Multinomial naive Bayes training
    NaiveBayesTraining,
    /// Multinomial naive Bayes prediction
    NaiveBayesPrediction,
    /// Principal component analysis
    Pca,
    /// Gradient boosted trees regression training
    GbtRegressionTraining,
    /// Gradient boosted trees regression prediction
    GbtRegressionPrediction,
}

impl AlgorithmId {
    /// Stable name used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Self::LocallyConnected2dForward => "locally_connected2d_forward",
            Self::LocallyConnected2dBackward => "locally_connected2d_backward",
            Self::PreluForward => "prelu_forward",
            Self::PreluBackward => "prelu_backward",
            Self::SoftmaxForward => "softmax_forward",
            Self::SoftmaxBackward => "softmax_backward",
            Self::NaiveBayesTraining => "naive_bayes_training",
            Self::NaiveBayesPrediction => "naive_bayes_prediction",
            Self::Pca => "pca",
            Self::GbtRegressionTraining => "gbt_regression_training",
            Self::GbtRegressionPrediction => "gbt_regression_prediction",
        }
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Computation method of an algorithm
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Method {
    /// Default method over dense data
    #[default]
    DefaultDense,
    /// Method specialized for CSR input
    FastCsr,
    /// PCA through the correlation matrix
    Correlation,
    /// PCA through singular value decomposition
    Svd,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DefaultDense => "defaultDense",
            Self::FastCsr => "fastCSR",
            Self::Correlation => "correlationDense",
            Self::Svd => "svdDense",
        };
        f.write_str(name)
    }
}

/// Lookup key of a kernel family
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelKey {
    /// Algorithm object
    pub algorithm: AlgorithmId,
    /// Floating-point precision
    pub precision: Precision,
    /// Computation method
    pub method: Method,
}

impl KernelKey {
    /// Key of algorithm `A` with `method`
    pub fn of<A: Algorithm>(method: Method) -> Self {
        Self {
            algorithm: A::ID,
            precision: <A::T as FloatElement>::PRECISION,
            method,
        }
    }
}

impl fmt::Display for KernelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}, {}>", self.algorithm, self.precision, self.method)
    }
}

type KernelBox = Arc<dyn Any + Send + Sync>;

/// Registry of tier-tagged kernels
///
/// # Resolution rule
///
/// `resolve` returns the kernel of the highest registered tier that does
/// not exceed the host tier. Keys without any registered tier, or whose
/// lowest tier is above the host, are configuration errors.
#[derive(Default)]
pub struct KernelRegistry {
    entries: BTreeMap<KernelKey, BTreeMap<SimdLevel, KernelBox>>,
}

impl KernelRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with every kernel shipped by the crate
    pub fn with_default_kernels() -> Self {
        let mut registry = Self::new();
        crate::layers::register_kernels(&mut registry);
        crate::naive_bayes::register_kernels(&mut registry);
        crate::pca::register_kernels(&mut registry);
        crate::gbt::register_kernels(&mut registry);
        tracing::debug!(
            families = registry.entries.len(),
            "built default kernel registry"
        );
        registry
    }

    /// Register `kernel` as the `level` specialization of `A` with `method`
    ///
    /// Registering the same (key, level) twice replaces the earlier kernel.
    pub fn register<A: Algorithm>(&mut self, method: Method, level: SimdLevel, kernel: A::Kernel) {
        self.entries
            .entry(KernelKey::of::<A>(method))
            .or_default()
            .insert(level, Arc::new(kernel));
    }

    /// Resolve the best kernel of `A` with `method` for a host at `host`
    ///
    /// Returns the kernel together with the tier it was registered for.
    pub fn resolve<A: Algorithm>(
        &self,
        method: Method,
        host: SimdLevel,
    ) -> Result<(SimdLevel, A::Kernel)> {
        let key = KernelKey::of::<A>(method);
        let unregistered = || Error::UnregisteredKernel {
            algorithm: key.algorithm,
            precision: key.precision,
            method: key.method,
        };
        let tiers = self.entries.get(&key).ok_or_else(unregistered)?;
        let (&level, kernel) = tiers
            .range(..=host)
            .next_back()
            .ok_or_else(unregistered)?;
        let kernel = kernel
            .downcast_ref::<A::Kernel>()
            .copied()
            .ok_or_else(unregistered)?;
        Ok((level, kernel))
    }

    /// Registered keys in deterministic order
    pub fn keys(&self) -> impl Iterator<Item = &KernelKey> {
        self.entries.keys()
    }

    /// Registered tiers of `key`, lowest first
    pub fn tiers(&self, key: &KernelKey) -> Vec<SimdLevel> {
        self.entries
            .get(key)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    /// True when `key` has at least one registered tier
    pub fn contains(&self, key: &KernelKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of registered kernel families
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, tiers) in &self.entries {
            map.entry(
                &format_args!("{key}"),
                &tiers.keys().collect::<Vec<_>>(),
            );
        }
        map.finish()
    }
}
