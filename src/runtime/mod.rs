//! Kernel dispatch runtime
//!
//! This module defines the [`Runtime`] that containers resolve kernels from.
//!
//! # Architecture
//!
//! ```text
//! Runtime
//! ├── KernelRegistry     (KernelKey -> tier-tagged kernels, built once)
//! ├── SimdLevel          (detected host tier, or a forced one)
//! └── ParallelismConfig  (worker pool for kernel-internal loops)
//! ```
//!
//! A container asks the runtime for a kernel once, at construction, and keeps
//! the resolved function pointer; the numeric hot path never goes through
//! dynamic dispatch.

mod parallel;
mod registry;
mod simd;

pub use parallel::{DEFAULT_MIN_LEN, ParallelismConfig};
pub use registry::{AlgorithmId, KernelKey, KernelRegistry, Method};
pub use simd::{SimdLevel, detect_simd, host_supports, run_at};

use crate::algorithm::Algorithm;
use crate::config::RuntimeConfig;
use crate::error::Result;
use std::sync::{Arc, OnceLock};

fn default_registry() -> Arc<KernelRegistry> {
    static REGISTRY: OnceLock<Arc<KernelRegistry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Arc::new(KernelRegistry::with_default_kernels()))
        .clone()
}

/// Registry, host tier and parallelism shared by containers
#[derive(Clone, Debug)]
pub struct Runtime {
    registry: Arc<KernelRegistry>,
    level: SimdLevel,
    forced: bool,
    parallelism: ParallelismConfig,
}

impl Runtime {
    /// Default kernels, detected tier, global worker pool
    pub fn new() -> Self {
        Self {
            registry: default_registry(),
            level: detect_simd(),
            forced: false,
            parallelism: ParallelismConfig::default(),
        }
    }

    /// Build from explicit settings
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let mut runtime = Self::new().with_parallelism(ParallelismConfig::new(
            config.num_threads,
            config.parallel_min_len,
        )?);
        if let Some(level) = config.simd_level {
            runtime = runtime.with_simd_level(level);
        }
        Ok(runtime)
    }

    /// Build from the `ALGOKIT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(&RuntimeConfig::from_env()?)
    }

    /// Process-wide runtime built from the environment on first use
    ///
    /// Invalid environment settings are logged and ignored.
    pub fn global() -> &'static Runtime {
        static GLOBAL: OnceLock<Runtime> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            Self::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring invalid runtime environment");
                Self::new()
            })
        })
    }

    /// Replace the kernel registry
    pub fn with_registry(mut self, registry: Arc<KernelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Resolve kernels as if the host were at `level`
    ///
    /// Kernels of tiers the real CPU lacks still execute their baseline body.
    pub fn with_simd_level(mut self, level: SimdLevel) -> Self {
        if level > detect_simd() {
            tracing::debug!(forced = %level, host = %detect_simd(), "forcing SIMD level above host");
        }
        self.level = level;
        self.forced = true;
        self
    }

    /// Replace the parallelism settings
    pub fn with_parallelism(mut self, parallelism: ParallelismConfig) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Tier used for kernel resolution
    #[inline]
    pub fn simd_level(&self) -> SimdLevel {
        self.level
    }

    /// True when the tier was forced rather than detected
    #[inline]
    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// Kernel registry
    #[inline]
    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    /// Parallelism settings
    #[inline]
    pub fn parallelism(&self) -> &ParallelismConfig {
        &self.parallelism
    }

    /// Resolve the kernel of `A` with `method` for this runtime's tier
    pub fn resolve<A: Algorithm>(&self, method: Method) -> Result<(KernelContext, A::Kernel)> {
        let (level, kernel) = self.registry.resolve::<A>(method, self.level)?;
        let ctx = KernelContext {
            level,
            parallelism: self.parallelism.clone(),
        };
        Ok((ctx, kernel))
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution settings handed to every kernel call
#[derive(Clone, Debug)]
pub struct KernelContext {
    level: SimdLevel,
    parallelism: ParallelismConfig,
}

impl KernelContext {
    /// Context for direct kernel calls outside a container
    pub fn new(level: SimdLevel, parallelism: ParallelismConfig) -> Self {
        Self { level, parallelism }
    }

    /// Tier of the resolved kernel
    #[inline]
    pub fn level(&self) -> SimdLevel {
        self.level
    }

    /// Parallelism settings
    #[inline]
    pub fn parallelism(&self) -> &ParallelismConfig {
        &self.parallelism
    }
}

impl Default for KernelContext {
    fn default() -> Self {
        Self::new(SimdLevel::Scalar, ParallelismConfig::default())
    }
}
