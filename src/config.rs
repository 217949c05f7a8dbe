//! Runtime configuration
//!
//! Environment variables:
//!
//! | Variable                   | Meaning                                         |
//! |----------------------------|-------------------------------------------------|
//! | `ALGOKIT_SIMD_LEVEL`       | force a tier: `scalar|neon|neon-fp16|avx2|avx512` |
//! | `ALGOKIT_NUM_THREADS`      | dedicated worker pool size                      |
//! | `ALGOKIT_PARALLEL_MIN_LEN` | minimum work items per parallel task            |

use crate::error::{Error, Result};
use crate::runtime::SimdLevel;

/// Environment variable forcing the SIMD tier
pub const SIMD_LEVEL_ENV: &str = "ALGOKIT_SIMD_LEVEL";
/// Environment variable setting the worker count
pub const NUM_THREADS_ENV: &str = "ALGOKIT_NUM_THREADS";
/// Environment variable setting the parallel task granularity
pub const PARALLEL_MIN_LEN_ENV: &str = "ALGOKIT_PARALLEL_MIN_LEN";

/// Settings a [`Runtime`](crate::runtime::Runtime) is built from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Tier used for kernel resolution instead of the detected one
    pub simd_level: Option<SimdLevel>,
    /// Worker count of a dedicated pool; `None` uses the global pool
    pub num_threads: Option<usize>,
    /// Minimum work items per parallel task
    pub parallel_min_len: Option<usize>,
}

impl RuntimeConfig {
    /// Defaults: detected tier, global pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the SIMD tier
    pub fn with_simd_level(mut self, level: SimdLevel) -> Self {
        self.simd_level = Some(level);
        self
    }

    /// Use a dedicated pool of `n` workers
    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Set the minimum work items per parallel task
    pub fn with_parallel_min_len(mut self, n: usize) -> Self {
        self.parallel_min_len = Some(n);
        self
    }

    /// Read the `ALGOKIT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, config file, tests)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let simd_level = lookup(SIMD_LEVEL_ENV)
            .map(|v| v.parse::<SimdLevel>())
            .transpose()?;
        let num_threads = parse_count(&lookup, NUM_THREADS_ENV, "num_threads")?;
        let parallel_min_len = parse_count(&lookup, PARALLEL_MIN_LEN_ENV, "parallel_min_len")?;
        Ok(Self {
            simd_level,
            num_threads,
            parallel_min_len,
        })
    }
}

fn parse_count(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    key: &'static str,
) -> Result<Option<usize>> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(Error::InvalidConfig {
            key,
            reason: format!("{var}='{raw}' is not a positive integer"),
        }),
        Ok(n) => Ok(Some(n)),
    }
}
