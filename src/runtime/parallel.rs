//! Kernel-internal parallel loops
//!
//! Kernels split their output into disjoint chunks and hand them to
//! [`ParallelismConfig::for_each_chunk`]. With the `rayon` feature the chunks
//! run on a work-stealing pool and the call returns only after every chunk
//! completed; without it the same closure runs serially in chunk order.

use crate::error::{Error, Result};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "rayon")]
use std::sync::Arc;

/// Default minimum number of work items per parallel task
pub const DEFAULT_MIN_LEN: usize = 4;

/// Thread count and task granularity for kernel-internal parallelism
#[derive(Clone, Default)]
pub struct ParallelismConfig {
    num_threads: Option<usize>,
    min_len: Option<usize>,
    #[cfg(feature = "rayon")]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl ParallelismConfig {
    /// Create a config
    ///
    /// `num_threads: None` uses the global rayon pool; `Some(n)` builds a
    /// dedicated pool of `n` workers. `min_len` is the smallest number of
    /// work items handed to one task.
    pub fn new(num_threads: Option<usize>, min_len: Option<usize>) -> Result<Self> {
        if num_threads == Some(0) {
            return Err(Error::InvalidConfig {
                key: "num_threads",
                reason: "must be at least 1".into(),
            });
        }
        if min_len == Some(0) {
            return Err(Error::InvalidConfig {
                key: "parallel_min_len",
                reason: "must be at least 1".into(),
            });
        }

        #[cfg(feature = "rayon")]
        let pool = match num_threads {
            Some(n) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("algokit-worker-{i}"))
                    .build()
                    .map_err(|e| Error::InvalidConfig {
                        key: "num_threads",
                        reason: e.to_string(),
                    })?,
            )),
            None => None,
        };

        Ok(Self {
            num_threads,
            min_len,
            #[cfg(feature = "rayon")]
            pool,
        })
    }

    /// Single-threaded execution
    pub fn serial() -> Self {
        Self {
            num_threads: Some(1),
            min_len: None,
            #[cfg(feature = "rayon")]
            pool: None,
        }
    }

    /// Configured worker count, if any
    pub fn num_threads(&self) -> Option<usize> {
        self.num_threads
    }

    /// Minimum number of work items per task
    pub fn min_len(&self) -> usize {
        self.min_len.unwrap_or(DEFAULT_MIN_LEN)
    }

    #[cfg_attr(not(feature = "rayon"), allow(dead_code))]
    fn is_serial(&self) -> bool {
        self.num_threads == Some(1)
    }

    /// Run `f` inside the configured pool
    #[cfg(feature = "rayon")]
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Call `f(index, chunk)` for every `chunk_len`-sized chunk of `out`
    ///
    /// Chunks are disjoint; `index` is the chunk number. Returns after every
    /// chunk has been processed.
    pub fn for_each_chunk<T, F>(&self, out: &mut [T], chunk_len: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Send + Sync,
    {
        if chunk_len == 0 || out.is_empty() {
            return;
        }

        #[cfg(feature = "rayon")]
        {
            let n_chunks = out.len().div_ceil(chunk_len);
            if !self.is_serial() && n_chunks > 1 {
                let min_len = self.min_len();
                self.install(|| {
                    out.par_chunks_mut(chunk_len)
                        .enumerate()
                        .with_min_len(min_len)
                        .for_each(|(i, chunk)| f(i, chunk));
                });
                return;
            }
        }

        for (i, chunk) in out.chunks_mut(chunk_len).enumerate() {
            f(i, chunk);
        }
    }

    /// Map `0..n` through `f` and collect the results in index order
    pub fn map_collect<R, F>(&self, n: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Send + Sync,
    {
        #[cfg(feature = "rayon")]
        {
            if !self.is_serial() && n > 1 {
                let min_len = self.min_len();
                return self.install(|| {
                    (0..n)
                        .into_par_iter()
                        .with_min_len(min_len)
                        .map(&f)
                        .collect()
                });
            }
        }

        (0..n).map(f).collect()
    }
}

impl std::fmt::Debug for ParallelismConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelismConfig")
            .field("num_threads", &self.num_threads)
            .field("min_len", &self.min_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero() {
        assert!(ParallelismConfig::new(Some(0), None).is_err());
        assert!(ParallelismConfig::new(None, Some(0)).is_err());
    }

    #[test]
    fn test_for_each_chunk_matches_serial() {
        let fill = |cfg: &ParallelismConfig| {
            let mut out = vec![0usize; 103];
            cfg.for_each_chunk(&mut out, 10, |i, chunk| {
                for (k, v) in chunk.iter_mut().enumerate() {
                    *v = i * 10 + k;
                }
            });
            out
        };
        let expected: Vec<usize> = (0..103).collect();
        assert_eq!(fill(&ParallelismConfig::serial()), expected);
        assert_eq!(fill(&ParallelismConfig::new(Some(3), Some(1)).unwrap()), expected);
        assert_eq!(fill(&ParallelismConfig::default()), expected);
    }

    #[test]
    fn test_map_collect_preserves_order() {
        let cfg = ParallelismConfig::new(Some(2), Some(1)).unwrap();
        assert_eq!(cfg.map_collect(5, |i| i * i), vec![0, 1, 4, 9, 16]);
    }
}
