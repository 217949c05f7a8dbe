//! Fixtures shared by the integration tests
#![allow(dead_code)]

use algokit::config::RuntimeConfig;
use algokit::runtime::{ParallelismConfig, Runtime, SimdLevel};
use algokit::table::NumericTable;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Runtime with every kernel and the detected tier
pub fn default_runtime() -> Runtime {
    Runtime::new()
}

/// Runtime resolving kernels as if the host were `level`
pub fn runtime_at(level: SimdLevel) -> Runtime {
    Runtime::from_config(&RuntimeConfig::new().with_simd_level(level))
        .expect("valid runtime config")
}

/// Runtime running every kernel loop on the calling thread
pub fn serial_runtime() -> Runtime {
    Runtime::new().with_parallelism(ParallelismConfig::serial())
}

/// Elementwise `|a - b| <= atol + rtol * |b|`
pub fn assert_allclose_f64(a: &[f64], b: &[f64], rtol: f64, atol: f64, msg: &str) {
    assert_eq!(a.len(), b.len(), "{msg}: {} values vs {}", a.len(), b.len());
    let worst = a
        .iter()
        .zip(b)
        .enumerate()
        .map(|(i, (&x, &y))| (i, x, y, (x - y).abs() - (atol + rtol * y.abs())))
        .find(|&(.., excess)| !(excess <= 0.0));
    if let Some((i, x, y, excess)) = worst {
        panic!("{msg}: index {i} has {x} where {y} was expected ({excess:e} over tolerance)");
    }
}

/// [`assert_allclose_f64`] for single precision buffers
pub fn assert_allclose_f32(a: &[f32], b: &[f32], rtol: f32, atol: f32, msg: &str) {
    let widen = |v: &[f32]| v.iter().map(|&x| f64::from(x)).collect::<Vec<_>>();
    assert_allclose_f64(&widen(a), &widen(b), f64::from(rtol), f64::from(atol), msg);
}

/// Row-major buffer of uniform values in `[lo, hi)`
pub fn uniform_f64(seed: u64, len: usize, lo: f64, hi: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(lo..hi)).collect()
}

/// Dense table of every row of `table`
pub fn dense_values(table: &NumericTable<f64>) -> Vec<f64> {
    table
        .to_row_major()
        .expect("row-major copy")
        .as_row_major()
        .expect("dense table")
        .to_vec()
}

/// Two-class word-count corpus: class 0 favours the first half of the
/// vocabulary, class 1 the second half
pub fn word_counts(seed: u64, n: usize, p: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(n * p);
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let class = i % 2;
        for j in 0..p {
            let favoured = (j < p / 2) == (class == 0);
            let hi = if favoured { 6 } else { 2 };
            data.push(rng.random_range(0..hi) as f64);
        }
        labels.push(class as f64);
    }
    (data, labels)
}
