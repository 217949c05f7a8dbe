use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use algokit::layers::{
    Layer, LocallyConnected2d, LocallyConnected2dParameter, Softmax, SoftmaxParameter,
};
use algokit::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rand_vec_f32(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| ((i * 17 + 3) % 1000) as f32 / 1000.0 - 0.5)
        .collect()
}

fn rand_tensor(shape: &[usize]) -> Tensor<f32> {
    let n = shape.iter().product();
    Tensor::from_vec(rand_vec_f32(n), shape).unwrap()
}

// ---------------------------------------------------------------------------
// softmax forward, one runtime per tier
// ---------------------------------------------------------------------------

fn softmax_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("softmax_forward_f32");
    for level in [SimdLevel::Scalar, SimdLevel::Avx2Fma, SimdLevel::Avx512] {
        if level > algokit::runtime::detect_simd() {
            continue;
        }
        let runtime = Runtime::new().with_simd_level(level);
        for cols in [64usize, 1000, 4096] {
            let mut layer =
                Layer::<Softmax<f32>>::with_parameter(&runtime, SoftmaxParameter::default())
                    .unwrap();
            layer.set_input(rand_tensor(&[256, cols]));
            group.bench_with_input(
                BenchmarkId::new(level.to_string(), cols),
                &cols,
                |b, _| b.iter(|| black_box(layer.forward().unwrap().value.is_some())),
            );
        }
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// locally connected 2-D forward and backward
// ---------------------------------------------------------------------------

fn lc2d_parameter() -> LocallyConnected2dParameter {
    LocallyConnected2dParameter {
        kernel_sizes: [3, 3],
        strides: [1, 1],
        n_kernels: 8,
        propagate_gradient: true,
        ..Default::default()
    }
}

fn lc2d(c: &mut Criterion) {
    let runtime = Runtime::new();
    let mut group = c.benchmark_group("lc2d_f32");
    for hw in [16usize, 32] {
        let shape = [8, 4, hw, hw];
        let mut layer =
            Layer::<LocallyConnected2d<f32>>::with_parameter(&runtime, lc2d_parameter()).unwrap();
        layer.set_input(rand_tensor(&shape));
        layer.forward().unwrap();

        group.bench_with_input(BenchmarkId::new("forward", hw), &hw, |b, _| {
            b.iter(|| black_box(layer.forward().unwrap().value.is_some()))
        });

        let gradient = rand_tensor(&[8, 8, hw - 2, hw - 2]);
        group.bench_with_input(BenchmarkId::new("backward", hw), &hw, |b, _| {
            b.iter(|| {
                layer.forward().unwrap();
                layer.set_input_gradient(gradient.clone());
                black_box(layer.backward().unwrap().gradient.is_some())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, softmax_forward, lc2d);
criterion_main!(benches);
