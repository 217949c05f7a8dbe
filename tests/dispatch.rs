//! Kernel registry resolution and container construction

mod common;

use std::sync::Arc;

use algokit::algorithm::{Batch, Container};
use algokit::error::{Error, ErrorKind, Result};
use algokit::layers::{
    ForwardInput, ForwardResult, LayerKernel, SoftmaxAux, SoftmaxForward, SoftmaxParameter,
};
use algokit::pca::{Pca, PcaParameter};
use algokit::runtime::{
    AlgorithmId, KernelContext, KernelKey, KernelRegistry, Method, Runtime, SimdLevel,
};
use algokit::tensor::Tensor;
use common::runtime_at;
use proptest::prelude::*;

/// Writes the tier it was registered for into every output cell
fn tagging_kernel<const TIER: u8>(
    _ctx: &KernelContext,
    _input: &ForwardInput<f64>,
    _parameter: &SoftmaxParameter,
    result: &mut ForwardResult<f64, SoftmaxAux>,
) -> Result<()> {
    let value = result
        .value
        .as_mut()
        .ok_or(Error::NotAllocated { arg: "value" })?;
    value.as_mut_slice()?.fill(TIER as f64);
    Ok(())
}

type SoftmaxKernel =
    LayerKernel<ForwardInput<f64>, SoftmaxParameter, ForwardResult<f64, SoftmaxAux>>;

fn tagging_registry(levels: &[SimdLevel]) -> KernelRegistry {
    let mut registry = KernelRegistry::new();
    for &level in levels {
        let kernel: SoftmaxKernel = match level {
            SimdLevel::Scalar => tagging_kernel::<0>,
            SimdLevel::Neon => tagging_kernel::<1>,
            SimdLevel::NeonFp16 => tagging_kernel::<2>,
            SimdLevel::Avx2Fma => tagging_kernel::<3>,
            SimdLevel::Avx512 => tagging_kernel::<4>,
        };
        registry.register::<SoftmaxForward<f64>>(Method::DefaultDense, level, kernel);
    }
    registry
}

#[test]
fn test_resolves_highest_tier_not_above_host() {
    let registry = tagging_registry(&[SimdLevel::Scalar, SimdLevel::Avx2Fma]);
    let cases = [
        (SimdLevel::Scalar, SimdLevel::Scalar),
        (SimdLevel::Neon, SimdLevel::Scalar),
        (SimdLevel::Avx2Fma, SimdLevel::Avx2Fma),
        (SimdLevel::Avx512, SimdLevel::Avx2Fma),
    ];
    for (host, expected) in cases {
        let (level, _) = registry
            .resolve::<SoftmaxForward<f64>>(Method::DefaultDense, host)
            .unwrap();
        assert_eq!(level, expected, "host {host}");
    }
}

#[test]
fn test_custom_registry_kernel_runs_through_batch() {
    let registry = Arc::new(tagging_registry(&[SimdLevel::Scalar, SimdLevel::Avx2Fma]));
    let runtime = runtime_at(SimdLevel::Avx512).with_registry(registry);
    let mut batch = Batch::<SoftmaxForward<f64>>::new(
        &runtime,
        Method::DefaultDense,
        SoftmaxParameter::default(),
    )
    .unwrap();
    assert_eq!(batch.container().level(), SimdLevel::Avx2Fma);

    batch.set_input(ForwardInput::new(Tensor::full(&[2, 3], 0.0).unwrap()));
    let value = batch.compute().unwrap().value.as_ref().unwrap().to_vec().unwrap();
    assert_eq!(value, [3.0; 6]);
}

#[test]
fn test_lowest_tier_above_host_is_unregistered() {
    let registry = tagging_registry(&[SimdLevel::Avx2Fma]);
    let err = registry
        .resolve::<SoftmaxForward<f64>>(Method::DefaultDense, SimdLevel::Scalar)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_precision_is_part_of_the_key() {
    let registry = Arc::new(tagging_registry(&[SimdLevel::Scalar]));
    let runtime = Runtime::new().with_registry(registry);
    let err = Container::<SoftmaxForward<f32>>::new(&runtime, Method::DefaultDense).unwrap_err();
    match err {
        Error::UnregisteredKernel {
            algorithm, method, ..
        } => {
            assert_eq!(algorithm, AlgorithmId::SoftmaxForward);
            assert_eq!(method, Method::DefaultDense);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_unregistered_method_fails_at_construction() {
    let err = Batch::<Pca<f64>>::new(&Runtime::new(), Method::FastCsr, PcaParameter::default())
        .unwrap_err();
    assert!(
        matches!(err, Error::UnregisteredKernel { method: Method::FastCsr, .. }),
        "unexpected error {err:?}"
    );
}

#[test]
fn test_default_registry_covers_both_precisions() {
    let registry = KernelRegistry::with_default_kernels();
    for key in [
        KernelKey::of::<SoftmaxForward<f32>>(Method::DefaultDense),
        KernelKey::of::<SoftmaxForward<f64>>(Method::DefaultDense),
        KernelKey::of::<Pca<f32>>(Method::Correlation),
        KernelKey::of::<Pca<f64>>(Method::DefaultDense),
        KernelKey::of::<Pca<f32>>(Method::Svd),
    ] {
        assert!(registry.contains(&key), "{key} missing");
        assert_eq!(registry.tiers(&key)[0], SimdLevel::Scalar, "{key}");
    }
    assert!(!registry.contains(&KernelKey::of::<Pca<f64>>(Method::FastCsr)));
}

#[test]
fn test_registering_twice_replaces_kernel() {
    let mut registry = tagging_registry(&[SimdLevel::Scalar]);
    registry.register::<SoftmaxForward<f64>>(
        Method::DefaultDense,
        SimdLevel::Scalar,
        tagging_kernel::<9>,
    );
    assert_eq!(registry.len(), 1);
    let runtime = runtime_at(SimdLevel::Scalar).with_registry(Arc::new(registry));
    let mut batch = Batch::<SoftmaxForward<f64>>::new(
        &runtime,
        Method::DefaultDense,
        SoftmaxParameter::default(),
    )
    .unwrap();
    batch.set_input(ForwardInput::new(Tensor::full(&[1, 2], 0.0).unwrap()));
    let value = batch.compute().unwrap().value.as_ref().unwrap().to_vec().unwrap();
    assert_eq!(value, [9.0, 9.0]);
}

fn level_strategy() -> impl Strategy<Value = SimdLevel> {
    prop::sample::select(SimdLevel::ALL.to_vec())
}

proptest! {
    #[test]
    fn prop_resolution_rule(
        registered in prop::collection::btree_set(level_strategy(), 0..=5),
        host in level_strategy(),
    ) {
        let levels: Vec<SimdLevel> = registered.iter().copied().collect();
        let registry = tagging_registry(&levels);
        let expected = levels.iter().copied().filter(|&l| l <= host).max();
        let got = registry
            .resolve::<SoftmaxForward<f64>>(Method::DefaultDense, host)
            .ok()
            .map(|(level, _)| level);
        prop_assert_eq!(got, expected);
    }
}
