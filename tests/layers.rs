//! Forward/backward protocol of the layer primitives

mod common;

use algokit::algorithm::Batch;
use algokit::error::{Error, ErrorKind};
use algokit::layers::{
    ForwardInput, Layer, LayerState, LocallyConnected2d, LocallyConnected2dAux,
    LocallyConnected2dParameter, Prelu, PreluParameter, Softmax, SoftmaxForward,
    SoftmaxParameter,
};
use algokit::runtime::{Method, SimdLevel};
use algokit::tensor::Tensor;
use common::{assert_allclose_f64, default_runtime, runtime_at, uniform_f64};

fn lc2d_parameter(propagate_gradient: bool) -> LocallyConnected2dParameter {
    LocallyConnected2dParameter {
        kernel_sizes: [3, 3],
        strides: [1, 1],
        paddings: [0, 0],
        n_kernels: 4,
        n_groups: 1,
        propagate_gradient,
        ..Default::default()
    }
}

// ============================================================================
// Locally connected 2-D
// ============================================================================

#[test]
fn test_lc2d_kernel3_stride1_shapes() {
    let (n, c, h, w) = (2, 2, 6, 5);
    let runtime = default_runtime();
    let mut layer =
        Layer::<LocallyConnected2d<f64>>::with_parameter(&runtime, lc2d_parameter(true)).unwrap();
    let x = Tensor::from_vec(uniform_f64(1, n * c * h * w, -1.0, 1.0), &[n, c, h, w]).unwrap();
    layer.set_input(x);

    let forward = layer.forward().unwrap();
    let value = forward.value.as_ref().unwrap();
    assert_eq!(value.shape(), &[n, 4, h - 2, w - 2]);
    let weights_shape = forward
        .layer_data
        .require(LocallyConnected2dAux::Weights)
        .unwrap()
        .shape()
        .to_vec();
    assert_eq!(weights_shape, [h - 2, w - 2, 4, c, 3, 3]);
    assert_eq!(layer.state(), LayerState::ForwardComputed);

    layer.set_input_gradient(Tensor::full(&[n, 4, h - 2, w - 2], 1.0).unwrap());
    assert_eq!(layer.state(), LayerState::BackwardReady);
    let backward = layer.backward().unwrap();
    assert_eq!(backward.gradient.as_ref().unwrap().shape(), &[n, c, h, w]);
    assert_eq!(
        backward.weight_derivatives.as_ref().unwrap().shape(),
        weights_shape.as_slice()
    );
    assert_eq!(
        backward.bias_derivatives.as_ref().unwrap().shape(),
        &[4, h - 2, w - 2]
    );
    assert_eq!(layer.state(), LayerState::BackwardComputed);
}

#[test]
fn test_lc2d_propagate_flag_controls_gradient() {
    let runtime = default_runtime();
    for propagate in [false, true] {
        let mut layer =
            Layer::<LocallyConnected2d<f32>>::with_parameter(&runtime, lc2d_parameter(propagate))
                .unwrap();
        layer.set_input(Tensor::full(&[1, 1, 4, 4], 0.5f32).unwrap());
        layer.forward().unwrap();
        layer.set_input_gradient(Tensor::full(&[1, 4, 2, 2], 1.0f32).unwrap());
        let backward = layer.backward().unwrap();
        assert_eq!(backward.gradient.is_some(), propagate);
        assert!(backward.weight_derivatives.is_some());
    }
}

#[test]
fn test_backward_before_forward_is_missing_aux_data() {
    let runtime = default_runtime();
    let mut layer =
        Layer::<LocallyConnected2d<f64>>::with_parameter(&runtime, lc2d_parameter(true)).unwrap();
    layer.set_input_gradient(Tensor::full(&[1, 4, 2, 2], 1.0).unwrap());
    let err = layer.backward().unwrap_err();
    assert!(
        matches!(err, Error::MissingAuxiliaryData { .. }),
        "unexpected error {err:?}"
    );
    assert_eq!(layer.state(), LayerState::ForwardReady);
}

#[test]
fn test_lc2d_rejects_non_positive_output() {
    let runtime = default_runtime();
    let parameter = LocallyConnected2dParameter {
        kernel_sizes: [7, 7],
        strides: [1, 1],
        ..Default::default()
    };
    let mut layer = Layer::<LocallyConnected2d<f64>>::with_parameter(&runtime, parameter).unwrap();
    layer.set_input(Tensor::new(&[1, 1, 6, 6]).unwrap());
    let err = layer.forward().unwrap_err();
    assert!(matches!(err, Error::ShapeInference { .. }), "unexpected error {err:?}");
}

#[test]
fn test_lc2d_reuses_initialized_weights() {
    let runtime = default_runtime();
    let mut layer =
        Layer::<LocallyConnected2d<f64>>::with_parameter(&runtime, lc2d_parameter(false)).unwrap();
    layer.set_input(Tensor::full(&[1, 1, 3, 3], 1.0).unwrap());
    let first = layer.forward().unwrap().value.clone().unwrap();
    assert!(layer.forward_input().weights.is_some());
    let second = layer.forward().unwrap().value.clone().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_lc2d_reconfigure_reinitializes_weights() {
    let runtime = default_runtime();
    let parameter = |k| LocallyConnected2dParameter {
        kernel_sizes: [k, k],
        strides: [1, 1],
        n_kernels: 2,
        ..Default::default()
    };
    let mut layer = Layer::<LocallyConnected2d<f64>>::with_parameter(&runtime, parameter(3)).unwrap();
    layer.set_input(Tensor::full(&[1, 1, 5, 5], 1.0).unwrap());
    layer.forward().unwrap();
    assert_eq!(layer.forward_input().weights.as_ref().unwrap().shape(), &[3, 3, 2, 1, 3, 3]);

    layer.configure(parameter(2)).unwrap();
    assert!(layer.forward_input().weights.is_none());
    assert!(layer.forward_input().biases.is_none());
    let value = layer.forward().unwrap().value.as_ref().unwrap().shape().to_vec();
    assert_eq!(value, [1, 2, 4, 4]);
    assert_eq!(layer.forward_input().weights.as_ref().unwrap().shape(), &[4, 4, 2, 1, 2, 2]);
}

#[test]
fn test_lc2d_reconfigure_keeps_supplied_weights() {
    let runtime = default_runtime();
    let mut layer =
        Layer::<LocallyConnected2d<f64>>::with_parameter(&runtime, lc2d_parameter(false)).unwrap();
    let weights = Tensor::full(&[1, 1, 4, 1, 3, 3], 0.5).unwrap();
    layer.set_input(Tensor::full(&[1, 1, 3, 3], 1.0).unwrap());
    layer.forward_input_mut().weights = Some(weights.clone());
    layer.forward().unwrap();

    layer.configure(lc2d_parameter(true)).unwrap();
    let kept = layer.forward_input().weights.as_ref().unwrap();
    assert!(kept.shares_storage(&weights));
    assert!(layer.forward_input().biases.is_none());
}

#[test]
fn test_lc2d_zero_size_input_is_rejected() {
    let runtime = default_runtime();
    let mut layer =
        Layer::<LocallyConnected2d<f64>>::with_parameter(&runtime, lc2d_parameter(false)).unwrap();
    for shape in [[1, 0, 5, 5], [0, 1, 5, 5], [1, 1, 0, 5]] {
        layer.set_input(Tensor::new(&shape).unwrap());
        let err = layer.forward().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural, "shape {shape:?}: {err:?}");
    }
}

#[test]
fn test_forward_rerun_invalidates_pending_backward() {
    let runtime = default_runtime();
    let mut layer =
        Layer::<LocallyConnected2d<f64>>::with_parameter(&runtime, lc2d_parameter(true)).unwrap();
    layer.set_input(Tensor::full(&[1, 1, 4, 4], 0.5).unwrap());
    layer.forward().unwrap();
    layer.set_input_gradient(Tensor::full(&[1, 4, 2, 2], 1.0).unwrap());
    layer.backward().unwrap();
    assert!(layer.backward_result().gradient.is_some());

    layer.forward().unwrap();
    assert_eq!(layer.state(), LayerState::ForwardComputed);
    assert!(layer.backward_result().gradient.is_none());
    assert!(layer.backward_result().weight_derivatives.is_none());
    let err = layer.backward().unwrap_err();
    assert!(
        matches!(err, Error::MissingInput { slot: "input_gradient" }),
        "unexpected error {err:?}"
    );
}

/// `Σ g ⊙ forward(x, w, b)` for explicit weights and biases
fn lc2d_objective(
    parameter: &LocallyConnected2dParameter,
    x: &Tensor<f64>,
    w: &Tensor<f64>,
    b: &Tensor<f64>,
    g: &[f64],
) -> f64 {
    let mut layer =
        Layer::<LocallyConnected2d<f64>>::with_parameter(&default_runtime(), parameter.clone())
            .unwrap();
    let input = layer.forward_input_mut();
    input.data = Some(x.clone());
    input.weights = Some(w.clone());
    input.biases = Some(b.clone());
    let y = layer.forward().unwrap().value.as_ref().unwrap().to_vec().unwrap();
    y.iter().zip(g).map(|(a, b)| a * b).sum()
}

fn perturbed(t: &Tensor<f64>, index: usize, delta: f64) -> Tensor<f64> {
    let mut values = t.to_vec().unwrap();
    values[index] += delta;
    Tensor::from_vec(values, t.shape()).unwrap()
}

#[test]
fn test_lc2d_backward_matches_finite_differences() {
    let parameter = LocallyConnected2dParameter {
        kernel_sizes: [2, 2],
        strides: [1, 1],
        paddings: [1, 1],
        n_kernels: 2,
        n_groups: 2,
        propagate_gradient: true,
        ..Default::default()
    };
    let n = 2;
    let x = Tensor::from_vec(uniform_f64(31, n * 2 * 4 * 4, -1.0, 1.0), &[n, 2, 4, 4]).unwrap();
    let w = Tensor::from_vec(uniform_f64(32, 5 * 5 * 2 * 2 * 2, -1.0, 1.0), &[5, 5, 2, 1, 2, 2])
        .unwrap();
    let b = Tensor::from_vec(uniform_f64(33, 2 * 5 * 5, -1.0, 1.0), &[2, 5, 5]).unwrap();
    let g = uniform_f64(34, n * 2 * 5 * 5, -1.0, 1.0);

    let mut layer =
        Layer::<LocallyConnected2d<f64>>::with_parameter(&default_runtime(), parameter.clone())
            .unwrap();
    let input = layer.forward_input_mut();
    input.data = Some(x.clone());
    input.weights = Some(w.clone());
    input.biases = Some(b.clone());
    layer.forward().unwrap();
    layer.set_input_gradient(Tensor::from_vec(g.clone(), &[n, 2, 5, 5]).unwrap());
    let backward = layer.backward().unwrap();
    let dx = backward.gradient.as_ref().unwrap().to_vec().unwrap();
    let dw = backward.weight_derivatives.as_ref().unwrap().to_vec().unwrap();

    let h = 1e-4;
    let central = |f: &dyn Fn(f64) -> f64| (f(h) - f(-h)) / (2.0 * h);
    for i in (0..x.numel()).step_by(5) {
        let fd = central(&|d| lc2d_objective(&parameter, &perturbed(&x, i, d), &w, &b, &g));
        assert!((dx[i] - fd).abs() < 1e-8, "input {i}: {} vs {fd}", dx[i]);
    }
    // weight derivatives are averaged over the batch
    for i in (0..w.numel()).step_by(7) {
        let fd = central(&|d| lc2d_objective(&parameter, &x, &perturbed(&w, i, d), &b, &g));
        assert!((dw[i] * n as f64 - fd).abs() < 1e-8, "weight {i}: {} vs {fd}", dw[i]);
    }
}

// ============================================================================
// PReLU
// ============================================================================

#[test]
fn test_prelu_forward_backward_values() {
    let runtime = default_runtime();
    let parameter = PreluParameter {
        propagate_gradient: true,
        ..Default::default()
    };
    let mut layer = Layer::<Prelu<f64>>::with_parameter(&runtime, parameter).unwrap();
    let input = layer.forward_input_mut();
    input.data = Some(Tensor::from_vec(vec![1.0, -2.0, 3.0, -1.0, 0.0, -4.0], &[2, 3]).unwrap());
    input.weights = Some(Tensor::from_vec(vec![0.5, 0.25, 2.0], &[3]).unwrap());

    let value = layer.forward().unwrap().value.as_ref().unwrap().to_vec().unwrap();
    assert_eq!(value, [1.0, -0.5, 3.0, -0.5, 0.0, -8.0]);

    layer.set_input_gradient(Tensor::full(&[2, 3], 1.0).unwrap());
    let backward = layer.backward().unwrap();
    let gradient = backward.gradient.as_ref().unwrap().to_vec().unwrap();
    assert_eq!(gradient, [1.0, 0.25, 1.0, 0.5, 1.0, 2.0]);
    let w_der = backward.weight_derivatives.as_ref().unwrap().to_vec().unwrap();
    assert_eq!(w_der, [-1.0, -2.0, -4.0]);
}

#[test]
fn test_prelu_without_propagation_skips_gradient() {
    let runtime = default_runtime();
    let mut layer = Layer::<Prelu<f32>>::with_parameter(&runtime, PreluParameter::default())
        .unwrap();
    layer.set_input(Tensor::full(&[4, 2], -1.0f32).unwrap());
    layer.forward().unwrap();
    layer.set_input_gradient(Tensor::full(&[4, 2], 1.0f32).unwrap());
    let backward = layer.backward().unwrap();
    assert!(backward.gradient.is_none());
    assert_eq!(backward.weight_derivatives.as_ref().unwrap().shape(), &[2]);
}

// ============================================================================
// Softmax
// ============================================================================

#[test]
fn test_softmax_rows_sum_to_one() {
    let runtime = default_runtime();
    let mut layer =
        Layer::<Softmax<f64>>::with_parameter(&runtime, SoftmaxParameter::propagating(1))
            .unwrap();
    let (rows, cols) = (5, 37);
    let x = Tensor::from_vec(uniform_f64(3, rows * cols, -20.0, 20.0), &[rows, cols]).unwrap();
    layer.set_input(x);
    let value = layer.forward().unwrap().value.as_ref().unwrap().to_vec().unwrap();
    for row in value.chunks(cols) {
        let sum: f64 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12, "row sums to {sum}");
        assert!(row.iter().all(|&v| v > 0.0));
    }
}

#[test]
fn test_softmax_backward_matches_jacobian() {
    let runtime = default_runtime();
    let mut layer =
        Layer::<Softmax<f64>>::with_parameter(&runtime, SoftmaxParameter::propagating(1))
            .unwrap();
    layer.set_input(Tensor::from_vec(vec![0.1, 0.7, -0.3], &[1, 3]).unwrap());
    let y = layer.forward().unwrap().value.as_ref().unwrap().to_vec().unwrap();
    let g = [1.0, -2.0, 0.5];
    layer.set_input_gradient(Tensor::from_vec(g.to_vec(), &[1, 3]).unwrap());
    let got = layer.backward().unwrap().gradient.as_ref().unwrap().to_vec().unwrap();

    let dot: f64 = y.iter().zip(&g).map(|(a, b)| a * b).sum();
    let expected: Vec<f64> = y.iter().zip(&g).map(|(yi, gi)| yi * (gi - dot)).collect();
    assert_allclose_f64(&got, &expected, 1e-12, 1e-15, "softmax backward");
}

#[test]
fn test_softmax_batch_compute_is_idempotent() {
    let runtime = default_runtime();
    let mut batch = Batch::<SoftmaxForward<f64>>::new(
        &runtime,
        Method::DefaultDense,
        SoftmaxParameter::default(),
    )
    .unwrap();
    batch.set_input(ForwardInput::new(
        Tensor::from_vec(uniform_f64(9, 4 * 70, -3.0, 3.0), &[4, 70]).unwrap(),
    ));
    let first = batch.compute().unwrap().value.clone().unwrap();
    let second = batch.compute().unwrap().value.clone().unwrap();
    assert_eq!(first.to_vec().unwrap(), second.to_vec().unwrap());
}

#[test]
fn test_softmax_forced_tiers_agree() {
    let x = Tensor::from_vec(uniform_f64(11, 3 * 129, -5.0, 5.0), &[3, 129]).unwrap();
    let run = |level: SimdLevel| {
        let runtime = runtime_at(level);
        let mut layer =
            Layer::<Softmax<f64>>::with_parameter(&runtime, SoftmaxParameter::default()).unwrap();
        layer.set_input(x.clone());
        layer.forward().unwrap().value.as_ref().unwrap().to_vec().unwrap()
    };
    let baseline = run(SimdLevel::Scalar);
    for level in [SimdLevel::Neon, SimdLevel::Avx2Fma, SimdLevel::Avx512] {
        assert_eq!(run(level), baseline, "tier {level:?}");
    }
}

#[test]
fn test_softmax_default_skips_gradient() {
    let runtime = default_runtime();
    let mut layer =
        Layer::<Softmax<f64>>::with_parameter(&runtime, SoftmaxParameter::default()).unwrap();
    layer.set_input(Tensor::from_vec(vec![0.1, 0.7, -0.3], &[1, 3]).unwrap());
    layer.forward().unwrap();
    layer.set_input_gradient(Tensor::full(&[1, 3], 1.0).unwrap());
    assert!(layer.backward().unwrap().gradient.is_none());
    assert_eq!(layer.state(), LayerState::BackwardComputed);
}
