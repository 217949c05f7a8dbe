//! Parametric rectified linear unit
//!
//! `y = x` for `x >= 0`, `y = w·x` otherwise, with one learned slope per
//! position of the weight dimensions `[data_dimension, data_dimension +
//! weights_dimension)` of the input. Every other axis shares the slopes.

use super::{
    AuxSlot, BackwardInput, BackwardResult, ForwardInput, ForwardResult, LayerKernel, LayerKind,
    check_optional, uniform_tensor,
};
use crate::algorithm::{Algorithm, Allocatable, Validatable, ensure_tensor, require_tensor};
use crate::dtype::FloatElement;
use crate::error::{Error, Result};
use crate::runtime::{AlgorithmId, KernelContext, KernelRegistry, Method, SimdLevel, run_at};
use std::marker::PhantomData;

/// Bounds of the slope initializer
const INIT_RANGE: (f64, f64) = (-0.5, 0.5);

/// PReLU configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PreluParameter {
    /// First input axis the weights span
    pub data_dimension: usize,
    /// Number of consecutive axes the weights span
    pub weights_dimension: usize,
    /// Compute the gradient with respect to the layer input in backward
    pub propagate_gradient: bool,
    /// Seed of the weight initializer
    pub seed: u64,
}

impl Default for PreluParameter {
    fn default() -> Self {
        Self {
            data_dimension: 1,
            weights_dimension: 1,
            propagate_gradient: false,
            seed: 777,
        }
    }
}

impl Validatable for PreluParameter {
    fn check(&self, _: &()) -> Result<()> {
        if self.weights_dimension == 0 {
            return Err(Error::invalid_parameter(
                "weights_dimension",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Input viewed as `[outer, weights, inner]`
#[derive(Debug, Clone, Copy)]
struct Split {
    outer: usize,
    weights: usize,
    inner: usize,
}

impl Split {
    fn of(data_shape: &[usize], p: &PreluParameter) -> Result<Self> {
        let end = p.data_dimension + p.weights_dimension;
        if end > data_shape.len() {
            return Err(Error::invalid_argument(
                "data",
                format!(
                    "rank {} has no axes [{}, {})",
                    data_shape.len(),
                    p.data_dimension,
                    end
                ),
            ));
        }
        Ok(Self {
            outer: data_shape[..p.data_dimension].iter().product(),
            weights: data_shape[p.data_dimension..end].iter().product(),
            inner: data_shape[end..].iter().product(),
        })
    }
}

fn weights_shape(data_shape: &[usize], p: &PreluParameter) -> Vec<usize> {
    data_shape[p.data_dimension..p.data_dimension + p.weights_dimension].to_vec()
}

/// Auxiliary slots of the PReLU layer
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PreluAux {
    /// Input fed to the forward pass
    Data,
    /// Slopes used by the forward pass
    Weights,
}

impl AuxSlot for PreluAux {
    const LAYER: &'static str = "prelu";
    const ALL: &'static [Self] = &[Self::Data, Self::Weights];
    const WEIGHTS: Option<Self> = Some(Self::Weights);

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Data => "auxData",
            Self::Weights => "auxWeights",
        }
    }
}

impl<T: FloatElement> Validatable<PreluParameter> for ForwardInput<T> {
    fn check(&self, parameter: &PreluParameter) -> Result<()> {
        let data = require_tensor(&self.data, "data")?;
        Split::of(data.shape(), parameter)?;
        check_optional(
            &self.weights,
            "weights",
            &weights_shape(data.shape(), parameter),
        )
    }
}

impl<T: FloatElement> Allocatable<ForwardInput<T>, PreluParameter> for ForwardResult<T, PreluAux> {
    fn allocate(&mut self, input: &ForwardInput<T>, parameter: &PreluParameter) -> Result<()> {
        let data = require_tensor(&input.data, "data")?;
        ensure_tensor(&mut self.value, "value", data.shape())?;
        let weights = match &input.weights {
            Some(w) => w.clone(),
            None => uniform_tensor(
                &weights_shape(data.shape(), parameter),
                INIT_RANGE.0,
                INIT_RANGE.1,
                parameter.seed,
            )?,
        };
        self.layer_data.insert(PreluAux::Data, data.clone());
        self.layer_data.insert(PreluAux::Weights, weights);
        Ok(())
    }
}

impl<T: FloatElement> Validatable<PreluParameter> for BackwardInput<T, PreluAux> {
    fn check(&self, parameter: &PreluParameter) -> Result<()> {
        let data = self.layer_data.require(PreluAux::Data)?;
        let weights = self.layer_data.require(PreluAux::Weights)?;
        let gradient = require_tensor(&self.input_gradient, "input_gradient")?;
        Split::of(data.shape(), parameter)?;
        weights.expect_shape("auxWeights", &weights_shape(data.shape(), parameter))?;
        gradient.expect_shape("input_gradient", data.shape())
    }
}

impl<T: FloatElement> Allocatable<BackwardInput<T, PreluAux>, PreluParameter>
    for BackwardResult<T>
{
    fn allocate(
        &mut self,
        input: &BackwardInput<T, PreluAux>,
        parameter: &PreluParameter,
    ) -> Result<()> {
        let data = input.layer_data.require(PreluAux::Data)?;
        if parameter.propagate_gradient {
            ensure_tensor(&mut self.gradient, "gradient", data.shape())?;
        }
        ensure_tensor(
            &mut self.weight_derivatives,
            "weight_derivatives",
            &weights_shape(data.shape(), parameter),
        )
    }
}

/// Forward pass of PReLU
pub struct PreluForward<T>(PhantomData<T>);

/// Backward pass of PReLU
pub struct PreluBackward<T>(PhantomData<T>);

/// PReLU layer
pub struct Prelu<T>(PhantomData<T>);

impl<T: FloatElement> Algorithm for PreluForward<T> {
    const ID: AlgorithmId = AlgorithmId::PreluForward;
    type T = T;
    type Input = ForwardInput<T>;
    type Parameter = PreluParameter;
    type Result = ForwardResult<T, PreluAux>;
    type Kernel = LayerKernel<Self::Input, Self::Parameter, Self::Result>;

    fn run(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        input: &Self::Input,
        parameter: &Self::Parameter,
        result: &mut Self::Result,
    ) -> Result<()> {
        kernel(ctx, input, parameter, result)
    }
}

impl<T: FloatElement> Algorithm for PreluBackward<T> {
    const ID: AlgorithmId = AlgorithmId::PreluBackward;
    type T = T;
    type Input = BackwardInput<T, PreluAux>;
    type Parameter = PreluParameter;
    type Result = BackwardResult<T>;
    type Kernel = LayerKernel<Self::Input, Self::Parameter, Self::Result>;

    fn run(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        input: &Self::Input,
        parameter: &Self::Parameter,
        result: &mut Self::Result,
    ) -> Result<()> {
        kernel(ctx, input, parameter, result)
    }
}

impl<T: FloatElement> LayerKind for Prelu<T> {
    const NAME: &'static str = "prelu";
    type T = T;
    type Aux = PreluAux;
    type Parameter = PreluParameter;
    type Forward = PreluForward<T>;
    type Backward = PreluBackward<T>;
}

fn forward_kernel<T: FloatElement>(
    ctx: &KernelContext,
    _input: &ForwardInput<T>,
    parameter: &PreluParameter,
    result: &mut ForwardResult<T, PreluAux>,
) -> Result<()> {
    let data = result.layer_data.require(PreluAux::Data)?.clone();
    let weights = result.layer_data.require(PreluAux::Weights)?.clone();
    let split = Split::of(data.shape(), parameter)?;
    let x = data.as_slice()?;
    let w = weights.as_slice()?;
    let y = result
        .value
        .as_mut()
        .ok_or(Error::NotAllocated { arg: "value" })?
        .as_mut_slice()?;

    let block = split.weights * split.inner;
    run_at(ctx.level(), || {
        ctx.parallelism().for_each_chunk(y, block, |o, ys| {
            let xs = &x[o * block..(o + 1) * block];
            for (k, (yv, &xv)) in ys.iter_mut().zip(xs).enumerate() {
                let slope = w[k / split.inner];
                *yv = if xv >= T::zero() { xv } else { slope * xv };
            }
        });
    });
    Ok(())
}

fn backward_kernel<T: FloatElement>(
    ctx: &KernelContext,
    input: &BackwardInput<T, PreluAux>,
    parameter: &PreluParameter,
    result: &mut BackwardResult<T>,
) -> Result<()> {
    let data = input.layer_data.require(PreluAux::Data)?;
    let weights = input.layer_data.require(PreluAux::Weights)?;
    let gradient = require_tensor(&input.input_gradient, "input_gradient")?;
    let split = Split::of(data.shape(), parameter)?;
    let x = data.as_slice()?;
    let w = weights.as_slice()?;
    let g = gradient.as_slice()?;
    let block = split.weights * split.inner;

    run_at(ctx.level(), || -> Result<()> {
        if let Some(grad) = result.gradient.as_mut() {
            let gx = grad.as_mut_slice()?;
            ctx.parallelism().for_each_chunk(gx, block, |o, out| {
                let base = o * block;
                for (k, v) in out.iter_mut().enumerate() {
                    let gv = g[base + k];
                    *v = if x[base + k] >= T::zero() {
                        gv
                    } else {
                        w[k / split.inner] * gv
                    };
                }
            });
        }

        if let Some(wder) = result.weight_derivatives.as_mut() {
            let wder = wder.as_mut_slice()?;
            let sums = ctx.parallelism().map_collect(split.weights, |wi| {
                let mut acc = T::zero();
                for o in 0..split.outer {
                    let base = (o * split.weights + wi) * split.inner;
                    for p in base..base + split.inner {
                        if x[p] < T::zero() {
                            acc += g[p] * x[p];
                        }
                    }
                }
                acc
            });
            wder.copy_from_slice(&sums);
        }
        Ok(())
    })
}

pub(super) fn register_kernels<T: FloatElement>(registry: &mut KernelRegistry) {
    for level in [SimdLevel::Scalar, SimdLevel::Avx2Fma, SimdLevel::Avx512] {
        registry.register::<PreluForward<T>>(Method::DefaultDense, level, forward_kernel::<T>);
        registry.register::<PreluBackward<T>>(Method::DefaultDense, level, backward_kernel::<T>);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    fn forward(
        x: Vec<f64>,
        shape: &[usize],
        w: Vec<f64>,
        p: &PreluParameter,
    ) -> ForwardResult<f64, PreluAux> {
        let wshape = weights_shape(shape, p);
        let input = ForwardInput {
            data: Some(Tensor::from_vec(x, shape).unwrap()),
            weights: Some(Tensor::from_vec(w, &wshape).unwrap()),
            biases: None,
        };
        input.check(p).unwrap();
        let mut result = ForwardResult::default();
        result.allocate(&input, p).unwrap();
        forward_kernel(&KernelContext::default(), &input, p, &mut result).unwrap();
        result
    }

    #[test]
    fn test_weights_shape_follows_dimensions() {
        let p = PreluParameter {
            data_dimension: 1,
            weights_dimension: 2,
            ..Default::default()
        };
        assert_eq!(weights_shape(&[4, 3, 2, 5], &p), vec![3, 2]);
        let split = Split::of(&[4, 3, 2, 5], &p).unwrap();
        assert_eq!((split.outer, split.weights, split.inner), (4, 6, 5));

        let too_deep = PreluParameter {
            data_dimension: 3,
            weights_dimension: 2,
            ..Default::default()
        };
        assert!(Split::of(&[4, 3, 2, 5], &too_deep).is_err());
    }

    #[test]
    fn test_forward_applies_slope_per_channel() {
        let p = PreluParameter::default();
        let result = forward(
            vec![1.0, -2.0, -1.0, 3.0],
            &[1, 2, 2],
            vec![0.5, 0.1],
            &p,
        );
        let y = result.value.unwrap().to_vec().unwrap();
        assert_eq!(y, vec![1.0, -1.0, -0.1, 3.0]);
    }

    #[test]
    fn test_backward_sums_weight_derivatives() {
        let p = PreluParameter {
            propagate_gradient: true,
            ..Default::default()
        };
        let fwd = forward(
            vec![1.0, -2.0, -1.0, 3.0, -4.0, 2.0, 0.0, -1.0],
            &[2, 2, 2],
            vec![0.5, 0.1],
            &p,
        );
        let g = Tensor::from_vec(vec![1.0; 8], &[2, 2, 2]).unwrap();
        let input = BackwardInput::new(g, fwd.layer_data);
        input.check(&p).unwrap();
        let mut result = BackwardResult::default();
        result.allocate(&input, &p).unwrap();
        backward_kernel(&KernelContext::default(), &input, &p, &mut result).unwrap();

        let wder = result.weight_derivatives.unwrap().to_vec().unwrap();
        assert_eq!(wder, vec![-6.0, -2.0]);
        let grad = result.gradient.unwrap().to_vec().unwrap();
        assert_eq!(grad, vec![1.0, 0.5, 0.1, 1.0, 0.5, 1.0, 1.0, 0.1]);
    }
}
