//! Softmax layer
//!
//! `y = exp(x − max) / Σ exp(x − max)` along `dimension`; the backward pass
//! computes `y ⊙ (g − Σ g⊙y)` from the forward output kept in the layer data.
//!
//! Contiguous rows (`dimension` is the last axis with extent > 1) run on the
//! tier's vector primitives; every other layout runs the strided baseline.

mod kernels;

use super::{
    AuxSlot, BackwardInput, BackwardResult, ForwardInput, ForwardResult, LayerKernel, LayerKind,
};
use crate::algorithm::{Algorithm, Allocatable, Validatable, ensure_tensor, require_tensor};
use crate::dtype::FloatElement;
use crate::error::{Error, Result};
use crate::runtime::{AlgorithmId, KernelContext, KernelRegistry, Method, host_supports};
use crate::tensor::Tensor;
use kernels::{RowKernels, ScalarRows, backward_block, forward_block};
use std::marker::PhantomData;

/// Softmax configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftmaxParameter {
    /// Axis the probabilities are normalized along
    pub dimension: usize,
    /// Compute the gradient with respect to the layer input in backward
    pub propagate_gradient: bool,
}

impl Default for SoftmaxParameter {
    fn default() -> Self {
        Self {
            dimension: 1,
            propagate_gradient: false,
        }
    }
}

impl SoftmaxParameter {
    /// Normalize along `dimension`, propagating the gradient in backward
    pub fn propagating(dimension: usize) -> Self {
        Self {
            dimension,
            propagate_gradient: true,
        }
    }
}

impl Validatable for SoftmaxParameter {
    fn check(&self, _: &()) -> Result<()> {
        Ok(())
    }
}

fn check_dimension<T: FloatElement>(t: &Tensor<T>, p: &SoftmaxParameter) -> Result<()> {
    if p.dimension >= t.ndim() {
        return Err(Error::invalid_parameter(
            "dimension",
            format!("axis {} out of range for rank {}", p.dimension, t.ndim()),
        ));
    }
    Ok(())
}

/// Auxiliary slots of the softmax layer
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SoftmaxAux {
    /// Forward output
    Value,
}

impl AuxSlot for SoftmaxAux {
    const LAYER: &'static str = "softmax";
    const ALL: &'static [Self] = &[Self::Value];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        "auxValue"
    }
}

impl<T: FloatElement> Validatable<SoftmaxParameter> for ForwardInput<T> {
    fn check(&self, parameter: &SoftmaxParameter) -> Result<()> {
        check_dimension(require_tensor(&self.data, "data")?, parameter)
    }
}

impl<T: FloatElement> Allocatable<ForwardInput<T>, SoftmaxParameter>
    for ForwardResult<T, SoftmaxAux>
{
    fn allocate(&mut self, input: &ForwardInput<T>, _: &SoftmaxParameter) -> Result<()> {
        let data = require_tensor(&input.data, "data")?;
        ensure_tensor(&mut self.value, "value", data.shape())
    }
}

impl<T: FloatElement> Validatable<SoftmaxParameter> for BackwardInput<T, SoftmaxAux> {
    fn check(&self, parameter: &SoftmaxParameter) -> Result<()> {
        let value = self.layer_data.require(SoftmaxAux::Value)?;
        let gradient = require_tensor(&self.input_gradient, "input_gradient")?;
        check_dimension(value, parameter)?;
        gradient.expect_shape("input_gradient", value.shape())
    }
}

impl<T: FloatElement> Allocatable<BackwardInput<T, SoftmaxAux>, SoftmaxParameter>
    for BackwardResult<T>
{
    fn allocate(
        &mut self,
        input: &BackwardInput<T, SoftmaxAux>,
        parameter: &SoftmaxParameter,
    ) -> Result<()> {
        let value = input.layer_data.require(SoftmaxAux::Value)?;
        if parameter.propagate_gradient {
            ensure_tensor(&mut self.gradient, "gradient", value.shape())?;
        }
        Ok(())
    }
}

/// Forward pass of softmax
pub struct SoftmaxForward<T>(PhantomData<T>);

/// Backward pass of softmax
pub struct SoftmaxBackward<T>(PhantomData<T>);

/// Softmax layer
pub struct Softmax<T>(PhantomData<T>);

impl<T: FloatElement> Algorithm for SoftmaxForward<T> {
    const ID: AlgorithmId = AlgorithmId::SoftmaxForward;
    type T = T;
    type Input = ForwardInput<T>;
    type Parameter = SoftmaxParameter;
    type Result = ForwardResult<T, SoftmaxAux>;
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

impl<T: FloatElement> Algorithm for SoftmaxBackward<T> {
    const ID: AlgorithmId = AlgorithmId::SoftmaxBackward;
    type T = T;
    type Input = BackwardInput<T, SoftmaxAux>;
    type Parameter = SoftmaxParameter;
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

impl<T: FloatElement> LayerKind for Softmax<T> {
    const NAME: &'static str = "softmax";
    type T = T;
    type Aux = SoftmaxAux;
    type Parameter = SoftmaxParameter;
    type Forward = SoftmaxForward<T>;
    type Backward = SoftmaxBackward<T>;
}

fn forward_kernel<T: FloatElement, K: RowKernels<T>>(
    ctx: &KernelContext,
    input: &ForwardInput<T>,
    parameter: &SoftmaxParameter,
    result: &mut ForwardResult<T, SoftmaxAux>,
) -> Result<()> {
    if !host_supports(K::LEVEL) {
        return forward_kernel::<T, ScalarRows>(ctx, input, parameter, result);
    }
    let data = require_tensor(&input.data, "data")?;
    let (_, axis, inner) = data.layout().split_at_axis(parameter.dimension);
    let block = axis * inner;
    let x = data.as_slice()?;
    let value = result
        .value
        .as_mut()
        .ok_or(Error::NotAllocated { arg: "value" })?;

    ctx.parallelism()
        .for_each_chunk(value.as_mut_slice()?, block, |o, y| {
            // SAFETY: host support for K::LEVEL checked above
            unsafe { forward_block::<T, K>(&x[o * block..(o + 1) * block], y, axis, inner) }
        });
    result.layer_data.insert(SoftmaxAux::Value, value.clone());
    Ok(())
}

fn backward_kernel<T: FloatElement, K: RowKernels<T>>(
    ctx: &KernelContext,
    input: &BackwardInput<T, SoftmaxAux>,
    parameter: &SoftmaxParameter,
    result: &mut BackwardResult<T>,
) -> Result<()> {
    if !host_supports(K::LEVEL) {
        return backward_kernel::<T, ScalarRows>(ctx, input, parameter, result);
    }
    if !parameter.propagate_gradient {
        return Ok(());
    }
    let value = input.layer_data.require(SoftmaxAux::Value)?;
    let gradient = require_tensor(&input.input_gradient, "input_gradient")?;
    let (_, axis, inner) = value.layout().split_at_axis(parameter.dimension);
    let block = axis * inner;
    let y = value.as_slice()?;
    let g = gradient.as_slice()?;
    let out = result
        .gradient
        .as_mut()
        .ok_or(Error::NotAllocated { arg: "gradient" })?
        .as_mut_slice()?;

    ctx.parallelism().for_each_chunk(out, block, |o, gx| {
        let range = o * block..(o + 1) * block;
        // SAFETY: host support for K::LEVEL checked above
        unsafe { backward_block::<T, K>(&y[range.clone()], &g[range], gx, axis, inner) }
    });
    Ok(())
}

fn register_tier<T: FloatElement, K: RowKernels<T>>(registry: &mut KernelRegistry) {
    registry.register::<SoftmaxForward<T>>(Method::DefaultDense, K::LEVEL, forward_kernel::<T, K>);
    registry.register::<SoftmaxBackward<T>>(
        Method::DefaultDense,
        K::LEVEL,
        backward_kernel::<T, K>,
    );
}

pub(super) fn register_kernels(registry: &mut KernelRegistry) {
    register_tier::<f32, ScalarRows>(registry);
    register_tier::<f64, ScalarRows>(registry);

    #[cfg(target_arch = "x86_64")]
    {
        use kernels::{Avx2Rows, Avx512Rows};
        register_tier::<f32, Avx2Rows>(registry);
        register_tier::<f64, Avx2Rows>(registry);
        register_tier::<f32, Avx512Rows>(registry);
        register_tier::<f64, Avx512Rows>(registry);
    }

    #[cfg(target_arch = "aarch64")]
    {
        use kernels::NeonRows;
        register_tier::<f32, NeonRows>(registry);
        register_tier::<f64, NeonRows>(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_out_of_range() {
        let input = ForwardInput::new(Tensor::<f32>::new(&[2, 3]).unwrap());
        let p = SoftmaxParameter {
            dimension: 2,
            ..Default::default()
        };
        assert!(matches!(
            input.check(&p),
            Err(Error::InvalidParameter { name: "dimension", .. })
        ));
    }

    #[test]
    fn test_forward_then_backward_on_scalar_rows() {
        let p = SoftmaxParameter::propagating(1);
        let input = ForwardInput::new(
            Tensor::from_vec(vec![1.0f64, 2.0, 3.0, 0.0, 0.0, 0.0], &[2, 3]).unwrap(),
        );
        let mut fwd = ForwardResult::default();
        fwd.allocate(&input, &p).unwrap();
        forward_kernel::<f64, ScalarRows>(&KernelContext::default(), &input, &p, &mut fwd)
            .unwrap();
        let y = fwd.value.as_ref().unwrap().to_vec().unwrap();
        assert!((y[3] - 1.0 / 3.0).abs() < 1e-12);
        assert!((y[0] + y[1] + y[2] - 1.0).abs() < 1e-12);
        assert!(fwd.layer_data.require(SoftmaxAux::Value).is_ok());

        // Uniform gradient has no effect on a probability simplex
        let g = Tensor::full(&[2, 3], 1.0).unwrap();
        let bwd_input = BackwardInput::new(g, fwd.layer_data.clone());
        let mut bwd = BackwardResult::default();
        bwd.allocate(&bwd_input, &p).unwrap();
        backward_kernel::<f64, ScalarRows>(&KernelContext::default(), &bwd_input, &p, &mut bwd)
            .unwrap();
        for v in bwd.gradient.unwrap().to_vec().unwrap() {
            assert!(v.abs() < 1e-12);
        }
    }

    #[test]
    fn test_backward_without_propagation_leaves_gradient_empty() {
        let p = SoftmaxParameter::default();
        let input = ForwardInput::new(Tensor::from_vec(vec![0.5f32, -1.0, 2.0], &[1, 3]).unwrap());
        let mut fwd = ForwardResult::default();
        fwd.allocate(&input, &p).unwrap();
        forward_kernel::<f32, ScalarRows>(&KernelContext::default(), &input, &p, &mut fwd)
            .unwrap();

        let g = Tensor::full(&[1, 3], 1.0f32).unwrap();
        let bwd_input = BackwardInput::new(g, fwd.layer_data);
        let mut bwd = BackwardResult::default();
        bwd.allocate(&bwd_input, &p).unwrap();
        backward_kernel::<f32, ScalarRows>(&KernelContext::default(), &bwd_input, &p, &mut bwd)
            .unwrap();
        assert!(bwd.gradient.is_none());
    }
}
