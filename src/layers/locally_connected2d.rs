//! Two-dimensional locally connected layer
//!
//! Like a 2-D convolution, except every output position has its own kernel
//! weights. With input `[n, c, h, w]`, `g` groups and `k` kernels:
//!
//! ```text
//! weights  [oh, ow, k, c / g, kh, kw]
//! biases   [k, oh, ow]
//! value    [n, k, oh, ow]
//! o = (in + 2·padding − kernel) / stride + 1     (must be a positive integer)
//! ```
//!
//! Kernel `kk` belongs to group `kk / (k / g)` and sees only that group's
//! `c / g` input channels.

use super::{
    AuxSlot, BackwardInput, BackwardResult, ForwardInput, ForwardResult, LayerKernel, LayerKind,
    check_optional, uniform_tensor,
};
use crate::algorithm::{Algorithm, Allocatable, Validatable, ensure_tensor, require_tensor};
use crate::dtype::FloatElement;
use crate::error::{Error, Result};
use crate::runtime::{AlgorithmId, KernelContext, KernelRegistry, Method, SimdLevel, run_at};
use std::marker::PhantomData;

/// Locally connected 2-D layer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LocallyConnected2dParameter {
    /// Kernel height and width
    pub kernel_sizes: [usize; 2],
    /// Stride along height and width
    pub strides: [usize; 2],
    /// Implicit zero padding along height and width
    pub paddings: [usize; 2],
    /// Number of kernels (output channels)
    pub n_kernels: usize,
    /// Number of channel groups
    pub n_groups: usize,
    /// Compute the gradient with respect to the layer input in backward
    pub propagate_gradient: bool,
    /// Seed of the weight and bias initializer
    pub seed: u64,
}

impl Default for LocallyConnected2dParameter {
    fn default() -> Self {
        Self {
            kernel_sizes: [2, 2],
            strides: [2, 2],
            paddings: [0, 0],
            n_kernels: 1,
            n_groups: 1,
            propagate_gradient: false,
            seed: 777,
        }
    }
}

impl Validatable for LocallyConnected2dParameter {
    fn check(&self, _: &()) -> Result<()> {
        if self.kernel_sizes.contains(&0) {
            return Err(Error::invalid_parameter("kernel_sizes", "must be positive"));
        }
        if self.strides.contains(&0) {
            return Err(Error::invalid_parameter("strides", "must be positive"));
        }
        if self.n_kernels == 0 {
            return Err(Error::invalid_parameter("n_kernels", "must be positive"));
        }
        if self.n_groups == 0 || self.n_kernels % self.n_groups != 0 {
            return Err(Error::invalid_parameter(
                "n_groups",
                format!(
                    "{} groups do not divide {} kernels",
                    self.n_groups, self.n_kernels
                ),
            ));
        }
        Ok(())
    }
}

/// Dimensions shared by the forward and backward kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    k: usize,
    groups: usize,
    kh: usize,
    kw: usize,
    sh: usize,
    sw: usize,
    ph: usize,
    pw: usize,
    oh: usize,
    ow: usize,
}

fn output_size(
    dim: &'static str,
    input: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Result<usize> {
    let padded = input + 2 * padding;
    if padded < kernel {
        return Err(Error::ShapeInference {
            dim,
            reason: format!("kernel {kernel} exceeds padded input {padded}"),
        });
    }
    if (padded - kernel) % stride != 0 {
        return Err(Error::ShapeInference {
            dim,
            reason: format!(
                "({padded} - {kernel}) is not a multiple of stride {stride}"
            ),
        });
    }
    Ok((padded - kernel) / stride + 1)
}

impl Geometry {
    fn infer(data_shape: &[usize], p: &LocallyConnected2dParameter) -> Result<Self> {
        let &[n, c, h, w] = data_shape else {
            return Err(Error::RankMismatch {
                arg: "data",
                expected: 4,
                got: data_shape.len(),
            });
        };
        if data_shape.contains(&0) {
            return Err(Error::invalid_argument(
                "data",
                format!("zero-size dimension in {data_shape:?}"),
            ));
        }
        if c % p.n_groups != 0 {
            return Err(Error::invalid_argument(
                "data",
                format!("{c} channels are not divisible into {} groups", p.n_groups),
            ));
        }
        let [kh, kw] = p.kernel_sizes;
        let [sh, sw] = p.strides;
        let [ph, pw] = p.paddings;
        Ok(Self {
            n,
            c,
            h,
            w,
            k: p.n_kernels,
            groups: p.n_groups,
            kh,
            kw,
            sh,
            sw,
            ph,
            pw,
            oh: output_size("height", h, kh, sh, ph)?,
            ow: output_size("width", w, kw, sw, pw)?,
        })
    }

    fn channels_per_group(&self) -> usize {
        self.c / self.groups
    }

    fn kernels_per_group(&self) -> usize {
        self.k / self.groups
    }

    fn value_shape(&self) -> [usize; 4] {
        [self.n, self.k, self.oh, self.ow]
    }

    fn weights_shape(&self) -> [usize; 6] {
        [
            self.oh,
            self.ow,
            self.k,
            self.channels_per_group(),
            self.kh,
            self.kw,
        ]
    }

    fn biases_shape(&self) -> [usize; 3] {
        [self.k, self.oh, self.ow]
    }

    /// Input row/column for output position `o` and kernel offset `a`
    #[inline]
    fn source(o: usize, a: usize, stride: usize, padding: usize, limit: usize) -> Option<usize> {
        (o * stride + a).checked_sub(padding).filter(|&v| v < limit)
    }

    /// Call `f(input_offset, weight_offset)` for every tap of output (kk, i, j)
    /// within one sample
    #[inline]
    fn for_each_tap(&self, kk: usize, i: usize, j: usize, mut f: impl FnMut(usize, usize)) {
        let cg = self.channels_per_group();
        let group = kk / self.kernels_per_group();
        let w_base = ((i * self.ow + j) * self.k + kk) * cg * self.kh * self.kw;
        for cl in 0..cg {
            let ch = group * cg + cl;
            for a in 0..self.kh {
                let Some(y) = Self::source(i, a, self.sh, self.ph, self.h) else {
                    continue;
                };
                for b in 0..self.kw {
                    let Some(x) = Self::source(j, b, self.sw, self.pw, self.w) else {
                        continue;
                    };
                    let in_off = (ch * self.h + y) * self.w + x;
                    let w_off = w_base + (cl * self.kh + a) * self.kw + b;
                    f(in_off, w_off);
                }
            }
        }
    }
}

/// Auxiliary slots of the locally connected layer
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LocallyConnected2dAux {
    /// Input fed to the forward pass
    Data,
    /// Weights used by the forward pass
    Weights,
    /// Biases used by the forward pass
    Biases,
}

impl AuxSlot for LocallyConnected2dAux {
    const LAYER: &'static str = "locally_connected2d";
    const ALL: &'static [Self] = &[Self::Data, Self::Weights, Self::Biases];
    const WEIGHTS: Option<Self> = Some(Self::Weights);
    const BIASES: Option<Self> = Some(Self::Biases);

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Data => "auxData",
            Self::Weights => "auxWeights",
            Self::Biases => "auxBiases",
        }
    }
}

type Lc2dForwardInput<T> = ForwardInput<T>;
type Lc2dForwardResult<T> = ForwardResult<T, LocallyConnected2dAux>;
type Lc2dBackwardInput<T> = BackwardInput<T, LocallyConnected2dAux>;

impl<T: FloatElement> Validatable<LocallyConnected2dParameter> for Lc2dForwardInput<T> {
    fn check(&self, parameter: &LocallyConnected2dParameter) -> Result<()> {
        let data = require_tensor(&self.data, "data")?;
        let geom = Geometry::infer(data.shape(), parameter)?;
        check_optional(&self.weights, "weights", &geom.weights_shape())?;
        check_optional(&self.biases, "biases", &geom.biases_shape())
    }
}

impl<T: FloatElement> Allocatable<Lc2dForwardInput<T>, LocallyConnected2dParameter>
    for Lc2dForwardResult<T>
{
    fn allocate(
        &mut self,
        input: &Lc2dForwardInput<T>,
        parameter: &LocallyConnected2dParameter,
    ) -> Result<()> {
        let data = require_tensor(&input.data, "data")?;
        let geom = Geometry::infer(data.shape(), parameter)?;
        ensure_tensor(&mut self.value, "value", &geom.value_shape())?;

        let fan_in = (geom.channels_per_group() * geom.kh * geom.kw) as f64;
        let bound = 1.0 / fan_in.sqrt();
        let weights = match &input.weights {
            Some(w) => w.clone(),
            None => uniform_tensor(&geom.weights_shape(), -bound, bound, parameter.seed)?,
        };
        let biases = match &input.biases {
            Some(b) => b.clone(),
            None => uniform_tensor(
                &geom.biases_shape(),
                -bound,
                bound,
                parameter.seed.wrapping_add(1),
            )?,
        };
        self.layer_data
            .insert(LocallyConnected2dAux::Data, data.clone());
        self.layer_data
            .insert(LocallyConnected2dAux::Weights, weights);
        self.layer_data
            .insert(LocallyConnected2dAux::Biases, biases);
        Ok(())
    }
}

impl<T: FloatElement> Validatable<LocallyConnected2dParameter> for Lc2dBackwardInput<T> {
    fn check(&self, parameter: &LocallyConnected2dParameter) -> Result<()> {
        let data = self.layer_data.require(LocallyConnected2dAux::Data)?;
        let weights = self.layer_data.require(LocallyConnected2dAux::Weights)?;
        let gradient = require_tensor(&self.input_gradient, "input_gradient")?;
        let geom = Geometry::infer(data.shape(), parameter)?;
        weights.expect_shape("auxWeights", &geom.weights_shape())?;
        gradient.expect_shape("input_gradient", &geom.value_shape())
    }
}

impl<T: FloatElement> Allocatable<Lc2dBackwardInput<T>, LocallyConnected2dParameter>
    for BackwardResult<T>
{
    fn allocate(
        &mut self,
        input: &Lc2dBackwardInput<T>,
        parameter: &LocallyConnected2dParameter,
    ) -> Result<()> {
        let data = input.layer_data.require(LocallyConnected2dAux::Data)?;
        let geom = Geometry::infer(data.shape(), parameter)?;
        if parameter.propagate_gradient {
            ensure_tensor(&mut self.gradient, "gradient", data.shape())?;
        }
        ensure_tensor(
            &mut self.weight_derivatives,
            "weight_derivatives",
            &geom.weights_shape(),
        )?;
        ensure_tensor(
            &mut self.bias_derivatives,
            "bias_derivatives",
            &geom.biases_shape(),
        )
    }
}

/// Forward pass of the locally connected 2-D layer
pub struct LocallyConnected2dForward<T>(PhantomData<T>);

/// Backward pass of the locally connected 2-D layer
pub struct LocallyConnected2dBackward<T>(PhantomData<T>);

/// Locally connected 2-D layer
pub struct LocallyConnected2d<T>(PhantomData<T>);

impl<T: FloatElement> Algorithm for LocallyConnected2dForward<T> {
    const ID: AlgorithmId = AlgorithmId::LocallyConnected2dForward;
    type T = T;
    type Input = Lc2dForwardInput<T>;
    type Parameter = LocallyConnected2dParameter;
    type Result = Lc2dForwardResult<T>;
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

impl<T: FloatElement> Algorithm for LocallyConnected2dBackward<T> {
    const ID: AlgorithmId = AlgorithmId::LocallyConnected2dBackward;
    type T = T;
    type Input = Lc2dBackwardInput<T>;
    type Parameter = LocallyConnected2dParameter;
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

impl<T: FloatElement> LayerKind for LocallyConnected2d<T> {
    const NAME: &'static str = "locally_connected2d";
    type T = T;
    type Aux = LocallyConnected2dAux;
    type Parameter = LocallyConnected2dParameter;
    type Forward = LocallyConnected2dForward<T>;
    type Backward = LocallyConnected2dBackward<T>;
}

fn forward_kernel<T: FloatElement>(
    ctx: &KernelContext,
    _input: &Lc2dForwardInput<T>,
    parameter: &LocallyConnected2dParameter,
    result: &mut Lc2dForwardResult<T>,
) -> Result<()> {
    let data = result.layer_data.require(LocallyConnected2dAux::Data)?.clone();
    let weights = result.layer_data.require(LocallyConnected2dAux::Weights)?.clone();
    let biases = result.layer_data.require(LocallyConnected2dAux::Biases)?.clone();
    let geom = Geometry::infer(data.shape(), parameter)?;
    let x = data.as_slice()?;
    let wt = weights.as_slice()?;
    let bias = biases.as_slice()?;
    let value = result
        .value
        .as_mut()
        .ok_or(Error::NotAllocated { arg: "value" })?
        .as_mut_slice()?;

    let in_len = geom.c * geom.h * geom.w;
    let out_len = geom.k * geom.oh * geom.ow;
    run_at(ctx.level(), || {
        ctx.parallelism().for_each_chunk(value, out_len, |s, out| {
            let xs = &x[s * in_len..(s + 1) * in_len];
            for kk in 0..geom.k {
                for i in 0..geom.oh {
                    for j in 0..geom.ow {
                        let pos = (kk * geom.oh + i) * geom.ow + j;
                        let mut acc = bias[pos];
                        geom.for_each_tap(kk, i, j, |in_off, w_off| {
                            acc += xs[in_off] * wt[w_off];
                        });
                        out[pos] = acc;
                    }
                }
            }
        });
    });
    Ok(())
}

fn backward_kernel<T: FloatElement>(
    ctx: &KernelContext,
    input: &Lc2dBackwardInput<T>,
    parameter: &LocallyConnected2dParameter,
    result: &mut BackwardResult<T>,
) -> Result<()> {
    let data = input.layer_data.require(LocallyConnected2dAux::Data)?;
    let weights = input.layer_data.require(LocallyConnected2dAux::Weights)?;
    let gradient = require_tensor(&input.input_gradient, "input_gradient")?;
    let geom = Geometry::infer(data.shape(), parameter)?;
    let x = data.as_slice()?;
    let wt = weights.as_slice()?;
    let g = gradient.as_slice()?;

    let in_len = geom.c * geom.h * geom.w;
    let out_len = geom.k * geom.oh * geom.ow;
    let inv_batch = T::from_f64(1.0 / geom.n as f64);
    let taps = geom.channels_per_group() * geom.kh * geom.kw;

    run_at(ctx.level(), || -> Result<()> {
        if let Some(grad) = result.gradient.as_mut() {
            let grad = grad.as_mut_slice()?;
            ctx.parallelism().for_each_chunk(grad, in_len, |s, gx| {
                gx.fill(T::zero());
                let gs = &g[s * out_len..(s + 1) * out_len];
                for kk in 0..geom.k {
                    for i in 0..geom.oh {
                        for j in 0..geom.ow {
                            let gv = gs[(kk * geom.oh + i) * geom.ow + j];
                            geom.for_each_tap(kk, i, j, |in_off, w_off| {
                                gx[in_off] += gv * wt[w_off];
                            });
                        }
                    }
                }
            });
        }

        if let Some(wder) = result.weight_derivatives.as_mut() {
            let wder = wder.as_mut_slice()?;
            // One chunk per kernel at one output position
            ctx.parallelism().for_each_chunk(wder, taps, |chunk, wd| {
                let kk = chunk % geom.k;
                let i = chunk / geom.k / geom.ow;
                let j = chunk / geom.k % geom.ow;
                let w_base = chunk * taps;
                wd.fill(T::zero());
                for s in 0..geom.n {
                    let xs = &x[s * in_len..(s + 1) * in_len];
                    let gv = g[s * out_len + (kk * geom.oh + i) * geom.ow + j];
                    geom.for_each_tap(kk, i, j, |in_off, w_off| {
                        wd[w_off - w_base] += gv * xs[in_off];
                    });
                }
                for v in wd.iter_mut() {
                    *v = *v * inv_batch;
                }
            });
        }

        if let Some(bder) = result.bias_derivatives.as_mut() {
            let bder = bder.as_mut_slice()?;
            bder.fill(T::zero());
            for gs in g.chunks_exact(out_len) {
                for (b, &gv) in bder.iter_mut().zip(gs) {
                    *b += gv;
                }
            }
            for v in bder.iter_mut() {
                *v = *v * inv_batch;
            }
        }
        Ok(())
    })
}

pub(super) fn register_kernels<T: FloatElement>(registry: &mut KernelRegistry) {
    for level in [SimdLevel::Scalar, SimdLevel::Avx2Fma, SimdLevel::Avx512] {
        registry.register::<LocallyConnected2dForward<T>>(
            Method::DefaultDense,
            level,
            forward_kernel::<T>,
        );
        registry.register::<LocallyConnected2dBackward<T>>(
            Method::DefaultDense,
            level,
            backward_kernel::<T>,
        );
    }
}
