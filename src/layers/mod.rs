//! Neural-network layer primitives
//!
//! Every layer is a pair of algorithms sharing one parameter type and one
//! auxiliary-slot enumeration:
//!
//! - forward: [`ForwardInput`] → [`ForwardResult`] (`value` plus the
//!   [`LayerData`] the backward pass needs)
//! - backward: [`BackwardInput`] (`input_gradient` plus that `LayerData`) →
//!   [`BackwardResult`] (`gradient`, `weight_derivatives`, `bias_derivatives`)
//!
//! [`Layer`] drives both halves through the forward/backward state machine.

mod data;
pub mod locally_connected2d;
pub mod prelu;
pub mod softmax;

pub use data::{AuxSlot, LayerData};
pub use locally_connected2d::{
    LocallyConnected2d, LocallyConnected2dAux, LocallyConnected2dBackward,
    LocallyConnected2dForward, LocallyConnected2dParameter,
};
pub use prelu::{Prelu, PreluAux, PreluBackward, PreluForward, PreluParameter};
pub use softmax::{Softmax, SoftmaxAux, SoftmaxBackward, SoftmaxForward, SoftmaxParameter};

use crate::algorithm::{Algorithm, Container, SlotMapped, Validatable};
use crate::dtype::{Element, FloatElement};
use crate::error::{Error, Result};
use crate::runtime::{KernelContext, KernelRegistry, Method, Runtime};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Kernel signature shared by all layer algorithms
pub type LayerKernel<I, P, R> = fn(&KernelContext, &I, &P, &mut R) -> Result<()>;

/// Forward input slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ForwardInputSlot {
    /// Layer input
    Data,
    /// Learned weights (initialized by the forward pass when absent)
    Weights,
    /// Learned biases (initialized by the forward pass when absent)
    Biases,
}

/// Input of a forward pass
#[derive(Debug, Clone)]
pub struct ForwardInput<T: Element> {
    /// Layer input
    pub data: Option<Tensor<T>>,
    /// Learned weights
    pub weights: Option<Tensor<T>>,
    /// Learned biases
    pub biases: Option<Tensor<T>>,
}

impl<T: Element> ForwardInput<T> {
    /// Input with only the data slot set
    pub fn new(data: Tensor<T>) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }
}

impl<T: Element> Default for ForwardInput<T> {
    fn default() -> Self {
        Self {
            data: None,
            weights: None,
            biases: None,
        }
    }
}

impl<T: Element> ForwardInput<T> {
    /// Empty `slot`
    pub fn clear(&mut self, slot: ForwardInputSlot) {
        match slot {
            ForwardInputSlot::Data => self.data = None,
            ForwardInputSlot::Weights => self.weights = None,
            ForwardInputSlot::Biases => self.biases = None,
        }
    }
}

impl<T: Element> SlotMapped for ForwardInput<T> {
    type Slot = ForwardInputSlot;
    type Value = Tensor<T>;

    fn get(&self, slot: ForwardInputSlot) -> Option<&Tensor<T>> {
        match slot {
            ForwardInputSlot::Data => self.data.as_ref(),
            ForwardInputSlot::Weights => self.weights.as_ref(),
            ForwardInputSlot::Biases => self.biases.as_ref(),
        }
    }

    fn set(&mut self, slot: ForwardInputSlot, value: Tensor<T>) {
        match slot {
            ForwardInputSlot::Data => self.data = Some(value),
            ForwardInputSlot::Weights => self.weights = Some(value),
            ForwardInputSlot::Biases => self.biases = Some(value),
        }
    }
}

/// Forward result slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ForwardResultSlot {
    /// Layer output
    Value,
}

/// Result of a forward pass
#[derive(Debug, Clone)]
pub struct ForwardResult<T: Element, S: AuxSlot> {
    /// Layer output
    pub value: Option<Tensor<T>>,
    /// State handed to the backward pass
    pub layer_data: LayerData<T, S>,
}

impl<T: Element, S: AuxSlot> Default for ForwardResult<T, S> {
    fn default() -> Self {
        Self {
            value: None,
            layer_data: LayerData::new(),
        }
    }
}

impl<T: Element, S: AuxSlot> SlotMapped for ForwardResult<T, S> {
    type Slot = ForwardResultSlot;
    type Value = Tensor<T>;

    fn get(&self, slot: ForwardResultSlot) -> Option<&Tensor<T>> {
        match slot {
            ForwardResultSlot::Value => self.value.as_ref(),
        }
    }

    fn set(&mut self, slot: ForwardResultSlot, value: Tensor<T>) {
        match slot {
            ForwardResultSlot::Value => self.value = Some(value),
        }
    }
}

/// Backward input slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BackwardInputSlot {
    /// Gradient flowing from the next layer
    InputGradient,
}

/// Input of a backward pass
#[derive(Debug, Clone)]
pub struct BackwardInput<T: Element, S: AuxSlot> {
    /// Gradient flowing from the next layer, shaped like the forward value
    pub input_gradient: Option<Tensor<T>>,
    /// State produced by the forward pass
    pub layer_data: LayerData<T, S>,
}

impl<T: Element, S: AuxSlot> BackwardInput<T, S> {
    /// Input from a gradient and the forward pass's layer data
    pub fn new(input_gradient: Tensor<T>, layer_data: LayerData<T, S>) -> Self {
        Self {
            input_gradient: Some(input_gradient),
            layer_data,
        }
    }
}

impl<T: Element, S: AuxSlot> Default for BackwardInput<T, S> {
    fn default() -> Self {
        Self {
            input_gradient: None,
            layer_data: LayerData::new(),
        }
    }
}

impl<T: Element, S: AuxSlot> SlotMapped for BackwardInput<T, S> {
    type Slot = BackwardInputSlot;
    type Value = Tensor<T>;

    fn get(&self, slot: BackwardInputSlot) -> Option<&Tensor<T>> {
        match slot {
            BackwardInputSlot::InputGradient => self.input_gradient.as_ref(),
        }
    }

    fn set(&mut self, slot: BackwardInputSlot, value: Tensor<T>) {
        match slot {
            BackwardInputSlot::InputGradient => self.input_gradient = Some(value),
        }
    }
}

/// Backward result slots
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BackwardResultSlot {
    /// Gradient with respect to the layer input
    Gradient,
    /// Gradient with respect to the weights
    WeightDerivatives,
    /// Gradient with respect to the biases
    BiasDerivatives,
}

/// Result of a backward pass
#[derive(Debug, Clone)]
pub struct BackwardResult<T: Element> {
    /// Gradient with respect to the layer input; only with `propagate_gradient`
    pub gradient: Option<Tensor<T>>,
    /// Gradient with respect to the weights, shaped like the weights
    pub weight_derivatives: Option<Tensor<T>>,
    /// Gradient with respect to the biases, shaped like the biases
    pub bias_derivatives: Option<Tensor<T>>,
}

impl<T: Element> Default for BackwardResult<T> {
    fn default() -> Self {
        Self {
            gradient: None,
            weight_derivatives: None,
            bias_derivatives: None,
        }
    }
}

impl<T: Element> SlotMapped for BackwardResult<T> {
    type Slot = BackwardResultSlot;
    type Value = Tensor<T>;

    fn get(&self, slot: BackwardResultSlot) -> Option<&Tensor<T>> {
        match slot {
            BackwardResultSlot::Gradient => self.gradient.as_ref(),
            BackwardResultSlot::WeightDerivatives => self.weight_derivatives.as_ref(),
            BackwardResultSlot::BiasDerivatives => self.bias_derivatives.as_ref(),
        }
    }

    fn set(&mut self, slot: BackwardResultSlot, value: Tensor<T>) {
        match slot {
            BackwardResultSlot::Gradient => self.gradient = Some(value),
            BackwardResultSlot::WeightDerivatives => self.weight_derivatives = Some(value),
            BackwardResultSlot::BiasDerivatives => self.bias_derivatives = Some(value),
        }
    }
}

/// A layer: forward and backward algorithms over shared parameter and slots
pub trait LayerKind: 'static {
    /// Layer name used in errors and logs
    const NAME: &'static str;
    /// Element type
    type T: FloatElement;
    /// Auxiliary slots handed from forward to backward
    type Aux: AuxSlot;
    /// Configuration shared by both passes
    type Parameter: Validatable + Clone + Default;
    /// Forward algorithm
    type Forward: Algorithm<
            T = Self::T,
            Input = ForwardInput<Self::T>,
            Parameter = Self::Parameter,
            Result = ForwardResult<Self::T, Self::Aux>,
        >;
    /// Backward algorithm
    type Backward: Algorithm<
            T = Self::T,
            Input = BackwardInput<Self::T, Self::Aux>,
            Parameter = Self::Parameter,
            Result = BackwardResult<Self::T>,
        >;
}

/// Lifecycle of a [`Layer`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayerState {
    /// No parameter set
    Unconfigured,
    /// Parameter set, forward not run
    ForwardReady,
    /// Forward ran; layer data populated
    ForwardComputed,
    /// Incoming gradient set after a forward pass
    BackwardReady,
    /// Backward ran
    BackwardComputed,
}

/// One layer instance driving its forward and backward algorithms
///
/// Re-running forward discards the previous layer data and any backward
/// result. Backward without a preceding forward fails with
/// [`Error::MissingAuxiliaryData`].
pub struct Layer<L: LayerKind> {
    forward: Container<L::Forward>,
    backward: Container<L::Backward>,
    parameter: Option<L::Parameter>,
    forward_input: ForwardInput<L::T>,
    forward_result: ForwardResult<L::T, L::Aux>,
    input_gradient: Option<Tensor<L::T>>,
    backward_result: BackwardResult<L::T>,
    initialized: Vec<(ForwardInputSlot, Tensor<L::T>)>,
    state: LayerState,
}

impl<L: LayerKind> Layer<L> {
    /// Resolve both kernels on `runtime`; the layer starts unconfigured
    pub fn new(runtime: &Runtime) -> Result<Self> {
        Ok(Self {
            forward: Container::new(runtime, Method::DefaultDense)?,
            backward: Container::new(runtime, Method::DefaultDense)?,
            parameter: None,
            forward_input: ForwardInput::default(),
            forward_result: ForwardResult::default(),
            input_gradient: None,
            backward_result: BackwardResult::default(),
            initialized: Vec::new(),
            state: LayerState::Unconfigured,
        })
    }

    /// Resolve both kernels and set `parameter`
    pub fn with_parameter(runtime: &Runtime, parameter: L::Parameter) -> Result<Self> {
        let mut layer = Self::new(runtime)?;
        layer.configure(parameter)?;
        Ok(layer)
    }

    /// Set the parameter; discards forward and backward state
    ///
    /// Weights and biases the forward pass initialized are dropped too, so
    /// the next pass initializes them for the new geometry. Tensors the
    /// caller supplied are kept.
    pub fn configure(&mut self, parameter: L::Parameter) -> Result<()> {
        parameter.check(&())?;
        for (slot, tensor) in self.initialized.drain(..) {
            if self
                .forward_input
                .get(slot)
                .is_some_and(|t| t.shares_storage(&tensor))
            {
                self.forward_input.clear(slot);
            }
        }
        self.parameter = Some(parameter);
        self.forward_result = ForwardResult::default();
        self.input_gradient = None;
        self.backward_result = BackwardResult::default();
        self.state = LayerState::ForwardReady;
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> LayerState {
        self.state
    }

    /// Parameter, if configured
    pub fn parameter(&self) -> Option<&L::Parameter> {
        self.parameter.as_ref()
    }

    /// Forward input slots
    pub fn forward_input(&self) -> &ForwardInput<L::T> {
        &self.forward_input
    }

    /// Mutable forward input slots
    pub fn forward_input_mut(&mut self) -> &mut ForwardInput<L::T> {
        &mut self.forward_input
    }

    /// Set the layer input
    pub fn set_input(&mut self, data: Tensor<L::T>) {
        self.forward_input.data = Some(data);
    }

    /// Run the forward pass
    ///
    /// Weights and biases initialized by this pass are written back into
    /// the forward input so later passes reuse them.
    pub fn forward(&mut self) -> Result<&ForwardResult<L::T, L::Aux>> {
        let parameter = self.parameter.as_ref().ok_or(Error::MissingInput {
            slot: "parameter",
        })?;
        let mut result = ForwardResult::default();
        self.forward
            .compute(&self.forward_input, parameter, &mut result)?;

        for (slot, aux_slot) in [
            (ForwardInputSlot::Weights, L::Aux::WEIGHTS),
            (ForwardInputSlot::Biases, L::Aux::BIASES),
        ] {
            if let Some(aux) = aux_slot.and_then(|s| result.layer_data.get(s))
                && self.forward_input.get(slot).is_none()
            {
                self.forward_input.set(slot, aux.clone());
                self.initialized.push((slot, aux.clone()));
            }
        }

        self.forward_result = result;
        self.input_gradient = None;
        self.backward_result = BackwardResult::default();
        self.state = LayerState::ForwardComputed;
        tracing::trace!(layer = L::NAME, "forward computed");
        Ok(&self.forward_result)
    }

    /// Result of the last forward pass
    pub fn forward_result(&self) -> &ForwardResult<L::T, L::Aux> {
        &self.forward_result
    }

    /// Set the gradient flowing from the next layer
    pub fn set_input_gradient(&mut self, gradient: Tensor<L::T>) {
        self.input_gradient = Some(gradient);
        if self.state >= LayerState::ForwardComputed {
            self.state = LayerState::BackwardReady;
        }
    }

    /// Run the backward pass on the last forward pass's layer data
    pub fn backward(&mut self) -> Result<&BackwardResult<L::T>> {
        let parameter = self.parameter.clone().unwrap_or_default();
        let input = BackwardInput {
            input_gradient: self.input_gradient.clone(),
            layer_data: self.forward_result.layer_data.clone(),
        };
        let mut result = BackwardResult::default();
        self.backward.compute(&input, &parameter, &mut result)?;
        self.backward_result = result;
        self.state = LayerState::BackwardComputed;
        tracing::trace!(layer = L::NAME, "backward computed");
        Ok(&self.backward_result)
    }

    /// Result of the last backward pass
    pub fn backward_result(&self) -> &BackwardResult<L::T> {
        &self.backward_result
    }
}

/// Tensor of `shape` with entries drawn uniformly from `[low, high)`
pub(crate) fn uniform_tensor<T: Element>(
    shape: &[usize],
    low: f64,
    high: f64,
    seed: u64,
) -> Result<Tensor<T>> {
    if !(low < high && (high - low).is_finite()) {
        return Err(Error::invalid_argument(
            "initializer",
            format!("unusable range [{low}, {high})"),
        ));
    }
    let mut t = Tensor::new(shape)?;
    let mut rng = StdRng::seed_from_u64(seed);
    for v in t.as_mut_slice()? {
        *v = T::from_f64(rng.random_range(low..high));
    }
    Ok(t)
}

/// Check the optional tensor in `slot` against `expected`
pub(crate) fn check_optional(
    slot: &Option<Tensor<impl Element>>,
    arg: &'static str,
    expected: &[usize],
) -> Result<()> {
    match slot {
        Some(t) => t.expect_shape(arg, expected),
        None => Ok(()),
    }
}

pub(crate) fn register_kernels(registry: &mut KernelRegistry) {
    locally_connected2d::register_kernels::<f32>(registry);
    locally_connected2d::register_kernels::<f64>(registry);
    prelu::register_kernels::<f32>(registry);
    prelu::register_kernels::<f64>(registry);
    softmax::register_kernels(registry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_tensor_rejects_unusable_ranges() {
        for (low, high) in [
            (1.0, 1.0),
            (0.5, -0.5),
            (f64::NEG_INFINITY, f64::INFINITY),
            (0.0, f64::NAN),
        ] {
            let err = uniform_tensor::<f32>(&[2], low, high, 7).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument { .. }), "[{low}, {high}): {err:?}");
        }
        let t = uniform_tensor::<f64>(&[4, 3], -0.5, 0.5, 7).unwrap();
        assert!(t.as_slice().unwrap().iter().all(|v| (-0.5..0.5).contains(v)));
        assert_eq!(t, uniform_tensor::<f64>(&[4, 3], -0.5, 0.5, 7).unwrap());
    }
}
