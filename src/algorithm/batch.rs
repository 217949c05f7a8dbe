//! Batch execution: one call consumes the whole input

use super::container::Container;
use super::traits::Algorithm;
use crate::error::Result;
use crate::runtime::{Method, Runtime};

/// Single-shot driver
///
/// Repeated [`compute`](Batch::compute) calls with the same input and
/// parameter produce the same output.
pub struct Batch<A: Algorithm> {
    container: Container<A>,
    input: A::Input,
    parameter: A::Parameter,
    result: A::Result,
}

impl<A: Algorithm> Batch<A> {
    /// Resolve the kernel for `method` and start with empty input slots
    pub fn new(runtime: &Runtime, method: Method, parameter: A::Parameter) -> Result<Self> {
        Ok(Self {
            container: Container::new(runtime, method)?,
            input: A::Input::default(),
            parameter,
            result: A::Result::default(),
        })
    }

    /// Same as [`Batch::new`] with the default method on the global runtime
    pub fn with_parameter(parameter: A::Parameter) -> Result<Self> {
        Self::new(Runtime::global(), Method::DefaultDense, parameter)
    }

    /// Input slots
    pub fn input(&self) -> &A::Input {
        &self.input
    }

    /// Mutable input slots
    pub fn input_mut(&mut self) -> &mut A::Input {
        &mut self.input
    }

    /// Replace the whole input
    pub fn set_input(&mut self, input: A::Input) {
        self.input = input;
    }

    /// Configuration
    pub fn parameter(&self) -> &A::Parameter {
        &self.parameter
    }

    /// Mutable configuration
    pub fn parameter_mut(&mut self) -> &mut A::Parameter {
        &mut self.parameter
    }

    /// Result of the last successful compute
    pub fn result(&self) -> &A::Result {
        &self.result
    }

    /// Take the result, leaving an empty one behind
    pub fn take_result(&mut self) -> A::Result {
        std::mem::take(&mut self.result)
    }

    /// Attach caller-provided result buffers for the next compute
    pub fn set_result(&mut self, result: A::Result) {
        self.result = result;
    }

    /// Container holding the resolved kernel
    pub fn container(&self) -> &Container<A> {
        &self.container
    }

    /// Compute from scratch
    ///
    /// Result buffers left by a previous call, or attached with
    /// [`Batch::set_result`], must have the inferred shape. Buffers a kernel
    /// fills (predictions, transforms) are written in place. Models and other
    /// values a training `finalize` derives are replaced by the new value;
    /// an attached one only fixes the expected shape.
    pub fn compute(&mut self) -> Result<&A::Result> {
        self.container
            .compute(&self.input, &self.parameter, &mut self.result)?;
        Ok(&self.result)
    }
}

impl<A: Algorithm> std::fmt::Debug for Batch<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}
