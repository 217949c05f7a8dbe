//! Distributed execution: local partials on every node, merged on a master

use super::container::Container;
use super::traits::{Algorithm, Partial, Training};
use crate::error::{Error, Result};
use crate::runtime::{Method, Runtime};

/// Step 1, run on every node: statistics of the node's local data
///
/// The returned partial is [`Serializable`](crate::serialization::Serializable)
/// for the algorithms that support distributed mode, so it can be shipped to
/// the master.
pub struct DistributedStep1Local<A: Training> {
    container: Container<A>,
    input: A::Input,
    parameter: A::Parameter,
}

impl<A: Training> DistributedStep1Local<A> {
    /// Resolve the kernel for `method`
    pub fn new(runtime: &Runtime, method: Method, parameter: A::Parameter) -> Result<Self> {
        Ok(Self {
            container: Container::new(runtime, method)?,
            input: A::Input::default(),
            parameter,
        })
    }

    /// Local input slots
    pub fn input_mut(&mut self) -> &mut A::Input {
        &mut self.input
    }

    /// Replace the local input
    pub fn set_input(&mut self, input: A::Input) {
        self.input = input;
    }

    /// Compute the local partial result
    pub fn compute(&self) -> Result<A::Partial> {
        self.container.compute_partial(&self.input, &self.parameter)
    }
}

/// Step 2, run on the master: merge the partials of all nodes and finalize
pub struct DistributedStep2Master<A: Training> {
    container: Container<A>,
    parameter: A::Parameter,
    partials: Vec<A::Partial>,
    result: A::Result,
}

impl<A: Training> DistributedStep2Master<A> {
    /// Resolve the kernel for `method`
    pub fn new(runtime: &Runtime, method: Method, parameter: A::Parameter) -> Result<Self> {
        Ok(Self {
            container: Container::new(runtime, method)?,
            parameter,
            partials: Vec::new(),
            result: A::Result::default(),
        })
    }

    /// Queue the partial result of one node
    pub fn add_partial(&mut self, partial: A::Partial) {
        self.partials.push(partial);
    }

    /// Number of queued partials
    pub fn len(&self) -> usize {
        self.partials.len()
    }

    /// True when no partial was queued
    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    /// Merge every queued partial and finalize
    ///
    /// The merge is order independent; queued partials stay in place, so
    /// more nodes can report and the master finalize again.
    pub fn compute(&mut self) -> Result<&A::Result> {
        let (first, rest) = self.partials.split_first().ok_or(Error::MissingInput {
            slot: "partial results",
        })?;
        let mut merged = first.clone();
        for p in rest {
            merged.merge(p)?;
        }
        tracing::debug!(
            algorithm = %<A as Algorithm>::ID,
            partials = self.partials.len(),
            "distributed merge"
        );
        let mut result = A::Result::default();
        self.container
            .finalize(&merged, &self.parameter, &mut result)?;
        self.result = result;
        Ok(&self.result)
    }

    /// Result of the last compute
    pub fn result(&self) -> &A::Result {
        &self.result
    }
}

impl<A: Training> std::fmt::Debug for DistributedStep1Local<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedStep1Local")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl<A: Training> std::fmt::Debug for DistributedStep2Master<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedStep2Master")
            .field("container", &self.container)
            .field("partials", &self.partials.len())
            .finish_non_exhaustive()
    }
}
