//! Online execution: accumulate chunk by chunk, finalize on demand

use super::container::Container;
use super::traits::{Algorithm, Partial, Training};
use crate::error::Result;
use crate::runtime::{Method, Runtime};

/// Incremental driver
///
/// Each [`compute`](Online::compute) consumes the chunk currently in the
/// input slots. The chunk's statistics are computed into a fresh partial and
/// merged into the accumulated state only when every step succeeded, so a
/// rejected chunk leaves earlier progress intact.
///
/// Chunk order changes floating-point rounding but not the result beyond
/// tolerance.
pub struct Online<A: Training> {
    container: Container<A>,
    input: A::Input,
    parameter: A::Parameter,
    partial: Option<A::Partial>,
    result: A::Result,
    n_chunks: usize,
}

impl<A: Training> Online<A> {
    /// Resolve the kernel for `method`
    pub fn new(runtime: &Runtime, method: Method, parameter: A::Parameter) -> Result<Self> {
        Ok(Self {
            container: Container::new(runtime, method)?,
            input: A::Input::default(),
            parameter,
            partial: None,
            result: A::Result::default(),
            n_chunks: 0,
        })
    }

    /// Input slots for the next chunk
    pub fn input_mut(&mut self) -> &mut A::Input {
        &mut self.input
    }

    /// Replace the input with the next chunk
    pub fn set_input(&mut self, input: A::Input) {
        self.input = input;
    }

    /// Configuration
    pub fn parameter(&self) -> &A::Parameter {
        &self.parameter
    }

    /// Accumulated statistics, if any chunk was consumed
    pub fn partial(&self) -> Option<&A::Partial> {
        self.partial.as_ref()
    }

    /// Number of chunks merged so far
    pub fn chunks(&self) -> usize {
        self.n_chunks
    }

    /// Result of the last finalize
    pub fn result(&self) -> &A::Result {
        &self.result
    }

    /// Consume the current chunk
    pub fn compute(&mut self) -> Result<()> {
        let chunk = self.container.compute_partial(&self.input, &self.parameter)?;
        match &mut self.partial {
            Some(acc) => {
                let mut merged = acc.clone();
                merged.merge(&chunk)?;
                *acc = merged;
            }
            None => self.partial = Some(chunk),
        }
        self.n_chunks += 1;
        tracing::trace!(algorithm = %A::ID, chunks = self.n_chunks, "online chunk accepted");
        Ok(())
    }

    /// Derive the result from everything accumulated so far
    ///
    /// Accumulation can continue afterwards.
    pub fn finalize_compute(&mut self) -> Result<&A::Result> {
        let partial = self.partial.as_ref().ok_or(crate::error::Error::MissingInput {
            slot: "partial results",
        })?;
        let mut result = A::Result::default();
        self.container
            .finalize(partial, &self.parameter, &mut result)?;
        self.result = result;
        tracing::debug!(algorithm = %A::ID, chunks = self.n_chunks, "online finalize");
        Ok(&self.result)
    }

    /// Drop all accumulated state
    pub fn reset(&mut self) {
        self.partial = None;
        self.result = A::Result::default();
        self.n_chunks = 0;
    }
}

impl<A: Training> std::fmt::Debug for Online<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Online")
            .field("algorithm", &<A as Algorithm>::ID)
            .field("chunks", &self.n_chunks)
            .finish()
    }
}
