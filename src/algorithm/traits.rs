//! Capability traits of algorithm objects

use crate::dtype::FloatElement;
use crate::error::Result;
use crate::runtime::{AlgorithmId, KernelContext, Method};

/// Structural validation
///
/// `Ctx` is whatever the check needs besides `self`: parameters validate on
/// their own (`Ctx = ()`), inputs validate against their parameter.
pub trait Validatable<Ctx: ?Sized = ()> {
    /// Fail with a configuration or structural error when invalid
    fn check(&self, ctx: &Ctx) -> Result<()>;
}

/// Result objects whose buffer shapes follow from the input and parameter
pub trait Allocatable<I, P> {
    /// Allocate missing buffers with their inferred shapes
    ///
    /// Buffers the caller already attached are kept when their shape matches
    /// the inferred one and rejected otherwise. Training results may leave
    /// their slots empty here; `finalize` sets them.
    fn allocate(&mut self, input: &I, parameter: &P) -> Result<()>;
}

/// Get/set access by a closed enumeration of named slots
pub trait SlotMapped {
    /// Slot names
    type Slot: Copy;
    /// Value stored in a slot
    type Value;

    /// Value in `slot`, if set
    fn get(&self, slot: Self::Slot) -> Option<&Self::Value>;

    /// Store `value` in `slot`, replacing any previous value
    fn set(&mut self, slot: Self::Slot, value: Self::Value);
}

/// One algorithm object: what it computes and the kernel type computing it
///
/// Implementors are zero-sized markers; the input, parameter and result
/// types carry the data.
pub trait Algorithm: Sized + 'static {
    /// Identity used as part of the kernel key
    const ID: AlgorithmId;

    /// Element type the kernel computes in
    type T: FloatElement;
    /// Input slots
    type Input: Validatable<Self::Parameter> + Default;
    /// Configuration
    type Parameter: Validatable + Clone;
    /// Result slots
    type Result: Allocatable<Self::Input, Self::Parameter> + Default;
    /// Kernel value: a function pointer or a table of them
    type Kernel: Copy + Send + Sync + 'static;

    /// Reject inputs the kernels of `method` cannot read
    ///
    /// Runs after the structural input check and before any allocation.
    fn check_method(_input: &Self::Input, _method: Method) -> Result<()> {
        Ok(())
    }

    /// Run `kernel` on validated input and allocated result
    fn run(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        input: &Self::Input,
        parameter: &Self::Parameter,
        result: &mut Self::Result,
    ) -> Result<()>;
}

/// Partial results of training algorithms
///
/// `merge` must be associative and commutative (up to floating-point
/// rounding) so that partials from any number of chunks or nodes can be
/// combined in any order.
pub trait Partial: Clone + Send {
    /// Fold `other` into `self`
    fn merge(&mut self, other: &Self) -> Result<()>;
}

/// Algorithms that accumulate sufficient statistics before finalizing
///
/// Batch computation is `partial` over all data followed by `finalize`;
/// online and distributed computation call the two halves separately.
pub trait Training: Algorithm {
    /// Accumulated state
    type Partial: Partial;

    /// Statistics of one chunk of input
    fn partial(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        input: &Self::Input,
        parameter: &Self::Parameter,
    ) -> Result<Self::Partial>;

    /// Derive the result from accumulated statistics
    fn finalize(
        kernel: Self::Kernel,
        ctx: &KernelContext,
        partial: &Self::Partial,
        parameter: &Self::Parameter,
        result: &mut Self::Result,
    ) -> Result<()>;
}
