//! Algorithm container: one resolved kernel plus the compute lifecycle

use super::traits::{Algorithm, Allocatable, Training, Validatable};
use crate::dtype::FloatElement;
use crate::error::Result;
use crate::runtime::{KernelContext, Method, Runtime, SimdLevel};
use tracing::debug_span;

/// Binds algorithm `A` to the kernel resolved for its method and host tier
///
/// The kernel is resolved once, in [`Container::new`]; an unregistered
/// (precision, method) pair is reported there and never at compute time.
/// A container is reusable across calls but holds no per-call state, so one
/// instance must not be driven from several threads at once through `&mut`
/// result buffers of the same object.
pub struct Container<A: Algorithm> {
    kernel: A::Kernel,
    method: Method,
    ctx: KernelContext,
}

impl<A: Algorithm> Container<A> {
    /// Resolve the kernel of `A` with `method` on `runtime`
    pub fn new(runtime: &Runtime, method: Method) -> Result<Self> {
        let (ctx, kernel) = runtime.resolve::<A>(method)?;
        tracing::trace!(
            algorithm = %A::ID,
            method = %method,
            level = %ctx.level(),
            "resolved kernel"
        );
        Ok(Self {
            kernel,
            method,
            ctx,
        })
    }

    /// Computation method
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Tier of the resolved kernel
    #[inline]
    pub fn level(&self) -> SimdLevel {
        self.ctx.level()
    }

    /// Kernel execution context
    #[inline]
    pub fn context(&self) -> &KernelContext {
        &self.ctx
    }

    fn span(&self, phase: &'static str) -> tracing::span::EnteredSpan {
        debug_span!(
            "compute",
            algorithm = %A::ID,
            precision = %<A::T as FloatElement>::PRECISION,
            method = %self.method,
            level = %self.ctx.level(),
            phase,
        )
        .entered()
    }

    /// Validate, allocate the result, run the kernel
    ///
    /// Parameter check, then input checks (structural, then against the
    /// method), then result allocation, then the kernel; the first failure is
    /// returned and later steps are skipped.
    pub fn compute(
        &self,
        input: &A::Input,
        parameter: &A::Parameter,
        result: &mut A::Result,
    ) -> Result<()> {
        let _span = self.span("batch");
        parameter.check(&())?;
        input.check(parameter)?;
        A::check_method(input, self.method)?;
        result.allocate(input, parameter)?;
        A::run(self.kernel, &self.ctx, input, parameter, result)
    }
}

impl<A: Training> Container<A> {
    /// Validate `input` and compute its partial statistics
    pub fn compute_partial(&self, input: &A::Input, parameter: &A::Parameter) -> Result<A::Partial> {
        let _span = self.span("partial");
        parameter.check(&())?;
        input.check(parameter)?;
        A::check_method(input, self.method)?;
        A::partial(self.kernel, &self.ctx, input, parameter)
    }

    /// Derive the result from accumulated statistics
    pub fn finalize(
        &self,
        partial: &A::Partial,
        parameter: &A::Parameter,
        result: &mut A::Result,
    ) -> Result<()> {
        let _span = self.span("finalize");
        parameter.check(&())?;
        A::finalize(self.kernel, &self.ctx, partial, parameter, result)
    }
}

impl<A: Algorithm> Clone for Container<A> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel,
            method: self.method,
            ctx: self.ctx.clone(),
        }
    }
}

impl<A: Algorithm> std::fmt::Debug for Container<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("algorithm", &A::ID)
            .field("method", &self.method)
            .field("level", &self.ctx.level())
            .finish()
    }
}
