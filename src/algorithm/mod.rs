//! Algorithm framework
//!
//! An algorithm object separates *what* it computes (its input, parameter
//! and result types), *how* (a kernel resolved from the
//! [`KernelRegistry`](crate::runtime::KernelRegistry) for the host tier) and
//! *when* (the execution-mode driver).
//!
//! ```text
//! Batch<A>                  one compute over all data
//! Online<A: Training>       compute per chunk, finalize_compute on demand
//! DistributedStep1Local<A>  partial per node
//! DistributedStep2Master<A> merge partials, finalize
//!            │
//!            ▼
//! Container<A>   check parameter → check input → allocate result → kernel
//! ```

mod batch;
mod container;
mod distributed;
mod online;
mod traits;

pub use batch::Batch;
pub use container::Container;
pub use distributed::{DistributedStep1Local, DistributedStep2Master};
pub use online::Online;
pub use traits::{Algorithm, Allocatable, Partial, SlotMapped, Training, Validatable};

use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::dtype::Element;

/// Attach a zeroed buffer of `shape` to `slot`, or check the one already there
pub(crate) fn ensure_tensor<T: Element>(
    slot: &mut Option<Tensor<T>>,
    arg: &'static str,
    shape: &[usize],
) -> Result<()> {
    match slot {
        Some(t) => {
            t.expect_shape(arg, shape)?;
            t.allocate()
        }
        None => {
            *slot = Some(Tensor::new(shape)?);
            Ok(())
        }
    }
}

/// Input tensor in `slot`, or a missing-input error
pub(crate) fn require_tensor<'a, T: Element>(
    slot: &'a Option<Tensor<T>>,
    name: &'static str,
) -> Result<&'a Tensor<T>> {
    match slot {
        Some(t) if t.is_allocated() => Ok(t),
        Some(_) => Err(Error::NotAllocated { arg: name }),
        None => Err(Error::MissingInput { slot: name }),
    }
}
