//! Admission primitives for the pipeline stages.
//!
//! - [`FairSemaphore`]: counting semaphore that serves waiters in arrival order
//!   and supports cancellable waits.
//! - [`ScopedPermit`]: owns one permit request and guarantees the permit is
//!   given back exactly once, whatever way the holder exits.

mod fair_semaphore;
mod scoped_permit;

pub use fair_semaphore::{Acquire, AcquireError, FairSemaphore};
pub use scoped_permit::ScopedPermit;
