//! The operation pipeline.
//!
//! Each submitted URL becomes a [`Job`](crate::job::Job) driven by its own
//! task: resolve metadata, reserve an output name, download under the
//! download stage's permit, then transcode under the transcode stage's
//! permit. Both stages are [`FairSemaphore`](crate::sync::FairSemaphore)s, so
//! jobs are admitted to each stage in the order they queued for it.

mod config;
mod error;
mod run;
mod scheduler;
mod types;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use scheduler::Pipeline;
pub use types::{PipelineStatus, StageStatus};
