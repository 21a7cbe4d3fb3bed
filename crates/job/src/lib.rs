//! Epoch jobs: definition, stop conditions and the checkpointing runner
//!
//! A [`Job`] collects init, epoch and exit task groups. A [`JobRunner`]
//! executes them through an [`Executor`](runtime_core::Executor), saving a
//! snapshot after init and after every epoch, and can resume a job from any
//! saved epoch. [`LocalExecutor`] runs everything in process.

pub mod executor;
pub mod job;
pub mod limiter;
pub mod runner;

pub use executor::LocalExecutor;
pub use job::{Job, JobGuard, StopSignal};
pub use limiter::epoch_limiter;
pub use runner::{JobRunner, RunnerState};
