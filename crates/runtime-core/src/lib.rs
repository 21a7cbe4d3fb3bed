//! Runtime Core - Foundation for the epoch job runtime
//!
//! Provides the task model (steps, tasks, task groups and resolvable
//! outputs), node workspaces, the executor interface, configuration and
//! error handling shared by the checkpoint and job crates.

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod runtime;
pub mod scope;
pub mod task;
pub mod types;
pub mod workspace;

pub use config::{
    ExecutorConfig, JobConfig, RuntimeConfig, SnapshotConfig, StorageBackendKind, StorageConfig,
};
pub use error::{Error, Result};
pub use executor::Executor;
pub use runtime::RuntimeManager;
pub use scope::{current_node, node_scope, ScopeGuard};
pub use task::{Op, OutputState, Step, StepFn, Task, TaskGroup, TaskOutput, WorkspaceType};
pub use types::*;
pub use workspace::Workspace;
