//! Executor interface consumed by the job runner

use async_trait::async_trait;

use crate::{Result, TaskGroup};

/// Runs task groups to completion
///
/// `run` is a barrier: it returns only after every task of the group has
/// finished on every node that owns part of it, and fails if any task
/// failed. Implementations resolve task outputs before returning.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, group: &TaskGroup) -> Result<()>;
}
