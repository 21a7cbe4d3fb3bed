//! In-process executor running every node's tasks on the tokio runtime
//!
//! Each node owns a global workspace layered over one shared root, so blobs
//! placed in the root are visible everywhere but never snapshotted. Task
//! groups run one tokio task per node; tasks of a node run in order.

use async_trait::async_trait;
use checkpoint::{read_checkpoint, write_checkpoint, BlobMap};
use dashmap::DashMap;
use runtime_core::{
    Error, Executor, NodeId, Op, Result, Task, TaskGroup, Value, Workspace, WorkspaceType,
};
use std::sync::Arc;
use storage::{StorageBackend, StorageHandle};
use tracing::{debug, error, trace};

/// Reference [`Executor`] backed by in-memory workspaces
pub struct LocalExecutor {
    storage: StorageHandle,

    /// Parent of every node workspace
    shared: Arc<Workspace>,

    /// Node workspaces, created on first use
    workspaces: DashMap<NodeId, Arc<Workspace>>,
}

impl LocalExecutor {
    pub fn new(storage: StorageHandle) -> Self {
        Self {
            storage,
            shared: Arc::new(Workspace::new("shared")),
            workspaces: DashMap::new(),
        }
    }

    pub fn storage(&self) -> StorageHandle {
        self.storage.clone()
    }

    /// Root workspace whose blobs every node sees as shared
    pub fn shared_workspace(&self) -> Arc<Workspace> {
        self.shared.clone()
    }

    /// Global workspace of `node`
    pub fn workspace(&self, node: &str) -> Arc<Workspace> {
        self.workspaces
            .entry(node.to_string())
            .or_insert_with(|| Arc::new(Workspace::child(node, self.shared.clone())))
            .clone()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn run(&self, group: &TaskGroup) -> Result<()> {
        let workspace_type = group.workspace_type();
        let mut handles = Vec::new();

        for (node, tasks) in group.tasks_by_node() {
            let global = self.workspace(&node);
            let storage = self.storage.clone();
            handles.push(tokio::spawn(async move {
                run_node(node, tasks, global, workspace_type, storage).await
            }));
        }

        let mut first_error = None;
        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Internal {
                    message: format!("node task panicked: {}", e),
                }),
            };
            if let Err(e) = outcome {
                error!(error = %e, "Task group failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Run one node's slice of a group in insertion order
async fn run_node(
    node: NodeId,
    tasks: Vec<Task>,
    global: Arc<Workspace>,
    workspace_type: WorkspaceType,
    storage: StorageHandle,
) -> Result<()> {
    let workspace = match workspace_type {
        WorkspaceType::Global => global,
        WorkspaceType::Private => Arc::new(Workspace::child(format!("{}/private", node), global)),
    };

    for task in &tasks {
        run_task(&node, task, &workspace, storage.as_ref())
            .await
            .map_err(|e| Error::TaskFailed {
                task: task.name().to_string(),
                node: node.clone(),
                source: Box::new(e),
            })?;
    }
    debug!(node = %node, tasks = tasks.len(), "Node tasks complete");
    Ok(())
}

async fn run_task(
    node: &str,
    task: &Task,
    workspace: &Workspace,
    storage: &dyn StorageBackend,
) -> Result<()> {
    trace!(node, task = task.name(), workspace = workspace.name(), "Running task");
    for op in task.step().ops() {
        run_op(node, op, workspace, storage).await?;
    }
    for output in task.outputs() {
        output.resolve(workspace.fetch(output.blob())?);
    }
    Ok(())
}

async fn run_op(node: &str, op: &Op, workspace: &Workspace, storage: &dyn StorageBackend) -> Result<()> {
    match op {
        Op::ListBlobs {
            output,
            include_shared,
        } => {
            // The listing names its own output blob
            if !workspace.contains(output) {
                workspace.set(output, Value::Strings(Vec::new()));
            }
            let names = workspace.blob_names(*include_shared);
            workspace.set(output, Value::Strings(names));
        }
        Op::Save { blobs, location } => {
            let mut selected = BlobMap::new();
            for blob in blobs {
                selected.insert(blob.clone(), workspace.fetch(blob)?);
            }
            write_checkpoint(storage, location, node, &selected).await?;
        }
        Op::Load { blobs, location } => {
            let restored = read_checkpoint(storage, location, blobs).await?;
            for (blob, value) in restored {
                workspace.set(&blob, value);
            }
        }
        Op::CreateCounter {
            counter,
            init_count,
        } => {
            workspace.set(counter, Value::Int(*init_count));
        }
        Op::CountDown { counter, output } => {
            let mut finished = false;
            workspace.update(counter, |value| {
                let remaining = value.as_int(counter)?;
                if remaining > 0 {
                    *value = Value::Int(remaining - 1);
                } else {
                    finished = true;
                }
                Ok(())
            })?;
            workspace.set(output, Value::Bool(finished));
        }
        Op::Run { name, func } => {
            trace!(node, op = %name, "Running step function");
            func(workspace)?;
        }
    }
    Ok(())
}
