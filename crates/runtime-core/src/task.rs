//! Task model: steps, tasks, resolvable outputs and task groups

use parking_lot::RwLock;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::scope::{self, ScopeGuard, ScopeStack};
use crate::{BlobName, CheckpointLocation, Error, NodeId, Result, Value, Workspace};

/// User-supplied work run against a node workspace
pub type StepFn = Arc<dyn Fn(&Workspace) -> Result<()> + Send + Sync>;

/// Primitive operation understood by executors
#[derive(Clone)]
pub enum Op {
    /// Write the sorted names of all blobs into `output`, the output blob
    /// itself included
    ListBlobs {
        output: BlobName,
        include_shared: bool,
    },

    /// Serialize `blobs` into the checkpoint at `location`
    Save {
        blobs: Vec<BlobName>,
        location: CheckpointLocation,
    },

    /// Restore `blobs` from the checkpoint at `location`
    Load {
        blobs: Vec<BlobName>,
        location: CheckpointLocation,
    },

    /// Create an integer counter
    CreateCounter { counter: BlobName, init_count: i64 },

    /// Write `true` to `output` if the counter is already zero, otherwise
    /// decrement it and write `false`
    CountDown { counter: BlobName, output: BlobName },

    /// Arbitrary work
    Run { name: String, func: StepFn },
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::ListBlobs {
                output,
                include_shared,
            } => f
                .debug_struct("ListBlobs")
                .field("output", output)
                .field("include_shared", include_shared)
                .finish(),
            Op::Save { blobs, location } => f
                .debug_struct("Save")
                .field("blobs", blobs)
                .field("location", location)
                .finish(),
            Op::Load { blobs, location } => f
                .debug_struct("Load")
                .field("blobs", blobs)
                .field("location", location)
                .finish(),
            Op::CreateCounter {
                counter,
                init_count,
            } => f
                .debug_struct("CreateCounter")
                .field("counter", counter)
                .field("init_count", init_count)
                .finish(),
            Op::CountDown { counter, output } => f
                .debug_struct("CountDown")
                .field("counter", counter)
                .field("output", output)
                .finish(),
            Op::Run { name, .. } => f.debug_struct("Run").field("name", name).finish(),
        }
    }
}

/// Ordered list of ops, built fluently
#[derive(Debug, Clone, Default)]
pub struct Step {
    ops: Vec<Op>,
}

impl Step {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_blobs(mut self, output: impl Into<BlobName>, include_shared: bool) -> Self {
        self.ops.push(Op::ListBlobs {
            output: output.into(),
            include_shared,
        });
        self
    }

    pub fn save(mut self, blobs: Vec<BlobName>, location: CheckpointLocation) -> Self {
        self.ops.push(Op::Save { blobs, location });
        self
    }

    pub fn load(mut self, blobs: Vec<BlobName>, location: CheckpointLocation) -> Self {
        self.ops.push(Op::Load { blobs, location });
        self
    }

    pub fn create_counter(mut self, counter: impl Into<BlobName>, init_count: i64) -> Self {
        self.ops.push(Op::CreateCounter {
            counter: counter.into(),
            init_count,
        });
        self
    }

    pub fn count_down(mut self, counter: impl Into<BlobName>, output: impl Into<BlobName>) -> Self {
        self.ops.push(Op::CountDown {
            counter: counter.into(),
            output: output.into(),
        });
        self
    }

    pub fn run<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Workspace) -> Result<()> + Send + Sync + 'static,
    {
        self.ops.push(Op::Run {
            name: name.into(),
            func: Arc::new(func),
        });
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Resolution state of a task output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputState {
    /// Owning group has not executed yet
    Unresolved,

    /// Value captured by the last execution
    Resolved(Value),
}

#[derive(Debug)]
struct OutputSlot {
    blob: BlobName,
    state: RwLock<OutputState>,
}

/// Handle to a blob produced by a task, readable once the task has run
#[derive(Debug, Clone)]
pub struct TaskOutput {
    slot: Arc<OutputSlot>,
}

impl TaskOutput {
    pub fn new(blob: impl Into<BlobName>) -> Self {
        Self {
            slot: Arc::new(OutputSlot {
                blob: blob.into(),
                state: RwLock::new(OutputState::Unresolved),
            }),
        }
    }

    /// Blob this output reads
    pub fn blob(&self) -> &str {
        &self.slot.blob
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.state.read(), OutputState::Resolved(_))
    }

    /// Value captured by the last execution of the owning task
    pub fn fetch(&self) -> Result<Value> {
        match &*self.slot.state.read() {
            OutputState::Resolved(value) => Ok(value.clone()),
            OutputState::Unresolved => Err(Error::OutputUnresolved {
                blob: self.slot.blob.clone(),
            }),
        }
    }

    /// Record the value produced by an execution. Called by executors.
    pub fn resolve(&self, value: Value) {
        *self.slot.state.write() = OutputState::Resolved(value);
    }

    /// True if both handles refer to the same output
    pub fn ptr_eq(&self, other: &TaskOutput) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

/// Schedulable unit of work owned by one node
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    node: NodeId,
    step: Step,
    outputs: Vec<TaskOutput>,
}

impl Task {
    /// Create a task on the node of the innermost node scope
    pub fn new(name: impl Into<String>, step: Step) -> Self {
        Self {
            name: name.into(),
            node: scope::current_node(),
            step,
            outputs: Vec::new(),
        }
    }

    /// Declare blobs this task exposes as outputs
    pub fn with_outputs<I, S>(mut self, blobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<BlobName>,
    {
        self.outputs.extend(blobs.into_iter().map(TaskOutput::new));
        self
    }

    /// Pin the task to an explicit node
    pub fn on_node(mut self, node: impl Into<NodeId>) -> Self {
        self.node = node.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn outputs(&self) -> &[TaskOutput] {
        &self.outputs
    }

    /// Add this task to the innermost entered task group
    pub fn attach(self) -> Result<Vec<TaskOutput>> {
        let group = TaskGroup::current().ok_or_else(|| Error::NoActiveTaskGroup {
            task: self.name.clone(),
        })?;
        Ok(group.add(self))
    }
}

/// Workspace a group's tasks run in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkspaceType {
    /// Tasks run on a scratch layer over the node workspace; blobs they
    /// create are dropped when the group finishes
    #[default]
    Private,

    /// Tasks run directly on the node workspace
    Global,
}

#[derive(Debug, Default)]
struct TaskGroupInner {
    tasks: Vec<Task>,
    used_nodes: Vec<NodeId>,
}

thread_local! {
    static GROUPS: ScopeStack<TaskGroup> = const { RefCell::new(Vec::new()) };
}

/// Ordered, append-only collection of tasks executed as one unit
#[derive(Debug, Clone)]
pub struct TaskGroup {
    inner: Arc<RwLock<TaskGroupInner>>,
    workspace_type: WorkspaceType,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new(WorkspaceType::default())
    }
}

impl TaskGroup {
    pub fn new(workspace_type: WorkspaceType) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TaskGroupInner::default())),
            workspace_type,
        }
    }

    pub fn global() -> Self {
        Self::new(WorkspaceType::Global)
    }

    pub fn private() -> Self {
        Self::new(WorkspaceType::Private)
    }

    pub fn workspace_type(&self) -> WorkspaceType {
        self.workspace_type
    }

    /// Append a task, returning handles to its outputs
    pub fn add(&self, task: Task) -> Vec<TaskOutput> {
        let outputs = task.outputs.clone();
        let mut inner = self.inner.write();
        if !inner.used_nodes.iter().any(|n| n == &task.node) {
            inner.used_nodes.push(task.node.clone());
        }
        inner.tasks.push(task);
        outputs
    }

    /// Snapshot of the tasks in insertion order
    pub fn tasks(&self) -> Vec<Task> {
        self.inner.read().tasks.clone()
    }

    /// Nodes that contributed work, in order of first contribution
    pub fn used_nodes(&self) -> Vec<NodeId> {
        self.inner.read().used_nodes.clone()
    }

    /// Tasks split per node, nodes in order of first contribution
    pub fn tasks_by_node(&self) -> Vec<(NodeId, Vec<Task>)> {
        let inner = self.inner.read();
        inner
            .used_nodes
            .iter()
            .map(|node| {
                let tasks = inner
                    .tasks
                    .iter()
                    .filter(|t| &t.node == node)
                    .cloned()
                    .collect();
                (node.clone(), tasks)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make this group the attachment target for [`Task::attach`]
    pub fn enter(&self) -> ScopeGuard<TaskGroup> {
        scope::enter(&GROUPS, self.clone())
    }

    /// Innermost entered group
    pub fn current() -> Option<TaskGroup> {
        scope::current(&GROUPS)
    }

    /// True if both handles refer to the same group
    pub fn ptr_eq(&self, other: &TaskGroup) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
