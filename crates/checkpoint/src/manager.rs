//! Per-node snapshot manager
//!
//! Builds the tasks that discover which blobs a node owns, save them after
//! init and after every epoch, and load them back when a job resumes.

use parking_lot::RwLock;
use runtime_core::{
    checkpoint_key, BlobName, CheckpointId, CheckpointLocation, DbType, Epoch, Error, NodeId,
    Result, Step, Task, TaskGroup,
};
use tracing::debug;

/// Blob holding the list of snapshotted blob names. It is saved alongside
/// the other blobs so a resumed run can recover the list from any
/// checkpoint.
pub const BLOB_NAMES: &str = "snapshot/blob_names";

/// Per-node snapshot strategy used by [`MultiNodeSnapshotManager`]
///
/// [`MultiNodeSnapshotManager`]: crate::MultiNodeSnapshotManager
pub trait NodeSnapshot: Send + Sync {
    /// Task discovering (or, when resuming, loading) the blob-name list
    fn init(&mut self, nodes: &[NodeId], retrieve_from_epoch: Option<Epoch>) -> Result<Task>;

    /// Task restoring every listed blob from the checkpoint at `epoch`
    fn load(&self, epoch: Epoch) -> Result<Task>;

    /// Task persisting every listed blob into the checkpoint at `epoch`
    fn save(&self, epoch: Epoch) -> Result<Task>;
}

/// Group-level snapshot interface driven by the job runner
pub trait SnapshotController: Send + Sync {
    /// Work to run once after the init phase. `None` means nothing to run.
    fn init(
        &mut self,
        nodes: &[NodeId],
        retrieve_from_epoch: Option<Epoch>,
    ) -> Result<Option<TaskGroup>>;

    fn load(&self, epoch: Epoch) -> Result<TaskGroup>;

    fn save(&self, epoch: Epoch) -> Result<TaskGroup>;
}

/// Snapshots the blobs of a single node
#[derive(Debug)]
pub struct SnapshotManager {
    /// Checkpoint path prefix
    db_prefix: String,

    /// Payload encoding
    db_type: DbType,

    /// Node the tasks run on, fixed by `init`
    node: Option<NodeId>,

    /// Output of the init task
    names_output: Option<runtime_core::TaskOutput>,

    /// Blob names resolved from `names_output`
    blob_list: RwLock<Option<Vec<BlobName>>>,
}

impl SnapshotManager {
    pub fn new(db_prefix: impl Into<String>, db_type: DbType) -> Self {
        Self {
            db_prefix: db_prefix.into(),
            db_type,
            node: None,
            names_output: None,
            blob_list: RwLock::new(None),
        }
    }

    pub fn db_prefix(&self) -> &str {
        &self.db_prefix
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }

    /// Storage key of the checkpoint for `epoch`
    pub fn checkpoint_id(&self, epoch: Epoch) -> CheckpointId {
        checkpoint_key(&self.db_prefix, epoch)
    }

    fn location(&self, epoch: Epoch) -> CheckpointLocation {
        CheckpointLocation::new(self.db_prefix.clone(), epoch, self.db_type)
    }

    fn task(&self, name: &str, step: Step) -> Task {
        let task = Task::new(name, step);
        match &self.node {
            Some(node) => task.on_node(node.clone()),
            None => task,
        }
    }

    /// Build the task that determines which blobs get snapshotted.
    ///
    /// A fresh run lists every blob the node owns; a resumed run loads the
    /// list saved in the checkpoint of `retrieve_from_epoch`.
    pub fn init(&mut self, nodes: &[NodeId], retrieve_from_epoch: Option<Epoch>) -> Result<Task> {
        if nodes.len() > 1 {
            return Err(Error::TooManyNodes { count: nodes.len() });
        }
        self.node = nodes.first().cloned();

        let step = match retrieve_from_epoch {
            None => Step::new().list_blobs(BLOB_NAMES, false),
            Some(epoch) => Step::new().load(vec![BLOB_NAMES.to_string()], self.location(epoch)),
        };
        let task = self.task("get_blob_list", step).with_outputs([BLOB_NAMES]);

        self.names_output = task.outputs().first().cloned();
        *self.blob_list.write() = None;

        debug!(
            db_prefix = %self.db_prefix,
            node = task.node(),
            retrieve_from_epoch = ?retrieve_from_epoch,
            "Built snapshot init task"
        );
        Ok(task)
    }

    /// Names of the blobs this manager snapshots.
    ///
    /// Fails until the task returned by `init` has executed.
    pub fn blob_list(&self) -> Result<Vec<BlobName>> {
        if let Some(names) = self.blob_list.read().as_ref() {
            return Ok(names.clone());
        }

        let output = self
            .names_output
            .as_ref()
            .ok_or(Error::SnapshotNotInitialized)?;
        let value = output.fetch()?;
        let names = value.as_strings(output.blob())?.to_vec();

        *self.blob_list.write() = Some(names.clone());
        Ok(names)
    }

    /// Build the task restoring all listed blobs from `epoch`
    pub fn load(&self, epoch: Epoch) -> Result<Task> {
        let step = Step::new().load(self.blob_list()?, self.location(epoch));
        Ok(self.task("snapshot_load", step))
    }

    /// Build the task saving all listed blobs as checkpoint `epoch`
    pub fn save(&self, epoch: Epoch) -> Result<Task> {
        let step = Step::new().save(self.blob_list()?, self.location(epoch));
        Ok(self.task("snapshot_save", step))
    }
}

impl NodeSnapshot for SnapshotManager {
    fn init(&mut self, nodes: &[NodeId], retrieve_from_epoch: Option<Epoch>) -> Result<Task> {
        SnapshotManager::init(self, nodes, retrieve_from_epoch)
    }

    fn load(&self, epoch: Epoch) -> Result<Task> {
        SnapshotManager::load(self, epoch)
    }

    fn save(&self, epoch: Epoch) -> Result<Task> {
        SnapshotManager::save(self, epoch)
    }
}

fn single_task_group(task: Task) -> TaskGroup {
    let group = TaskGroup::global();
    group.add(task);
    group
}

impl SnapshotController for SnapshotManager {
    fn init(
        &mut self,
        nodes: &[NodeId],
        retrieve_from_epoch: Option<Epoch>,
    ) -> Result<Option<TaskGroup>> {
        SnapshotManager::init(self, nodes, retrieve_from_epoch).map(|t| Some(single_task_group(t)))
    }

    fn load(&self, epoch: Epoch) -> Result<TaskGroup> {
        SnapshotManager::load(self, epoch).map(single_task_group)
    }

    fn save(&self, epoch: Epoch) -> Result<TaskGroup> {
        SnapshotManager::save(self, epoch).map(single_task_group)
    }
}
