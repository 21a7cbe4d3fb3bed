//! Snapshot coordination across the nodes of a distributed job
//!
//! Every operation fans out to one per-node manager and aggregates the
//! per-node tasks into a single task group, each task tagged with its node.

use runtime_core::{node_scope, DbType, Epoch, Error, NodeId, Result, Task, TaskGroup};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::manager::{NodeSnapshot, SnapshotController, SnapshotManager};

/// Builds the per-node manager from its checkpoint prefix and db type
pub type NodeManagerFactory = Arc<dyn Fn(String, DbType) -> Box<dyn NodeSnapshot> + Send + Sync>;

/// Checkpoint prefix of `node` under a shared prefix
pub fn node_prefix(shared_prefix: &str, node: &str) -> String {
    Path::new(shared_prefix)
        .join(node)
        .to_string_lossy()
        .to_string()
}

/// Fans snapshot operations out over a fixed set of nodes
pub struct MultiNodeSnapshotManager {
    /// Prefix shared by every node's checkpoints
    db_prefix: String,

    /// Payload encoding
    db_type: DbType,

    /// Per-node manager constructor
    factory: NodeManagerFactory,

    /// Set on the first `init`, never changed afterwards
    node_managers: Option<Vec<(NodeId, Box<dyn NodeSnapshot>)>>,
}

impl MultiNodeSnapshotManager {
    /// Manager using [`SnapshotManager`] on every node
    pub fn new(db_prefix: impl Into<String>, db_type: DbType) -> Self {
        Self::with_factory(
            db_prefix,
            db_type,
            Arc::new(|prefix: String, db_type: DbType| {
                Box::new(SnapshotManager::new(prefix, db_type)) as Box<dyn NodeSnapshot>
            }),
        )
    }

    /// Manager building each node's manager through `factory`
    pub fn with_factory(
        db_prefix: impl Into<String>,
        db_type: DbType,
        factory: NodeManagerFactory,
    ) -> Self {
        Self {
            db_prefix: db_prefix.into(),
            db_type,
            factory,
            node_managers: None,
        }
    }

    /// Nodes recorded by the first `init`
    pub fn nodes(&self) -> Option<Vec<NodeId>> {
        self.node_managers
            .as_ref()
            .map(|managers| managers.iter().map(|(node, _)| node.clone()).collect())
    }

    /// Build the init group on the first call. Later calls must pass the
    /// same nodes and return `None`.
    pub fn init(
        &mut self,
        nodes: &[NodeId],
        retrieve_from_epoch: Option<Epoch>,
    ) -> Result<Option<TaskGroup>> {
        if let Some(recorded) = self.nodes() {
            if recorded != nodes {
                return Err(Error::TopologyChanged {
                    expected: recorded,
                    actual: nodes.to_vec(),
                });
            }
            return Ok(None);
        }

        let group = TaskGroup::global();
        let mut managers = Vec::with_capacity(nodes.len());
        for node in nodes {
            let _node = node_scope(node.clone());
            let mut manager = (self.factory)(node_prefix(&self.db_prefix, node), self.db_type);
            group.add(manager.init(std::slice::from_ref(node), retrieve_from_epoch)?);
            managers.push((node.clone(), manager));
        }

        info!(
            db_prefix = %self.db_prefix,
            nodes = ?nodes,
            retrieve_from_epoch = ?retrieve_from_epoch,
            "Multi-node snapshot initialized"
        );
        self.node_managers = Some(managers);
        Ok(Some(group))
    }

    fn task_group<F>(&self, build: F) -> Result<TaskGroup>
    where
        F: Fn(&dyn NodeSnapshot) -> Result<Task>,
    {
        let managers = self
            .node_managers
            .as_ref()
            .ok_or(Error::SnapshotNotInitialized)?;

        let group = TaskGroup::global();
        for (node, manager) in managers {
            let _node = node_scope(node.clone());
            group.add(build(&**manager)?);
        }
        Ok(group)
    }

    pub fn load(&self, epoch: Epoch) -> Result<TaskGroup> {
        self.task_group(|manager| manager.load(epoch))
    }

    pub fn save(&self, epoch: Epoch) -> Result<TaskGroup> {
        self.task_group(|manager| manager.save(epoch))
    }
}

impl SnapshotController for MultiNodeSnapshotManager {
    fn init(
        &mut self,
        nodes: &[NodeId],
        retrieve_from_epoch: Option<Epoch>,
    ) -> Result<Option<TaskGroup>> {
        MultiNodeSnapshotManager::init(self, nodes, retrieve_from_epoch)
    }

    fn load(&self, epoch: Epoch) -> Result<TaskGroup> {
        MultiNodeSnapshotManager::load(self, epoch)
    }

    fn save(&self, epoch: Epoch) -> Result<TaskGroup> {
        MultiNodeSnapshotManager::save(self, epoch)
    }
}
