//! Runtime configuration types

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{DbType, Epoch, Error, Result};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Job settings
    pub job: JobConfig,

    /// Snapshot settings
    pub snapshot: SnapshotConfig,

    /// Storage settings
    pub storage: StorageConfig,

    /// Executor settings
    pub executor: ExecutorConfig,
}

impl RuntimeConfig {
    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.snapshot.enabled && self.snapshot.db_prefix.is_empty() {
            return Err(Error::InvalidConfig {
                message: "snapshot.db_prefix must not be empty".to_string(),
            });
        }
        if self.executor.io_threads == 0 {
            return Err(Error::InvalidConfig {
                message: "executor.io_threads must be at least 1".to_string(),
            });
        }
        if self.job.resume_from_epoch.is_some() && !self.snapshot.enabled {
            return Err(Error::InvalidConfig {
                message: "job.resume_from_epoch requires snapshots".to_string(),
            });
        }
        Ok(())
    }
}

/// Job configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Resume after this epoch's checkpoint instead of initializing
    pub resume_from_epoch: Option<Epoch>,
}

/// Snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Take a snapshot after init and after every epoch
    pub enabled: bool,

    /// Checkpoint path prefix
    pub db_prefix: String,

    /// Checkpoint payload encoding
    pub db_type: DbType,

    /// Snapshot every node of the init group under `{db_prefix}/{node}`
    pub multi_node: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_prefix: "snapshots/job".to_string(),
            db_type: DbType::default(),
            multi_node: false,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackendKind,

    /// Base path for storage
    pub base_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Local,
            base_path: "./data".to_string(),
        }
    }
}

/// Storage backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageBackendKind {
    /// Local filesystem
    Local,

    /// Process memory, lost on exit
    Memory,
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker threads of the Tokio runtime driving the job
    pub io_threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { io_threads: 4 }
    }
}
