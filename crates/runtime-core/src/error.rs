//! Error types for the epoch job runtime

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the epoch job runtime
#[derive(Error, Debug)]
pub enum Error {
    // Task model errors
    #[error("Task output not resolved yet: {blob} (owning task group has not run)")]
    OutputUnresolved { blob: String },

    #[error("No active task group to attach task {task} to")]
    NoActiveTaskGroup { task: String },

    #[error("Task {task} failed on node {node}: {source}")]
    TaskFailed {
        task: String,
        node: String,
        #[source]
        source: Box<Error>,
    },

    // Job errors
    #[error("No active job in the current context")]
    NoActiveJob,

    #[error("Invalid stop signal: {message}")]
    InvalidStopSignal { message: String },

    // Snapshot errors
    #[error("Snapshot manager used before init")]
    SnapshotNotInitialized,

    #[error("Snapshot manager handles a single node, got {count}")]
    TooManyNodes { count: usize },

    #[error("Node topology changed: expected {expected:?}, got {actual:?}")]
    TopologyChanged {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    // Blob errors
    #[error("Blob not found: {blob}")]
    BlobNotFound { blob: String },

    #[error("Blob {blob} has type {actual}, expected {expected}")]
    TypeMismatch {
        blob: String,
        expected: &'static str,
        actual: &'static str,
    },

    // Checkpoint errors
    #[error("Checkpoint not found: {checkpoint_id}")]
    CheckpointNotFound { checkpoint_id: String },

    #[error("Checkpoint corrupted: {checkpoint_id} - {reason}")]
    CheckpointCorrupted { checkpoint_id: String, reason: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if this error is a violated call-site contract rather
    /// than a runtime failure
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::OutputUnresolved { .. }
                | Error::NoActiveTaskGroup { .. }
                | Error::NoActiveJob
                | Error::InvalidStopSignal { .. }
                | Error::SnapshotNotInitialized
                | Error::TooManyNodes { .. }
                | Error::TopologyChanged { .. }
                | Error::InvalidConfig { .. }
        )
    }

    /// Unwraps task failures down to the error raised by the op itself
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::TaskFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_precondition() {
        let err = Error::TopologyChanged {
            expected: vec!["a".to_string(), "b".to_string()],
            actual: vec!["a".to_string(), "c".to_string()],
        };
        assert!(err.is_precondition());

        let err = Error::BlobNotFound {
            blob: "weights".to_string(),
        };
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_root_cause_unwraps_task_failure() {
        let err = Error::TaskFailed {
            task: "snapshot_save".to_string(),
            node: "local".to_string(),
            source: Box::new(Error::CheckpointCorrupted {
                checkpoint_id: "run.000001".to_string(),
                reason: "bad magic".to_string(),
            }),
        };
        assert!(!err.is_precondition());
        assert!(matches!(
            err.root_cause(),
            Error::CheckpointCorrupted { .. }
        ));
    }
}
