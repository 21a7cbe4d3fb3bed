//! Storage backend trait definition
//!
//! Checkpoint artifacts are addressed by string keys such as
//! `"snapshots/node-a.000003"`.

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::Result;

/// Async key/value interface every checkpoint store implements
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the artifact stored under `key`
    ///
    /// # Errors
    /// `StoragePathNotFound` if the key does not exist
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Store `data` under `key`, replacing any previous artifact
    ///
    /// Readers must never observe a partially written artifact.
    ///
    /// # Returns
    /// Number of bytes written
    async fn write(&self, key: &str, data: Bytes) -> Result<u64>;

    /// Delete the artifact stored under `key`
    ///
    /// # Errors
    /// `StoragePathNotFound` if the key does not exist
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Sorted keys starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
