//! Storage - Pluggable checkpoint stores for the epoch job runtime
//!
//! Provides async storage operations with support for:
//! - Local filesystem with atomic writes
//! - Process memory, for tests and throwaway runs
//!
//! # Example
//!
//! ```no_run
//! use storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/snapshots");
//! storage.write("run.000001", Bytes::from(vec![1, 2, 3])).await?;
//! let data = storage.read("run.000001").await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;
mod memory;

use std::sync::Arc;

use runtime_core::{StorageBackendKind, StorageConfig};

pub use backend::StorageBackend;
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Shared handle to a storage backend
pub type StorageHandle = Arc<dyn StorageBackend>;

/// Build the backend selected by `config`
pub fn from_config(config: &StorageConfig) -> StorageHandle {
    match config.backend {
        StorageBackendKind::Local => Arc::new(LocalStorage::new(&config.base_path)),
        StorageBackendKind::Memory => Arc::new(MemoryStorage::new()),
    }
}
