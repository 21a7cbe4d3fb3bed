//! In-process storage backend

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use runtime_core::{Error, Result};
use std::sync::Arc;

use crate::StorageBackend;

/// Keeps artifacts in a concurrent map. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Bytes> {
        self.entries
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::StoragePathNotFound {
                path: key.to_string(),
            })
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<u64> {
        let size = data.len() as u64;
        self.entries.insert(key.to_string(), data);
        Ok(size)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::StoragePathNotFound {
                path: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
