//! Local filesystem storage backend
//!
//! Each key maps to one file under the base directory. Writes go to a
//! hidden temp file first and are renamed into place, so a reader never
//! observes a half-written checkpoint.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::{Error, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::StorageBackend;

/// Filesystem-backed key/value store for checkpoint artifacts
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Directory all keys are resolved against
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a key to a file path, refusing keys that escape the base dir
    fn resolve_key(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(Error::Storage {
                message: format!("Invalid storage key: {:?}", key),
            });
        }
        Ok(self.base_path.join(relative))
    }

    /// Hidden sibling used for the atomic write
    fn temp_path(full_path: &Path) -> PathBuf {
        let temp_name = format!(
            ".{}.{}.tmp",
            full_path.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );
        full_path.with_file_name(temp_name)
    }

    fn is_temp_file(path: &Path) -> bool {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        name.starts_with('.') && name.ends_with(".tmp")
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, key: &str) -> Result<Bytes> {
        let full_path = self.resolve_key(key)?;
        debug!(?full_path, "Reading checkpoint artifact");

        match fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::StoragePathNotFound {
                path: key.to_string(),
            }),
            Err(e) => Err(Error::Storage {
                message: format!("Failed to read {}: {}", key, e),
            }),
        }
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn write(&self, key: &str, data: Bytes) -> Result<u64> {
        let full_path = self.resolve_key(key)?;
        let temp_path = Self::temp_path(&full_path);
        let size = data.len() as u64;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage {
                    message: format!("Failed to create directory {:?}: {}", parent, e),
                })?;
        }

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to create temp file {:?}: {}", temp_path, e),
            })?;

        file.write_all(&data).await.map_err(|e| Error::Storage {
            message: format!("Failed to write {}: {}", key, e),
        })?;

        file.sync_all().await.map_err(|e| Error::Storage {
            message: format!("Failed to sync {}: {}", key, e),
        })?;

        fs::rename(&temp_path, &full_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to rename {:?} to {:?}: {}", temp_path, full_path, e),
            })?;

        debug!(?full_path, size, "Checkpoint artifact written");
        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.resolve_key(key)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::StoragePathNotFound {
                path: key.to_string(),
            }),
            Err(e) => Err(Error::Storage {
                message: format!("Failed to delete {}: {}", key, e),
            }),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.resolve_key(key)?;
        Ok(fs::metadata(&full_path).await.is_ok())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let search_path = self.base_path.join(prefix);
        let mut results = Vec::new();

        // A prefix like "run/node-a." names a file stem, so scan its parent
        let dir_to_scan = if prefix.is_empty() || prefix.ends_with('/') {
            search_path
        } else {
            match search_path.parent() {
                Some(parent) => parent.to_path_buf(),
                None => return Ok(results),
            }
        };
        if !fs::metadata(&dir_to_scan).await.is_ok_and(|m| m.is_dir()) {
            return Ok(results);
        }

        let mut stack = vec![dir_to_scan];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let entry_path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    Err(_) => continue,
                };

                if metadata.is_dir() {
                    stack.push(entry_path);
                } else if metadata.is_file() && !Self::is_temp_file(&entry_path) {
                    if let Ok(relative) = entry_path.strip_prefix(&self.base_path) {
                        let key = relative.to_string_lossy().to_string();
                        if key.starts_with(prefix) {
                            results.push(key);
                        }
                    }
                }
            }
        }

        results.sort();
        debug!(prefix, count = results.len(), "Listed checkpoint artifacts");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());
        (temp_dir, storage)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (_temp_dir, storage) = setup();
        let data = Bytes::from("hello world");

        let written = storage.write("run.000000", data.clone()).await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(storage.read("run.000000").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let (_temp_dir, storage) = setup();

        storage
            .write("snapshots/node-a.000001", Bytes::from("nested"))
            .await
            .unwrap();
        assert!(storage.exists("snapshots/node-a.000001").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_missing_keys() {
        let (_temp_dir, storage) = setup();

        storage.write("run.000002", Bytes::from("x")).await.unwrap();
        storage.delete("run.000002").await.unwrap();
        assert!(!storage.exists("run.000002").await.unwrap());

        let result = storage.delete("run.000002").await;
        assert!(matches!(result, Err(Error::StoragePathNotFound { .. })));
        let result = storage.read("run.000002").await;
        assert!(matches!(result, Err(Error::StoragePathNotFound { .. })));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_temp_dir, storage) = setup();

        for key in ["", "../outside", "/etc/passwd"] {
            let result = storage.write(key, Bytes::from("x")).await;
            assert!(matches!(result, Err(Error::Storage { .. })), "key {:?}", key);
        }
    }

    #[tokio::test]
    async fn test_list_by_stem_prefix() {
        let (_temp_dir, storage) = setup();

        for key in [
            "snapshots/node-a.000000",
            "snapshots/node-a.000001",
            "snapshots/node-b.000000",
        ] {
            storage.write(key, Bytes::from("1")).await.unwrap();
        }

        let node_a = storage.list("snapshots/node-a.").await.unwrap();
        assert_eq!(
            node_a,
            vec![
                "snapshots/node-a.000000".to_string(),
                "snapshots/node-a.000001".to_string()
            ]
        );

        assert_eq!(storage.list("snapshots/").await.unwrap().len(), 3);
        assert_eq!(storage.list("").await.unwrap().len(), 3);
        assert!(storage.list("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let (temp_dir, storage) = setup();

        storage
            .write("atomic.000000", Bytes::from("complete data"))
            .await
            .unwrap();

        let temp_files: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(temp_files.is_empty(), "Temp files should be cleaned up");
    }
}
