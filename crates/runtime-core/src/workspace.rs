//! Named blob store backing a node's execution context
//!
//! A workspace may have a parent. Blobs reachable only through the parent
//! are "shared": they are visible to reads but are not listed when shared
//! blobs are excluded, so snapshotting never captures them.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::{BlobName, Error, Result, Value};

/// Thread-safe named blob store
#[derive(Debug)]
pub struct Workspace {
    /// Name used in logs
    name: String,

    /// Blobs owned by this workspace
    blobs: RwLock<BTreeMap<BlobName, Value>>,

    /// Workspace providing shared blobs
    parent: Option<Arc<Workspace>>,
}

impl Workspace {
    /// Create a root workspace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blobs: RwLock::new(BTreeMap::new()),
            parent: None,
        }
    }

    /// Create a workspace layered over `parent`
    pub fn child(name: impl Into<String>, parent: Arc<Workspace>) -> Self {
        Self {
            name: name.into(),
            blobs: RwLock::new(BTreeMap::new()),
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a blob, falling back to the parent chain
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.blobs.read().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Like [`Workspace::get`] but missing blobs are an error
    pub fn fetch(&self, name: &str) -> Result<Value> {
        self.get(name).ok_or_else(|| Error::BlobNotFound {
            blob: name.to_string(),
        })
    }

    /// True if the blob is visible from this workspace
    pub fn contains(&self, name: &str) -> bool {
        self.blobs.read().contains_key(name)
            || self.parent.as_ref().is_some_and(|p| p.contains(name))
    }

    /// Write a blob.
    ///
    /// A blob that already exists in an ancestor is updated in place there;
    /// anything else is created locally.
    pub fn set(&self, name: &str, value: Value) {
        {
            let mut blobs = self.blobs.write();
            if let Some(slot) = blobs.get_mut(name) {
                *slot = value;
                return;
            }
            let in_parent = self.parent.as_ref().is_some_and(|p| p.contains(name));
            if !in_parent {
                blobs.insert(name.to_string(), value);
                return;
            }
        }
        if let Some(parent) = &self.parent {
            parent.set(name, value);
        }
    }

    /// Read-modify-write a blob under a single lookup
    pub fn update<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Value) -> Result<()>,
    {
        let mut value = self.fetch(name)?;
        f(&mut value)?;
        self.set(name, value);
        Ok(())
    }

    /// Sorted names of visible blobs. With `include_shared = false` only
    /// blobs owned by this workspace are listed.
    pub fn blob_names(&self, include_shared: bool) -> Vec<BlobName> {
        let mut names: BTreeSet<BlobName> = self.blobs.read().keys().cloned().collect();
        if include_shared {
            if let Some(parent) = &self.parent {
                names.extend(parent.blob_names(true));
            }
        }
        names.into_iter().collect()
    }

    /// Number of blobs owned by this workspace
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
