//! Discovery and retention of stored checkpoints

use runtime_core::{checkpoint_key, Epoch, Error, Result};
use storage::StorageBackend;
use tracing::{debug, info};

/// Epoch encoded in `key`, if it is a checkpoint key under `prefix`
pub fn parse_epoch(prefix: &str, key: &str) -> Option<Epoch> {
    let digits = key.strip_prefix(prefix)?.strip_prefix('.')?;
    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Epochs with a stored checkpoint under `prefix`, ascending
pub async fn list_epochs(storage: &dyn StorageBackend, prefix: &str) -> Result<Vec<Epoch>> {
    let keys = storage.list(&format!("{}.", prefix)).await?;
    let mut epochs: Vec<Epoch> = keys
        .iter()
        .filter_map(|key| parse_epoch(prefix, key))
        .collect();
    epochs.sort_unstable();
    debug!(prefix, count = epochs.len(), "Listed checkpoints");
    Ok(epochs)
}

/// Most recent checkpointed epoch, the natural resume point
pub async fn latest_epoch(storage: &dyn StorageBackend, prefix: &str) -> Result<Option<Epoch>> {
    Ok(list_epochs(storage, prefix).await?.last().copied())
}

/// Delete all but the newest `keep` checkpoints, returning the deleted epochs
pub async fn prune(storage: &dyn StorageBackend, prefix: &str, keep: usize) -> Result<Vec<Epoch>> {
    if keep == 0 {
        return Err(Error::InvalidConfig {
            message: "must keep at least one checkpoint".to_string(),
        });
    }

    let epochs = list_epochs(storage, prefix).await?;
    let excess = epochs.len().saturating_sub(keep);
    let doomed = epochs[..excess].to_vec();
    for epoch in &doomed {
        storage.delete(&checkpoint_key(prefix, *epoch)).await?;
    }

    if !doomed.is_empty() {
        info!(prefix, deleted = doomed.len(), kept = keep, "Pruned old checkpoints");
    }
    Ok(doomed)
}
