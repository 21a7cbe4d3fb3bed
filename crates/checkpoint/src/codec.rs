//! Checkpoint artifact format
//!
//! Layout (little endian):
//!
//! ```text
//! magic "CKPT" | version u32 | epoch u64 | db_type u8 | payload_len u64
//! | metadata_len u32 | metadata json | payload
//! ```
//!
//! The payload is the map of blob name to value, encoded with bincode or
//! JSON depending on the db type.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use runtime_core::{BlobName, CheckpointLocation, DbType, Epoch, Error, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use storage::StorageBackend;
use tracing::{debug, info, instrument, warn};

/// Magic bytes for checkpoint files
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"CKPT";

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Fixed-size part of the header
const FIXED_HEADER_LEN: usize = 4 + 4 + 8 + 1 + 8 + 4;

/// Blob map stored in one checkpoint
pub type BlobMap = BTreeMap<BlobName, Value>;

/// Descriptive metadata carried in the header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Node that wrote the checkpoint
    pub node: String,

    /// Number of blobs in the payload
    pub blob_count: usize,

    /// Timestamp when the checkpoint was written
    pub created_at: DateTime<Utc>,
}

/// Parsed checkpoint header
#[derive(Debug, Clone)]
pub struct CheckpointHeader {
    pub version: u32,
    pub epoch: Epoch,
    pub db_type: DbType,
    pub metadata: CheckpointMetadata,
}

/// Serialize `blobs` into a checkpoint artifact
pub fn encode(location: &CheckpointLocation, node: &str, blobs: &BlobMap) -> Result<Bytes> {
    let payload = match location.db_type {
        DbType::Binary => bincode::serialize(blobs)?,
        DbType::Json => serde_json::to_vec(blobs)?,
    };
    let metadata = serde_json::to_vec(&CheckpointMetadata {
        node: node.to_string(),
        blob_count: blobs.len(),
        created_at: Utc::now(),
    })?;

    let mut buf = BytesMut::with_capacity(FIXED_HEADER_LEN + metadata.len() + payload.len());
    buf.put_slice(&CHECKPOINT_MAGIC);
    buf.put_u32_le(CHECKPOINT_VERSION);
    buf.put_u64_le(location.epoch);
    buf.put_u8(location.db_type.as_u8());
    buf.put_u64_le(payload.len() as u64);
    buf.put_u32_le(metadata.len() as u32);
    buf.put_slice(&metadata);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Parse just the header of a checkpoint artifact
pub fn decode_header(checkpoint_id: &str, data: &Bytes) -> Result<(CheckpointHeader, Bytes)> {
    let corrupted = |reason: String| Error::CheckpointCorrupted {
        checkpoint_id: checkpoint_id.to_string(),
        reason,
    };

    let mut buf = data.clone();
    if buf.remaining() < FIXED_HEADER_LEN {
        return Err(corrupted(format!("truncated header ({} bytes)", buf.remaining())));
    }

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != CHECKPOINT_MAGIC {
        return Err(corrupted("invalid checkpoint magic".to_string()));
    }

    let version = buf.get_u32_le();
    if version != CHECKPOINT_VERSION {
        warn!(
            checkpoint_id,
            "Checkpoint version mismatch: expected {}, got {}", CHECKPOINT_VERSION, version
        );
    }

    let epoch = buf.get_u64_le();
    let tag = buf.get_u8();
    let db_type =
        DbType::from_u8(tag).ok_or_else(|| corrupted(format!("unknown db type {}", tag)))?;
    let payload_len = buf.get_u64_le();
    let metadata_len = buf.get_u32_le() as usize;

    let body_len = usize::try_from(payload_len)
        .ok()
        .and_then(|payload_len| metadata_len.checked_add(payload_len))
        .ok_or_else(|| {
            corrupted(format!(
                "payload length {} overflows with metadata length {}",
                payload_len, metadata_len
            ))
        })?;
    if buf.remaining() != body_len {
        return Err(corrupted(format!(
            "expected {} bytes after header, found {}",
            body_len,
            buf.remaining()
        )));
    }

    let metadata: CheckpointMetadata = serde_json::from_slice(&buf.split_to(metadata_len))
        .map_err(|e| corrupted(format!("bad metadata: {}", e)))?;

    let header = CheckpointHeader {
        version,
        epoch,
        db_type,
        metadata,
    };
    Ok((header, buf))
}

/// Parse a full checkpoint artifact
pub fn decode(checkpoint_id: &str, data: &Bytes) -> Result<(CheckpointHeader, BlobMap)> {
    let (header, payload) = decode_header(checkpoint_id, data)?;
    let blobs: BlobMap = match header.db_type {
        DbType::Binary => bincode::deserialize(&payload).map_err(|e| e.to_string()),
        DbType::Json => serde_json::from_slice(&payload).map_err(|e| e.to_string()),
    }
    .map_err(|reason| Error::CheckpointCorrupted {
        checkpoint_id: checkpoint_id.to_string(),
        reason: format!("bad payload: {}", reason),
    })?;
    Ok((header, blobs))
}

/// Encode `blobs` and write them to the checkpoint at `location`
#[instrument(skip(storage, location, blobs), fields(checkpoint_id = %location.key()))]
pub async fn write_checkpoint(
    storage: &dyn StorageBackend,
    location: &CheckpointLocation,
    node: &str,
    blobs: &BlobMap,
) -> Result<u64> {
    let start = Instant::now();
    let checkpoint_id = location.key();
    let data = encode(location, node, blobs)?;
    let size = storage.write(&checkpoint_id, data).await?;

    info!(
        checkpoint_id = %checkpoint_id,
        epoch = location.epoch,
        blobs = blobs.len(),
        size_bytes = size,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Checkpoint write complete"
    );
    Ok(size)
}

/// Read the checkpoint at `location`, returning only the requested blobs
///
/// Every requested blob must be present in the checkpoint.
#[instrument(skip(storage, location, wanted), fields(checkpoint_id = %location.key()))]
pub async fn read_checkpoint(
    storage: &dyn StorageBackend,
    location: &CheckpointLocation,
    wanted: &[BlobName],
) -> Result<BlobMap> {
    let checkpoint_id = location.key();
    let data = match storage.read(&checkpoint_id).await {
        Ok(data) => data,
        Err(Error::StoragePathNotFound { .. }) => {
            return Err(Error::CheckpointNotFound { checkpoint_id })
        }
        Err(e) => return Err(e),
    };

    let (header, mut blobs) = decode(&checkpoint_id, &data)?;
    if header.epoch != location.epoch {
        return Err(Error::CheckpointCorrupted {
            checkpoint_id,
            reason: format!("header epoch {} != {}", header.epoch, location.epoch),
        });
    }

    let mut selected = BlobMap::new();
    for name in wanted {
        let value = blobs.remove(name).ok_or_else(|| Error::CheckpointCorrupted {
            checkpoint_id: checkpoint_id.clone(),
            reason: format!("missing blob {}", name),
        })?;
        selected.insert(name.clone(), value);
    }

    debug!(
        checkpoint_id = %checkpoint_id,
        node = %header.metadata.node,
        blobs = selected.len(),
        "Checkpoint read complete"
    );
    Ok(selected)
}
