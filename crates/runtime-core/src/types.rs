//! Core type definitions for the epoch job runtime

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Unique identifier types
pub type NodeId = String;
pub type BlobName = String;
pub type CheckpointId = String;

/// Epoch counter. Epoch 0 is the state right after initialization.
pub type Epoch = u64;

/// Node used for tasks created outside any node scope
pub const DEFAULT_NODE: &str = "local";

/// Value held by a named blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Strings(Vec<String>),
    Bytes(Vec<u8>),
    Tensor(Tensor),
}

/// Dense f32 tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking that the shape matches the data length
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::InvalidConfig {
                message: format!(
                    "tensor shape {:?} needs {} elements, got {}",
                    shape,
                    expected,
                    data.len()
                ),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }
}

impl Value {
    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Strings(_) => "strings",
            Value::Bytes(_) => "bytes",
            Value::Tensor(_) => "tensor",
        }
    }

    /// Interpret as a boolean. Integers are true when non-zero.
    pub fn as_bool(&self, blob: &str) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(n) => Ok(*n != 0),
            other => Err(Self::mismatch(blob, "bool", other)),
        }
    }

    pub fn as_int(&self, blob: &str) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(Self::mismatch(blob, "int", other)),
        }
    }

    pub fn as_strings(&self, blob: &str) -> Result<&[String]> {
        match self {
            Value::Strings(names) => Ok(names),
            other => Err(Self::mismatch(blob, "strings", other)),
        }
    }

    pub fn as_tensor_mut(&mut self, blob: &str) -> Result<&mut Tensor> {
        match self {
            Value::Tensor(t) => Ok(t),
            other => Err(Self::mismatch(blob, "tensor", other)),
        }
    }

    fn mismatch(blob: &str, expected: &'static str, actual: &Value) -> Error {
        Error::TypeMismatch {
            blob: blob.to_string(),
            expected,
            actual: actual.type_name(),
        }
    }
}

/// Checkpoint payload encoding
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DbType {
    /// bincode-encoded blob map
    #[default]
    Binary,

    /// JSON-encoded blob map
    Json,
}

impl DbType {
    pub fn as_u8(self) -> u8 {
        match self {
            DbType::Binary => 0,
            DbType::Json => 1,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DbType::Binary),
            1 => Some(DbType::Json),
            _ => None,
        }
    }
}

/// Build the storage key of the checkpoint for `epoch` under `prefix`
pub fn checkpoint_key(prefix: &str, epoch: Epoch) -> CheckpointId {
    format!("{}.{:06}", prefix, epoch)
}

/// Where a Save/Load op reads or writes its checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointLocation {
    /// Path prefix shared by all epochs of one node
    pub prefix: String,

    /// Epoch the checkpoint belongs to
    pub epoch: Epoch,

    /// Payload encoding
    pub db_type: DbType,
}

impl CheckpointLocation {
    pub fn new(prefix: impl Into<String>, epoch: Epoch, db_type: DbType) -> Self {
        Self {
            prefix: prefix.into(),
            epoch,
            db_type,
        }
    }

    /// Storage key, `"{prefix}.{epoch:06}"`
    pub fn key(&self) -> CheckpointId {
        checkpoint_key(&self.prefix, self.epoch)
    }
}
