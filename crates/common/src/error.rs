use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical bsj error taxonomy used across crates.
///
/// Classification guidance:
/// - [`BsjError::CorruptShard`] / [`BsjError::MissingShard`]: input integrity; re-reading will not help
/// - [`BsjError::MissingKeyField`]: schema mismatch between a collection and the join config
/// - [`BsjError::StorageExhausted`]: working storage ran out; rerun with more partitions or disk
/// - [`BsjError::OutOfOrderKey`]: a sorted partition was not sorted (defect in the sort stage)
/// - [`BsjError::OversizedKeyGroup`]: data-skew safety valve on one key's multiplicity
/// - [`BsjError::PartitionsFailed`]: pipeline-level aggregate of failed partition workers
///
/// None of these are retried automatically.
#[derive(Debug, Error)]
pub enum BsjError {
    /// A shard's bytes could not be decoded into records.
    #[error("corrupt shard {}: {reason}", path.display())]
    CorruptShard { path: PathBuf, reason: String },

    /// An expected shard file is absent.
    #[error("missing shard: {}", path.display())]
    MissingShard { path: PathBuf },

    /// The designated key field is absent from a record.
    #[error("record has no key field '{field}'")]
    MissingKeyField { field: String },

    /// Working storage (spill budget or filesystem) is exhausted.
    #[error("working storage exhausted: {0}")]
    StorageExhausted(String),

    /// A key compared smaller than its predecessor in a sorted stream.
    #[error("out-of-order key in {side} stream: {current} follows {previous}")]
    OutOfOrderKey {
        side: String,
        previous: String,
        current: String,
    },

    /// A single key's multiplicity exceeded the configured group bound.
    #[error("key group {key} on {side} side has more than {limit} records")]
    OversizedKeyGroup {
        side: String,
        key: String,
        limit: usize,
    },

    /// One or more partition workers failed; sorted by partition index.
    #[error("{} partition(s) failed: {}", .0.len(), summarize_failures(.0))]
    PartitionsFailed(Vec<PartitionFailure>),

    /// Invalid or inconsistent configuration/catalog state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Runtime failures not covered by a more specific kind.
    #[error("execution error: {0}")]
    Execution(String),

    /// Batch scheduler submission failures.
    #[error("job submission failed: {0}")]
    Submission(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
}

/// Copyable classification of a [`BsjError`], used when aggregating failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CorruptShard,
    MissingShard,
    MissingKeyField,
    StorageExhausted,
    OutOfOrderKey,
    OversizedKeyGroup,
    PartitionsFailed,
    InvalidConfig,
    Execution,
    Submission,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::CorruptShard => "corrupt_shard",
            ErrorKind::MissingShard => "missing_shard",
            ErrorKind::MissingKeyField => "missing_key_field",
            ErrorKind::StorageExhausted => "storage_exhausted",
            ErrorKind::OutOfOrderKey => "out_of_order_key",
            ErrorKind::OversizedKeyGroup => "oversized_key_group",
            ErrorKind::PartitionsFailed => "partitions_failed",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Execution => "execution",
            ErrorKind::Submission => "submission",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// Failure report of a single partition worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFailure {
    pub partition: u32,
    pub kind: ErrorKind,
    pub message: String,
}

fn summarize_failures(failures: &[PartitionFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("#{} {}", f.partition, f.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

impl BsjError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BsjError::CorruptShard { .. } => ErrorKind::CorruptShard,
            BsjError::MissingShard { .. } => ErrorKind::MissingShard,
            BsjError::MissingKeyField { .. } => ErrorKind::MissingKeyField,
            BsjError::StorageExhausted(_) => ErrorKind::StorageExhausted,
            BsjError::OutOfOrderKey { .. } => ErrorKind::OutOfOrderKey,
            BsjError::OversizedKeyGroup { .. } => ErrorKind::OversizedKeyGroup,
            BsjError::PartitionsFailed(_) => ErrorKind::PartitionsFailed,
            BsjError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            BsjError::Execution(_) => ErrorKind::Execution,
            BsjError::Submission(_) => ErrorKind::Submission,
            BsjError::Io(_) => ErrorKind::Io,
        }
    }

    /// Pipeline errors are never retried in-process; a rerun needs new input
    /// or a new configuration.
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn corrupt_shard(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        BsjError::CorruptShard {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for BsjError {
    fn from(err: std::io::Error) -> Self {
        if is_storage_full(&err) {
            BsjError::StorageExhausted(err.to_string())
        } else {
            BsjError::Io(err)
        }
    }
}

// ENOSPC / EDQUOT on unix.
fn is_storage_full(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::StorageFull {
        return true;
    }
    cfg!(unix) && matches!(err.raw_os_error(), Some(28) | Some(122))
}

/// Standard bsj result alias.
pub type Result<T> = std::result::Result<T, BsjError>;
