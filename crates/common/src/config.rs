use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BsjError, Result};

/// Which left records survive a merge-join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Only keys present on both sides.
    #[default]
    Inner,
    /// Every left record; unmatched ones carry an empty right side.
    LeftOuter,
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinMode::Inner => f.write_str("inner"),
            JoinMode::LeftOuter => f.write_str("left_outer"),
        }
    }
}

impl FromStr for JoinMode {
    type Err = BsjError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "inner" => Ok(JoinMode::Inner),
            "left_outer" | "left" => Ok(JoinMode::LeftOuter),
            other => Err(BsjError::InvalidConfig(format!(
                "unknown join mode '{other}' (expected inner or left_outer)"
            ))),
        }
    }
}

/// What the merge-join does when one key's group exceeds `max_key_group_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizedGroupPolicy {
    /// Abort the partition with `OversizedKeyGroup`.
    #[default]
    Fail,
    /// Spill the right group to disk and replay it per left record.
    Spill,
}

impl FromStr for OversizedGroupPolicy {
    type Err = BsjError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(OversizedGroupPolicy::Fail),
            "spill" => Ok(OversizedGroupPolicy::Spill),
            other => Err(BsjError::InvalidConfig(format!(
                "unknown oversized group policy '{other}' (expected fail or spill)"
            ))),
        }
    }
}

/// Pipeline configuration shared by the coordinator, partition workers and
/// the CLI.
///
/// Loaded from JSON with [`JoinConfig::load`]; missing fields fall back to
/// [`JoinConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Number of hash partitions, identical for both inputs.
    pub partition_count: u32,
    pub join_mode: JoinMode,
    /// Key field on the left collection.
    pub left_key: String,
    /// Key field on the right collection.
    pub right_key: String,
    /// Prefix applied to right field names that collide with left ones.
    pub right_field_prefix: String,
    /// Safety bound on one key's multiplicity on either side.
    pub max_key_group_size: usize,
    pub oversized_group_policy: OversizedGroupPolicy,
    /// Output shard rolls over once it reaches this many bytes.
    pub shard_size_threshold_bytes: u64,
    /// Optional record-count rollover for output shards.
    pub shard_max_records: Option<u64>,
    /// Rows per Arrow batch inside an output shard.
    pub batch_size_rows: usize,
    /// Estimated bytes held in memory before a sorted run is spilled.
    pub sort_buffer_bytes: usize,
    /// Max runs merged at once by the external sort.
    pub merge_fan_in: usize,
    /// Local working directory for partition buckets and sorted runs.
    pub spill_dir: PathBuf,
    /// Optional cap on bytes written to working storage across the pipeline.
    pub spill_budget_bytes: Option<u64>,
    /// Number of partition workers.
    pub worker_count: usize,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            partition_count: 64,
            join_mode: JoinMode::Inner,
            left_key: "key".to_string(),
            right_key: "key".to_string(),
            right_field_prefix: "right_".to_string(),
            max_key_group_size: 100_000,
            oversized_group_policy: OversizedGroupPolicy::Fail,
            shard_size_threshold_bytes: 256 * 1024 * 1024,
            shard_max_records: None,
            batch_size_rows: 8192,
            sort_buffer_bytes: 256 * 1024 * 1024,
            merge_fan_in: 64,
            spill_dir: PathBuf::from(".bsj_spill"),
            spill_budget_bytes: None,
            worker_count: 4,
        }
    }
}

impl JoinConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let cfg: JoinConfig = serde_json::from_str(&text).map_err(|e| {
            BsjError::InvalidConfig(format!("{}: {e}", path.display()))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            return Err(BsjError::InvalidConfig(
                "partition_count must be at least 1".to_string(),
            ));
        }
        if self.max_key_group_size == 0 {
            return Err(BsjError::InvalidConfig(
                "max_key_group_size must be at least 1".to_string(),
            ));
        }
        if self.shard_size_threshold_bytes == 0 || self.shard_max_records == Some(0) {
            return Err(BsjError::InvalidConfig(
                "shard thresholds must be positive".to_string(),
            ));
        }
        if self.batch_size_rows == 0 || self.sort_buffer_bytes == 0 {
            return Err(BsjError::InvalidConfig(
                "batch_size_rows and sort_buffer_bytes must be positive".to_string(),
            ));
        }
        if self.merge_fan_in < 2 {
            return Err(BsjError::InvalidConfig(
                "merge_fan_in must be at least 2".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(BsjError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.left_key.is_empty() || self.right_key.is_empty() {
            return Err(BsjError::InvalidConfig(
                "left_key and right_key must be set".to_string(),
            ));
        }
        Ok(())
    }
}
