use std::path::{Path, PathBuf};

use bsj_common::JoinSide;
use serde::{Deserialize, Serialize};

pub fn bucket_dir(root: &Path, side: JoinSide) -> PathBuf {
    root.join("bucket").join(side.as_str())
}

pub fn bucket_path(root: &Path, side: JoinSide, partition: u32) -> PathBuf {
    bucket_dir(root, side).join(format!("bucket-{partition:05}.jsonl"))
}

pub fn bucket_index_path(root: &Path, side: JoinSide) -> PathBuf {
    bucket_dir(root, side).join("index.json")
}

pub fn sort_dir(root: &Path, partition: u32) -> PathBuf {
    root.join("sort").join(format!("{partition:05}"))
}

pub fn run_path(root: &Path, side: JoinSide, partition: u32, generation: u32, run: u32) -> PathBuf {
    sort_dir(root, partition).join(format!("{side}-run-{generation:03}-{run:05}.jsonl"))
}

pub fn sorted_path(root: &Path, side: JoinSide, partition: u32) -> PathBuf {
    sort_dir(root, partition).join(format!("{side}-sorted.jsonl"))
}

pub fn group_spill_path(root: &Path, partition: u32, seq: u64) -> PathBuf {
    sort_dir(root, partition).join(format!("group-{seq:05}.jsonl"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMeta {
    pub partition: u32,
    pub file: String,
    pub records: u64,
    pub bytes: u64,
}

/// Result of pass 1 for one input: where each partition's bucket lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketIndex {
    pub side: JoinSide,
    pub partition_count: u32,
    pub records: u64,
    pub partitions: Vec<BucketMeta>,
}

impl BucketIndex {
    pub fn partition(&self, partition: u32) -> Option<&BucketMeta> {
        self.partitions.iter().find(|p| p.partition == partition)
    }
}
