use std::fs;
use std::path::Path;
use std::time::Instant;

use bsj_common::metrics::global_metrics;
use bsj_common::{BsjError, JoinSide, Result};
use bsj_storage::{Record, Value};
use tracing::{debug, info};

use crate::budget::SpillBudget;
use crate::layout::{bucket_dir, bucket_index_path, bucket_path, BucketIndex, BucketMeta};
use crate::partitioner::{partition_index, SpillRow};
use crate::writer::SpillWriter;

/// Pass 1 of the partition/sort stage.
///
/// Streams `records`, extracts each key with `key_of` and appends the tagged
/// row to bucket `partition_index(key) mod partition_count`. Every bucket
/// file is created, even when empty. The resulting [`BucketIndex`] is also
/// written next to the buckets as `index.json`.
pub fn bucket_collection<I, F>(
    records: I,
    mut key_of: F,
    side: JoinSide,
    partition_count: u32,
    root: &Path,
    budget: &SpillBudget,
) -> Result<BucketIndex>
where
    I: IntoIterator<Item = Result<Record>>,
    F: FnMut(&Record) -> Result<Value>,
{
    if partition_count == 0 {
        return Err(BsjError::InvalidConfig(
            "partition_count must be at least 1".to_string(),
        ));
    }
    let started = Instant::now();
    let dir = bucket_dir(root, side);
    if dir.exists() {
        for entry in fs::read_dir(&dir)? {
            budget.remove_file(&entry?.path())?;
        }
    }
    fs::create_dir_all(&dir)?;

    let mut writers = (0..partition_count)
        .map(|p| SpillWriter::create(bucket_path(root, side, p), budget.clone()))
        .collect::<Result<Vec<_>>>()?;

    let mut total = 0_u64;
    for record in records {
        let record = record?;
        let key = key_of(&record)?;
        let part = partition_index(&key, partition_count) as usize;
        writers[part].append(&SpillRow { key, record })?;
        total += 1;
    }

    let mut partitions = Vec::with_capacity(writers.len());
    let mut bytes_total = 0;
    for (p, writer) in writers.into_iter().enumerate() {
        let (path, records, bytes) = writer.finish()?;
        let partition = p as u32;
        global_metrics().record_bucketed(side.as_str(), partition, records);
        bytes_total += bytes;
        partitions.push(BucketMeta {
            partition,
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            records,
            bytes,
        });
    }
    global_metrics().record_read(side.as_str(), total);
    global_metrics().record_spill(
        side.as_str(),
        "bucket",
        bytes_total,
        u64::from(partition_count),
        started.elapsed().as_secs_f64(),
    );

    let index = BucketIndex {
        side,
        partition_count,
        records: total,
        partitions,
    };
    let json = serde_json::to_vec_pretty(&index)
        .map_err(|e| BsjError::Execution(format!("bucket index encode failed: {e}")))?;
    fs::write(bucket_index_path(root, side), json)?;

    debug!(side = %side, dir = %dir.display(), "bucket index written");
    info!(
        side = %side,
        records = total,
        partitions = partition_count,
        bytes = bytes_total,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "input bucketed"
    );
    Ok(index)
}

pub fn read_bucket_index(root: &Path, side: JoinSide) -> Result<BucketIndex> {
    let path = bucket_index_path(root, side);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BsjError::MissingShard { path });
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| BsjError::corrupt_shard(&path, format!("bucket index decode failed: {e}")))
}
