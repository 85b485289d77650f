//! Partition worker.
//!
//! Responsibilities:
//! - sort the left and right bucket of each assigned partition;
//! - merge-join the sorted buckets and project joined pairs;
//! - write the partition's output shards (`part-PPPPP-SSSSS.arrow`);
//! - remove the partition's working files once it is done.
//!
//! A partition always starts from scratch: leftover output shards under its
//! prefix and its sort directory are cleared first, so a partition can be
//! rerun after any failure. A failed partition does not stop the worker's
//! remaining partitions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bsj_common::metrics::global_metrics;
use bsj_common::{JoinConfig, JoinSide, PartitionId, Result, WorkerId};
use bsj_execution::{GroupSpill, JoinSchema, MergeJoin, MergeJoinOptions};
use bsj_shuffle::{
    bucket_path, sort_dir, sort_partition, sorted_path, SortOptions, SpillBudget, SpillReader,
};
use bsj_storage::{ShardMeta, ShardedWriter, WriterOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span};

/// Output shard prefix of a partition.
pub fn partition_prefix(partition: u32) -> String {
    format!("part-{partition:05}")
}

/// Everything a worker needs to run partitions; shared by all workers of a
/// pipeline run.
#[derive(Debug, Clone)]
pub struct PartitionContext {
    pub config: Arc<JoinConfig>,
    /// Root of bucket, run and group spill files.
    pub spill_root: PathBuf,
    /// Output collection directory.
    pub output_dir: PathBuf,
    pub join_schema: Arc<JoinSchema>,
    pub budget: SpillBudget,
}

/// Result of one successfully joined partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOutcome {
    pub partition: u32,
    pub left_records: u64,
    pub right_records: u64,
    pub rows_out: u64,
    pub sort_runs: u32,
    pub spilled_groups: u64,
    pub shards: Vec<ShardMeta>,
    pub elapsed_ms: u64,
}

/// Runs a fixed list of partitions sequentially.
#[derive(Debug, Clone)]
pub struct PartitionWorker {
    id: WorkerId,
    partitions: Vec<PartitionId>,
}

impl PartitionWorker {
    pub fn new(id: WorkerId, partitions: Vec<PartitionId>) -> Self {
        Self { id, partitions }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn partitions(&self) -> &[PartitionId] {
        &self.partitions
    }

    /// Runs every assigned partition and returns each one's result, in
    /// assignment order.
    pub fn run(&self, ctx: &PartitionContext) -> Vec<(u32, Result<PartitionOutcome>)> {
        let _span = info_span!("partition_worker", worker_id = %self.id).entered();
        let mut results = Vec::with_capacity(self.partitions.len());
        for PartitionId(partition) in &self.partitions {
            let partition = *partition;
            debug!(worker_id = %self.id, partition, "worker picked partition");
            let started = Instant::now();
            let result = run_partition(ctx, partition);
            let secs = started.elapsed().as_secs_f64();
            match &result {
                Ok(outcome) => {
                    global_metrics().record_partition_time(partition, "succeeded", secs);
                    info!(
                        worker_id = %self.id,
                        partition,
                        left_records = outcome.left_records,
                        right_records = outcome.right_records,
                        rows_out = outcome.rows_out,
                        shards = outcome.shards.len(),
                        "partition joined"
                    );
                }
                Err(e) => {
                    global_metrics().record_partition_time(partition, "failed", secs);
                    error!(
                        worker_id = %self.id,
                        partition,
                        kind = %e.kind(),
                        error = %e,
                        "partition failed"
                    );
                    discard_partition(ctx, partition);
                }
            }
            results.push((partition, result));
        }
        results
    }
}

/// Sorts, joins and writes one partition.
pub fn run_partition(ctx: &PartitionContext, partition: u32) -> Result<PartitionOutcome> {
    let started = Instant::now();
    let cfg = ctx.config.as_ref();
    ShardedWriter::remove_existing(&ctx.output_dir, &partition_prefix(partition))?;
    clear_dir(&ctx.budget, &sort_dir(&ctx.spill_root, partition))?;

    let options = SortOptions {
        buffer_bytes: cfg.sort_buffer_bytes,
        fan_in: cfg.merge_fan_in,
    };
    let mut sort_runs = 0;
    for side in [JoinSide::Left, JoinSide::Right] {
        let stats = sort_partition(
            &bucket_path(&ctx.spill_root, side, partition),
            &sorted_path(&ctx.spill_root, side, partition),
            side,
            partition,
            &ctx.spill_root,
            options,
            &ctx.budget,
        )?;
        sort_runs += stats.runs;
    }

    let left = SpillReader::open(sorted_path(&ctx.spill_root, JoinSide::Left, partition))?;
    let right = SpillReader::open(sorted_path(&ctx.spill_root, JoinSide::Right, partition))?;
    let join_options = MergeJoinOptions::from_config(cfg).with_group_spill(GroupSpill {
        root: ctx.spill_root.clone(),
        partition,
        budget: ctx.budget.clone(),
    });
    let mut join = MergeJoin::new(left, right, join_options)?;

    let mut writer = ShardedWriter::new(
        &ctx.output_dir,
        partition_prefix(partition),
        ctx.join_schema.output().clone(),
        WriterOptions::from(cfg),
    )?;
    for joined in join.by_ref() {
        writer.write(ctx.join_schema.project(&joined?))?;
    }
    let stats = join.stats();
    drop(join);
    let shards = writer.finish()?;

    clear_dir(&ctx.budget, &sort_dir(&ctx.spill_root, partition))?;

    let bytes = shards.iter().map(|s| s.bytes).sum();
    global_metrics().record_join_output(partition, stats.rows_out);
    global_metrics().record_shards_written(partition, shards.len() as u64, bytes);
    Ok(PartitionOutcome {
        partition,
        left_records: stats.left_rows,
        right_records: stats.right_rows,
        rows_out: stats.rows_out,
        sort_runs,
        spilled_groups: stats.spilled_groups,
        shards,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// Best-effort removal of a failed partition's output and working files.
fn discard_partition(ctx: &PartitionContext, partition: u32) {
    if let Err(e) = ShardedWriter::remove_existing(&ctx.output_dir, &partition_prefix(partition)) {
        debug!(partition, error = %e, "failed to remove partial output");
    }
    if let Err(e) = clear_dir(&ctx.budget, &sort_dir(&ctx.spill_root, partition)) {
        debug!(partition, error = %e, "failed to remove partition spill files");
    }
}

/// Deletes every file in `dir` through the budget, then the directory.
pub(crate) fn clear_dir(budget: &SpillBudget, dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            clear_dir(budget, &path)?;
        } else {
            budget.remove_file(&path)?;
        }
    }
    fs::remove_dir(dir)?;
    Ok(())
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
