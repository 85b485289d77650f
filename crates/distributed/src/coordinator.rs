//! Pipeline coordinator.
//!
//! Responsibilities:
//! - retract any committed manifest of the output before work starts;
//! - bucket both inputs concurrently (pass 1);
//! - hand partitions to workers by static round-robin assignment;
//! - aggregate per-partition results and commit the manifest only when
//!   every partition succeeded.
//!
//! Failure semantics: a failed partition only aborts itself. The
//! coordinator waits for all workers and then reports every failed
//! partition, sorted by index, as [`BsjError::PartitionsFailed`]. A worker
//! task that panics fails every partition assigned to it.
//!
//! Each run keeps its working files in a private `run-*` directory under
//! `spill_dir`, so runs sharing a `spill_dir` never see each other's
//! buckets or sort runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bsj_common::{BsjError, ErrorKind, JoinConfig, JoinSide, PartitionFailure, PartitionId, Result};
use bsj_execution::{FieldKey, JoinSchema, KeyExtractor};
use bsj_shuffle::{bucket_collection, BucketIndex, SpillBudget};
use bsj_storage::{Manifest, RecordReader, RecordSchema, ShardSpec, ShardedWriter};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::stage::assign_partitions;
use crate::worker::{clear_dir, PartitionContext, PartitionOutcome, PartitionWorker};

/// Summary of a committed join.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub output_dir: PathBuf,
    pub manifest: Manifest,
    pub left_records: u64,
    pub right_records: u64,
    pub rows_out: u64,
    /// Per-partition results, sorted by partition.
    pub partitions: Vec<PartitionOutcome>,
    pub spill_peak_bytes: u64,
    pub elapsed_ms: u64,
}

/// Joins two sharded collections into a new one.
#[derive(Debug, Clone)]
pub struct JoinPipeline {
    config: Arc<JoinConfig>,
}

impl JoinPipeline {
    pub fn new(config: JoinConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Runs the full pipeline. On success `output_dir` holds the joined
    /// shards and a committed `manifest.json`; on failure it holds no
    /// manifest.
    pub async fn run(
        &self,
        left: ShardSpec,
        right: ShardSpec,
        output_dir: impl Into<PathBuf>,
    ) -> Result<PipelineReport> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Manifest::retract(&output_dir)?;
        ShardedWriter::remove_existing(&output_dir, "part")?;

        let spill_root = run_spill_root(&self.config.spill_dir)?;
        let budget = SpillBudget::new(self.config.spill_budget_bytes);
        let result = self
            .execute(left, right, &output_dir, &spill_root, &budget)
            .await;
        if let Err(e) = clear_dir(&budget, &spill_root) {
            warn!(dir = %spill_root.display(), error = %e, "spill cleanup failed");
        }
        // Only succeeds once no other run is using the spill directory.
        let _ = fs::remove_dir(&self.config.spill_dir);
        result
    }

    async fn execute(
        &self,
        left: ShardSpec,
        right: ShardSpec,
        output_dir: &Path,
        spill_root: &Path,
        budget: &SpillBudget,
    ) -> Result<PipelineReport> {
        let started = Instant::now();
        let cfg = Arc::clone(&self.config);
        let left_reader = RecordReader::open(left)?;
        let right_reader = RecordReader::open(right)?;
        let left_schema = input_schema(&left_reader, &cfg.left_key)?;
        let right_schema = input_schema(&right_reader, &cfg.right_key)?;
        let join_schema = JoinSchema::new(
            &left_schema,
            &right_schema,
            &cfg.right_key,
            &cfg.right_field_prefix,
            cfg.join_mode,
        )?;
        info!(
            left = %left_reader.spec(),
            right = %right_reader.spec(),
            output = %output_dir.display(),
            partitions = cfg.partition_count,
            workers = cfg.worker_count,
            mode = %cfg.join_mode,
            "join pipeline started"
        );

        let left_task = spawn_bucketing(
            left_reader,
            FieldKey::new(&cfg.left_key),
            JoinSide::Left,
            cfg.partition_count,
            spill_root,
            budget,
        );
        let right_task = spawn_bucketing(
            right_reader,
            FieldKey::new(&cfg.right_key),
            JoinSide::Right,
            cfg.partition_count,
            spill_root,
            budget,
        );
        let (left_index, right_index) = tokio::join!(left_task, right_task);
        let left_index = left_index.map_err(join_error)??;
        let right_index = right_index.map_err(join_error)??;

        let ctx = PartitionContext {
            config: Arc::clone(&cfg),
            spill_root: spill_root.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            join_schema: Arc::new(join_schema),
            budget: budget.clone(),
        };
        let handles = assign_partitions(cfg.partition_count, cfg.worker_count)
            .into_iter()
            .map(|assignment| {
                let partitions = assignment.partitions.clone();
                let worker = PartitionWorker::new(assignment.worker, assignment.partitions);
                let ctx = ctx.clone();
                (partitions, tokio::task::spawn_blocking(move || worker.run(&ctx)))
            })
            .collect::<Vec<_>>();

        let (outcomes, failures) = collect_worker_results(handles).await;
        if !failures.is_empty() {
            error!(
                failed = failures.len(),
                partitions = cfg.partition_count,
                "join pipeline failed; manifest not written"
            );
            return Err(BsjError::PartitionsFailed(failures));
        }

        check_conserved(JoinSide::Left, &left_index, &outcomes, |o| o.left_records)?;
        check_conserved(JoinSide::Right, &right_index, &outcomes, |o| o.right_records)?;

        let shards = outcomes
            .iter()
            .flat_map(|o| o.shards.iter().cloned())
            .collect::<Vec<_>>();
        let manifest = Manifest::new(ctx.join_schema.output().clone(), shards);
        let path = manifest.commit(output_dir)?;
        let rows_out = outcomes.iter().map(|o| o.rows_out).sum();
        debug!(path = %path.display(), "manifest committed");
        info!(
            left_records = left_index.records,
            right_records = right_index.records,
            rows_out,
            shards = manifest.shards.len(),
            spill_peak_bytes = budget.peak(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "join pipeline committed"
        );
        Ok(PipelineReport {
            output_dir: output_dir.to_path_buf(),
            manifest,
            left_records: left_index.records,
            right_records: right_index.records,
            rows_out,
            partitions: outcomes,
            spill_peak_bytes: budget.peak(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

type WorkerHandle = (Vec<PartitionId>, JoinHandle<Vec<(u32, Result<PartitionOutcome>)>>);

/// Awaits every worker, then splits results into outcomes and failures
/// sorted by partition. A worker whose task panicked or was cancelled
/// fails each of its assigned partitions.
async fn collect_worker_results(
    handles: Vec<WorkerHandle>,
) -> (Vec<PartitionOutcome>, Vec<PartitionFailure>) {
    let mut outcomes = Vec::new();
    let mut failures = Vec::new();
    for (partitions, handle) in handles {
        match handle.await {
            Ok(results) => {
                for (partition, result) in results {
                    match result {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) => failures.push(PartitionFailure {
                            partition,
                            kind: e.kind(),
                            message: e.to_string(),
                        }),
                    }
                }
            }
            Err(e) => {
                error!(partitions = partitions.len(), error = %e, "partition worker aborted");
                let message = join_error(e).to_string();
                failures.extend(partitions.into_iter().map(|PartitionId(partition)| {
                    PartitionFailure {
                        partition,
                        kind: ErrorKind::Execution,
                        message: message.clone(),
                    }
                }));
            }
        }
    }
    outcomes.sort_by_key(|o| o.partition);
    failures.sort_by_key(|f| f.partition);
    (outcomes, failures)
}

/// Creates a directory under `spill_dir` that belongs to this run alone.
fn run_spill_root(spill_dir: &Path) -> Result<PathBuf> {
    static RUN_SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BsjError::Execution(format!("clock error: {e}")))?
        .as_nanos();
    let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
    let root = spill_dir.join(format!("run-{}-{nanos}-{seq}", std::process::id()));
    fs::create_dir_all(&root)?;
    Ok(root)
}

fn spawn_bucketing(
    reader: RecordReader,
    key: FieldKey,
    side: JoinSide,
    partition_count: u32,
    spill_root: &Path,
    budget: &SpillBudget,
) -> tokio::task::JoinHandle<Result<BucketIndex>> {
    let root = spill_root.to_path_buf();
    let budget = budget.clone();
    tokio::task::spawn_blocking(move || {
        bucket_collection(
            reader.records(),
            |record| key.key(record),
            side,
            partition_count,
            &root,
            &budget,
        )
    })
}

/// Schema of an input, checked to contain `key_field`.
fn input_schema(reader: &RecordReader, key_field: &str) -> Result<RecordSchema> {
    let schema = reader.schema()?.ok_or_else(|| {
        BsjError::InvalidConfig(format!("input {} has no schema", reader.spec()))
    })?;
    if schema.field(key_field).is_none() {
        return Err(BsjError::MissingKeyField {
            field: key_field.to_string(),
        });
    }
    Ok(schema)
}

fn check_conserved(
    side: JoinSide,
    index: &BucketIndex,
    outcomes: &[PartitionOutcome],
    joined: impl Fn(&PartitionOutcome) -> u64,
) -> Result<()> {
    let seen = outcomes.iter().map(joined).sum::<u64>();
    if seen != index.records {
        return Err(BsjError::Execution(format!(
            "{side} records not conserved: bucketed {}, joined {seen}",
            index.records
        )));
    }
    Ok(())
}

fn join_error(e: JoinError) -> BsjError {
    BsjError::Execution(format!("pipeline task join error: {e}"))
}
