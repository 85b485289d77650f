//! `bsj` command line.
//!
//! A join's config is layered: the JSON config file (or
//! [`JoinConfig::default`]), then the preset's keys and mode, then key fields
//! of catalog collections, then explicit flags.

use std::fs;
use std::path::PathBuf;

use bsj_common::metrics::global_metrics;
use bsj_common::{BsjError, JoinConfig, JoinMode, OversizedGroupPolicy, Result};
use bsj_distributed::{
    parse_time_limit, BatchScheduler, JobSpec, JoinPipeline, PipelineReport, SlurmScheduler,
    Submission,
};
use bsj_storage::{Catalog, Record, RecordReader, ShardSpec, Value, WriterOptions};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use crate::datasets::{self, DatasetInputs};

#[derive(Debug, Parser)]
#[command(
    name = "bsj",
    version,
    about = "Sharded key joins over large biological sequence datasets"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Join two sharded collections into a new one
    Join(JoinArgs),
    /// Build a sharded collection from downloaded dataset files
    Prepare(PrepareArgs),
    /// Submit a batch job to the cluster scheduler
    Submit(SubmitArgs),
    /// Show a collection's schema, shards and first records
    Inspect(InspectArgs),
    /// List buildable datasets and join presets
    Datasets,
}

#[derive(Debug, Args)]
pub struct JoinArgs {
    /// Left collection: shard pattern, directory or catalog name
    pub left: String,
    /// Right collection: shard pattern, directory or catalog name
    pub right: String,
    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,
    /// JSON pipeline config
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// JSON collection catalog used to resolve collection names
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    /// Named join preset supplying keys and mode
    #[arg(long)]
    pub preset: Option<String>,
    #[arg(long)]
    pub mode: Option<JoinMode>,
    #[arg(long)]
    pub left_key: Option<String>,
    #[arg(long)]
    pub right_key: Option<String>,
    #[arg(long)]
    pub partitions: Option<u32>,
    #[arg(long)]
    pub workers: Option<usize>,
    #[arg(long)]
    pub max_key_group_size: Option<usize>,
    #[arg(long)]
    pub oversized_group_policy: Option<OversizedGroupPolicy>,
    #[arg(long)]
    pub spill_dir: Option<PathBuf>,
    #[arg(long)]
    pub spill_budget_bytes: Option<u64>,
    #[arg(long)]
    pub shard_size_bytes: Option<u64>,
    #[arg(long)]
    pub shard_max_records: Option<u64>,
    /// Write Prometheus text metrics here when the run ends
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
    /// Write the JSON run report here instead of stdout
    #[arg(long)]
    pub report_out: Option<PathBuf>,
}

/// A join with both collections and the effective config resolved.
#[derive(Debug, Clone)]
pub struct ResolvedJoin {
    pub config: JoinConfig,
    pub left: ShardSpec,
    pub right: ShardSpec,
}

impl JoinArgs {
    pub fn resolve(&self) -> Result<ResolvedJoin> {
        let mut config = match &self.config {
            Some(path) => JoinConfig::load(path)?,
            None => JoinConfig::default(),
        };
        if let Some(name) = &self.preset {
            config = datasets::preset(name)?.apply(config);
        }

        let catalog = self.catalog.as_ref().map(Catalog::load_from_json).transpose()?;
        let (left, left_key) = resolve_collection(catalog.as_ref(), &self.left)?;
        let (right, right_key) = resolve_collection(catalog.as_ref(), &self.right)?;
        if let Some(key) = left_key {
            config.left_key = key;
        }
        if let Some(key) = right_key {
            config.right_key = key;
        }

        if let Some(mode) = self.mode {
            config.join_mode = mode;
        }
        if let Some(key) = &self.left_key {
            config.left_key = key.clone();
        }
        if let Some(key) = &self.right_key {
            config.right_key = key.clone();
        }
        if let Some(n) = self.partitions {
            config.partition_count = n;
        }
        if let Some(n) = self.workers {
            config.worker_count = n;
        }
        if let Some(n) = self.max_key_group_size {
            config.max_key_group_size = n;
        }
        if let Some(policy) = self.oversized_group_policy {
            config.oversized_group_policy = policy;
        }
        if let Some(dir) = &self.spill_dir {
            config.spill_dir = dir.clone();
        }
        if self.spill_budget_bytes.is_some() {
            config.spill_budget_bytes = self.spill_budget_bytes;
        }
        if let Some(n) = self.shard_size_bytes {
            config.shard_size_threshold_bytes = n;
        }
        if self.shard_max_records.is_some() {
            config.shard_max_records = self.shard_max_records;
        }
        config.validate()?;
        Ok(ResolvedJoin {
            config,
            left,
            right,
        })
    }
}

/// Catalog entries win over paths; their key field comes along.
fn resolve_collection(
    catalog: Option<&Catalog>,
    name: &str,
) -> Result<(ShardSpec, Option<String>)> {
    if let Some(def) = catalog.and_then(|c| c.get(name).ok()) {
        return Ok((def.shard_spec()?, Some(def.key.clone())));
    }
    Ok((name.parse()?, None))
}

#[derive(Debug, Args)]
pub struct PrepareArgs {
    /// Dataset name, see `bsj datasets`
    pub dataset: String,
    /// Downloaded file as name=path; repeat for multi-file datasets
    #[arg(short, long = "input", required = true)]
    pub inputs: Vec<String>,
    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long)]
    pub shard_size_bytes: Option<u64>,
    #[arg(long)]
    pub shard_max_records: Option<u64>,
}

impl PrepareArgs {
    pub fn writer_options(&self) -> WriterOptions {
        let defaults = WriterOptions::default();
        WriterOptions {
            shard_size_threshold_bytes: self
                .shard_size_bytes
                .unwrap_or(defaults.shard_size_threshold_bytes),
            shard_max_records: self.shard_max_records.or(defaults.shard_max_records),
            ..defaults
        }
    }
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// JSON job description; flags below override its fields
    #[arg(long)]
    pub job: Option<PathBuf>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub cpus: Option<u32>,
    #[arg(long)]
    pub memory_mb: Option<u64>,
    /// HH:MM:SS, MM:SS or seconds
    #[arg(long)]
    pub time: Option<String>,
    /// Job environment entry as KEY=VALUE; nothing else is exported
    #[arg(long = "env")]
    pub env: Vec<String>,
    /// Scheduler partition (queue)
    #[arg(long)]
    pub queue: Option<String>,
    #[arg(long)]
    pub output_log: Option<PathBuf>,
    /// Submission program
    #[arg(long, default_value = "sbatch")]
    pub sbatch: String,
    /// Print the submission command instead of running it
    #[arg(long)]
    pub dry_run: bool,
    /// Command run by the job
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl SubmitArgs {
    pub fn job_spec(&self) -> Result<JobSpec> {
        let mut job = match &self.job {
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                serde_json::from_str::<JobSpec>(&raw).map_err(|e| {
                    BsjError::InvalidConfig(format!("job file {}: {e}", path.display()))
                })?
            }
            None => {
                let name = self.name.clone().ok_or_else(|| {
                    BsjError::InvalidConfig("--name is required without --job".to_string())
                })?;
                JobSpec::new(name, self.command.join(" "))
            }
        };
        if let Some(name) = &self.name {
            job.name = name.clone();
        }
        if !self.command.is_empty() {
            job.command = self.command.join(" ");
        }
        if let Some(cpus) = self.cpus {
            job.cpus = cpus;
        }
        if let Some(mb) = self.memory_mb {
            job.memory_mb = mb;
        }
        if let Some(time) = &self.time {
            job.time_limit = parse_time_limit(time)?;
        }
        for entry in &self.env {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                BsjError::InvalidConfig(format!("environment entry '{entry}' is not KEY=VALUE"))
            })?;
            job.env.insert(key.to_string(), value.to_string());
        }
        if self.queue.is_some() {
            job.partition = self.queue.clone();
        }
        if self.output_log.is_some() {
            job.output_log = self.output_log.clone();
        }
        job.validate()?;
        Ok(job)
    }
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Shard pattern, directory or catalog name
    pub collection: String,
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    /// Number of records to print
    #[arg(long, default_value_t = 5)]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    shards: Vec<PathBuf>,
    fields: Vec<String>,
    records: u64,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Join(args) => run_join(&args).await.map(|_| ()),
        Command::Prepare(args) => run_prepare(&args),
        Command::Submit(args) => run_submit(&args),
        Command::Inspect(args) => run_inspect(&args),
        Command::Datasets => {
            print_datasets();
            Ok(())
        }
    }
}

pub async fn run_join(args: &JoinArgs) -> Result<PipelineReport> {
    let ResolvedJoin {
        config,
        left,
        right,
    } = args.resolve()?;
    info!(
        mode = %config.join_mode,
        left_key = %config.left_key,
        right_key = %config.right_key,
        partitions = config.partition_count,
        workers = config.worker_count,
        "starting join"
    );
    let result = JoinPipeline::new(config)?
        .run(left, right, &args.output)
        .await;
    if let Some(path) = &args.metrics_out {
        fs::write(path, global_metrics().render_prometheus())?;
    }
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let BsjError::PartitionsFailed(failures) = &e {
                for failure in failures {
                    error!(partition = failure.partition, kind = %failure.kind, message = %failure.message, "partition failed");
                }
            }
            return Err(e);
        }
    };
    let payload = serde_json::to_string_pretty(&report)
        .map_err(|e| BsjError::Execution(format!("report json encode failed: {e}")))?;
    match &args.report_out {
        Some(path) => fs::write(path, payload)?,
        None => println!("{payload}"),
    }
    Ok(report)
}

pub fn run_prepare(args: &PrepareArgs) -> Result<()> {
    let def = datasets::dataset(&args.dataset)?;
    let inputs = DatasetInputs::parse_pairs(&args.inputs)?;
    let manifest = datasets::prepare(&def, &inputs, &args.output, args.writer_options())?;
    println!(
        "{}: {} records in {} shards at {}",
        def.name,
        manifest.total_records,
        manifest.shards.len(),
        args.output.display()
    );
    Ok(())
}

pub fn run_submit(args: &SubmitArgs) -> Result<()> {
    let job = args.job_spec()?;
    let scheduler = SlurmScheduler::new()
        .with_program(args.sbatch.as_str())
        .dry_run(args.dry_run);
    let submission = scheduler.submit(&job)?;
    match &submission {
        Submission::Submitted { job_id } => println!("{job_id}"),
        Submission::DryRun { .. } => println!("{submission}"),
    }
    Ok(())
}

pub fn run_inspect(args: &InspectArgs) -> Result<()> {
    let catalog = args.catalog.as_ref().map(Catalog::load_from_json).transpose()?;
    let (spec, _) = resolve_collection(catalog.as_ref(), &args.collection)?;
    let reader = RecordReader::open(spec)?;
    let fields = reader
        .schema()?
        .map(|s| s.fields().iter().map(|f| format!("{}: {:?}", f.name, f.data_type)).collect())
        .unwrap_or_default();
    let mut records = 0;
    for record in reader.records() {
        let record = record?;
        if (records as usize) < args.limit {
            println!("{}", record_json(&record));
        }
        records += 1;
    }
    let report = InspectReport {
        shards: reader.shards().to_vec(),
        fields,
        records,
    };
    let payload = serde_json::to_string_pretty(&report)
        .map_err(|e| BsjError::Execution(format!("inspect json encode failed: {e}")))?;
    println!("{payload}");
    Ok(())
}

fn print_datasets() {
    for def in datasets::registry() {
        println!("{} {} (key: {})", def.name, def.version, def.key_field);
        println!("    {}", def.description);
        println!("    {}", def.homepage);
        for download in def.downloads {
            println!("    --input {}=<path>  from {}", download.name, download.url);
        }
    }
    for preset in datasets::presets() {
        println!(
            "preset {}: {} {} join {}.{} = {}.{}",
            preset.name,
            preset.description,
            preset.mode,
            preset.left,
            preset.left_key,
            preset.right,
            preset.right_key
        );
    }
}

/// A record as a flat JSON object in field order.
pub fn record_json(record: &Record) -> serde_json::Value {
    let fields = record
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::Null => serde_json::Value::Null,
                Value::Int64(v) => serde_json::Value::from(*v),
                Value::Float64(v) => serde_json::Value::from(*v),
                Value::Utf8(v) => serde_json::Value::from(v.as_str()),
                Value::Binary(v) => serde_json::Value::from(format!("<{} bytes>", v.len())),
            };
            (name.to_string(), value)
        })
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(fields)
}
