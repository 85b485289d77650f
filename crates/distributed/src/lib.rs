//! Pipeline orchestration: pass-1 bucketing, partition workers, manifest
//! commit, and batch-job submission.

pub mod coordinator;
pub mod job;
pub mod stage;
pub mod worker;

pub use coordinator::{JoinPipeline, PipelineReport};
pub use job::{parse_time_limit, BatchScheduler, JobSpec, SlurmScheduler, Submission};
pub use stage::{assign_partitions, PartitionAssignment};
pub use worker::{partition_prefix, run_partition, PartitionContext, PartitionOutcome, PartitionWorker};
