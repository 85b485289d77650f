//! Batch-job submission.
//!
//! A [`JobSpec`] describes one pipeline invocation completely; nothing is
//! inherited from the submitting shell. [`SlurmScheduler`] renders it as an
//! `sbatch` command line.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use bsj_common::{BsjError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    /// Shell command run by the job.
    pub command: String,
    pub cpus: u32,
    pub memory_mb: u64,
    #[serde(with = "duration_secs")]
    pub time_limit: Duration,
    /// The job's complete environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub output_log: Option<PathBuf>,
    /// Scheduler partition (queue).
    #[serde(default)]
    pub partition: Option<String>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            cpus: 1,
            memory_mb: 4096,
            time_limit: Duration::from_secs(3600),
            env: BTreeMap::new(),
            output_log: None,
            partition: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BsjError::InvalidConfig("job name must not be empty".to_string()));
        }
        if self.command.trim().is_empty() {
            return Err(BsjError::InvalidConfig("job command must not be empty".to_string()));
        }
        if self.cpus == 0 || self.memory_mb == 0 || self.time_limit.is_zero() {
            return Err(BsjError::InvalidConfig(format!(
                "job '{}' needs positive cpus, memory and time limit",
                self.name
            )));
        }
        if let Some((key, _)) = self
            .env
            .iter()
            .find(|(k, v)| k.is_empty() || k.contains(|c: char| c == '=' || c == ',') || v.contains(','))
        {
            return Err(BsjError::InvalidConfig(format!(
                "environment entry '{key}' cannot be exported to the job"
            )));
        }
        Ok(())
    }
}

/// Handle returned by a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Submission {
    /// Accepted by the scheduler under this job id.
    Submitted { job_id: String },
    /// Not sent; the command that would have been run.
    DryRun { command: Vec<String> },
}

impl fmt::Display for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Submission::Submitted { job_id } => write!(f, "submitted batch job {job_id}"),
            Submission::DryRun { command } => {
                let quoted = command.iter().map(|a| shell_quote(a)).collect::<Vec<_>>();
                f.write_str(&quoted.join(" "))
            }
        }
    }
}

/// Submits jobs to a cluster batch system.
pub trait BatchScheduler: Send + Sync {
    fn name(&self) -> &'static str;

    fn submit(&self, job: &JobSpec) -> Result<Submission>;
}

/// `sbatch` front end.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    program: String,
    dry_run: bool,
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        Self {
            program: "sbatch".to_string(),
            dry_run: false,
        }
    }
}

impl SlurmScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Full argument vector, program first.
    pub fn render(&self, job: &JobSpec) -> Vec<String> {
        let mut args = vec![
            self.program.clone(),
            format!("--job-name={}", job.name),
            format!("--cpus-per-task={}", job.cpus),
            format!("--mem={}M", job.memory_mb),
            format!("--time={}", format_time_limit(job.time_limit)),
        ];
        if let Some(partition) = &job.partition {
            args.push(format!("--partition={partition}"));
        }
        if let Some(log) = &job.output_log {
            args.push(format!("--output={}", log.display()));
        }
        let mut export = String::from("--export=NONE");
        for (key, value) in &job.env {
            export.push_str(&format!(",{key}={value}"));
        }
        args.push(export);
        args.push(format!("--wrap={}", job.command));
        args
    }
}

impl BatchScheduler for SlurmScheduler {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn submit(&self, job: &JobSpec) -> Result<Submission> {
        job.validate()?;
        let command = self.render(job);
        if self.dry_run {
            return Ok(Submission::DryRun { command });
        }
        let output = Command::new(&command[0])
            .args(&command[1..])
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .output()
            .map_err(|e| BsjError::Submission(format!("failed to run {}: {e}", self.program)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BsjError::Submission(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        let job_id = parse_job_id(&stdout)?;
        info!(job = %job.name, job_id = %job_id, scheduler = self.name(), "batch job submitted");
        Ok(Submission::Submitted { job_id })
    }
}

/// Extracts the id from `Submitted batch job <id>`.
pub fn parse_job_id(stdout: &str) -> Result<String> {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("Submitted batch job "))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            BsjError::Submission(format!("unexpected scheduler reply: {}", stdout.trim()))
        })
}

/// `HH:MM:SS`, hours unbounded.
pub fn format_time_limit(limit: Duration) -> String {
    let secs = limit.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Accepts `HH:MM:SS`, `MM:SS` or plain seconds.
pub fn parse_time_limit(s: &str) -> Result<Duration> {
    let invalid = || BsjError::InvalidConfig(format!("invalid time limit '{s}'"));
    let parts = s
        .trim()
        .split(':')
        .map(|p| p.parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>>>()?;
    let secs = match parts.as_slice() {
        [secs] => *secs,
        [m, secs] if *secs < 60 => m * 60 + secs,
        [h, m, secs] if *m < 60 && *secs < 60 => h * 3600 + m * 60 + secs,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_secs(secs))
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=./:,@%+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsj_common::ErrorKind;

    fn job() -> JobSpec {
        let mut job = JobSpec::new("uniref50-pfam", "bsj join --config join.json");
        job.cpus = 8;
        job.memory_mb = 32_000;
        job.time_limit = Duration::from_secs(26 * 3600 + 5 * 60 + 9);
        job.env.insert("RUST_LOG".to_string(), "info".to_string());
        job.env.insert("BSJ_HOME".to_string(), "/data/bsj".to_string());
        job
    }

    #[test]
    fn renders_sbatch_with_explicit_environment() {
        let args = SlurmScheduler::new().render(&job());
        assert_eq!(
            args,
            vec![
                "sbatch",
                "--job-name=uniref50-pfam",
                "--cpus-per-task=8",
                "--mem=32000M",
                "--time=26:05:09",
                "--export=NONE,BSJ_HOME=/data/bsj,RUST_LOG=info",
                "--wrap=bsj join --config join.json",
            ]
        );
    }

    #[test]
    fn dry_run_returns_command_without_running() {
        let scheduler = SlurmScheduler::new()
            .with_program("/nonexistent/sbatch")
            .dry_run(true);
        match scheduler.submit(&job()).expect("dry run") {
            Submission::DryRun { command } => assert_eq!(command[0], "/nonexistent/sbatch"),
            other => panic!("expected dry run, got {other:?}"),
        }
        let shown = Submission::DryRun {
            command: vec!["sbatch".to_string(), "--wrap=a b".to_string()],
        }
        .to_string();
        assert_eq!(shown, "sbatch '--wrap=a b'");
    }

    #[test]
    fn parses_scheduler_reply() {
        assert_eq!(parse_job_id("Submitted batch job 4242\n").expect("id"), "4242");
        let err = parse_job_id("sbatch: error: invalid partition").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Submission);
    }

    #[test]
    fn rejects_unexportable_environment() {
        let mut bad = job();
        bad.env.insert("LIST".to_string(), "a,b".to_string());
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::InvalidConfig);
        let mut zero = job();
        zero.cpus = 0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn missing_program_is_a_submission_error() {
        let scheduler = SlurmScheduler::new().with_program("/nonexistent/bsj-sbatch");
        let err = scheduler.submit(&job()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Submission);
    }

    #[test]
    fn time_limits_parse() {
        assert_eq!(parse_time_limit("26:05:09").expect("hms"), job().time_limit);
        assert_eq!(parse_time_limit("1:30").expect("ms"), Duration::from_secs(90));
        assert_eq!(parse_time_limit("600").expect("s"), Duration::from_secs(600));
        assert!(parse_time_limit("1:75").is_err());
        assert!(parse_time_limit("soon").is_err());
    }

    #[test]
    fn job_spec_loads_from_json() {
        let spec: JobSpec = serde_json::from_str(
            r#"{"name":"j","command":"bsj join","cpus":2,"memory_mb":1024,"time_limit":90}"#,
        )
        .expect("job json");
        assert_eq!(format_time_limit(spec.time_limit), "00:01:30");
        assert!(spec.env.is_empty());
    }
}
