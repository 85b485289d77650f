use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bsj_common::{BsjError, Result};

use crate::budget::SpillBudget;
use crate::partitioner::SpillRow;

/// Appends [`SpillRow`]s to one JSON-lines spill file, charging every byte
/// against the pipeline's [`SpillBudget`].
pub struct SpillWriter {
    path: PathBuf,
    out: BufWriter<File>,
    budget: SpillBudget,
    records: u64,
    bytes: u64,
}

impl SpillWriter {
    pub fn create(path: impl Into<PathBuf>, budget: SpillBudget) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            budget,
            records: 0,
            bytes: 0,
        })
    }

    pub fn append(&mut self, row: &SpillRow) -> Result<()> {
        let mut line = serde_json::to_vec(row)
            .map_err(|e| BsjError::Execution(format!("spill encode failed: {e}")))?;
        line.push(b'\n');
        self.budget.charge(line.len() as u64)?;
        self.out.write_all(&line)?;
        self.records += 1;
        self.bytes += line.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flushes to disk and returns `(path, records, bytes)`.
    pub fn finish(mut self) -> Result<(PathBuf, u64, u64)> {
        self.out.flush()?;
        Ok((self.path, self.records, self.bytes))
    }
}

/// Writes a fully sorted, in-memory run in one go.
pub fn write_run(path: &Path, rows: &[SpillRow], budget: &SpillBudget) -> Result<u64> {
    let mut writer = SpillWriter::create(path, budget.clone())?;
    for row in rows {
        writer.append(row)?;
    }
    let (_, _, bytes) = writer.finish()?;
    Ok(bytes)
}
