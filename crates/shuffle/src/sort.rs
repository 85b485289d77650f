//! Pass 2 of the partition/sort stage: external merge sort of one bucket.
//!
//! Rows accumulate in memory until the estimated buffer size is reached, are
//! stably sorted by key and spilled as a run. A single run (or none) is
//! written straight to the output and counted as one `sort_run` spill; otherwise runs are merged with a min-heap,
//! at most `fan_in` at a time, until one remains. Equal keys keep their input
//! order because runs are merged in creation order and ties break on run index.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bsj_common::metrics::global_metrics;
use bsj_common::{BsjError, JoinSide, Result};
use tracing::debug;

use crate::budget::SpillBudget;
use crate::layout::{run_path, sort_dir};
use crate::partitioner::SpillRow;
use crate::reader::SpillReader;
use crate::writer::{write_run, SpillWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOptions {
    /// Estimated in-memory bytes before a run is spilled.
    pub buffer_bytes: usize,
    /// Max runs open at once while merging.
    pub fan_in: usize,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            buffer_bytes: 256 * 1024 * 1024,
            fan_in: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    pub records: u64,
    pub runs: u32,
    pub merge_passes: u32,
}

/// Sorts the spill file at `input` by key into `output` and deletes `input`.
pub fn sort_partition(
    input: &Path,
    output: &Path,
    side: JoinSide,
    partition: u32,
    root: &Path,
    options: SortOptions,
    budget: &SpillBudget,
) -> Result<SortStats> {
    let started = Instant::now();
    let fan_in = options.fan_in.max(2);
    fs::create_dir_all(sort_dir(root, partition))?;

    let mut stats = SortStats::default();
    let mut runs: Vec<PathBuf> = Vec::new();
    let mut buffer: Vec<SpillRow> = Vec::new();
    let mut buffered_bytes = 0_usize;
    let mut spilled_bytes = 0_u64;

    for row in SpillReader::open(input)? {
        let row = row?;
        stats.records += 1;
        buffered_bytes += row.estimated_bytes();
        buffer.push(row);
        if buffered_bytes >= options.buffer_bytes {
            let path = run_path(root, side, partition, 0, runs.len() as u32);
            spilled_bytes += spill_sorted(&mut buffer, &path, budget)?;
            runs.push(path);
            buffered_bytes = 0;
        }
    }
    let input_records = stats.records;

    if runs.is_empty() {
        buffer.sort_by(|a, b| a.key.cmp(&b.key));
        let written = write_run(output, &buffer, budget)?;
        if !buffer.is_empty() {
            stats.runs = 1;
        }
        global_metrics().record_spill(
            side.as_str(),
            "sort_run",
            written,
            u64::from(stats.runs),
            started.elapsed().as_secs_f64(),
        );
    } else {
        if !buffer.is_empty() {
            let path = run_path(root, side, partition, 0, runs.len() as u32);
            spilled_bytes += spill_sorted(&mut buffer, &path, budget)?;
            runs.push(path);
        }
        stats.runs = runs.len() as u32;
        drop(buffer);

        let mut generation = 1_u32;
        while runs.len() > fan_in {
            let mut next = Vec::with_capacity(runs.len().div_ceil(fan_in));
            for (i, group) in runs.chunks(fan_in).enumerate() {
                let path = run_path(root, side, partition, generation, i as u32);
                merge_runs(group, &path, budget)?;
                next.push(path);
            }
            runs = next;
            generation += 1;
            stats.merge_passes += 1;
        }
        let written = merge_runs(&runs, output, budget)?;
        stats.merge_passes += 1;
        if written != input_records {
            return Err(BsjError::Execution(format!(
                "sort of {side} partition {partition} wrote {written} records, read {input_records}"
            )));
        }
        global_metrics().record_spill(
            side.as_str(),
            "sort_run",
            spilled_bytes,
            u64::from(stats.runs),
            started.elapsed().as_secs_f64(),
        );
    }

    budget.remove_file(input)?;
    debug!(
        side = %side,
        partition,
        records = stats.records,
        runs = stats.runs,
        merge_passes = stats.merge_passes,
        "partition sorted"
    );
    Ok(stats)
}

fn spill_sorted(buffer: &mut Vec<SpillRow>, path: &Path, budget: &SpillBudget) -> Result<u64> {
    buffer.sort_by(|a, b| a.key.cmp(&b.key));
    let bytes = write_run(path, buffer, budget)?;
    buffer.clear();
    Ok(bytes)
}

struct HeapEntry {
    row: SpillRow,
    run: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .key
            .cmp(&other.row.key)
            .then(self.run.cmp(&other.run))
    }
}

/// k-way merges sorted `runs` into `output`, deleting the inputs.
/// Returns the number of rows written.
fn merge_runs(runs: &[PathBuf], output: &Path, budget: &SpillBudget) -> Result<u64> {
    let mut readers = runs
        .iter()
        .map(SpillReader::open)
        .collect::<Result<Vec<_>>>()?;
    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (run, reader) in readers.iter_mut().enumerate() {
        if let Some(row) = reader.next() {
            heap.push(Reverse(HeapEntry { row: row?, run }));
        }
    }

    let mut writer = SpillWriter::create(output, budget.clone())?;
    while let Some(Reverse(entry)) = heap.pop() {
        writer.append(&entry.row)?;
        if let Some(row) = readers[entry.run].next() {
            heap.push(Reverse(HeapEntry {
                row: row?,
                run: entry.run,
            }));
        }
    }
    let (_, written, _) = writer.finish()?;
    drop(readers);
    for run in runs {
        budget.remove_file(run)?;
    }
    Ok(written)
}
