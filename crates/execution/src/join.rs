//! Sorted merge-join of two key-ordered streams.

use std::path::PathBuf;
use std::time::Instant;

use bsj_common::metrics::global_metrics;
use bsj_common::{BsjError, JoinConfig, JoinMode, JoinSide, OversizedGroupPolicy, Result};
use bsj_shuffle::{group_spill_path, SpillBudget, SpillReader, SpillRow, SpillWriter};
use bsj_storage::{Record, Value};
use tracing::debug;

use crate::projection::JoinedRecord;
use crate::stream::OrderedStream;

/// Where oversized right-side key groups are spilled under
/// [`OversizedGroupPolicy::Spill`].
#[derive(Debug, Clone)]
pub struct GroupSpill {
    /// Spill root of the pipeline.
    pub root: PathBuf,
    /// Partition whose sort directory receives the group files.
    pub partition: u32,
    /// Shared working-storage budget.
    pub budget: SpillBudget,
}

/// Knobs of one [`MergeJoin`].
#[derive(Debug, Clone)]
pub struct MergeJoinOptions {
    /// Inner or left-outer.
    pub mode: JoinMode,
    /// Largest key multiplicity accepted on either side.
    pub max_key_group_size: usize,
    /// What to do once a key exceeds `max_key_group_size`.
    pub oversized_group_policy: OversizedGroupPolicy,
    /// Required with [`OversizedGroupPolicy::Spill`].
    pub group_spill: Option<GroupSpill>,
}

impl MergeJoinOptions {
    /// Options taken from a pipeline config, without a group spill location.
    pub fn from_config(cfg: &JoinConfig) -> Self {
        Self {
            mode: cfg.join_mode,
            max_key_group_size: cfg.max_key_group_size,
            oversized_group_policy: cfg.oversized_group_policy,
            group_spill: None,
        }
    }

    /// Sets the group spill location.
    pub fn with_group_spill(mut self, spill: GroupSpill) -> Self {
        self.group_spill = Some(spill);
        self
    }
}

/// Counters of a finished or running join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    /// Rows pulled from the left stream.
    pub left_rows: u64,
    /// Rows pulled from the right stream.
    pub right_rows: u64,
    /// Joined records yielded.
    pub rows_out: u64,
    /// Right key groups that overflowed to disk.
    pub spilled_groups: u64,
}

/// Streaming merge-join over two key-sorted inputs.
///
/// The smaller head key is advanced; on equal keys the right group is
/// buffered and every left record of that key is paired with each right
/// record, in left order then right order. Left-only keys produce a
/// `(left, None)` pair in left-outer mode; right-only keys are dropped.
/// `Null` keys never match. Both inputs are read to the end before the
/// iterator finishes, so ordering is checked over the whole partition.
///
/// Only the right group is held in memory, bounded by
/// `max_key_group_size`; with the spill policy a larger group goes to a
/// temporary file that is replayed for each left record and removed when
/// the group is done. The iterator fuses after the first error.
pub struct MergeJoin<L, R> {
    left: OrderedStream<L>,
    right: OrderedStream<R>,
    options: MergeJoinOptions,
    left_head: Option<SpillRow>,
    right_head: Option<SpillRow>,
    group: Option<ActiveGroup>,
    started: bool,
    done: bool,
    spill_seq: u64,
    rows_out: u64,
    spilled_groups: u64,
}

impl<L, R> MergeJoin<L, R>
where
    L: Iterator<Item = Result<SpillRow>>,
    R: Iterator<Item = Result<SpillRow>>,
{
    /// Joins `left` with `right`. Fails with [`BsjError::InvalidConfig`] when
    /// the spill policy is selected without a [`GroupSpill`] location.
    pub fn new(left: L, right: R, options: MergeJoinOptions) -> Result<Self> {
        if options.max_key_group_size == 0 {
            return Err(BsjError::InvalidConfig(
                "max_key_group_size must be at least 1".to_string(),
            ));
        }
        if options.oversized_group_policy == OversizedGroupPolicy::Spill
            && options.group_spill.is_none()
        {
            return Err(BsjError::InvalidConfig(
                "oversized_group_policy=spill needs a group spill location".to_string(),
            ));
        }
        Ok(Self {
            left: OrderedStream::new(JoinSide::Left, left),
            right: OrderedStream::new(JoinSide::Right, right),
            options,
            left_head: None,
            right_head: None,
            group: None,
            started: false,
            done: false,
            spill_seq: 0,
            rows_out: 0,
            spilled_groups: 0,
        })
    }

    /// Counters so far.
    pub fn stats(&self) -> JoinStats {
        JoinStats {
            left_rows: self.left.rows(),
            right_rows: self.right.rows(),
            rows_out: self.rows_out,
            spilled_groups: self.spilled_groups,
        }
    }

    fn pull_left(&mut self) -> Result<()> {
        self.left_head = self.left.next().transpose()?;
        if let Some(row) = &self.left_head {
            check_group(&self.options, JoinSide::Left, self.left.run_len(), &row.key)?;
        }
        Ok(())
    }

    fn pull_right(&mut self) -> Result<()> {
        self.right_head = self.right.next().transpose()?;
        if let Some(row) = &self.right_head {
            check_group(&self.options, JoinSide::Right, self.right.run_len(), &row.key)?;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<JoinedRecord>> {
        if !self.started {
            self.started = true;
            self.pull_left()?;
            self.pull_right()?;
        }
        loop {
            let mut refill_left = false;
            if let Some(group) = self.group.as_mut() {
                if let Some(right) = group.right.next_record()? {
                    return Ok(Some(JoinedRecord {
                        left: group.left.clone(),
                        right: Some(right),
                    }));
                }
                let same_key = self
                    .left_head
                    .as_ref()
                    .is_some_and(|row| row.key == group.key);
                match self.left_head.take() {
                    Some(row) if same_key => {
                        group.left = row.record;
                        group.right.rewind()?;
                        refill_left = true;
                    }
                    head => {
                        self.left_head = head;
                        self.group = None;
                    }
                }
            }
            if refill_left {
                self.pull_left()?;
                continue;
            }

            let Some(left) = self.left_head.take() else {
                while self.right_head.is_some() {
                    self.pull_right()?;
                }
                return Ok(None);
            };
            if !left.key.is_null() {
                while self.right_head.as_ref().is_some_and(|r| r.key < left.key) {
                    self.pull_right()?;
                }
                if self.right_head.as_ref().is_some_and(|r| r.key == left.key) {
                    let mut right = self.collect_right_group(&left.key)?;
                    right.rewind()?;
                    self.group = Some(ActiveGroup {
                        key: left.key,
                        left: left.record,
                        right,
                    });
                    self.pull_left()?;
                    continue;
                }
            }
            self.pull_left()?;
            if self.options.mode == JoinMode::LeftOuter {
                return Ok(Some(JoinedRecord {
                    left: left.record,
                    right: None,
                }));
            }
        }
    }

    fn collect_right_group(&mut self, key: &Value) -> Result<RightGroup> {
        let started = Instant::now();
        let mut buffered = Vec::new();
        let mut spill: Option<SpillWriter> = None;
        while self.right_head.as_ref().is_some_and(|row| row.key == *key) {
            let Some(row) = self.right_head.take() else {
                break;
            };
            match spill.as_mut() {
                Some(writer) => writer.append(&row)?,
                // Only reachable under the spill policy; `fail` errors in pull_right.
                None if buffered.len() >= self.options.max_key_group_size => {
                    let mut writer = self.open_group_spill()?;
                    for record in buffered.drain(..) {
                        writer.append(&SpillRow {
                            key: key.clone(),
                            record,
                        })?;
                    }
                    writer.append(&row)?;
                    spill = Some(writer);
                }
                None => buffered.push(row.record),
            }
            self.pull_right()?;
        }

        let Some(writer) = spill else {
            return Ok(RightGroup::Memory {
                records: buffered,
                pos: 0,
            });
        };
        let (path, records, bytes) = writer.finish()?;
        let budget = self
            .options
            .group_spill
            .as_ref()
            .map(|s| s.budget.clone())
            .unwrap_or_default();
        self.spilled_groups += 1;
        global_metrics().record_spill(
            JoinSide::Right.as_str(),
            "key_group",
            bytes,
            1,
            started.elapsed().as_secs_f64(),
        );
        debug!(key = %key, records, bytes, path = %path.display(), "key group spilled");
        Ok(RightGroup::Spilled(SpilledGroup {
            path,
            budget,
            reader: None,
        }))
    }

    fn open_group_spill(&mut self) -> Result<SpillWriter> {
        let Some(spill) = &self.options.group_spill else {
            return Err(BsjError::InvalidConfig(
                "key group overflow without a group spill location".to_string(),
            ));
        };
        let path = group_spill_path(&spill.root, spill.partition, self.spill_seq);
        self.spill_seq += 1;
        SpillWriter::create(path, spill.budget.clone())
    }
}

impl<L, R> Iterator for MergeJoin<L, R>
where
    L: Iterator<Item = Result<SpillRow>>,
    R: Iterator<Item = Result<SpillRow>>,
{
    type Item = Result<JoinedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(joined)) => {
                self.rows_out += 1;
                Some(Ok(joined))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.group = None;
                Some(Err(e))
            }
        }
    }
}

fn check_group(
    options: &MergeJoinOptions,
    side: JoinSide,
    run_len: usize,
    key: &Value,
) -> Result<()> {
    if options.oversized_group_policy == OversizedGroupPolicy::Fail
        && run_len > options.max_key_group_size
    {
        return Err(BsjError::OversizedKeyGroup {
            side: side.to_string(),
            key: key.to_string(),
            limit: options.max_key_group_size,
        });
    }
    Ok(())
}

struct ActiveGroup {
    key: Value,
    left: Record,
    right: RightGroup,
}

enum RightGroup {
    Memory { records: Vec<Record>, pos: usize },
    Spilled(SpilledGroup),
}

impl RightGroup {
    fn rewind(&mut self) -> Result<()> {
        match self {
            RightGroup::Memory { pos, .. } => *pos = 0,
            RightGroup::Spilled(group) => group.reader = Some(SpillReader::open(&group.path)?),
        }
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        match self {
            RightGroup::Memory { records, pos } => {
                let record = records.get(*pos).cloned();
                *pos += 1;
                Ok(record)
            }
            RightGroup::Spilled(group) => match group.reader.as_mut() {
                Some(reader) => Ok(reader.next().transpose()?.map(|row| row.record)),
                None => Ok(None),
            },
        }
    }
}

/// Right key group on disk; the file is removed when the group is dropped.
struct SpilledGroup {
    path: PathBuf,
    budget: SpillBudget,
    reader: Option<SpillReader>,
}

impl Drop for SpilledGroup {
    fn drop(&mut self) {
        self.reader = None;
        let _ = self.budget.remove_file(&self.path);
    }
}
