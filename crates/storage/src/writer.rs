use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow::ipc::writer::StreamWriter;
use arrow_schema::SchemaRef;
use bsj_common::{BsjError, JoinConfig, Result};
use tracing::debug;

use crate::codec::records_to_batch;
use crate::manifest::{staging_path, Manifest, ShardMeta};
use crate::record::Record;
use crate::schema::RecordSchema;
use crate::shard_spec::SHARD_EXTENSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub shard_size_threshold_bytes: u64,
    pub shard_max_records: Option<u64>,
    pub batch_size_rows: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self::from(&JoinConfig::default())
    }
}

impl From<&JoinConfig> for WriterOptions {
    fn from(cfg: &JoinConfig) -> Self {
        Self {
            shard_size_threshold_bytes: cfg.shard_size_threshold_bytes,
            shard_max_records: cfg.shard_max_records,
            batch_size_rows: cfg.batch_size_rows,
        }
    }
}

/// Name of the `seq`-th shard written under `prefix`.
pub fn shard_file_name(prefix: &str, seq: u32) -> String {
    format!("{prefix}-{seq:05}.{SHARD_EXTENSION}")
}

/// Streams records into Arrow IPC shard files under one directory.
///
/// Shards are written to a hidden staging name and renamed only once
/// complete, so an interrupted writer never leaves a file that looks like a
/// finished shard. Rollover happens after a batch once the shard reaches the
/// byte threshold or the record cap.
pub struct ShardedWriter {
    dir: PathBuf,
    prefix: String,
    schema: RecordSchema,
    arrow_schema: SchemaRef,
    options: WriterOptions,
    pending: Vec<Record>,
    current: Option<OpenShard>,
    next_seq: u32,
    completed: Vec<ShardMeta>,
}

struct OpenShard {
    file_name: String,
    staged: PathBuf,
    writer: StreamWriter<CountingWriter<BufWriter<File>>>,
    written: Arc<AtomicU64>,
    records: u64,
}

impl ShardedWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        schema: RecordSchema,
        options: WriterOptions,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let arrow_schema = schema.to_arrow();
        Ok(Self {
            dir,
            prefix: prefix.into(),
            schema,
            arrow_schema,
            options: WriterOptions {
                batch_size_rows: options.batch_size_rows.max(1),
                ..options
            },
            pending: Vec::new(),
            current: None,
            next_seq: 0,
            completed: Vec::new(),
        })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn write(&mut self, record: Record) -> Result<()> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_limit() {
            self.flush_batch()?;
        }
        Ok(())
    }

    /// Flushes buffered rows, seals the open shard and returns every shard
    /// written, in write order.
    pub fn finish(mut self) -> Result<Vec<ShardMeta>> {
        self.flush_batch()?;
        self.close_current()?;
        Ok(std::mem::take(&mut self.completed))
    }

    /// Deletes shards and staging leftovers of a previous run under `prefix`.
    pub fn remove_existing(dir: &Path, prefix: &str) -> Result<usize> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let shard_prefix = format!("{prefix}-");
        let staged_prefix = format!(".{prefix}-");
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&shard_prefix) || name.starts_with(&staged_prefix) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn batch_limit(&self) -> usize {
        match (self.options.shard_max_records, &self.current) {
            (Some(max), Some(open)) => {
                let remaining = max.saturating_sub(open.records).max(1);
                self.options
                    .batch_size_rows
                    .min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            (Some(max), None) => self
                .options
                .batch_size_rows
                .min(usize::try_from(max).unwrap_or(usize::MAX)),
            (None, _) => self.options.batch_size_rows,
        }
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = records_to_batch(&self.schema, &self.arrow_schema, &self.pending)?;
        if self.current.is_none() {
            self.current = Some(self.open_shard()?);
        }
        let Some(open) = self.current.as_mut() else {
            return Err(BsjError::Execution("no open shard".to_string()));
        };
        open.writer
            .write(&batch)
            .map_err(|e| BsjError::Execution(format!("ipc write failed: {e}")))?;
        open.records += self.pending.len() as u64;
        self.pending.clear();

        let full_by_bytes =
            open.written.load(Ordering::Relaxed) >= self.options.shard_size_threshold_bytes;
        let full_by_records = self
            .options
            .shard_max_records
            .is_some_and(|max| open.records >= max);
        if full_by_bytes || full_by_records {
            self.close_current()?;
        }
        Ok(())
    }

    fn open_shard(&mut self) -> Result<OpenShard> {
        let file_name = shard_file_name(&self.prefix, self.next_seq);
        self.next_seq += 1;
        let staged = staging_path(&self.dir.join(&file_name));
        let written = Arc::new(AtomicU64::new(0));
        let sink = CountingWriter {
            inner: BufWriter::new(File::create(&staged)?),
            written: Arc::clone(&written),
        };
        let writer = StreamWriter::try_new(sink, self.arrow_schema.as_ref())
            .map_err(|e| BsjError::Execution(format!("ipc writer init failed: {e}")))?;
        Ok(OpenShard {
            file_name,
            staged,
            writer,
            written,
            records: 0,
        })
    }

    fn close_current(&mut self) -> Result<()> {
        let Some(mut open) = self.current.take() else {
            return Ok(());
        };
        open.writer
            .finish()
            .map_err(|e| BsjError::Execution(format!("ipc finish failed: {e}")))?;
        let sink = open
            .writer
            .into_inner()
            .map_err(|e| BsjError::Execution(format!("ipc writer close failed: {e}")))?;
        let file = sink
            .inner
            .into_inner()
            .map_err(|e| BsjError::from(e.into_error()))?;
        file.sync_all()?;

        let target = self.dir.join(&open.file_name);
        fs::rename(&open.staged, &target).map_err(|e| {
            BsjError::Execution(format!(
                "shard commit failed: {} -> {} ({e})",
                open.staged.display(),
                target.display()
            ))
        })?;
        let bytes = fs::metadata(&target)?.len();
        debug!(
            file = %open.file_name,
            records = open.records,
            bytes,
            "shard committed"
        );
        self.completed.push(ShardMeta {
            file: open.file_name,
            records: open.records,
            bytes,
        });
        Ok(())
    }
}

struct CountingWriter<W> {
    inner: W,
    written: Arc<AtomicU64>,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Writes `records` as a complete collection (shards plus manifest) in `dir`.
pub fn write_collection<I>(
    dir: &Path,
    prefix: &str,
    schema: RecordSchema,
    options: WriterOptions,
    records: I,
) -> Result<Manifest>
where
    I: IntoIterator<Item = Result<Record>>,
{
    Manifest::retract(dir)?;
    ShardedWriter::remove_existing(dir, prefix)?;
    let mut writer = ShardedWriter::new(dir, prefix, schema.clone(), options)?;
    for record in records {
        writer.write(record?)?;
    }
    let shards = writer.finish()?;
    let manifest = Manifest::new(schema, shards);
    manifest.commit(dir)?;
    Ok(manifest)
}
