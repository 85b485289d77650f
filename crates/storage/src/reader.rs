use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::ipc::reader::StreamReader;
use bsj_common::{BsjError, Result};

use crate::codec::batch_to_records;
use crate::record::Record;
use crate::schema::RecordSchema;
use crate::shard_spec::ShardSpec;

/// Reads the records of a sharded collection.
///
/// The shard list is resolved once on [`RecordReader::open`]; every call to
/// [`RecordReader::records`] starts over from the first shard, so repeated
/// reads of an unmodified collection yield identical sequences.
#[derive(Debug, Clone)]
pub struct RecordReader {
    spec: ShardSpec,
    shards: Arc<[PathBuf]>,
    schema: Option<RecordSchema>,
}

impl RecordReader {
    pub fn open(spec: ShardSpec) -> Result<Self> {
        let resolved = spec.resolve()?;
        Ok(Self {
            spec,
            shards: resolved.paths.into(),
            schema: resolved.schema,
        })
    }

    pub fn spec(&self) -> &ShardSpec {
        &self.spec
    }

    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }

    /// Collection schema: the manifest's, else the first shard's header.
    /// `None` only for a manifest-less collection without shards.
    pub fn schema(&self) -> Result<Option<RecordSchema>> {
        if let Some(schema) = &self.schema {
            return Ok(Some(schema.clone()));
        }
        match self.shards.first() {
            Some(path) => {
                let (_, schema) = open_shard(path)?;
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    pub fn records(&self) -> RecordIter {
        RecordIter {
            shards: Arc::clone(&self.shards),
            next_shard: 0,
            current: None,
            pending: VecDeque::new(),
            done: false,
        }
    }
}

struct OpenShard {
    path: PathBuf,
    schema: RecordSchema,
    reader: StreamReader<BufReader<File>>,
}

/// Lazy iterator over all records of a collection, one shard open at a time.
///
/// The iterator fuses after the first error.
pub struct RecordIter {
    shards: Arc<[PathBuf]>,
    next_shard: usize,
    current: Option<OpenShard>,
    pending: VecDeque<Record>,
    done: bool,
}

impl RecordIter {
    fn fail(&mut self, err: BsjError) -> Option<Result<Record>> {
        self.done = true;
        self.current = None;
        self.pending.clear();
        Some(Err(err))
    }
}

impl Iterator for RecordIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            let Some(shard) = self.current.as_mut() else {
                let Some(path) = self.shards.get(self.next_shard).cloned() else {
                    self.done = true;
                    return None;
                };
                self.next_shard += 1;
                match open_shard(&path) {
                    Ok((reader, schema)) => {
                        self.current = Some(OpenShard {
                            path,
                            schema,
                            reader,
                        })
                    }
                    Err(e) => return self.fail(e),
                }
                continue;
            };
            match shard.reader.next() {
                Some(Ok(batch)) => match batch_to_records(&shard.schema, &batch) {
                    Ok(records) => self.pending.extend(records),
                    Err(reason) => {
                        let path = shard.path.clone();
                        return self.fail(BsjError::corrupt_shard(path, reason));
                    }
                },
                Some(Err(e)) => {
                    let path = shard.path.clone();
                    return self.fail(BsjError::corrupt_shard(path, e));
                }
                // Dropping the reader releases the file handle.
                None => self.current = None,
            }
        }
    }
}

fn open_shard(path: &Path) -> Result<(StreamReader<BufReader<File>>, RecordSchema)> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BsjError::MissingShard {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    let reader = StreamReader::try_new(BufReader::new(file), None)
        .map_err(|e| BsjError::corrupt_shard(path, format!("ipc header: {e}")))?;
    let schema = RecordSchema::from_arrow(reader.schema().as_ref())
        .map_err(|e| BsjError::corrupt_shard(path, e))?;
    Ok((reader, schema))
}
