use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use bsj_common::{BsjError, Result};

use crate::partitioner::SpillRow;

/// Streams [`SpillRow`]s back from a JSON-lines spill file.
///
/// A line that does not decode is reported as [`BsjError::CorruptShard`];
/// the iterator fuses after the first error.
pub struct SpillReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: u64,
    done: bool,
}

impl SpillReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BsjError::MissingShard { path });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for SpillReader {
    type Item = Result<SpillRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return match serde_json::from_str::<SpillRow>(&line) {
                Ok(row) => Some(Ok(row)),
                Err(e) => {
                    self.done = true;
                    Some(Err(BsjError::corrupt_shard(
                        &self.path,
                        format!("line {}: {e}", self.line_no),
                    )))
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use bsj_storage::{Record, Value};

    use super::*;
    use crate::budget::SpillBudget;
    use crate::writer::SpillWriter;

    fn temp_file(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("bsj_spill_test_{nanos}_{name}"))
    }

    #[test]
    fn reads_back_rows_and_flags_garbage() {
        let path = temp_file("rows.jsonl");
        let budget = SpillBudget::unlimited();
        let mut writer = SpillWriter::create(&path, budget.clone()).expect("create");
        for i in 0..3_i64 {
            writer
                .append(&SpillRow {
                    key: Value::from(i),
                    record: Record::new().with("key", i).with("val", "x"),
                })
                .expect("append");
        }
        let (_, records, bytes) = writer.finish().expect("finish");
        assert_eq!(records, 3);
        assert_eq!(budget.used(), bytes);

        let rows = SpillReader::open(&path)
            .expect("open")
            .collect::<Result<Vec<_>>>()
            .expect("decode");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].key, Value::from(2_i64));

        let mut text = fs::read_to_string(&path).expect("read");
        text.push_str("{broken\n");
        fs::write(&path, text).expect("write");
        let mut reader = SpillReader::open(&path).expect("open");
        assert_eq!(reader.by_ref().take(3).filter(|r| r.is_ok()).count(), 3);
        assert!(matches!(reader.next(), Some(Err(BsjError::CorruptShard { .. }))));
        assert!(reader.next().is_none());

        budget.remove_file(&path).expect("remove");
        assert_eq!(budget.used(), 0);
    }
}
