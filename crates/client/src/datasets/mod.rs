//! Dataset builders.
//!
//! Each [`DatasetDef`] describes one raw biological dataset: where it is
//! published, the schema of its records, its natural join key and a parse
//! function that streams records out of the already downloaded files.
//! [`prepare`] turns those files into a sharded collection with a manifest,
//! readable by the join pipeline.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use bsj_common::{BsjError, JoinConfig, JoinMode, Result};
use bsj_storage::{FieldDef, Manifest, Record, RecordSchema, ShardedWriter, ValueType, WriterOptions};
use serde::Serialize;
use tracing::info;

pub mod hippie;
pub mod pfam;
pub mod stringdb;
pub mod uniref;

/// One file a dataset is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadSpec {
    /// Input name used on the command line (`--input name=path`).
    pub name: &'static str,
    pub url: &'static str,
}

/// Receives parsed records in file order.
pub type RecordSink<'a> = dyn FnMut(Record) -> Result<()> + 'a;

/// Streams every record of a dataset into the sink and returns the count.
pub type ParseFn = fn(&DatasetInputs, &mut RecordSink<'_>) -> Result<u64>;

#[derive(Clone, Copy)]
pub struct DatasetDef {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub homepage: &'static str,
    pub downloads: &'static [DownloadSpec],
    /// `(name, type, nullable)` in record order.
    pub fields: &'static [(&'static str, ValueType, bool)],
    pub key_field: &'static str,
    pub parse: ParseFn,
}

impl DatasetDef {
    pub fn schema(&self) -> Result<RecordSchema> {
        RecordSchema::new(
            self.fields
                .iter()
                .map(|(name, data_type, nullable)| FieldDef::new(*name, *data_type, *nullable))
                .collect(),
        )
    }
}

impl std::fmt::Debug for DatasetDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetDef")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("key_field", &self.key_field)
            .finish_non_exhaustive()
    }
}

/// Every dataset this crate can build, by name.
pub fn registry() -> Vec<DatasetDef> {
    vec![uniref::UNIREF50, pfam::PFAM_A_REGIONS_UNIPROT, stringdb::STRING_LINKS, hippie::HIPPIE]
}

pub fn dataset(name: &str) -> Result<DatasetDef> {
    registry()
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| BsjError::InvalidConfig(format!("unknown dataset '{name}'")))
}

/// Local paths of a dataset's downloaded files, by [`DownloadSpec::name`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetInputs {
    files: BTreeMap<String, PathBuf>,
}

impl DatasetInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert(name, path);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.files.insert(name.into(), path.into());
    }

    pub fn get(&self, name: &str) -> Result<&Path> {
        self.files
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| BsjError::InvalidConfig(format!("missing input file '{name}'")))
    }

    /// Parses `name=path` pairs.
    pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut inputs = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (name, path) = pair.split_once('=').ok_or_else(|| {
                BsjError::InvalidConfig(format!("input '{pair}' is not of the form name=path"))
            })?;
            inputs.insert(name, path);
        }
        Ok(inputs)
    }
}

/// Parses `def`'s inputs into a sharded collection under `out_dir`.
///
/// Shards are named after the dataset. Any previous manifest and shards of
/// the same dataset in `out_dir` are removed first.
pub fn prepare(
    def: &DatasetDef,
    inputs: &DatasetInputs,
    out_dir: &Path,
    options: WriterOptions,
) -> Result<Manifest> {
    for download in def.downloads {
        inputs.get(download.name)?;
    }
    let started = Instant::now();
    std::fs::create_dir_all(out_dir)?;
    Manifest::retract(out_dir)?;
    ShardedWriter::remove_existing(out_dir, def.name)?;

    let schema = def.schema()?;
    let mut writer = ShardedWriter::new(out_dir, def.name, schema.clone(), options)?;
    let records = (def.parse)(inputs, &mut |record: Record| writer.write(record))?;
    let shards = writer.finish()?;
    let manifest = Manifest::new(schema, shards);
    manifest.commit(out_dir)?;
    info!(
        dataset = def.name,
        records,
        shards = manifest.shards.len(),
        output = %out_dir.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "dataset prepared"
    );
    Ok(manifest)
}

/// A named join between two datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JoinPreset {
    pub name: &'static str,
    pub description: &'static str,
    pub left: &'static str,
    pub left_key: &'static str,
    pub right: &'static str,
    pub right_key: &'static str,
    pub mode: JoinMode,
}

/// UniRef50 clusters with their Pfam-A regions; clusters without regions
/// are kept.
pub const UNIREF50_WITH_PFAM_REGIONS: JoinPreset = JoinPreset {
    name: "uniref50_with_pfam_regions",
    description: "UniRef50 sequences with Pfam regions annotated.",
    left: "uniref50",
    left_key: "accession",
    right: "pfam_a_regions_uniprot",
    right_key: "uniprot_acc",
    mode: JoinMode::LeftOuter,
};

pub fn presets() -> Vec<JoinPreset> {
    vec![UNIREF50_WITH_PFAM_REGIONS]
}

pub fn preset(name: &str) -> Result<JoinPreset> {
    presets()
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| BsjError::InvalidConfig(format!("unknown join preset '{name}'")))
}

impl JoinPreset {
    /// `base` with this preset's keys and mode.
    pub fn apply(&self, base: JoinConfig) -> JoinConfig {
        JoinConfig {
            left_key: self.left_key.to_string(),
            right_key: self.right_key.to_string(),
            join_mode: self.mode,
            ..base
        }
    }
}

/// Line reader over an already extracted text input.
pub(crate) struct TextInput {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_no: u64,
}

impl TextInput {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if path.extension().is_some_and(|ext| ext == "gz") {
            return Err(BsjError::InvalidConfig(format!(
                "{} is compressed; extract it before preparing",
                path.display()
            )));
        }
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BsjError::MissingShard {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    /// Next line without its terminator, with its 1-based number.
    pub(crate) fn next_line(&mut self) -> Result<Option<(u64, String)>> {
        match self.lines.next() {
            Some(line) => {
                self.line_no += 1;
                Ok(Some((self.line_no, line?)))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn error(&self, line_no: u64, reason: impl std::fmt::Display) -> BsjError {
        BsjError::corrupt_shard(&self.path, format!("line {line_no}: {reason}"))
    }
}

/// Column positions of a delimited file's header row.
pub(crate) struct Header {
    columns: Vec<String>,
}

impl Header {
    pub(crate) fn parse(line: &str, delimiter: char) -> Self {
        Self {
            columns: line
                .trim_end_matches('\r')
                .split(delimiter)
                .map(|c| c.trim().trim_start_matches('#').to_string())
                .collect(),
        }
    }

    pub(crate) fn index(&self, input: &TextInput, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| input.error(1, format!("header has no column '{name}'")))
    }
}

pub(crate) fn parse_field<T: FromStr>(
    input: &TextInput,
    line_no: u64,
    column: &str,
    raw: &str,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| input.error(line_no, format!("column '{column}' value '{raw}': {e}")))
}
