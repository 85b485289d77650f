use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use bsj_common::{BsjError, Result};
use serde::{Deserialize, Serialize};

use crate::schema::RecordSchema;

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_FORMAT_VERSION: u32 = 1;

/// One fully written shard of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMeta {
    /// File name relative to the collection directory.
    pub file: String,
    pub records: u64,
    pub bytes: u64,
}

/// Durability marker of a collection: only shards listed here are committed.
///
/// Contents are a pure function of the shard list and schema so rewriting the
/// same collection produces identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub schema: RecordSchema,
    pub total_records: u64,
    pub shards: Vec<ShardMeta>,
}

impl Manifest {
    pub fn new(schema: RecordSchema, mut shards: Vec<ShardMeta>) -> Self {
        shards.sort_by(|a, b| a.file.cmp(&b.file));
        let total_records = shards.iter().map(|s| s.records).sum();
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            schema,
            total_records,
            shards,
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path(dir).is_file()
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BsjError::MissingShard { path });
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| BsjError::corrupt_shard(&path, format!("manifest decode failed: {e}")))?;
        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(BsjError::corrupt_shard(
                &path,
                format!("unsupported manifest version {}", manifest.format_version),
            ));
        }
        Ok(manifest)
    }

    /// Writes the manifest under a staging name and renames it into place.
    pub fn commit(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let target = Self::path(dir);
        let staged = staging_path(&target);
        let mut payload = serde_json::to_vec_pretty(self)
            .map_err(|e| BsjError::Execution(format!("manifest encode failed: {e}")))?;
        payload.push(b'\n');
        {
            let mut file = File::create(&staged)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&staged, &target) {
            let _ = fs::remove_file(&staged);
            return Err(BsjError::Execution(format!(
                "manifest commit failed: {} -> {} ({e})",
                staged.display(),
                target.display()
            )));
        }
        Ok(target)
    }

    /// Removes a previously committed manifest so the directory no longer
    /// counts as committed output.
    pub fn retract(dir: &Path) -> Result<()> {
        match fs::remove_file(Self::path(dir)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Hidden sibling name used while a file is still being written.
pub fn staging_path(target: &Path) -> PathBuf {
    let parent = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("target");
    parent.join(format!(".{name}.inprogress"))
}
