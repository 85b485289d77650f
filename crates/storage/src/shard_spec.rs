use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bsj_common::{BsjError, Result};

use crate::manifest::Manifest;
use crate::schema::RecordSchema;

pub const SHARD_EXTENSION: &str = "arrow";

/// Path pattern addressing a sharded collection.
///
/// Accepted forms:
/// - `dir/prefix-*.arrow`: one `*` wildcard in the file name, matches sorted by name
/// - `dir/stem@N`: exactly `N` shards named `stem-00000-of-0000N.arrow`
/// - `dir`: a committed collection listed by its `manifest.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardSpec {
    Glob {
        dir: PathBuf,
        prefix: String,
        suffix: String,
    },
    Counted {
        dir: PathBuf,
        stem: String,
        count: u32,
    },
    Manifest {
        dir: PathBuf,
    },
}

/// Shard list resolved from a [`ShardSpec`], in read order.
#[derive(Debug, Clone)]
pub struct ResolvedShards {
    pub paths: Vec<PathBuf>,
    /// Known up front only for manifest-backed collections.
    pub schema: Option<RecordSchema>,
}

pub fn counted_shard_name(stem: &str, index: u32, count: u32) -> String {
    format!("{stem}-{index:05}-of-{count:05}.{SHARD_EXTENSION}")
}

impl ShardSpec {
    pub fn manifest(dir: impl Into<PathBuf>) -> Self {
        ShardSpec::Manifest { dir: dir.into() }
    }

    pub fn resolve(&self) -> Result<ResolvedShards> {
        match self {
            ShardSpec::Glob {
                dir,
                prefix,
                suffix,
            } => {
                let entries = match fs::read_dir(dir) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(BsjError::MissingShard { path: dir.clone() });
                    }
                    Err(e) => return Err(e.into()),
                };
                let mut paths = Vec::new();
                for entry in entries {
                    let entry = entry?;
                    if !entry.file_type()?.is_file() {
                        continue;
                    }
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with('.') {
                        continue;
                    }
                    if name.len() >= prefix.len() + suffix.len()
                        && name.starts_with(prefix.as_str())
                        && name.ends_with(suffix.as_str())
                    {
                        paths.push(entry.path());
                    }
                }
                if paths.is_empty() {
                    return Err(BsjError::MissingShard {
                        path: dir.join(format!("{prefix}*{suffix}")),
                    });
                }
                paths.sort();
                Ok(ResolvedShards {
                    paths,
                    schema: None,
                })
            }
            ShardSpec::Counted { dir, stem, count } => {
                let paths = (0..*count)
                    .map(|i| dir.join(counted_shard_name(stem, i, *count)))
                    .collect::<Vec<_>>();
                if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
                    return Err(BsjError::MissingShard {
                        path: missing.clone(),
                    });
                }
                Ok(ResolvedShards {
                    paths,
                    schema: None,
                })
            }
            ShardSpec::Manifest { dir } => {
                let manifest = Manifest::read(dir)?;
                let paths = manifest
                    .shards
                    .iter()
                    .map(|s| dir.join(&s.file))
                    .collect::<Vec<_>>();
                if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
                    return Err(BsjError::MissingShard {
                        path: missing.clone(),
                    });
                }
                Ok(ResolvedShards {
                    paths,
                    schema: Some(manifest.schema),
                })
            }
        }
    }
}

impl FromStr for ShardSpec {
    type Err = BsjError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(BsjError::InvalidConfig("empty shard path".to_string()));
        }
        let path = Path::new(s);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        if s.contains('*') {
            if dir.to_string_lossy().contains('*') || name.matches('*').count() != 1 {
                return Err(BsjError::InvalidConfig(format!(
                    "shard pattern '{s}' must contain exactly one '*' in the file name"
                )));
            }
            let (prefix, suffix) = name.split_once('*').unwrap_or((name, ""));
            return Ok(ShardSpec::Glob {
                dir,
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            });
        }

        if let Some((stem, count)) = name.rsplit_once('@') {
            let count = count.parse::<u32>().map_err(|e| {
                BsjError::InvalidConfig(format!("invalid shard count in '{s}': {e}"))
            })?;
            if stem.is_empty() || count == 0 {
                return Err(BsjError::InvalidConfig(format!(
                    "shard pattern '{s}' needs a stem and a positive count"
                )));
            }
            return Ok(ShardSpec::Counted {
                dir,
                stem: stem.to_string(),
                count,
            });
        }

        Ok(ShardSpec::Manifest {
            dir: PathBuf::from(s),
        })
    }
}

impl fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardSpec::Glob {
                dir,
                prefix,
                suffix,
            } => write!(f, "{}", dir.join(format!("{prefix}*{suffix}")).display()),
            ShardSpec::Counted { dir, stem, count } => {
                write!(f, "{}", dir.join(format!("{stem}@{count}")).display())
            }
            ShardSpec::Manifest { dir } => write!(f, "{}", dir.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_forms() {
        assert_eq!(
            "data/uniref/part-*.arrow".parse::<ShardSpec>().expect("glob"),
            ShardSpec::Glob {
                dir: PathBuf::from("data/uniref"),
                prefix: "part-".to_string(),
                suffix: ".arrow".to_string(),
            }
        );
        assert_eq!(
            "data/pfam/regions@16".parse::<ShardSpec>().expect("counted"),
            ShardSpec::Counted {
                dir: PathBuf::from("data/pfam"),
                stem: "regions".to_string(),
                count: 16,
            }
        );
        assert_eq!(
            "out/joined".parse::<ShardSpec>().expect("manifest"),
            ShardSpec::manifest("out/joined")
        );
        assert!("a/*/b-*.arrow".parse::<ShardSpec>().is_err());
        assert!("a/b@zero".parse::<ShardSpec>().is_err());
    }

    #[test]
    fn counted_names_are_zero_padded() {
        assert_eq!(counted_shard_name("pfam", 3, 16), "pfam-00003-of-00016.arrow");
    }

    #[test]
    fn missing_counted_shard_is_reported() {
        let dir = std::env::temp_dir().join("bsj_shard_spec_missing_dir_never_created");
        let spec = ShardSpec::Counted {
            dir: dir.clone(),
            stem: "x".to_string(),
            count: 2,
        };
        match spec.resolve() {
            Err(BsjError::MissingShard { path }) => {
                assert_eq!(path, dir.join("x-00000-of-00002.arrow"))
            }
            other => panic!("expected missing shard, got {other:?}"),
        }
    }
}
