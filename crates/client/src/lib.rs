//! Dataset builders and the `bsj` command line.
//!
//! [`datasets`] turns downloaded UniProt, Pfam, STRING and HIPPIE files into
//! sharded collections; [`cli`] drives preparation, joins and batch
//! submission.

pub mod cli;
pub mod datasets;

pub use cli::{Cli, Command};
pub use datasets::{dataset, prepare, preset, registry, DatasetDef, DatasetInputs, JoinPreset};
