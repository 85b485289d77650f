#![deny(missing_docs)]

//! Join-side execution primitives.
//!
//! Architecture role:
//! - key extraction from records
//! - ordering-checked streams over key-sorted partitions
//! - the streaming merge-join and its output projection
//!
//! Key modules:
//! - [`key`]
//! - [`stream`]
//! - [`join`]
//! - [`projection`]

pub mod join;
pub mod key;
pub mod projection;
pub mod stream;

// Re-export only what you want at the crate root (no globs).
pub use join::{GroupSpill, JoinStats, MergeJoin, MergeJoinOptions};
pub use key::{FieldKey, KeyExtractor};
pub use projection::{JoinSchema, JoinedRecord};
pub use stream::OrderedStream;
