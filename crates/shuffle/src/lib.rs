//! Partition/sort stage of the join pipeline.
//!
//! Pass 1 ([`bucket_collection`]) hashes every record's key into one of N
//! JSON-lines bucket files per input. Pass 2 ([`sort_partition`]) turns one
//! bucket into a key-sorted file with a bounded-memory external merge sort.
//! All working files live under a spill root and are charged to a shared
//! [`SpillBudget`].

pub mod bucket;
pub mod budget;
pub mod layout;
pub mod partitioner;
pub mod reader;
pub mod sort;
pub mod writer;

pub use bucket::{bucket_collection, read_bucket_index};
pub use budget::SpillBudget;
pub use layout::*;
pub use partitioner::{partition_index, SpillRow};
pub use reader::SpillReader;
pub use sort::{sort_partition, SortOptions, SortStats};
pub use writer::{write_run, SpillWriter};
