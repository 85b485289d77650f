pub mod catalog;
pub mod codec;
pub mod manifest;
pub mod reader;
pub mod record;
pub mod schema;
pub mod shard_spec;
pub mod value;
pub mod writer;

pub use catalog::*;
pub use manifest::{Manifest, ShardMeta, MANIFEST_FILE};
pub use reader::{RecordIter, RecordReader};
pub use record::Record;
pub use schema::{FieldDef, RecordSchema, ValueType};
pub use shard_spec::ShardSpec;
pub use value::Value;
pub use writer::{write_collection, ShardedWriter, WriterOptions};
