use bsj_storage::{Record, Value};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Bucket of `key` among `partition_count` partitions.
///
/// Uses xxh3 over [`Value::canonical_bytes`], which is stable across runs,
/// processes and builds, so both inputs of a join agree on every key.
pub fn partition_index(key: &Value, partition_count: u32) -> u32 {
    let count = u64::from(partition_count.max(1));
    (xxh3_64(&key.canonical_bytes()) % count) as u32
}

/// A record tagged with its extracted join key, as stored in spill files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpillRow {
    pub key: Value,
    pub record: Record,
}

impl SpillRow {
    pub fn estimated_bytes(&self) -> usize {
        self.key.estimated_bytes() + self.record.estimated_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_index_is_stable_and_in_range() {
        let keys = [
            Value::from("Q8WZ42"),
            Value::from(1_i64),
            Value::from(2.5_f64),
            Value::Null,
            Value::Binary(vec![1, 2, 3]),
        ];
        for key in &keys {
            let p = partition_index(key, 16);
            assert!(p < 16);
            assert_eq!(p, partition_index(&key.clone(), 16));
        }
        assert_eq!(partition_index(&Value::from("anything"), 1), 0);
    }

    #[test]
    fn equal_keys_from_different_records_share_a_partition() {
        let left = Value::from("P12345".to_string());
        let right = Value::from("P12345");
        assert_eq!(partition_index(&left, 64), partition_index(&right, 64));
    }

    #[test]
    fn spreads_keys_over_partitions() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..200_i64 {
            seen.insert(partition_index(&Value::from(i), 8));
        }
        assert_eq!(seen.len(), 8);
    }
}
