use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use bsj_common::{BsjError, ErrorKind, JoinSide, Result};
use bsj_shuffle::{
    bucket_collection, bucket_path, partition_index, read_bucket_index, sort_partition,
    sorted_path, SortOptions, SpillBudget, SpillReader,
};
use bsj_storage::{Record, Value};

fn temp_root(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("bsj_shuffle_{name}_{nanos}"))
}

fn records(keys: &[&str], tag: &str) -> Vec<Result<Record>> {
    keys.iter()
        .map(|k| Ok(Record::new().with("acc", *k).with("tag", tag)))
        .collect()
}

fn key_of(record: &Record) -> Result<Value> {
    record
        .get("acc")
        .cloned()
        .ok_or_else(|| BsjError::MissingKeyField {
            field: "acc".to_string(),
        })
}

#[test]
fn both_sides_route_equal_keys_to_the_same_bucket() {
    let root = temp_root("route");
    let budget = SpillBudget::unlimited();
    let left = ["P1", "P2", "P3", "Q9", "P2"];
    let right = ["P2", "Q9", "X0"];

    let li = bucket_collection(records(&left, "l"), key_of, JoinSide::Left, 4, &root, &budget)
        .expect("left");
    let ri = bucket_collection(records(&right, "r"), key_of, JoinSide::Right, 4, &root, &budget)
        .expect("right");
    assert_eq!(li.records, 5);
    assert_eq!(ri.records, 3);
    assert_eq!(li.partitions.len(), 4);
    assert_eq!(read_bucket_index(&root, JoinSide::Left).expect("index"), li);

    for p in 0..4 {
        assert!(bucket_path(&root, JoinSide::Left, p).is_file());
        assert!(bucket_path(&root, JoinSide::Right, p).is_file());
    }
    for key in ["P2", "Q9"] {
        let p = partition_index(&Value::from(key), 4);
        for side in [JoinSide::Left, JoinSide::Right] {
            let found = SpillReader::open(bucket_path(&root, side, p))
                .expect("open")
                .filter_map(|r| r.ok())
                .any(|row| row.key == Value::from(key));
            assert!(found, "{key} missing from {side} bucket {p}");
        }
    }
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn rebucketing_replaces_previous_output() {
    let root = temp_root("rerun");
    let budget = SpillBudget::unlimited();
    bucket_collection(records(&["a", "b", "c"], "x"), key_of, JoinSide::Left, 2, &root, &budget)
        .expect("first");
    let second = bucket_collection(records(&["a"], "x"), key_of, JoinSide::Left, 2, &root, &budget)
        .expect("second");
    assert_eq!(second.records, 1);
    let total: usize = (0..2)
        .map(|p| {
            SpillReader::open(bucket_path(&root, JoinSide::Left, p))
                .expect("open")
                .count()
        })
        .sum();
    assert_eq!(total, 1);
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn missing_key_field_aborts_bucketing() {
    let root = temp_root("nokey");
    let input = vec![Ok(Record::new().with("other", "x"))];
    let err = bucket_collection(
        input,
        key_of,
        JoinSide::Right,
        2,
        &root,
        &SpillBudget::unlimited(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingKeyField);
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn bucket_then_sort_yields_ordered_partition() {
    let root = temp_root("sorted");
    let budget = SpillBudget::unlimited();
    let keys = ["m", "c", "x", "a", "c", "b", "z", "a"];
    bucket_collection(records(&keys, "l"), key_of, JoinSide::Left, 1, &root, &budget)
        .expect("bucket");
    let out = sorted_path(&root, JoinSide::Left, 0);
    let stats = sort_partition(
        &bucket_path(&root, JoinSide::Left, 0),
        &out,
        JoinSide::Left,
        0,
        &root,
        SortOptions {
            buffer_bytes: 256,
            fan_in: 3,
        },
        &budget,
    )
    .expect("sort");
    assert_eq!(stats.records, keys.len() as u64);

    let sorted = SpillReader::open(&out)
        .expect("open")
        .map(|r| r.map(|row| row.key))
        .collect::<Result<Vec<_>>>()
        .expect("rows");
    let mut expected = keys.iter().map(|k| Value::from(*k)).collect::<Vec<_>>();
    expected.sort();
    assert_eq!(sorted, expected);
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn spilled_floats_and_bytes_keep_their_exact_value() {
    let root = temp_root("fidelity");
    let budget = SpillBudget::unlimited();
    let scores = [
        f64::NAN,
        1.0715660391465826e-75,
        f64::NEG_INFINITY,
        0.1 + 0.2,
    ];
    let input = scores
        .iter()
        .enumerate()
        .map(|(i, s)| {
            Ok(Record::new()
                .with("acc", format!("P{i}"))
                .with("score", *s)
                .with("digest", vec![0xde_u8, 0xad, i as u8]))
        })
        .collect::<Vec<_>>();
    bucket_collection(input, key_of, JoinSide::Right, 1, &root, &budget).expect("bucket");

    let bucket = bucket_path(&root, JoinSide::Right, 0);
    let spilled = std::fs::read_to_string(&bucket).expect("bucket text");
    assert!(spilled.contains(r#""Binary":"dead00""#), "{spilled}");

    let out = sorted_path(&root, JoinSide::Right, 0);
    sort_partition(
        &bucket,
        &out,
        JoinSide::Right,
        0,
        &root,
        SortOptions {
            buffer_bytes: 64,
            fan_in: 2,
        },
        &budget,
    )
    .expect("sort");

    let rows = SpillReader::open(&out)
        .expect("open")
        .collect::<Result<Vec<_>>>()
        .expect("rows");
    assert_eq!(rows.len(), scores.len());
    for (i, expected) in scores.iter().enumerate() {
        let row = &rows[i];
        assert_eq!(row.key, Value::from(format!("P{i}")));
        let Some(Value::Float64(score)) = row.record.get("score") else {
            panic!("score missing from {:?}", row.record);
        };
        assert_eq!(score.to_bits(), expected.to_bits());
        assert_eq!(
            row.record.get("digest"),
            Some(&Value::Binary(vec![0xde, 0xad, i as u8]))
        );
    }
    let _ = std::fs::remove_dir_all(root);
}
