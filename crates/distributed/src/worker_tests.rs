use super::*;
use std::time::{SystemTime, UNIX_EPOCH};

use bsj_common::{ErrorKind, JoinMode};
use bsj_execution::{FieldKey, KeyExtractor};
use bsj_shuffle::bucket_collection;
use bsj_storage::{FieldDef, Record, RecordReader, RecordSchema, ShardSpec, Value, ValueType};

fn unique_root(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("bsj_worker_{name}_{nanos}"))
}

fn schema(value_field: &str) -> RecordSchema {
    RecordSchema::new(vec![
        FieldDef::new("key", ValueType::Int64, false),
        FieldDef::new(value_field, ValueType::Utf8, false),
    ])
    .expect("schema")
}

fn ctx(root: &Path, mode: JoinMode, partition_count: u32) -> PartitionContext {
    let config = JoinConfig {
        partition_count,
        join_mode: mode,
        spill_dir: root.join("spill"),
        ..JoinConfig::default()
    };
    let join_schema = JoinSchema::new(&schema("val"), &schema("r"), "key", "right_", mode)
        .expect("join schema");
    PartitionContext {
        config: Arc::new(config),
        spill_root: root.join("spill"),
        output_dir: root.join("out"),
        join_schema: Arc::new(join_schema),
        budget: SpillBudget::unlimited(),
    }
}

fn bucket(ctx: &PartitionContext, side: JoinSide, rows: &[(i64, &str)], field: &str) {
    let key = FieldKey::new("key");
    let records = rows
        .iter()
        .map(|(k, v)| Ok(Record::new().with("key", *k).with(field, *v)))
        .collect::<Vec<_>>();
    bucket_collection(
        records,
        |r| key.key(r),
        side,
        ctx.config.partition_count,
        &ctx.spill_root,
        &ctx.budget,
    )
    .expect("bucket");
}

#[test]
fn partition_is_sorted_joined_and_written() {
    let root = unique_root("single");
    let ctx = ctx(&root, JoinMode::LeftOuter, 1);
    bucket(&ctx, JoinSide::Left, &[(3, "c"), (1, "a"), (2, "b")], "val");
    bucket(&ctx, JoinSide::Right, &[(4, "w"), (3, "z"), (1, "x"), (3, "y")], "r");

    let outcome = run_partition(&ctx, 0).expect("partition");
    assert_eq!(outcome.left_records, 3);
    assert_eq!(outcome.right_records, 4);
    assert_eq!(outcome.rows_out, 4);
    assert_eq!(outcome.shards.len(), 1);
    assert_eq!(outcome.shards[0].file, "part-00000-00000.arrow");
    assert!(!sort_dir(&ctx.spill_root, 0).exists());

    let reader = RecordReader::open(
        format!("{}/part-*.arrow", ctx.output_dir.display())
            .parse::<ShardSpec>()
            .expect("spec"),
    )
    .expect("reader");
    let rows = reader
        .records()
        .collect::<Result<Vec<_>>>()
        .expect("records");
    let pairs = rows
        .iter()
        .map(|r| (r.get("val").cloned(), r.get("r").cloned()))
        .collect::<Vec<_>>();
    assert_eq!(
        pairs,
        vec![
            (Some(Value::from("a")), Some(Value::from("x"))),
            (Some(Value::from("b")), Some(Value::Null)),
            (Some(Value::from("c")), Some(Value::from("z"))),
            (Some(Value::from("c")), Some(Value::from("y"))),
        ]
    );
    let _ = fs::remove_dir_all(root);
}

#[test]
fn rerun_replaces_partition_output() {
    let root = unique_root("rerun");
    let ctx = ctx(&root, JoinMode::Inner, 1);
    for _ in 0..2 {
        bucket(&ctx, JoinSide::Left, &[(1, "a")], "val");
        bucket(&ctx, JoinSide::Right, &[(1, "x")], "r");
        run_partition(&ctx, 0).expect("partition");
    }
    let shards = fs::read_dir(&ctx.output_dir)
        .expect("out dir")
        .filter_map(|e| e.ok())
        .count();
    assert_eq!(shards, 1);
    let _ = fs::remove_dir_all(root);
}

#[test]
fn failed_partition_does_not_stop_the_worker() {
    let root = unique_root("failure");
    let ctx = ctx(&root, JoinMode::Inner, 2);
    bucket(&ctx, JoinSide::Left, &[(1, "a"), (2, "b"), (3, "c"), (4, "d")], "val");
    bucket(&ctx, JoinSide::Right, &[(1, "x"), (2, "y"), (3, "z"), (4, "w")], "r");
    fs::remove_file(bucket_path(&ctx.spill_root, JoinSide::Right, 0)).expect("remove bucket");

    let worker = PartitionWorker::new(WorkerId(0), vec![PartitionId(0), PartitionId(1)]);
    let results = worker.run(&ctx);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, 0);
    let err = results[0].1.as_ref().expect_err("partition 0 must fail");
    assert_eq!(err.kind(), ErrorKind::MissingShard);
    assert!(results[1].1.is_ok());
    assert!(!sort_dir(&ctx.spill_root, 0).exists());
    let _ = fs::remove_dir_all(root);
}
