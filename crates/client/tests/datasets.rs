use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bsj_client::cli::{run_join, Cli, Command};
use bsj_client::datasets::{self, DatasetInputs};
use bsj_common::{ErrorKind, JoinMode, Result};
use bsj_storage::{Manifest, Record, RecordReader, ShardSpec, Value, WriterOptions};
use clap::Parser;

fn unique_root(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("bsj_client_{name}_{nanos}"))
}

const FASTA: &str = "\
>UniRef50_Q8WZ42 Titin n=1336 Tax=Vertebrata TaxID=7742 RepID=TITIN_HUMAN
MTTQAPTFTQ
PLQSVVVLEG

>UniRef50_P12345 Aspartate aminotransferase, mitochondrial n=4 Tax=Oryctolagus cuniculus TaxID=9986 RepID=AATM_RABIT
MALLHSGRVL
>UniRef50_A0A000 Uncharacterized protein n=1 Tax=unknown TaxID=1
MK
";

const PFAM: &str = "\
uniprot_acc\tseq_version\tcrc64\tmd5\tpfamA_acc\tseq_start\tseq_end
Q8WZ42\t4\tC1\tM1\tPF07679\t6\t84
Q8WZ42\t4\tC1\tM1\tPF00041\t100\t190
B2RXH2\t1\tC2\tM2\tPF00001\t1\t10
";

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("mkdir");
    let path = dir.join(name);
    fs::write(&path, content).expect("write fixture");
    path
}

fn read_all(dir: &Path) -> Vec<Record> {
    RecordReader::open(ShardSpec::manifest(dir))
        .expect("open")
        .records()
        .collect::<Result<Vec<_>>>()
        .expect("records")
}

fn prepare(root: &Path, name: &str, inputs: DatasetInputs) -> PathBuf {
    let out = root.join(name);
    let def = datasets::dataset(name).expect("dataset");
    datasets::prepare(&def, &inputs, &out, WriterOptions::default()).expect("prepare");
    out
}

#[test]
fn uniref50_fasta_becomes_keyed_records() {
    let root = unique_root("uniref");
    let fasta = write(&root.join("raw"), "uniref50.fasta", FASTA);
    let out = prepare(&root, "uniref50", DatasetInputs::new().with("fasta", fasta));

    let records = read_all(&out);
    assert_eq!(records.len(), 3);
    let titin = &records[0];
    assert_eq!(titin.get("accession"), Some(&Value::from("Q8WZ42")));
    assert_eq!(titin.get("aa_sequence"), Some(&Value::from("MTTQAPTFTQPLQSVVVLEG")));
    assert_eq!(titin.get("num_members"), Some(&Value::from(1336i64)));
    let aatm = &records[1];
    assert_eq!(
        aatm.get("cluster_name"),
        Some(&Value::from("Aspartate aminotransferase, mitochondrial"))
    );
    assert_eq!(aatm.get("tax_name"), Some(&Value::from("Oryctolagus cuniculus")));
    assert_eq!(records[2].get("representative_member"), Some(&Value::Null));
    assert_eq!(Manifest::read(&out).expect("manifest").total_records, 3);
    let _ = fs::remove_dir_all(root);
}

#[test]
fn pfam_regions_are_zero_based_half_open() {
    let root = unique_root("pfam");
    let tsv = write(&root.join("raw"), "regions.tsv", PFAM);
    let out = prepare(&root, "pfam_a_regions_uniprot", DatasetInputs::new().with("tsv", tsv));

    let records = read_all(&out);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].get("pfam_acc"), Some(&Value::from("PF07679")));
    assert_eq!(records[0].get("start"), Some(&Value::from(5i64)));
    assert_eq!(records[0].get("end"), Some(&Value::from(84i64)));
    assert_eq!(records[2].get("seq_version"), Some(&Value::from(1i64)));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn string_links_keep_only_uniprot_mapped_pairs() {
    let root = unique_root("string");
    let raw = root.join("raw");
    let aliases = write(
        &raw,
        "aliases.txt",
        "## string_protein_id ## alias ## source ##\n\
         9606.ENSP1\tP11111\tBLAST_UniProt_AC Ensembl_UniProt\n\
         9606.ENSP2\tP22222\tEnsembl_UniProt\n\
         9606.ENSP3\tGENE3\tEnsembl_HGNC\n",
    );
    let links = write(
        &raw,
        "links.txt",
        "protein1 protein2 combined_score\n\
         9606.ENSP1 9606.ENSP2 900\n\
         9606.ENSP1 9606.ENSP3 400\n\
         9606.ENSP2 9606.ENSP1 250\n",
    );
    let out = prepare(
        &root,
        "string_links",
        DatasetInputs::new().with("aliases", aliases).with("links", links),
    );

    let records = read_all(&out);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("uniprot_acc_1"), Some(&Value::from("P11111")));
    assert_eq!(records[0].get("uniprot_acc_2"), Some(&Value::from("P22222")));
    assert_eq!(records[0].get("score"), Some(&Value::from(0.9)));
    assert_eq!(records[1].get("score"), Some(&Value::from(0.25)));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn hippie_mitab_scores_are_parsed() {
    let root = unique_root("hippie");
    let mitab = write(
        &root.join("raw"),
        "hippie.mitab.txt",
        "ID Interactor A\tID Interactor B\tAlt IDs Interactor A\tAlt IDs Interactor B\tConfidence Value\n\
         entrez gene:216\tentrez gene:216\tuniprotkb:AL1A1_HUMAN\tuniprotkb:AL1A1_HUMAN\t0.76\n\
         entrez gene:1\tentrez gene:2\t-\tuniprotkb:A2MG_HUMAN\t0.5\n",
    );
    let out = prepare(&root, "hippie", DatasetInputs::new().with("mitab", mitab));

    let records = read_all(&out);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("protein_a_identifier"), Some(&Value::from("AL1A1_HUMAN")));
    assert_eq!(records[0].get("confidence"), Some(&Value::from(0.76)));
    assert_eq!(records[1].get("protein_a_identifier"), Some(&Value::Null));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn malformed_input_is_reported_with_its_line() {
    let root = unique_root("malformed");
    let tsv = write(
        &root.join("raw"),
        "regions.tsv",
        "uniprot_acc\tseq_version\tpfamA_acc\tseq_start\tseq_end\nQ1\t1\tPF1\tten\t20\n",
    );
    let def = datasets::dataset("pfam_a_regions_uniprot").expect("dataset");
    let err = datasets::prepare(
        &def,
        &DatasetInputs::new().with("tsv", tsv),
        &root.join("out"),
        WriterOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptShard);
    assert!(err.to_string().contains("line 2"), "{err}");
    assert!(!Manifest::exists(&root.join("out")));

    let missing = datasets::prepare(
        &def,
        &DatasetInputs::new(),
        &root.join("out"),
        WriterOptions::default(),
    )
    .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::InvalidConfig);
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn uniref50_with_pfam_regions_preset_joins_prepared_datasets() {
    let root = unique_root("preset");
    let raw = root.join("raw");
    let uniref = prepare(
        &root,
        "uniref50",
        DatasetInputs::new().with("fasta", write(&raw, "uniref50.fasta", FASTA)),
    );
    let pfam = prepare(
        &root,
        "pfam_a_regions_uniprot",
        DatasetInputs::new().with("tsv", write(&raw, "regions.tsv", PFAM)),
    );
    let out = root.join("joined");
    let report_path = root.join("report.json");

    let cli = Cli::try_parse_from([
        "bsj".to_string(),
        "join".to_string(),
        uniref.display().to_string(),
        pfam.display().to_string(),
        "--output".to_string(),
        out.display().to_string(),
        "--preset".to_string(),
        "uniref50_with_pfam_regions".to_string(),
        "--partitions".to_string(),
        "3".to_string(),
        "--workers".to_string(),
        "2".to_string(),
        "--spill-dir".to_string(),
        root.join("spill").display().to_string(),
        "--report-out".to_string(),
        report_path.display().to_string(),
    ])
    .expect("parse args");
    let Command::Join(args) = cli.command else {
        panic!("expected join command");
    };
    assert_eq!(args.resolve().expect("resolve").config.join_mode, JoinMode::LeftOuter);

    let report = run_join(&args).await.expect("join");
    assert_eq!(report.left_records, 3);
    assert_eq!(report.right_records, 3);
    assert_eq!(report.rows_out, 4);
    assert!(report_path.exists());

    let mut rows = read_all(&out)
        .into_iter()
        .map(|r| {
            (
                r.get("accession").and_then(Value::as_str).unwrap_or("").to_string(),
                r.get("pfam_acc").and_then(Value::as_str).map(str::to_string),
            )
        })
        .collect::<Vec<_>>();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            ("A0A000".to_string(), None),
            ("P12345".to_string(), None),
            ("Q8WZ42".to_string(), Some("PF00041".to_string())),
            ("Q8WZ42".to_string(), Some("PF07679".to_string())),
        ]
    );
    let schema = Manifest::read(&out).expect("manifest").schema;
    assert!(schema.field("uniprot_acc").is_none());
    assert!(schema.field("start").expect("start").nullable);
    let _ = fs::remove_dir_all(root);
}
