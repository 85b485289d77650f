//! STRING protein links mapped to UniProt accessions.
//!
//! The alias file maps STRING protein ids to UniProt accessions through its
//! `Ensembl_UniProt` source; links whose proteins have no such alias are
//! dropped. Link scores are scaled from `0..=1000` to `0.0..=1.0`.

use std::collections::HashMap;

use bsj_common::Result;
use bsj_storage::{Record, ValueType};
use tracing::debug;

use super::{parse_field, DatasetDef, DatasetInputs, DownloadSpec, RecordSink, TextInput};

const UNIPROT_SOURCE: &str = "Ensembl_UniProt";

pub const STRING_LINKS: DatasetDef = DatasetDef {
    name: "string_links",
    version: "11.0",
    description: "STRING protein-protein association scores keyed by UniProt accession.",
    homepage: "https://string-db.org/",
    downloads: &[
        DownloadSpec {
            name: "aliases",
            url: "https://stringdb-static.org/download/protein.aliases.v11.0.txt.gz",
        },
        DownloadSpec {
            name: "links",
            url: "https://stringdb-static.org/download/protein.links.v11.0.txt.gz",
        },
    ],
    fields: &[
        ("uniprot_acc_1", ValueType::Utf8, false),
        ("uniprot_acc_2", ValueType::Utf8, false),
        ("score", ValueType::Float64, false),
    ],
    key_field: "uniprot_acc_1",
    parse,
};

fn load_aliases(inputs: &DatasetInputs) -> Result<HashMap<String, String>> {
    let mut input = TextInput::open(inputs.get("aliases")?)?;
    input.next_line()?;
    let mut aliases = HashMap::new();
    while let Some((line_no, line)) = input.next_line()? {
        let cols = line.split('\t').collect::<Vec<_>>();
        if cols.len() < 3 {
            return Err(input.error(line_no, "expected protein, alias and source columns"));
        }
        let sources = cols[cols.len() - 1];
        if sources.split_whitespace().any(|s| s == UNIPROT_SOURCE) {
            aliases.insert(cols[0].to_string(), cols[1].to_string());
        }
    }
    Ok(aliases)
}

fn parse(inputs: &DatasetInputs, sink: &mut RecordSink<'_>) -> Result<u64> {
    let aliases = load_aliases(inputs)?;
    let mut input = TextInput::open(inputs.get("links")?)?;
    input.next_line()?;
    let mut count = 0;
    let mut unmapped = 0u64;
    while let Some((line_no, line)) = input.next_line()? {
        let cols = line.split_whitespace().collect::<Vec<_>>();
        if cols.len() < 3 {
            return Err(input.error(line_no, "expected two proteins and a score"));
        }
        let (Some(p1), Some(p2)) = (aliases.get(cols[0]), aliases.get(cols[1])) else {
            unmapped += 1;
            continue;
        };
        let score: f64 = parse_field(&input, line_no, "combined_score", cols[cols.len() - 1])?;
        sink(
            Record::new()
                .with("uniprot_acc_1", p1.as_str())
                .with("uniprot_acc_2", p2.as_str())
                .with("score", score / 1000.0),
        )?;
        count += 1;
    }
    debug!(aliases = aliases.len(), unmapped, "string links mapped");
    Ok(count)
}
