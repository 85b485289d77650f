//! Pfam-A region annotations of UniProt sequences.
//!
//! Source rows are tab separated with a header. `seq_start` is 1-based and
//! inclusive; records carry a 0-based `start` and an exclusive `end`.

use bsj_common::Result;
use bsj_storage::{Record, ValueType};

use super::{parse_field, DatasetDef, DatasetInputs, DownloadSpec, Header, RecordSink, TextInput};

pub const PFAM_A_REGIONS_UNIPROT: DatasetDef = DatasetDef {
    name: "pfam_a_regions_uniprot",
    version: "33.1",
    description: "Pfam-A family regions on UniProt sequences.",
    homepage: "https://pfam.xfam.org/",
    downloads: &[DownloadSpec {
        name: "tsv",
        url: "ftp://ftp.ebi.ac.uk/pub/databases/Pfam/releases/Pfam33.1/Pfam-A.regions.uniprot.tsv.gz",
    }],
    fields: &[
        ("uniprot_acc", ValueType::Utf8, false),
        ("pfam_acc", ValueType::Utf8, false),
        ("seq_version", ValueType::Int64, false),
        ("start", ValueType::Int64, false),
        ("end", ValueType::Int64, false),
    ],
    key_field: "uniprot_acc",
    parse,
};

fn parse(inputs: &DatasetInputs, sink: &mut RecordSink<'_>) -> Result<u64> {
    let mut input = TextInput::open(inputs.get("tsv")?)?;
    let Some((_, header)) = input.next_line()? else {
        return Ok(0);
    };
    let header = Header::parse(&header, '\t');
    let uniprot_acc = header.index(&input, "uniprot_acc")?;
    let pfam_acc = header.index(&input, "pfamA_acc")?;
    let seq_version = header.index(&input, "seq_version")?;
    let seq_start = header.index(&input, "seq_start")?;
    let seq_end = header.index(&input, "seq_end")?;
    let width = [uniprot_acc, pfam_acc, seq_version, seq_start, seq_end]
        .into_iter()
        .max()
        .unwrap_or(0);

    let mut count = 0;
    while let Some((line_no, line)) = input.next_line()? {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        let cols = line.split('\t').collect::<Vec<_>>();
        if cols.len() <= width {
            return Err(input.error(line_no, format!("expected {} columns", width + 1)));
        }
        let start: i64 = parse_field(&input, line_no, "seq_start", cols[seq_start])?;
        let end: i64 = parse_field(&input, line_no, "seq_end", cols[seq_end])?;
        if start < 1 || end < start {
            return Err(input.error(line_no, format!("invalid region {start}..{end}")));
        }
        let record = Record::new()
            .with("uniprot_acc", cols[uniprot_acc])
            .with("pfam_acc", cols[pfam_acc])
            .with(
                "seq_version",
                parse_field::<i64>(&input, line_no, "seq_version", cols[seq_version])?,
            )
            .with("start", start - 1)
            .with("end", end);
        sink(record)?;
        count += 1;
    }
    Ok(count)
}
