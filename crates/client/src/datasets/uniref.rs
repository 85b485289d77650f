//! UniRef50 clusters from the UniProt FASTA release.
//!
//! Header layout:
//! `>UniRef50_Q8WZ42 Titin n=1336 Tax=Vertebrata TaxID=7742 RepID=TITIN_HUMAN`

use bsj_common::Result;
use bsj_storage::{Record, ValueType};

use super::{DatasetDef, DatasetInputs, DownloadSpec, RecordSink, TextInput};

const CLUSTER_PREFIX: &str = "UniRef50_";

pub const UNIREF50: DatasetDef = DatasetDef {
    name: "uniref50",
    version: "2020.04",
    description: "UniRef50 clusters: one representative sequence per cluster.",
    homepage: "https://www.uniprot.org/help/uniref",
    downloads: &[DownloadSpec {
        name: "fasta",
        url: "ftp://ftp.uniprot.org/pub/databases/uniprot/current_release/uniref/uniref50/uniref50.fasta.gz",
    }],
    fields: &[
        ("unique_identifier", ValueType::Utf8, false),
        ("accession", ValueType::Utf8, false),
        ("cluster_name", ValueType::Utf8, false),
        ("num_members", ValueType::Int64, false),
        ("tax_name", ValueType::Utf8, true),
        ("tax_id", ValueType::Utf8, true),
        ("representative_member", ValueType::Utf8, true),
        ("aa_sequence", ValueType::Utf8, false),
    ],
    key_field: "accession",
    parse,
};

/// Parsed description line of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHeader {
    pub unique_identifier: String,
    pub cluster_name: String,
    pub num_members: i64,
    pub tax_name: Option<String>,
    pub tax_id: Option<String>,
    pub representative_member: Option<String>,
}

impl ClusterHeader {
    /// Cluster id without the `UniRef50_` prefix, a UniProt accession.
    pub fn accession(&self) -> &str {
        self.unique_identifier
            .strip_prefix(CLUSTER_PREFIX)
            .unwrap_or(&self.unique_identifier)
    }
}

/// Parses a header without its leading `>`.
pub fn parse_header(header: &str) -> std::result::Result<ClusterHeader, String> {
    let words = header.split_whitespace().collect::<Vec<_>>();
    let (id, rest) = words
        .split_first()
        .ok_or_else(|| "empty FASTA header".to_string())?;

    let name_end = rest
        .iter()
        .position(|w| w.starts_with("n="))
        .ok_or_else(|| format!("header of {id} has no member count"))?;
    let cluster_name = rest[..name_end].join(" ");
    let num_members = rest[name_end]["n=".len()..]
        .parse::<i64>()
        .map_err(|e| format!("member count of {id}: {e}"))?;

    let tagged = &rest[name_end + 1..];
    let tax_name = tagged
        .iter()
        .position(|w| w.starts_with("Tax="))
        .map(|start| {
            let mut parts = vec![&tagged[start]["Tax=".len()..]];
            parts.extend(
                tagged[start + 1..]
                    .iter()
                    .take_while(|w| !w.contains('='))
                    .copied(),
            );
            parts.join(" ")
        });
    let tag = |prefix: &str| {
        tagged
            .iter()
            .find_map(|w| w.strip_prefix(prefix))
            .map(str::to_string)
    };

    Ok(ClusterHeader {
        unique_identifier: id.to_string(),
        cluster_name,
        num_members,
        tax_name,
        tax_id: tag("TaxID="),
        representative_member: tag("RepID="),
    })
}

fn to_record(header: ClusterHeader, sequence: String) -> Record {
    Record::new()
        .with("unique_identifier", header.unique_identifier.as_str())
        .with("accession", header.accession())
        .with("cluster_name", header.cluster_name)
        .with("num_members", header.num_members)
        .with("tax_name", header.tax_name)
        .with("tax_id", header.tax_id)
        .with("representative_member", header.representative_member)
        .with("aa_sequence", sequence)
}

fn parse(inputs: &DatasetInputs, sink: &mut RecordSink<'_>) -> Result<u64> {
    let mut input = TextInput::open(inputs.get("fasta")?)?;
    let mut current: Option<(ClusterHeader, String)> = None;
    let mut count = 0;
    while let Some((line_no, line)) = input.next_line()? {
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            if let Some((header, sequence)) = current.take() {
                sink(to_record(header, sequence))?;
                count += 1;
            }
            let header = parse_header(header).map_err(|e| input.error(line_no, e))?;
            current = Some((header, String::new()));
        } else if line.is_empty() {
            continue;
        } else {
            match current.as_mut() {
                Some((_, sequence)) => sequence.push_str(line),
                None => return Err(input.error(line_no, "sequence data before the first header")),
            }
        }
    }
    if let Some((header, sequence)) = current {
        sink(to_record(header, sequence))?;
        count += 1;
    }
    Ok(count)
}
