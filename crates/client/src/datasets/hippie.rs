//! HIPPIE scored human protein interactions (MITAB).

use bsj_common::Result;
use bsj_storage::{Record, ValueType};

use super::{parse_field, DatasetDef, DatasetInputs, DownloadSpec, Header, RecordSink, TextInput};

pub const HIPPIE: DatasetDef = DatasetDef {
    name: "hippie",
    version: "2.2",
    description: "HIPPIE confidence-scored human protein-protein interactions.",
    homepage: "http://cbdm-01.zdv.uni-mainz.de/~mschaefer/hippie/",
    downloads: &[DownloadSpec {
        name: "mitab",
        url: "http://cbdm-01.zdv.uni-mainz.de/~mschaefer/hippie/HIPPIE-current.mitab.txt",
    }],
    fields: &[
        ("protein_a_identifier", ValueType::Utf8, true),
        ("protein_b_identifier", ValueType::Utf8, true),
        ("confidence", ValueType::Float64, false),
    ],
    key_field: "protein_a_identifier",
    parse,
};

/// `uniprotkb:P12345` to `P12345`; anything else has no UniProt id.
pub fn uniprot_id(alt_id: &str) -> Option<&str> {
    let mut parts = alt_id.trim().split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("uniprotkb"), Some(id), None) => Some(id),
        _ => None,
    }
}

fn parse(inputs: &DatasetInputs, sink: &mut RecordSink<'_>) -> Result<u64> {
    let mut input = TextInput::open(inputs.get("mitab")?)?;
    let Some((_, header)) = input.next_line()? else {
        return Ok(0);
    };
    let header = Header::parse(&header, '\t');
    let alt_a = header.index(&input, "Alt IDs Interactor A")?;
    let alt_b = header.index(&input, "Alt IDs Interactor B")?;
    let confidence = header.index(&input, "Confidence Value")?;
    let width = alt_a.max(alt_b).max(confidence);

    let mut count = 0;
    while let Some((line_no, line)) = input.next_line()? {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let cols = line.split('\t').collect::<Vec<_>>();
        if cols.len() <= width {
            return Err(input.error(line_no, format!("expected {} columns", width + 1)));
        }
        let score: f64 = parse_field(&input, line_no, "Confidence Value", cols[confidence])?;
        sink(
            Record::new()
                .with("protein_a_identifier", uniprot_id(cols[alt_a]))
                .with("protein_b_identifier", uniprot_id(cols[alt_b]))
                .with("confidence", score),
        )?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::uniprot_id;

    #[test]
    fn only_single_uniprotkb_ids_are_kept() {
        assert_eq!(uniprot_id("uniprotkb:AL1A1_HUMAN"), Some("AL1A1_HUMAN"));
        assert_eq!(uniprot_id("entrez gene:216"), None);
        assert_eq!(uniprot_id("uniprotkb:a:b"), None);
        assert_eq!(uniprot_id("-"), None);
    }
}
