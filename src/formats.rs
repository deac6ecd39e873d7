//! Decoders for fixture/expected-result data embedded in fenced code blocks: CSV and DBUnit-style
//! XML. YAML/JSON decoding lives inline in [`crate::markdown`] since it shares the `Value`
//! conversions already defined there.
//!
//! The teacher has no analogous readers (its only format is the YAML/TOML spec file itself); CSV
//! and XML support is enriched from the pack (`csv` grounded on `EvilBit-Labs-gold_digger`,
//! `quick-xml` grounded on `bethmaloney-rust-sqlpackage`).

use crate::value::{normalize, Value};
use indexmap::IndexMap;
use quick_xml::events::Event as XmlEvent;
use quick_xml::reader::Reader;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    XmlAttr(String),
}

/// Coerces a raw CSV/XML field string into a [`Value`] using the scalar coercion rules shared by
/// both formats: booleans, integers, floats, bracketed sequences, and quoted strings.
fn coerce_field(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::Float(f);
    }
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let items: Vec<Value> = inner
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(coerce_field)
            .collect();
        return Value::Seq(items);
    }
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        let quote = bytes[0];
        if (quote == b'\'' || quote == b'"') && bytes[bytes.len() - 1] == quote {
            return Value::String(trimmed[1..trimmed.len() - 1].to_string());
        }
    }
    Value::String(trimmed.to_string())
}

/// Decodes a CSV fixture/expected-result block. Lines starting with `#` or `//` are comments and
/// stripped before parsing; the first non-comment line is the header row.
pub fn decode_csv_rows(content: &str) -> Result<Vec<IndexMap<String, Value>>, FormatError> {
    let filtered: String = content
        .lines()
        .filter(|l| {
            let t = l.trim_start();
            !(t.starts_with('#') || t.starts_with("//"))
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(filtered.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = IndexMap::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            let raw = record.get(i).unwrap_or("");
            row.insert(header.clone(), normalize(coerce_field(raw)));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Decodes a DBUnit-style XML dataset: each direct child element of `<dataset>` is one row; its
/// tag name is the table name; its attributes are column/value pairs. Rows for the same tag
/// accumulate, in document order, into that table's row list.
pub fn decode_xml_dataset(
    content: &str,
) -> Result<IndexMap<String, Vec<IndexMap<String, Value>>>, FormatError> {
    let wrapped = if content.contains("<dataset") {
        content.to_string()
    } else {
        format!("<dataset>{content}</dataset>")
    };

    let mut reader = Reader::from_str(&wrapped);
    reader.config_mut().trim_text(true);

    let mut tables: IndexMap<String, Vec<IndexMap<String, Value>>> = IndexMap::new();

    loop {
        match reader.read_event()? {
            XmlEvent::Eof => break,
            XmlEvent::Start(e) | XmlEvent::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "dataset" {
                    continue;
                }
                let mut row = IndexMap::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| FormatError::XmlAttr(e.to_string()))?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                    let val = attr
                        .unescape_value()
                        .map_err(|e| FormatError::XmlAttr(e.to_string()))?
                        .to_string();
                    row.insert(key, normalize(coerce_field(&val)));
                }
                tables.entry(name).or_default().push(row);
            }
            _ => {}
        }
    }

    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_decodes_typed_columns() {
        let csv = "id,name,active\n1,Alice,true\n2,Bob,false\n";
        let rows = decode_csv_rows(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(rows[0].get("active"), Some(&Value::Bool(true)));
        assert_eq!(rows[0].get("name"), Some(&Value::String("Alice".to_string())));
    }

    #[test]
    fn csv_strips_comment_lines() {
        let csv = "# users\nid,name\n1,Alice\n";
        let rows = decode_csv_rows(csv).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn xml_dataset_groups_rows_by_tag() {
        let xml = r#"<users id="1" name="Alice"/><users id="2" name="Bob"/>"#;
        let tables = decode_xml_dataset(xml).unwrap();
        let rows = tables.get("users").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn coerce_handles_bracketed_sequences() {
        match coerce_field("[1, 2, 3]") {
            Value::Seq(items) => assert_eq!(items.len(), 3),
            other => panic!("expected sequence, got {other:?}"),
        }
    }
}
