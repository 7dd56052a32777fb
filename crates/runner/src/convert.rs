//! Report file conversion into JSON rows.
//!
//! The portal's "Excel" export is an HTML table served with an `.xls`
//! extension; CSV-style exports are also accepted. The first non-empty row
//! is the header, every following row becomes an object keyed by header.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::runner::RunFailure;

/// One converted report row.
pub type Row = Map<String, Value>;

static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>").expect("valid regex"));
static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("valid regex"));
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<t[hd]\b[^>]*>(.*?)</t[hd]>").expect("valid regex"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid regex"));

/// Magic bytes of legacy binary Excel (OLE2) and zip-based xlsx files.
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Read and convert one downloaded report file.
pub async fn convert_file(path: &Path, expected_columns: &[String]) -> Result<Vec<Row>, RunFailure> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| RunFailure::conversion(format!("Failed to read {name}: {e}")))?;

    if bytes.starts_with(OLE2_MAGIC) || bytes.starts_with(ZIP_MAGIC) {
        return Err(RunFailure::conversion(format!(
            "{name} is a binary spreadsheet; expected an HTML or delimited export"
        )));
    }

    let content = String::from_utf8_lossy(&bytes);
    convert_report(&content, expected_columns)
        .map_err(|f| RunFailure::conversion(format!("{name}: {}", f.message)))
}

/// Convert report text into row objects, checking `expected_columns`.
pub fn convert_report(content: &str, expected_columns: &[String]) -> Result<Vec<Row>, RunFailure> {
    let table = if content.to_ascii_lowercase().contains("<table") {
        parse_html_table(content)
    } else {
        parse_delimited(content)
    };

    let mut rows = table
        .into_iter()
        .filter(|cells| cells.iter().any(|c| !c.is_empty()));
    let header = rows
        .next()
        .ok_or_else(|| RunFailure::conversion("Report has no header row"))?;
    let header = normalize_header(header);

    let missing: Vec<&str> = expected_columns
        .iter()
        .filter(|col| !header.iter().any(|h| h.eq_ignore_ascii_case(col.trim())))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(RunFailure::conversion(format!(
            "Missing expected columns: {}",
            missing.join(", ")
        )));
    }

    Ok(rows
        .map(|cells| {
            header
                .iter()
                .enumerate()
                .map(|(i, key)| {
                    let value = cells.get(i).cloned().unwrap_or_default();
                    (key.clone(), Value::String(value))
                })
                .collect()
        })
        .collect())
}

/// Give blank headers a positional name and make duplicates unique.
fn normalize_header(raw: Vec<String>) -> Vec<String> {
    let mut header: Vec<String> = Vec::with_capacity(raw.len());
    for (i, name) in raw.into_iter().enumerate() {
        let base = if name.is_empty() {
            format!("column_{}", i + 1)
        } else {
            name
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while header.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        header.push(candidate);
    }
    header
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

fn parse_html_table(content: &str) -> Vec<Vec<String>> {
    let Some(table) = TABLE_RE.captures(content).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    ROW_RE
        .captures_iter(table.as_str())
        .filter_map(|row| row.get(1))
        .map(|row| {
            CELL_RE
                .captures_iter(row.as_str())
                .filter_map(|cell| cell.get(1))
                .map(|cell| cell_text(cell.as_str()))
                .collect()
        })
        .collect()
}

fn cell_text(html: &str) -> String {
    let text = TAG_RE.replace_all(html, " ");
    let text = decode_entities(&text);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    let named = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");
    let numeric = NUMERIC_ENTITY_RE.replace_all(&named, |caps: &regex::Captures<'_>| {
        let code = &caps[1];
        let parsed = match code.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
        };
        parsed
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    // Decoded last so "&amp;lt;" stays a literal "&lt;".
    numeric.replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Delimited text
// ---------------------------------------------------------------------------

/// Pick the delimiter that occurs most often in the first line.
fn detect_delimiter(content: &str) -> char {
    let first = content.lines().next().unwrap_or_default();
    [';', '\t', ',']
        .into_iter()
        .max_by_key(|d| first.matches(*d).count())
        .filter(|d| first.contains(*d))
        .unwrap_or(',')
}

/// Split delimited text into records, honouring double-quoted fields
/// (with `""` escapes and embedded newlines).
fn parse_delimited(content: &str) -> Vec<Vec<String>> {
    let content = content.trim_start_matches('\u{feff}');
    let delimiter = detect_delimiter(content);

    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(field.trim().to_string());
                field.clear();
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => {
                record.push(field.trim().to_string());
                field.clear();
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field.trim().to_string());
        records.push(record);
    }
    records
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use thinkion_core::job::ErrorKind;

    use super::*;

    const HTML_EXPORT: &str = r#"
        <html><head><meta charset="utf-8"></head><body>
        <table border="1">
          <thead><tr><th>Fecha</th><th>Local</th><th>Total&nbsp;(&euro;)</th></tr></thead>
          <tbody>
            <tr><td>01/01/2024</td><td><b>Centro</b></td><td>1.234,50</td></tr>
            <tr><td>01/01/2024</td><td>Norte &amp; Sur</td><td>99,00</td></tr>
            <tr><td></td><td></td><td></td></tr>
          </tbody>
        </table>
        </body></html>"#;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn html_table_becomes_rows() {
        let rows = convert_report(HTML_EXPORT, &cols(&["Fecha", "Local"])).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(Value::Object(rows[0].clone()), json!({
            "Fecha": "01/01/2024",
            "Local": "Centro",
            "Total (&euro;)": "1.234,50"
        }));
        assert_eq!(rows[1]["Local"], "Norte & Sur");
    }

    #[test]
    fn missing_expected_column_fails() {
        let err = convert_report(HTML_EXPORT, &cols(&["Fecha", "Propina"])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConversionFailed);
        assert!(err.message.contains("Propina"));
    }

    #[test]
    fn expected_columns_match_case_insensitively() {
        assert!(convert_report(HTML_EXPORT, &cols(&["fecha", " LOCAL "])).is_ok());
    }

    #[test]
    fn semicolon_csv_with_quotes() {
        let csv = "\u{feff}Fecha;Local;Nota\r\n01/01/2024;Centro;\"dijo \"\"hola\"\"; adiós\"\r\n02/01/2024;Norte;\r\n";
        let rows = convert_report(csv, &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Nota"], "dijo \"hola\"; adiós");
        assert_eq!(rows[1]["Local"], "Norte");
        assert_eq!(rows[1]["Nota"], "");
    }

    #[test]
    fn comma_csv_without_trailing_newline() {
        let rows = convert_report("a,b\n1,2\n3,4", &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["b"], "4");
    }

    #[test]
    fn header_only_report_is_empty() {
        let rows = convert_report("Fecha,Total\n", &cols(&["Total"])).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn empty_content_fails() {
        let err = convert_report("   \n\n", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConversionFailed);
        let err = convert_report("<table></table>", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConversionFailed);
    }

    #[test]
    fn duplicate_and_blank_headers_are_disambiguated() {
        let rows = convert_report("Total,,Total\n1,2,3\n", &[]).unwrap();
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"Total": "1", "column_2": "2", "Total_2": "3"})
        );
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(decode_entities("a&amp;lt;b"), "a&lt;b");
        assert_eq!(decode_entities("caf&#233; &#x41;"), "café A");
    }

    #[tokio::test]
    async fn binary_spreadsheet_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xls");
        tokio::fs::write(&path, [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1])
            .await
            .unwrap();
        let err = convert_file(&path, &[]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConversionFailed);
        assert!(err.message.contains("report.xls"));
    }
}
