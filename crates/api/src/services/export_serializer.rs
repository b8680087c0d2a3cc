//! Renders a canonical table as CSV, JSON or an XLSX workbook.

use chrono::{DateTime, Utc};
use domain::models::{CanonicalTable, ExportFormat, ExportType, TableRow};
use domain::ExportError;
use serde_json::Value;
use std::borrow::Cow;
use std::io::{Cursor, Write};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

/// Excel rejects longer sheet names.
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// Serialize `table` in `format`. The sheet of an XLSX export is named after `export_type`.
pub fn serialize(
    table: &CanonicalTable,
    format: ExportFormat,
    export_type: ExportType,
) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => Ok(to_csv(table).into_bytes()),
        ExportFormat::Json => to_json(table),
        ExportFormat::Xlsx => to_xlsx(table, export_type.as_str()),
    }
}

/// `<base>_<yyyymmddHHMMSS>.<ext>`
pub fn export_filename(base: &str, format: ExportFormat, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}.{}",
        base,
        at.format("%Y%m%d%H%M%S"),
        format.extension()
    )
}

// ============================================================================
// CSV
// ============================================================================

/// Quote a field that contains a comma, quote or line break. Inner quotes are doubled.
pub fn escape_csv(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Plain-text form of a cell. Null is empty.
pub fn cell_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Number(n) => Cow::Owned(format_number(n)),
        other => Cow::Owned(other.to_string()),
    }
}

fn format_number(n: &serde_json::Number) -> String {
    if n.is_f64() {
        n.as_f64().map(|f| f.to_string()).unwrap_or_default()
    } else {
        n.to_string()
    }
}

pub fn csv_header(table: &CanonicalTable) -> String {
    let mut line = table
        .columns
        .iter()
        .map(|c| escape_csv(c))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

pub fn csv_line(table: &CanonicalTable, row: &TableRow) -> String {
    let mut line = table
        .cells(row)
        .map(|v| escape_csv(&cell_text(v)).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Header plus one line per row, each terminated by `\n`.
pub fn to_csv(table: &CanonicalTable) -> String {
    let mut out = csv_header(table);
    for row in &table.rows {
        out.push_str(&csv_line(table, row));
    }
    out
}

// ============================================================================
// JSON
// ============================================================================

/// `{"columns": [...], "rows": [{...}]}`
pub fn to_json(table: &CanonicalTable) -> Result<Vec<u8>, ExportError> {
    serde_json::to_vec(table).map_err(|e| ExportError::Build(format!("JSON encoding: {}", e)))
}

// ============================================================================
// XLSX
// ============================================================================

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Single-sheet workbook with inline strings, numeric and boolean cells.
pub fn to_xlsx(table: &CanonicalTable, sheet_name: &str) -> Result<Vec<u8>, ExportError> {
    let parts: [(&str, Cow<'_, str>); 5] = [
        ("[Content_Types].xml", Cow::Borrowed(CONTENT_TYPES_XML)),
        ("_rels/.rels", Cow::Borrowed(ROOT_RELS_XML)),
        ("xl/workbook.xml", Cow::Owned(workbook_xml(sheet_name))),
        ("xl/_rels/workbook.xml.rels", Cow::Borrowed(WORKBOOK_RELS_XML)),
        ("xl/worksheets/sheet1.xml", Cow::Owned(worksheet_xml(table))),
    ];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, content) in parts.iter() {
        zip.start_file(*name, options).map_err(xlsx_error)?;
        zip.write_all(content.as_bytes()).map_err(xlsx_error)?;
    }

    let cursor = zip.finish().map_err(xlsx_error)?;
    Ok(cursor.into_inner())
}

fn xlsx_error(err: impl std::fmt::Display) -> ExportError {
    ExportError::Build(format!("XLSX packaging: {}", err))
}

/// Strip characters Excel forbids in sheet names and cap the length.
pub fn sheet_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    if cleaned.is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

fn workbook_xml(name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        escape_xml(&sheet_name(name))
    )
}

fn worksheet_xml(table: &CanonicalTable) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    xml.push_str(r#"<row r="1">"#);
    for (col, name) in table.columns.iter().enumerate() {
        push_string_cell(&mut xml, &cell_ref(col, 1), name);
    }
    xml.push_str("</row>");

    for (idx, row) in table.rows.iter().enumerate() {
        let row_num = idx + 2;
        xml.push_str(&format!(r#"<row r="{}">"#, row_num));
        for (col, value) in table.cells(row).enumerate() {
            let reference = cell_ref(col, row_num);
            match value {
                Value::Null => {}
                Value::Number(n) => {
                    xml.push_str(&format!(
                        r#"<c r="{}"><v>{}</v></c>"#,
                        reference,
                        format_number(n)
                    ));
                }
                Value::Bool(b) => {
                    xml.push_str(&format!(
                        r#"<c r="{}" t="b"><v>{}</v></c>"#,
                        reference,
                        u8::from(*b)
                    ));
                }
                other => push_string_cell(&mut xml, &reference, &cell_text(other)),
            }
        }
        xml.push_str("</row>");
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

fn push_string_cell(xml: &mut String, reference: &str, text: &str) {
    xml.push_str(&format!(
        r#"<c r="{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
        reference,
        escape_xml(text)
    ));
}

/// Spreadsheet column letters for a zero-based index: 0 is `A`, 26 is `AA`.
pub fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn cell_ref(col: usize, row: usize) -> String {
    format!("{}{}", column_letters(col), row)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::io::Read;

    fn table(rows: Vec<Vec<Value>>) -> CanonicalTable {
        let mut table = CanonicalTable::new(&["id", "note", "pnl", "won"], None, "trades");
        for cells in rows {
            let row = ["id", "note", "pnl", "won"]
                .iter()
                .map(|c| c.to_string())
                .zip(cells)
                .collect();
            table.push_row(row);
        }
        table
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!(5.0)), "5");
        assert_eq!(cell_text(&json!(-12.34)), "-12.34");
        assert_eq!(cell_text(&json!(7)), "7");
        assert_eq!(cell_text(&json!(true)), "true");
    }

    #[test]
    fn test_csv_line_count() {
        let rows = (0..5)
            .map(|i| vec![json!(format!("t{}", i)), json!("ok"), json!(1.5), json!(true)])
            .collect();
        let csv = to_csv(&table(rows));

        assert_eq!(csv.lines().count(), 6);
        assert!(csv.starts_with("id,note,pnl,won\n"));
        assert!(csv.ends_with('\n'));
    }

    #[test]
    fn test_csv_round_trips_through_parser() {
        let rows = vec![
            vec![json!("t1"), json!("stop, then reverse"), json!(-3.25), Value::Null],
            vec![json!("t2"), json!("quoted \"A+\" setup"), json!(10), json!(false)],
        ];
        let csv = to_csv(&table(rows));

        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "stop, then reverse");
        assert_eq!(&records[0][3], "");
        assert_eq!(&records[1][1], "quoted \"A+\" setup");
        assert_eq!(&records[1][2], "10");
    }

    #[test]
    fn test_json_envelope() {
        let bytes = to_json(&table(vec![vec![json!("t1"), json!("x"), json!(1.0), json!(true)]]))
            .unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["columns"], json!(["id", "note", "pnl", "won"]));
        assert_eq!(json["rows"].as_array().unwrap().len(), 1);
        assert_eq!(json["rows"][0]["won"], json!(true));
        assert!(json.get("filenameBase").is_none());
    }

    #[test]
    fn test_xlsx_package() {
        let t = table(vec![vec![json!("t<1>"), json!("a & b"), json!(2.5), json!(true)]]);
        let bytes = to_xlsx(&t, "tagPerformance").unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut sheet = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut sheet)
            .unwrap();
        assert!(sheet.contains("t&lt;1&gt;"));
        assert!(sheet.contains("a &amp; b"));
        assert!(sheet.contains(r#"<c r="C2"><v>2.5</v></c>"#));
        assert!(sheet.contains(r#"<c r="D2" t="b"><v>1</v></c>"#));

        let mut workbook = String::new();
        archive
            .by_name("xl/workbook.xml")
            .unwrap()
            .read_to_string(&mut workbook)
            .unwrap();
        assert!(workbook.contains(r#"name="tagPerformance""#));
        assert!(archive.by_name("[Content_Types].xml").is_ok());
    }

    #[test]
    fn test_sheet_name_limits() {
        assert_eq!(sheet_name("a".repeat(40).as_str()).len(), MAX_SHEET_NAME_LEN);
        assert_eq!(sheet_name("p/l [daily]"), "pl daily");
        assert_eq!(sheet_name("///"), "Sheet1");
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(27), "AB");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
    }

    #[test]
    fn test_export_filename() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap();
        assert_eq!(
            export_filename("daily_pnl", ExportFormat::Csv, at),
            "daily_pnl_20240309070503.csv"
        );
    }

    #[test]
    fn test_serialize_dispatch() {
        let t = table(vec![]);
        let csv = serialize(&t, ExportFormat::Csv, ExportType::Trades).unwrap();
        assert_eq!(csv, b"id,note,pnl,won\n");
        let xlsx = serialize(&t, ExportFormat::Xlsx, ExportType::Trades).unwrap();
        assert_eq!(&xlsx[..2], b"PK");
    }
}
