//! Tabular decoding: delimited text via `csv`, Excel workbooks via `calamine`.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use super::types::{Table, TabularDecoder, TabularFormat};
use super::ExtractionError;

/// Delimiters tried, in order, when none is given.
const SNIFF_DELIMITERS: &[u8] = &[b'\t', b';', b','];

/// Production tabular decoder.
pub struct TableDecoder;

impl TabularDecoder for TableDecoder {
    fn decode_tabular(&self, bytes: &[u8], format: TabularFormat) -> Result<Table, ExtractionError> {
        match format {
            TabularFormat::Delimited(delimiter) => decode_delimited(bytes, delimiter),
            TabularFormat::Spreadsheet => decode_spreadsheet(bytes),
        }
    }
}

fn decode_delimited(bytes: &[u8], delimiter: Option<u8>) -> Result<Table, ExtractionError> {
    let text = strip_bom(bytes);
    let header_line = text
        .split(|b| *b == b'\n')
        .next()
        .unwrap_or_default();

    // The declared delimiter wins only if it actually splits the header.
    let delimiter = match delimiter {
        Some(d) if header_line.contains(&d) => d,
        _ => sniff_delimiter(header_line),
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text);

    let headers = reader
        .headers()
        .map_err(|e| ExtractionError::Csv(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractionError::Csv(e.to_string()))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    if headers.iter().all(String::is_empty) {
        return Err(ExtractionError::Csv("missing header row".into()));
    }

    Ok(Table { headers, rows })
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}

fn sniff_delimiter(header_line: &[u8]) -> u8 {
    SNIFF_DELIMITERS
        .iter()
        .copied()
        .max_by_key(|d| header_line.iter().filter(|b| *b == d).count())
        .filter(|d| header_line.contains(d))
        .unwrap_or(b',')
}

fn decode_spreadsheet(bytes: &[u8]) -> Result<Table, ExtractionError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ExtractionError::Spreadsheet(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ExtractionError::Spreadsheet("workbook has no worksheets".into()))?
        .map_err(|e| ExtractionError::Spreadsheet(e.to_string()))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|c| !c.is_empty()));

    let headers = rows
        .next()
        .ok_or_else(|| ExtractionError::Spreadsheet("worksheet is empty".into()))?;

    Ok(Table {
        headers,
        rows: rows.collect(),
    })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

// ──────────────────────────────────────────────
// MockTabularDecoder (testing)
// ──────────────────────────────────────────────

/// Mock decoder returning a fixed table or a fixed failure.
pub struct MockTabularDecoder {
    table: Option<Table>,
}

impl MockTabularDecoder {
    pub fn new(table: Table) -> Self {
        Self { table: Some(table) }
    }

    pub fn failing() -> Self {
        Self { table: None }
    }
}

impl TabularDecoder for MockTabularDecoder {
    fn decode_tabular(&self, _bytes: &[u8], _format: TabularFormat) -> Result<Table, ExtractionError> {
        self.table
            .clone()
            .ok_or_else(|| ExtractionError::Csv("mock decoder failure".into()))
    }
}
