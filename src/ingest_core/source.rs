//! Tokenize raw export bytes into a header plus string rows

use crate::error::{EngineError, Result};
use csv::{ReaderBuilder, StringRecord, Trim};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

/// One data row with its 1-based source line for warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub line: u64,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    /// Build from already tokenized rows; line numbers start after the header.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, fields)| RawRow {
                line: i as u64 + 2,
                fields,
            })
            .collect();
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parse a delimited export. Fatal only when the bytes cannot be tokenized:
/// invalid UTF-8, no header line, or a header with no recognizable delimiter.
pub fn read_delimited(bytes: &[u8]) -> Result<RawTable> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|e| {
        EngineError::unparsable(format!("not valid UTF-8 (byte {})", e.valid_up_to()))
    })?;

    let header_line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| EngineError::unparsable("no header row"))?;
    let delimiter = detect_delimiter(header_line)
        .ok_or_else(|| EngineError::unparsable("header row has no column delimiter"))?;

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.trim_start().as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        rows.push(RawRow {
            line,
            fields: record.iter().map(str::to_string).collect(),
        });
    }

    log::debug!(
        "📄 Tokenized {} rows x {} columns (delimiter {:?})",
        rows.len(),
        headers.len(),
        delimiter as char
    );

    Ok(RawTable { headers, rows })
}

/// Most frequent candidate delimiter in the header line.
fn detect_delimiter(header: &str) -> Option<u8> {
    CANDIDATE_DELIMITERS
        .iter()
        .map(|d| (*d, header.bytes().filter(|b| b == d).count()))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map(|(d, _)| d)
}
