//! Comma/tab separated text reader.
//!
//! Quoting, doubled quotes, CRLF/LF line endings and rows of uneven width are
//! handled by the `csv` reader. On top of it this module strips a leading
//! byte-order mark, skips whitespace-only rows and recovers from an
//! unterminated quote by cutting that field at the end of its line.
//! Reading never fails; problems are reported as [`ParseWarning`]s.

use std::fmt;

use csv::{ReaderBuilder, StringRecord};
use tracing::warn;

pub const COMMA: u8 = b',';
pub const TAB: u8 = b'\t';

const BOM: char = '\u{feff}';
const QUOTE: u8 = b'"';

/// One tokenized row. `line` is the 1-based line the row starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub line: usize,
    pub cells: Vec<String>,
    /// Set when the row was recovered from an unterminated quote.
    pub malformed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    UnterminatedQuote { line: usize },
    RaggedRow { line: usize, expected: usize, found: usize },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::UnterminatedQuote { line } => {
                write!(f, "line {line}: unterminated quote, field cut at end of line")
            }
            ParseWarning::RaggedRow {
                line,
                expected,
                found,
            } => write!(f, "line {line}: expected {expected} columns, found {found}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub rows: Vec<Row>,
    pub warnings: Vec<ParseWarning>,
}

/// A data row keyed by the header row's tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub line: usize,
    pub malformed: bool,
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderTable {
    pub headers: Vec<String>,
    pub records: Vec<Record>,
    pub warnings: Vec<ParseWarning>,
}

impl HeaderTable {
    /// Treat the first row of `table` as the header row. Data rows narrower
    /// or wider than the header are padded or truncated, with a warning.
    pub fn from_table(table: Table) -> Self {
        let Table { rows, mut warnings } = table;
        let mut rows = rows.into_iter();
        let Some(header_row) = rows.next() else {
            return Self {
                headers: Vec::new(),
                records: Vec::new(),
                warnings,
            };
        };

        let headers: Vec<String> = header_row.cells.iter().map(|h| clean_header(h)).collect();
        let width = headers.len();
        let mut records = Vec::new();

        for row in rows {
            if row.cells.len() != width {
                warnings.push(ParseWarning::RaggedRow {
                    line: row.line,
                    expected: width,
                    found: row.cells.len(),
                });
            }

            let mut cells = row.cells.into_iter();
            let values = headers
                .iter()
                .map(|header| (header.clone(), cells.next().unwrap_or_default()))
                .collect();

            records.push(Record {
                line: row.line,
                malformed: row.malformed,
                values,
            });
        }

        Self {
            headers,
            records,
            warnings,
        }
    }
}

/// Trim a header token and strip the quote characters around it.
pub fn clean_header(token: &str) -> String {
    token
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Split `text` into rows of cells.
pub fn parse(text: &str, delimiter: u8) -> Table {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let mut table = Table::default();
    read_rows(text, delimiter, 0, &mut table);
    table
}

/// Pick the delimiter for a file extension: tab for `.tsv`/`.txt`, comma otherwise.
pub fn delimiter_for_extension(extension: &str) -> u8 {
    match extension.to_ascii_lowercase().as_str() {
        "tsv" | "txt" | "tab" => TAB,
        _ => COMMA,
    }
}

fn reader(text: &str, delimiter: u8) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes())
}

fn read_rows(text: &str, delimiter: u8, line_offset: usize, table: &mut Table) {
    let mut records: Vec<(usize, StringRecord)> = Vec::new();
    for result in reader(text, delimiter).records() {
        match result {
            Ok(record) => {
                let start = record.position().map_or(0, |pos| pos.byte() as usize);
                records.push((skip_line_breaks(text, start), record));
            }
            Err(err) => warn!(error = %err, "skipping unreadable row"),
        }
    }

    let mut lines = LineIndex::new(text);
    let last = records.len().saturating_sub(1);

    for (index, (start, record)) in records.into_iter().enumerate() {
        let line = line_offset + lines.line_at(start);

        // An open quote swallows the rest of the input, so only the last record can hold one.
        if index == last {
            if let Some(quote) = open_quote(text, start, delimiter) {
                let (cell, rest) = cut_at_line_end(text, quote);
                let mut cells = leading_cells(&text[start..quote], delimiter);
                cells.push(cell);
                table.warnings.push(ParseWarning::UnterminatedQuote { line });
                push_row(
                    table,
                    Row {
                        line,
                        cells,
                        malformed: true,
                    },
                );

                let rest_line = line_offset + lines.line_at(rest) - 1;
                read_rows(&text[rest..], delimiter, rest_line, table);
                return;
            }
        }

        push_row(
            table,
            Row {
                line,
                cells: record.iter().map(str::to_string).collect(),
                malformed: false,
            },
        );
    }
}

fn push_row(table: &mut Table, row: Row) {
    if row.cells.iter().all(|cell| cell.trim().is_empty()) {
        return;
    }
    table.rows.push(row);
}

fn skip_line_breaks(text: &str, mut pos: usize) -> usize {
    let bytes = text.as_bytes();
    while matches!(bytes.get(pos), Some(b'\r' | b'\n')) {
        pos += 1;
    }
    pos
}

/// Byte offset of a quoted field, starting at or after `start`, that is
/// still open at the end of `text`.
fn open_quote(text: &str, start: usize, delimiter: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut open = None;
    let mut field_start = true;
    let mut pos = start;

    while let Some(&byte) = bytes.get(pos) {
        if open.is_some() {
            if byte == QUOTE {
                if bytes.get(pos + 1) == Some(&QUOTE) {
                    pos += 1;
                } else {
                    open = None;
                }
            }
        } else {
            if byte == QUOTE && field_start {
                open = Some(pos);
            }
            field_start = byte == delimiter || byte == b'\n' || byte == b'\r';
        }
        pos += 1;
    }

    open
}

/// The field body after `quote` up to the end of its line, and the offset
/// where the next line starts.
fn cut_at_line_end(text: &str, quote: usize) -> (String, usize) {
    let body_start = quote + 1;
    let Some(len) = text[body_start..].find(['\r', '\n']) else {
        return (text[body_start..].to_string(), text.len());
    };
    let end = body_start + len;
    let next = if text[end..].starts_with("\r\n") {
        end + 2
    } else {
        end + 1
    };
    (text[body_start..end].to_string(), next)
}

/// Cells of a record prefix that ends right after a delimiter.
fn leading_cells(prefix: &str, delimiter: u8) -> Vec<String> {
    let mut cells: Vec<String> = reader(prefix, delimiter)
        .records()
        .next()
        .and_then(Result::ok)
        .map(|record| record.iter().map(str::to_string).collect())
        .unwrap_or_default();
    // the empty field after the trailing delimiter
    cells.pop();
    cells
}

/// 1-based line numbers for monotonically increasing byte offsets.
struct LineIndex<'a> {
    text: &'a str,
    byte: usize,
    line: usize,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            byte: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, byte: usize) -> usize {
        if byte > self.byte {
            self.line += self.text.as_bytes()[self.byte..byte]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.byte = byte;
        }
        self.line
    }
}
