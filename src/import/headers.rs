//! Maps tokenized spreadsheet rows onto canonical contact fields.
//!
//! Column headers are matched against a static synonym table. Inputs without
//! a recognisable header row are read positionally instead.

use tracing::debug;

use super::delimited::{clean_header, HeaderTable, ParseWarning, Record, Row, Table};
use crate::model::{resolve_category, Category, DropReason, DroppedRecord, Field, RawContact, VibeLabel};

/// Accepted header spellings per canonical field, all lowercase with single spaces.
const SYNONYMS: &[(Field, &[&str])] = &[
    (Field::Name, &["name", "full name", "fullname", "contact name"]),
    (Field::Email, &["email", "email address", "e-mail", "e-mail address", "mail"]),
    (
        Field::Phone,
        &["phone", "phone number", "mobile", "cell", "telephone", "tel", "mobile phone"],
    ),
    (Field::Company, &["company", "organization", "organisation", "org", "business"]),
    (Field::Title, &["title", "job title", "jobtitle", "role", "position"]),
    (Field::Website, &["website", "url", "web", "homepage", "site"]),
    (
        Field::Address,
        &["address", "street", "street address", "mailing address", "location"],
    ),
    (Field::Notes, &["notes", "note", "comments", "description", "memo"]),
    (Field::Date, &["last contact", "last contact date", "date", "last seen"]),
    (Field::Vibe, &["vibe", "vibe score", "score"]),
    (Field::Label, &["vibe label", "label", "status"]),
    (Field::Tags, &["tags", "tag", "labels", "categories"]),
    (Field::Category, &["category", "group", "segment", "type"]),
    (Field::Favorite, &["favorite", "favourite", "starred"]),
    (Field::ReminderDays, &["reminder days", "reminder"]),
    (Field::ContactFrequency, &["contact frequency", "frequency"]),
];

/// Column order assumed when no header row is present.
pub const DEFAULT_POSITIONAL_COLUMNS: [Field; 6] = [
    Field::Name,
    Field::Email,
    Field::Notes,
    Field::Date,
    Field::Vibe,
    Field::Tags,
];

/// Canonicalise a header token for lookup: unquoted, lowercase, `_` read
/// as a space, inner whitespace collapsed.
pub fn normalize_header(header: &str) -> String {
    clean_header(header)
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve a header to its canonical field, if it is a known synonym.
pub fn lookup_field(header: &str) -> Option<Field> {
    let key = normalize_header(header);
    SYNONYMS
        .iter()
        .find(|(_, names)| names.contains(&key.as_str()))
        .map(|(field, _)| *field)
}

/// A row is a header row when any of its tokens mentions "name".
pub fn is_header_row(cells: &[String]) -> bool {
    cells
        .iter()
        .any(|cell| clean_header(cell).to_lowercase().contains("name"))
}

pub struct MapOptions<'a> {
    pub categories: &'a [Category],
    /// Category id forced onto every mapped row.
    pub category_override: Option<&'a str>,
    pub positional_columns: &'a [Field],
}

impl Default for MapOptions<'_> {
    fn default() -> Self {
        Self {
            categories: &[],
            category_override: None,
            positional_columns: &DEFAULT_POSITIONAL_COLUMNS,
        }
    }
}

#[derive(Debug, Default)]
pub struct MappedRows {
    pub candidates: Vec<RawContact>,
    pub dropped: Vec<DroppedRecord>,
    pub warnings: Vec<ParseWarning>,
    pub header_mode: bool,
}

impl MappedRows {
    /// Number of data rows seen, kept or not.
    pub fn data_rows(&self) -> usize {
        self.candidates.len() + self.dropped.len()
    }
}

/// Map every data row of `table` to a candidate contact.
pub fn map_table(table: Table, options: &MapOptions<'_>) -> MappedRows {
    let header_mode = table
        .rows
        .first()
        .map(|row| is_header_row(&row.cells))
        .unwrap_or(false);

    if header_mode {
        map_with_headers(HeaderTable::from_table(table), options)
    } else {
        map_positional(table, options)
    }
}

fn map_with_headers(table: HeaderTable, options: &MapOptions<'_>) -> MappedRows {
    let columns: Vec<Option<Field>> = table.headers.iter().map(|h| lookup_field(h)).collect();
    debug!(
        headers = ?table.headers,
        recognised = columns.iter().flatten().count(),
        "mapping delimited input with header row"
    );

    let mut mapped = MappedRows {
        warnings: table.warnings,
        header_mode: true,
        ..MappedRows::default()
    };

    for record in table.records {
        let Record {
            line,
            malformed,
            values,
        } = record;
        let cells = columns
            .iter()
            .zip(values)
            .filter_map(|(field, (_, value))| field.as_ref().map(|f| (*f, value)));
        push_row(&mut mapped, line, malformed, cells, options);
    }

    mapped
}

fn map_positional(table: Table, options: &MapOptions<'_>) -> MappedRows {
    debug!(rows = table.rows.len(), "mapping delimited input positionally");

    let mut mapped = MappedRows {
        warnings: table.warnings,
        header_mode: false,
        ..MappedRows::default()
    };

    for row in table.rows {
        let Row {
            line,
            cells,
            malformed,
        } = row;
        let cells = options.positional_columns.iter().copied().zip(cells);
        push_row(&mut mapped, line, malformed, cells, options);
    }

    mapped
}

fn push_row(
    mapped: &mut MappedRows,
    line: usize,
    malformed: bool,
    cells: impl Iterator<Item = (Field, String)>,
    options: &MapOptions<'_>,
) {
    if malformed {
        mapped.dropped.push(DroppedRecord {
            line: Some(line),
            reason: DropReason::MalformedQuoting,
        });
        return;
    }

    let mut raw = RawContact::new();
    for (field, value) in cells {
        assign(&mut raw, field, &value, options.categories);
    }
    if let Some(category_id) = options.category_override {
        raw.set(Field::Category, category_id);
    }

    if raw.name().is_none() {
        debug!(line, "dropping row without a name");
        mapped.dropped.push(DroppedRecord {
            line: Some(line),
            reason: DropReason::EmptyName,
        });
        return;
    }

    mapped.candidates.push(raw);
}

/// Store one cell. The first column mapped to a field wins.
fn assign(raw: &mut RawContact, field: Field, value: &str, categories: &[Category]) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    match field {
        Field::Label => {
            if let Some(label) = VibeLabel::parse(value) {
                raw.set_if_absent(Field::Label, label.as_str());
            }
        }
        Field::Category => match resolve_category(value, categories) {
            Some(id) => raw.set_if_absent(Field::Category, id),
            None => debug!(category = value, "category not found, leaving unset"),
        },
        _ => raw.set_if_absent(field, value),
    }
}

/// Force one category id onto every candidate of a batch.
pub fn apply_category_override(candidates: &mut [RawContact], category_id: &str) {
    for raw in candidates {
        raw.set(Field::Category, category_id);
    }
}
