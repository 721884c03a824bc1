//! Import coordination: routes a source to its ingestion path, normalizes
//! the candidates and appends them to the store in one step.

pub mod delimited;
pub mod freetext;
pub mod headers;
pub mod sheet;
pub mod vcard;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ImportConfig;
use crate::model::{resolve_category, DroppedRecord, Field, ImportResult, RawContact};
use crate::normalize::normalize_batch;
use crate::recognize::{parse_label_block, ImageRecognizer};
use crate::store::ContactStore;
use headers::{apply_category_override, MapOptions, DEFAULT_POSITIONAL_COLUMNS};
use sheet::SheetDecoder;

pub const DEFAULT_PLACEHOLDER_NAME: &str = "Unknown Contact";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported file format: {extension}")]
    UnsupportedFormat { extension: String },
    #[error("no contacts found in input")]
    EmptyInput,
    #[error("{what} failed: {source:#}")]
    Collaborator {
        what: &'static str,
        source: anyhow::Error,
    },
    #[error("could not update contact store: {0:#}")]
    Store(anyhow::Error),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Tsv,
    Spreadsheet,
    VCard,
    Text,
}

impl SourceFormat {
    /// Detect the format from a file extension. Free text has no extension
    /// of its own; `.txt` is tab-delimited.
    pub fn from_path(path: &Path) -> Result<Self, ImportError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "tsv" | "txt" | "tab" => Ok(SourceFormat::Tsv),
            "xlsx" | "xls" => Ok(SourceFormat::Spreadsheet),
            "vcf" | "vcard" => Ok(SourceFormat::VCard),
            _ => Err(ImportError::UnsupportedFormat { extension }),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Tsv => "tsv",
            SourceFormat::Spreadsheet => "xlsx",
            SourceFormat::VCard => "vcf",
            SourceFormat::Text => "text",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Category name forced onto every imported contact.
    pub category: Option<String>,
    pub dry_run: bool,
    pub placeholder_name: String,
    pub positional_columns: Vec<Field>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            category: None,
            dry_run: false,
            placeholder_name: DEFAULT_PLACEHOLDER_NAME.to_string(),
            positional_columns: DEFAULT_POSITIONAL_COLUMNS.to_vec(),
        }
    }
}

impl ImportOptions {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            placeholder_name: config.placeholder_name.clone(),
            positional_columns: config.positional_columns.clone(),
            ..Self::default()
        }
    }
}

/// Result of a free-text or recognized-image import, with the descriptors
/// of what the extractor found.
#[derive(Debug, Clone, Default)]
pub struct TextImport {
    pub result: ImportResult,
    pub detected: Vec<String>,
}

/// Candidates from one ingestion path, before normalization.
#[derive(Default)]
struct Candidates {
    raw: Vec<RawContact>,
    dropped: Vec<DroppedRecord>,
    warnings: Vec<String>,
}

pub struct Importer<'s> {
    store: &'s mut dyn ContactStore,
    options: ImportOptions,
}

impl<'s> Importer<'s> {
    pub fn new(store: &'s mut dyn ContactStore, options: ImportOptions) -> Self {
        Self { store, options }
    }

    /// Import a file. `format` overrides extension detection.
    pub fn import_file(
        &mut self,
        path: &Path,
        format: Option<SourceFormat>,
        sheets: &dyn SheetDecoder,
    ) -> Result<ImportResult, ImportError> {
        let format = match format {
            Some(format) => format,
            None => SourceFormat::from_path(path)?,
        };
        info!(path = %path.display(), %format, "importing file");

        if format == SourceFormat::Spreadsheet {
            let csv = sheets
                .sheet_to_csv(path)
                .map_err(|source| ImportError::Collaborator {
                    what: "spreadsheet conversion",
                    source,
                })?;
            return self.import_content(&csv, SourceFormat::Csv);
        }

        let bytes = fs::read(path).map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let content = String::from_utf8_lossy(&bytes);
        match format {
            SourceFormat::Text => self.import_free_text(&content).map(|text| text.result),
            _ => self.import_content(&content, format),
        }
    }

    /// Import already-read delimited or vCard text.
    pub fn import_content(
        &mut self,
        content: &str,
        format: SourceFormat,
    ) -> Result<ImportResult, ImportError> {
        let (category_id, mut warnings) = self.resolve_category_override()?;

        let mut candidates = match format {
            SourceFormat::Csv | SourceFormat::Tsv => {
                let delimiter = delimited::delimiter_for_extension(format.as_str());
                let categories = self.store.categories().map_err(ImportError::Store)?;
                let table = delimited::parse(content, delimiter);
                let mapped = headers::map_table(
                    table,
                    &MapOptions {
                        categories: &categories,
                        category_override: category_id.as_deref(),
                        positional_columns: &self.options.positional_columns,
                    },
                );
                if mapped.data_rows() == 0 {
                    return Err(ImportError::EmptyInput);
                }
                debug!(header_mode = mapped.header_mode, rows = mapped.data_rows(), "mapped delimited input");
                Candidates {
                    warnings: mapped.warnings.iter().map(ToString::to_string).collect(),
                    raw: mapped.candidates,
                    dropped: mapped.dropped,
                }
            }
            SourceFormat::VCard => {
                let mut batch = vcard::parse_cards(content, &self.options.placeholder_name);
                if batch.blocks() == 0 {
                    return Err(ImportError::EmptyInput);
                }
                if let Some(id) = &category_id {
                    apply_category_override(&mut batch.candidates, id);
                }
                Candidates {
                    raw: batch.candidates,
                    dropped: batch.dropped,
                    warnings: Vec::new(),
                }
            }
            SourceFormat::Text => {
                return self.import_free_text(content).map(|text| text.result);
            }
            SourceFormat::Spreadsheet => {
                return Err(ImportError::UnsupportedFormat {
                    extension: format.to_string(),
                });
            }
        };

        warnings.append(&mut candidates.warnings);
        candidates.warnings = warnings;
        self.commit(candidates)
    }

    /// Import one contact from pasted prose.
    pub fn import_free_text(&mut self, text: &str) -> Result<TextImport, ImportError> {
        let (category_id, warnings) = self.resolve_category_override()?;
        let extraction = freetext::extract(text);
        if extraction.fields.is_empty() {
            return Err(ImportError::EmptyInput);
        }

        let mut raw = vec![extraction.fields];
        if let Some(id) = &category_id {
            apply_category_override(&mut raw, id);
        }
        let result = self.commit(Candidates {
            raw,
            dropped: Vec::new(),
            warnings,
        })?;
        Ok(TextImport {
            result,
            detected: extraction.detected,
        })
    }

    /// Import one contact from a photographed card or screenshot.
    pub fn import_image(
        &mut self,
        image: &[u8],
        mime: &str,
        recognizer: &dyn ImageRecognizer,
    ) -> Result<TextImport, ImportError> {
        let (category_id, warnings) = self.resolve_category_override()?;
        let block = recognizer
            .recognize(image, mime)
            .map_err(|source| ImportError::Collaborator {
                what: "image recognition",
                source,
            })?;

        let fields = parse_label_block(&block);
        if fields.is_empty() {
            return Err(ImportError::EmptyInput);
        }
        let detected = fields
            .iter()
            .map(|(field, value)| format!("{}: {}", field, value))
            .collect();

        let mut raw = vec![fields];
        if let Some(id) = &category_id {
            apply_category_override(&mut raw, id);
        }
        let result = self.commit(Candidates {
            raw,
            dropped: Vec::new(),
            warnings,
        })?;
        Ok(TextImport { result, detected })
    }

    /// Resolve the category override by name. An unknown name is ignored
    /// with a warning rather than creating a category.
    fn resolve_category_override(&self) -> Result<(Option<String>, Vec<String>), ImportError> {
        let Some(name) = self.options.category.as_deref() else {
            return Ok((None, Vec::new()));
        };
        let categories = self.store.categories().map_err(ImportError::Store)?;
        match resolve_category(name, &categories) {
            Some(id) => Ok((Some(id.to_string()), Vec::new())),
            None => {
                warn!(category = name, "unknown category, importing without one");
                Ok((None, vec![format!("unknown category `{}` ignored", name)]))
            }
        }
    }

    /// Normalize and append the whole batch with a single store call.
    fn commit(&mut self, candidates: Candidates) -> Result<ImportResult, ImportError> {
        let taken_ids: HashSet<String> = self
            .store
            .contacts()
            .map_err(ImportError::Store)?
            .into_iter()
            .map(|contact| contact.id)
            .collect();

        let batch = normalize_batch(candidates.raw, &taken_ids);
        let mut dropped = candidates.dropped;
        dropped.extend(batch.dropped);

        for record in &dropped {
            debug!(line = ?record.line, reason = %record.reason, "dropped record");
        }

        if self.options.dry_run {
            info!(count = batch.contacts.len(), "dry run, store left untouched");
        } else if !batch.contacts.is_empty() {
            self.store
                .append(&batch.contacts)
                .map_err(ImportError::Store)?;
            info!(count = batch.contacts.len(), "contacts appended");
        }

        Ok(ImportResult {
            contacts: batch.contacts,
            dropped,
            warnings: candidates.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::model::{Category, DropReason, VibeLabel};
    use crate::store::testing::{FailingStore, MemoryStore};
    use anyhow::{anyhow, Result};
    use tempfile::{Builder, NamedTempFile};

    struct FakeSheets(&'static str);

    impl SheetDecoder for FakeSheets {
        fn sheet_to_csv(&self, _path: &Path) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenSheets;

    impl SheetDecoder for BrokenSheets {
        fn sheet_to_csv(&self, _path: &Path) -> Result<String> {
            Err(anyhow!("corrupt workbook"))
        }
    }

    struct FakeRecognizer(&'static str);

    impl ImageRecognizer for FakeRecognizer {
        fn recognize(&self, _image: &[u8], _mime: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn file_with(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn clients_store() -> MemoryStore {
        MemoryStore {
            categories: vec![Category {
                id: "cat-clients".into(),
                name: "Clients".into(),
                color: String::new(),
            }],
            ..MemoryStore::default()
        }
    }

    #[test]
    fn unsupported_extension_touches_nothing() {
        let file = file_with(".pdf", "whatever");
        let mut store = MemoryStore::default();
        let err = Importer::new(&mut store, ImportOptions::default())
            .import_file(file.path(), None, &FakeSheets(""))
            .unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat { ref extension } if extension == "pdf"));
        assert_eq!(err.to_string(), "unsupported file format: pdf");
        assert_eq!(store.append_calls, 0);
    }

    #[test]
    fn header_only_csv_is_empty_input() {
        let file = file_with(".csv", "Name,Email\n");
        let mut store = MemoryStore::default();
        let err = Importer::new(&mut store, ImportOptions::default())
            .import_file(file.path(), None, &FakeSheets(""))
            .unwrap_err();
        assert!(matches!(err, ImportError::EmptyInput));
        assert_eq!(store.append_calls, 0);
    }

    #[test]
    fn positional_row_imports_with_defaults() {
        let mut store = MemoryStore::default();
        let result = Importer::new(&mut store, ImportOptions::default())
            .import_content("John Smith,john@acme.com,Notes here", SourceFormat::Csv)
            .unwrap();

        assert_eq!(result.accepted(), 1);
        let contact = &store.contacts[0];
        assert_eq!(contact.name, "John Smith");
        assert_eq!(contact.email, "john@acme.com");
        assert_eq!(contact.notes, "Notes here");
        assert_eq!(contact.vibe_score, 5);
        assert_eq!(contact.vibe_label, VibeLabel::Warm);
        assert_eq!(store.append_calls, 1);
    }

    #[test]
    fn empty_name_rows_are_counted_as_dropped() {
        let mut store = MemoryStore::default();
        let result = Importer::new(&mut store, ImportOptions::default())
            .import_content(
                "Name,Email,Vibe\nAda,ada@x.io,999\n,ghost@x.io,3\nGrace,grace@x.io,abc\n",
                SourceFormat::Csv,
            )
            .unwrap();

        assert_eq!(result.accepted(), 2);
        assert_eq!(result.drop_summary(), vec![(DropReason::EmptyName, 1)]);
        assert_eq!(store.contacts[0].vibe_score, 10);
        assert_eq!(store.contacts[0].vibe_label, VibeLabel::Hot);
        assert_eq!(store.contacts[1].vibe_score, 5);
    }

    #[test]
    fn malformed_quoting_is_dropped_with_warning() {
        let mut store = MemoryStore::default();
        let result = Importer::new(&mut store, ImportOptions::default())
            .import_content("Name,Notes\nAda,\"never closed\nGrace,fine\n", SourceFormat::Csv)
            .unwrap();

        assert_eq!(result.accepted(), 1);
        assert_eq!(store.contacts[0].name, "Grace");
        assert_eq!(result.drop_summary(), vec![(DropReason::MalformedQuoting, 1)]);
        assert!(result.warnings.iter().any(|w| w.contains("unterminated quote")));
    }

    #[test]
    fn failing_store_keeps_existing_data() {
        let mut store = FailingStore::default();
        let err = Importer::new(&mut store, ImportOptions::default())
            .import_content("Name\nAda\n", SourceFormat::Csv)
            .unwrap_err();
        assert!(matches!(err, ImportError::Store(_)));
        assert!(store.contacts.is_empty());
    }

    #[test]
    fn dry_run_never_appends() {
        let mut store = MemoryStore::default();
        let options = ImportOptions {
            dry_run: true,
            ..ImportOptions::default()
        };
        let result = Importer::new(&mut store, options)
            .import_content("Name\nAda\n", SourceFormat::Csv)
            .unwrap();
        assert_eq!(result.accepted(), 1);
        assert_eq!(store.append_calls, 0);
        assert!(store.contacts.is_empty());
    }

    #[test]
    fn category_override_applies_to_every_path() {
        let options = ImportOptions {
            category: Some("clients".into()),
            ..ImportOptions::default()
        };

        let mut store = clients_store();
        Importer::new(&mut store, options.clone())
            .import_content("Name\nAda\n", SourceFormat::Csv)
            .unwrap();
        Importer::new(&mut store, options.clone())
            .import_content("BEGIN:VCARD\nFN:Grace\nEND:VCARD\n", SourceFormat::VCard)
            .unwrap();
        Importer::new(&mut store, options.clone())
            .import_free_text("Linus Torvalds\nlinus@kernel.org")
            .unwrap();
        Importer::new(&mut store, options)
            .import_image(b"img", "image/png", &FakeRecognizer("Name: Ken"))
            .unwrap();

        assert_eq!(store.contacts.len(), 4);
        assert!(store
            .contacts
            .iter()
            .all(|c| c.category.as_deref() == Some("cat-clients")));
    }

    #[test]
    fn unknown_category_override_is_ignored_with_warning() {
        let mut store = clients_store();
        let options = ImportOptions {
            category: Some("Vendors".into()),
            ..ImportOptions::default()
        };
        let result = Importer::new(&mut store, options)
            .import_content("Name\nAda\n", SourceFormat::Csv)
            .unwrap();
        assert!(store.contacts[0].category.is_none());
        assert!(result.warnings.iter().any(|w| w.contains("Vendors")));
    }

    #[test]
    fn ids_do_not_collide_with_stored_contacts() {
        let mut store = MemoryStore::default();
        Importer::new(&mut store, ImportOptions::default())
            .import_content("Name\nAda\nGrace\n", SourceFormat::Csv)
            .unwrap();
        Importer::new(&mut store, ImportOptions::default())
            .import_content("Name\nAda\n", SourceFormat::Csv)
            .unwrap();
        let mut ids: Vec<&str> = store.contacts.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn vcard_file_imports_and_drops_anonymous_cards() {
        let file = file_with(
            ".vcf",
            "BEGIN:VCARD\r\nVERSION:3.0\r\nFN:Ada Lovelace\r\nTEL;TYPE=CELL:+44 20 7946 0000\r\nEND:VCARD\r\n\
             BEGIN:VCARD\r\nVERSION:3.0\r\nORG:Nobody Inc\r\nEND:VCARD\r\n",
        );
        let mut store = MemoryStore::default();
        let result = Importer::new(&mut store, ImportOptions::default())
            .import_file(file.path(), None, &FakeSheets(""))
            .unwrap();
        assert_eq!(result.accepted(), 1);
        assert_eq!(result.drop_summary(), vec![(DropReason::NoIdentifyingFields, 1)]);
        assert_eq!(store.contacts[0].phone, "+44 20 7946 0000");
    }

    #[test]
    fn empty_vcard_file_is_empty_input() {
        let mut store = MemoryStore::default();
        let err = Importer::new(&mut store, ImportOptions::default())
            .import_content("no cards here", SourceFormat::VCard)
            .unwrap_err();
        assert!(matches!(err, ImportError::EmptyInput));
    }

    #[test]
    fn spreadsheet_goes_through_decoder() {
        let file = file_with(".xlsx", "binary");
        let mut store = MemoryStore::default();
        let result = Importer::new(&mut store, ImportOptions::default())
            .import_file(file.path(), None, &FakeSheets("Full Name,Phone Number\nAda,555-123-4567\n"))
            .unwrap();
        assert_eq!(result.accepted(), 1);
        assert_eq!(store.contacts[0].phone, "555-123-4567");
    }

    #[test]
    fn spreadsheet_decoder_failure_is_collaborator_error() {
        let file = file_with(".xlsx", "binary");
        let mut store = MemoryStore::default();
        let err = Importer::new(&mut store, ImportOptions::default())
            .import_file(file.path(), None, &BrokenSheets)
            .unwrap_err();
        assert!(matches!(err, ImportError::Collaborator { .. }));
        assert!(err.to_string().contains("corrupt workbook"));
        assert_eq!(store.append_calls, 0);
    }

    #[test]
    fn free_text_reports_detected_fields() {
        let mut store = MemoryStore::default();
        let text = Importer::new(&mut store, ImportOptions::default())
            .import_free_text("Jane Doe\njane@example.com\n(555) 123-4567")
            .unwrap();
        assert_eq!(text.result.accepted(), 1);
        assert!(text.detected.iter().any(|d| d == "Email: jane@example.com"));
        assert_eq!(store.contacts[0].name, "Jane Doe");
    }

    #[test]
    fn free_text_without_fields_is_empty_input() {
        let mut store = MemoryStore::default();
        let err = Importer::new(&mut store, ImportOptions::default())
            .import_free_text("   \n  ")
            .unwrap_err();
        assert!(matches!(err, ImportError::EmptyInput));
    }

    #[test]
    fn recognized_image_without_name_is_dropped() {
        let mut store = MemoryStore::default();
        let text = Importer::new(&mut store, ImportOptions::default())
            .import_image(b"img", "image/jpeg", &FakeRecognizer("Email: x@y.io\nFax: 1"))
            .unwrap();
        assert_eq!(text.result.accepted(), 0);
        assert_eq!(text.result.drop_summary(), vec![(DropReason::EmptyName, 1)]);
        assert_eq!(store.append_calls, 0);
    }

    #[test]
    fn format_detection() {
        assert_eq!(SourceFormat::from_path(Path::new("a.CSV")).unwrap(), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_path(Path::new("a.txt")).unwrap(), SourceFormat::Tsv);
        assert_eq!(SourceFormat::from_path(Path::new("a.xls")).unwrap(), SourceFormat::Spreadsheet);
        assert_eq!(SourceFormat::from_path(Path::new("a.vcf")).unwrap(), SourceFormat::VCard);
        assert!(SourceFormat::from_path(Path::new("noext")).is_err());
    }
}
