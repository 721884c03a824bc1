//! Canonical contact record and the transient types the import paths
//! exchange before normalization.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_VIBE_SCORE: u8 = 5;
pub const DEFAULT_CADENCE_DAYS: u32 = 30;

// =============================================================================
// Canonical fields
// =============================================================================

/// A canonical contact attribute that every ingestion path converges on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Name,
    Email,
    Phone,
    Company,
    Title,
    Website,
    Address,
    Notes,
    Date,
    Vibe,
    Label,
    Tags,
    Category,
    Favorite,
    ReminderDays,
    ContactFrequency,
}

impl Field {
    pub const ALL: [Field; 16] = [
        Field::Name,
        Field::Email,
        Field::Phone,
        Field::Company,
        Field::Title,
        Field::Website,
        Field::Address,
        Field::Notes,
        Field::Date,
        Field::Vibe,
        Field::Label,
        Field::Tags,
        Field::Category,
        Field::Favorite,
        Field::ReminderDays,
        Field::ContactFrequency,
    ];

    /// Stable key used in configuration files.
    pub fn key(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Email => "email",
            Field::Phone => "phone",
            Field::Company => "company",
            Field::Title => "title",
            Field::Website => "website",
            Field::Address => "address",
            Field::Notes => "notes",
            Field::Date => "date",
            Field::Vibe => "vibe",
            Field::Label => "label",
            Field::Tags => "tags",
            Field::Category => "category",
            Field::Favorite => "favorite",
            Field::ReminderDays => "reminder_days",
            Field::ContactFrequency => "contact_frequency",
        }
    }

    /// Parse from a configuration key (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Field::ALL.into_iter().find(|field| field.key() == wanted)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Partial field map produced by one ingestion path for one record.
///
/// Values are stored trimmed; empty values are never stored, so `get`
/// returning `Some` always means "non-empty".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawContact {
    fields: BTreeMap<Field, String>,
}

impl RawContact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// Store a value, trimming it. Empty values clear the field.
    pub fn set(&mut self, field: Field, value: impl AsRef<str>) {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, trimmed.to_string());
        }
    }

    /// Store a value only when the field is still unset.
    pub fn set_if_absent(&mut self, field: Field, value: impl AsRef<str>) {
        if !self.fields.contains_key(&field) {
            self.set(field, value);
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.get(Field::Name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.fields.iter().map(|(field, value)| (*field, value.as_str()))
    }
}

impl FromIterator<(Field, String)> for RawContact {
    fn from_iter<I: IntoIterator<Item = (Field, String)>>(iter: I) -> Self {
        let mut raw = RawContact::new();
        for (field, value) in iter {
            raw.set(field, value);
        }
        raw
    }
}

// =============================================================================
// Contact
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VibeLabel {
    Hot,
    Warm,
    Cold,
}

impl VibeLabel {
    pub fn from_score(score: u8) -> Self {
        match score {
            8.. => VibeLabel::Hot,
            5..=7 => VibeLabel::Warm,
            _ => VibeLabel::Cold,
        }
    }

    /// Parse an explicit label (case-insensitive); anything else is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Some(VibeLabel::Hot),
            "warm" => Some(VibeLabel::Warm),
            "cold" => Some(VibeLabel::Cold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VibeLabel::Hot => "hot",
            VibeLabel::Warm => "warm",
            VibeLabel::Cold => "cold",
        }
    }
}

impl fmt::Display for VibeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical contact record as persisted in the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contact_date: Option<String>,
    #[serde(default = "default_vibe_score")]
    pub vibe_score: u8,
    pub vibe_label: VibeLabel,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default = "default_cadence")]
    pub reminder_days: u32,
    #[serde(default = "default_cadence")]
    pub contact_frequency: u32,
}

fn default_vibe_score() -> u8 {
    DEFAULT_VIBE_SCORE
}

fn default_cadence() -> u32 {
    DEFAULT_CADENCE_DAYS
}

/// A user-defined grouping. Owned by the store; the importer only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// Resolve a category name to its id (case-insensitive, trimmed).
/// Unknown names stay unresolved; a category is never invented here.
pub fn resolve_category<'a>(name: &str, categories: &'a [Category]) -> Option<&'a str> {
    let wanted = name.trim();
    if wanted.is_empty() {
        return None;
    }
    categories
        .iter()
        .find(|category| category.name.trim().eq_ignore_ascii_case(wanted))
        .map(|category| category.id.as_str())
}

// =============================================================================
// Import diagnostics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    EmptyName,
    MalformedQuoting,
    NoIdentifyingFields,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::EmptyName => f.write_str("empty name"),
            DropReason::MalformedQuoting => f.write_str("malformed quoting"),
            DropReason::NoIdentifyingFields => f.write_str("no name, phone or email"),
        }
    }
}

/// One rejected input record. `line` is 1-based when the source has lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    pub line: Option<usize>,
    pub reason: DropReason,
}

/// Candidate records plus what happened to the ones that did not make it.
/// Consumed once by the caller, never persisted.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub contacts: Vec<Contact>,
    pub dropped: Vec<DroppedRecord>,
    pub warnings: Vec<String>,
}

/// The serialisable summary handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub accepted: usize,
    pub dropped: usize,
    pub warnings: Vec<String>,
}

impl ImportResult {
    pub fn accepted(&self) -> usize {
        self.contacts.len()
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic {
            accepted: self.accepted(),
            dropped: self.dropped.len(),
            warnings: self.warnings.clone(),
        }
    }

    /// Drop counts grouped by reason, in first-seen order.
    pub fn drop_summary(&self) -> Vec<(DropReason, usize)> {
        let mut summary: Vec<(DropReason, usize)> = Vec::new();
        for record in &self.dropped {
            match summary.iter_mut().find(|(reason, _)| *reason == record.reason) {
                Some((_, count)) => *count += 1,
                None => summary.push((record.reason, 1)),
            }
        }
        summary
    }
}
