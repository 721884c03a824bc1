//! Turns raw candidates from any import path into canonical contacts.
//!
//! Every field-level problem is recovered here: out-of-range or garbage vibe
//! scores, unknown labels, unparseable dates and cadence values all fall back
//! to their defaults instead of failing the record.

use std::collections::HashSet;

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::model::{
    Contact, DropReason, DroppedRecord, Field, RawContact, VibeLabel, DEFAULT_CADENCE_DAYS,
    DEFAULT_VIBE_SCORE,
};

const MIN_VIBE: i64 = 1;
const MAX_VIBE: i64 = 10;

/// Spreadsheet serial day numbers accepted as dates (1954-10-03 ..= 2119-01-10).
const SERIAL_DAY_RANGE: std::ops::RangeInclusive<u32> = 20_000..=80_000;

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub contacts: Vec<Contact>,
    pub dropped: Vec<DroppedRecord>,
}

/// Normalize a batch. Ids are fresh v4 UUIDs that collide neither with
/// `taken_ids` nor with each other; every contact shares one `createdAt`.
pub fn normalize_batch(candidates: Vec<RawContact>, taken_ids: &HashSet<String>) -> NormalizedBatch {
    let created_at = now_timestamp();
    let mut used: HashSet<String> = HashSet::new();
    let mut batch = NormalizedBatch::default();

    for raw in candidates {
        let id = fresh_id(|candidate| taken_ids.contains(candidate) || used.contains(candidate));
        match normalize_contact(&raw, id, created_at.clone()) {
            Some(contact) => {
                used.insert(contact.id.clone());
                batch.contacts.push(contact);
            }
            None => batch.dropped.push(DroppedRecord {
                line: None,
                reason: DropReason::EmptyName,
            }),
        }
    }

    batch
}

/// Build one contact, or `None` when the candidate has no name.
pub fn normalize_contact(raw: &RawContact, id: String, created_at: String) -> Option<Contact> {
    let name = raw.name()?.to_string();
    let text = |field: Field| raw.get(field).unwrap_or_default().to_string();

    let vibe_score = clamp_vibe(raw.get(Field::Vibe));
    let vibe_label = raw
        .get(Field::Label)
        .and_then(VibeLabel::parse)
        .unwrap_or_else(|| VibeLabel::from_score(vibe_score));

    Some(Contact {
        id,
        name,
        email: text(Field::Email),
        phone: text(Field::Phone),
        company: text(Field::Company),
        job_title: text(Field::Title),
        website: text(Field::Website),
        address: text(Field::Address),
        notes: text(Field::Notes),
        last_contact_date: raw.get(Field::Date).and_then(normalize_date),
        vibe_score,
        vibe_label,
        tags: raw.get(Field::Tags).map(normalize_tags).unwrap_or_default(),
        category: raw.get(Field::Category).map(str::to_string),
        created_at,
        is_favorite: raw.get(Field::Favorite).map(is_truthy).unwrap_or(false),
        reminder_days: cadence_days(raw.get(Field::ReminderDays)),
        contact_frequency: cadence_days(raw.get(Field::ContactFrequency)),
    })
}

/// Clamp a raw vibe value into 1..=10. Missing or non-numeric input gives 5.
pub fn clamp_vibe(raw: Option<&str>) -> u8 {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return DEFAULT_VIBE_SCORE;
    };

    let parsed = value.parse::<i64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc().clamp(i64::MIN as f64, i64::MAX as f64) as i64)
    });

    match parsed {
        Some(score) => score.clamp(MIN_VIBE, MAX_VIBE) as u8,
        None => {
            debug!(value, "non-numeric vibe score, using default");
            DEFAULT_VIBE_SCORE
        }
    }
}

/// Split tags on `;` or `|`, trim them and drop empties and repeats
/// (case-insensitive), keeping first-seen order.
pub fn normalize_tags(raw: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    raw.split([';', '|'])
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "x" | "★"
    )
}

fn cadence_days(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|days| *days > 0)
        .unwrap_or(DEFAULT_CADENCE_DAYS)
}

fn fresh_id(mut is_taken: impl FnMut(&str) -> bool) -> String {
    loop {
        let id = Uuid::new_v4().to_string();
        if !is_taken(&id) {
            return id;
        }
    }
}

fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH.date().to_string())
}

// =============================================================================
// Dates
// =============================================================================

/// Normalize a last-contact date to `YYYY-MM-DD`; `None` when unreadable.
pub fn normalize_date(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let date = parse_iso_date(value)
        .or_else(|| parse_timestamp(value))
        .or_else(|| parse_serial_day(value))
        .or_else(|| parse_numeric_date(value))
        .or_else(|| parse_month_name_date(value));

    if date.is_none() {
        debug!(value, "unrecognised date, leaving last contact empty");
    }

    date.and_then(|d| d.format(format_description!("[year]-[month]-[day]")).ok())
}

fn parse_iso_date(value: &str) -> Option<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]")).ok()
}

fn parse_timestamp(value: &str) -> Option<Date> {
    if let Ok(ts) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(ts.date());
    }
    // Local timestamps without an offset, e.g. `2024-01-05T10:00` or `2024-01-05 10:00:00`.
    let head = value.get(..10)?;
    let rest = &value[10..];
    if rest.starts_with('T') || rest.starts_with(' ') {
        parse_iso_date(head)
    } else {
        None
    }
}

fn parse_serial_day(value: &str) -> Option<Date> {
    let whole = value.strip_suffix(".0").unwrap_or(value);
    let days = whole.parse::<u32>().ok().filter(|d| SERIAL_DAY_RANGE.contains(d))?;
    let epoch = Date::from_calendar_date(1899, Month::December, 30).ok()?;
    epoch.checked_add(Duration::days(i64::from(days)))
}

/// `M/D/YYYY`, `D/M/YYYY` (when the first number cannot be a month),
/// `YYYY/M/D`, with `/`, `-` or `.` separators and two-digit years.
fn parse_numeric_date(value: &str) -> Option<Date> {
    let parts: Vec<&str> = value.split(['/', '-', '.']).map(str::trim).collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }

    let numbers: Vec<u32> = parts.iter().filter_map(|p| p.parse().ok()).collect();
    if numbers.len() != 3 {
        return None;
    }

    let (year, month, day) = if parts[0].len() == 4 {
        (numbers[0], numbers[1], numbers[2])
    } else if numbers[0] > 12 {
        (expand_year(numbers[2], parts[2].len()), numbers[1], numbers[0])
    } else {
        (expand_year(numbers[2], parts[2].len()), numbers[0], numbers[1])
    };

    calendar_date(year, month, day)
}

/// `Jan 5, 2024`, `5 January 2024`, `January 5 2024`.
fn parse_month_name_date(value: &str) -> Option<Date> {
    let tokens: Vec<&str> = value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() != 3 {
        return None;
    }

    let month = tokens.iter().find_map(|t| month_from_name(t))?;
    let mut day = None;
    let mut year = None;
    for token in &tokens {
        let digits = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());
        let Ok(number) = digits.parse::<u32>() else {
            continue;
        };
        if digits.len() == 4 {
            year = Some(number);
        } else if number <= 31 {
            day = Some(number);
        }
    }

    calendar_date(year?, month, day?)
}

fn month_from_name(token: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = token.trim_end_matches('.').to_ascii_lowercase();
    if lower.len() < 3 || !lower.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| lower.starts_with(m))
        .map(|index| index as u32 + 1)
}

fn expand_year(year: u32, digits: usize) -> u32 {
    match (digits, year) {
        (2, 0..=69) => 2000 + year,
        (2, _) => 1900 + year,
        _ => year,
    }
}

fn calendar_date(year: u32, month: u32, day: u32) -> Option<Date> {
    let month = Month::try_from(u8::try_from(month).ok()?).ok()?;
    let day = u8::try_from(day).ok()?;
    let year = i32::try_from(year).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}
