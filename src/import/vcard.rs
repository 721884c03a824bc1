//! Lenient vCard (2.1/3.0/4.0) reader for phone and messenger exports.
//!
//! Only the properties a contact record needs are decoded; everything else
//! in a card is skipped without complaint.

use tracing::debug;

use crate::model::{DropReason, DroppedRecord, Field, RawContact, VibeLabel, DEFAULT_VIBE_SCORE};

const BEGIN_VCARD: &str = "BEGIN:VCARD";
const END_VCARD: &str = "END:VCARD";

/// Properties read from a card, with the field each one feeds.
const PROPERTIES: &[(&str, Option<Field>)] = &[
    ("FN", Some(Field::Name)),
    ("N", None),
    ("EMAIL", Some(Field::Email)),
    ("TEL", Some(Field::Phone)),
    ("ORG", Some(Field::Company)),
    ("TITLE", Some(Field::Title)),
    ("NOTE", Some(Field::Notes)),
    ("ADR", Some(Field::Address)),
];

/// Raw lines of one BEGIN/END block. `line` is where BEGIN sits (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
struct CardBlock {
    line: usize,
    lines: Vec<String>,
}

#[derive(Debug, Default)]
pub struct VCardBatch {
    pub candidates: Vec<RawContact>,
    pub dropped: Vec<DroppedRecord>,
}

impl VCardBatch {
    pub fn blocks(&self) -> usize {
        self.candidates.len() + self.dropped.len()
    }
}

/// Read every card in `content`. Cards with neither a name, a phone number
/// nor an email are dropped; a card without a name is named after its phone
/// number, or `placeholder_name` when it has none.
pub fn parse_cards(content: &str, placeholder_name: &str) -> VCardBatch {
    let mut batch = VCardBatch::default();

    for block in split_cards(content) {
        let properties = read_properties(&block.lines);
        match build_candidate(properties, placeholder_name) {
            Some(raw) => batch.candidates.push(raw),
            None => {
                debug!(line = block.line, "dropping vCard without name, phone or email");
                batch.dropped.push(DroppedRecord {
                    line: Some(block.line),
                    reason: DropReason::NoIdentifyingFields,
                });
            }
        }
    }

    batch
}

fn build_candidate(properties: CardProperties, placeholder_name: &str) -> Option<RawContact> {
    let CardProperties {
        mut raw,
        structured_name,
    } = properties;

    if raw.name().is_none() {
        if let Some(name) = structured_name {
            raw.set(Field::Name, name);
        }
    }

    if raw.name().is_none() && raw.get(Field::Phone).is_none() && raw.get(Field::Email).is_none() {
        return None;
    }

    if raw.name().is_none() {
        let fallback = raw
            .get(Field::Phone)
            .map(str::to_string)
            .unwrap_or_else(|| placeholder_name.to_string());
        raw.set(Field::Name, fallback);
    }

    raw.set(Field::Vibe, DEFAULT_VIBE_SCORE.to_string());
    raw.set(Field::Label, VibeLabel::Warm.as_str());
    Some(raw)
}

struct CardProperties {
    raw: RawContact,
    structured_name: Option<String>,
}

fn read_properties(lines: &[String]) -> CardProperties {
    let mut raw = RawContact::new();
    let mut structured_name: Option<String> = None;

    for line in logical_lines(lines) {
        let Some(content) = ContentLine::parse(&line) else {
            continue;
        };
        let Some((_, field)) = PROPERTIES.iter().find(|(prop, _)| *prop == content.name) else {
            continue;
        };
        let value = content.decoded_value();

        match (content.name.as_str(), field) {
            ("N", _) => {
                if structured_name.is_none() {
                    structured_name = join_name_components(&value);
                }
            }
            ("ORG", Some(field)) | ("ADR", Some(field)) => {
                raw.set_if_absent(*field, join_components(&value));
            }
            ("TEL", Some(field)) => {
                let number = unescape_text(&value);
                let number = strip_tel_scheme(&number);
                raw.set_if_absent(*field, number);
            }
            (_, Some(field)) => raw.set_if_absent(*field, unescape_text(&value)),
            (_, None) => {}
        }
    }

    CardProperties {
        raw,
        structured_name,
    }
}

fn split_cards(content: &str) -> Vec<CardBlock> {
    let mut cards: Vec<CardBlock> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut start_line = 0usize;
    let mut inside = false;

    for (index, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim_end_matches('\r');
        let marker = line.trim();
        if marker.eq_ignore_ascii_case(BEGIN_VCARD) {
            if inside && !current.is_empty() {
                cards.push(CardBlock {
                    line: start_line,
                    lines: std::mem::take(&mut current),
                });
            }
            inside = true;
            start_line = index + 1;
            continue;
        }

        if inside {
            if marker.eq_ignore_ascii_case(END_VCARD) {
                cards.push(CardBlock {
                    line: start_line,
                    lines: std::mem::take(&mut current),
                });
                inside = false;
            } else {
                current.push(line.to_string());
            }
        }
    }

    if inside {
        cards.push(CardBlock {
            line: start_line,
            lines: current,
        });
    }

    cards
}

/// One logical content line: `[group.]NAME[;PARAM...]:value`.
struct ContentLine<'a> {
    name: String,
    quoted_printable: bool,
    value: &'a str,
}

impl<'a> ContentLine<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let (lhs, value) = split_property(line)?;
        let mut params = lhs.split(';');
        let property = params.next().unwrap_or_default();
        let name = property
            .rsplit('.')
            .next()
            .unwrap_or(property)
            .trim()
            .to_ascii_uppercase();

        Some(Self {
            name,
            quoted_printable: params.any(is_quoted_printable_param),
            value,
        })
    }

    /// The value with any quoted-printable encoding removed. A value that
    /// does not decode is kept as written.
    fn decoded_value(&self) -> String {
        if !self.quoted_printable {
            return self.value.to_string();
        }
        decode_quoted_printable(self.value).unwrap_or_else(|| {
            debug!(property = %self.name, "keeping undecodable quoted-printable value");
            self.value.to_string()
        })
    }
}

/// `ENCODING=QUOTED-PRINTABLE`, or the bare 2.1 form `QUOTED-PRINTABLE`.
fn is_quoted_printable_param(param: &str) -> bool {
    let param = param.trim();
    match param.split_once('=') {
        Some((key, value)) => {
            key.trim().eq_ignore_ascii_case("ENCODING")
                && value.trim().eq_ignore_ascii_case("QUOTED-PRINTABLE")
        }
        None => param.eq_ignore_ascii_case("QUOTED-PRINTABLE"),
    }
}

/// Join physical lines into logical ones. A line starting with one blank
/// continues the previous line; so does any line after a quoted-printable
/// line ending in a soft break (`=`).
fn logical_lines(lines: &[String]) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();

    for line in lines {
        let folded = line.strip_prefix([' ', '\t']);
        if let Some(last) = logical.last_mut() {
            let soft_break = ends_in_soft_break(last);
            if folded.is_some() || soft_break {
                if soft_break {
                    last.pop();
                }
                last.push_str(folded.unwrap_or(line.as_str()));
                continue;
            }
        }
        logical.push(line.clone());
    }

    logical
}

fn ends_in_soft_break(line: &str) -> bool {
    line.ends_with('=') && ContentLine::parse(line).is_some_and(|content| content.quoted_printable)
}

/// Split a content line at the first colon outside a quoted parameter value.
fn split_property(line: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (index, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => return Some((&line[..index], &line[index + 1..])),
            _ => {}
        }
    }
    None
}

/// Decode `=XX` escapes and drop soft breaks. `None` on a bad escape or
/// when the decoded bytes are not UTF-8.
fn decode_quoted_printable(input: &str) -> Option<String> {
    let mut decoded = Vec::with_capacity(input.len());
    let mut rest = input.as_bytes();

    while let Some((&byte, tail)) = rest.split_first() {
        rest = tail;
        if byte != b'=' {
            decoded.push(byte);
            continue;
        }
        match rest {
            [] => break,
            [b'\r', b'\n', tail @ ..] | [b'\r' | b'\n', tail @ ..] => rest = tail,
            [high, low, tail @ ..] => {
                decoded.push((hex_digit(*high)? << 4) | hex_digit(*low)?);
                rest = tail;
            }
            [_] => return None,
        }
    }

    String::from_utf8(decoded).ok()
}

fn hex_digit(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).map(|digit| digit as u8)
}

/// Undo vCard text escaping: `\n`, `\,`, `\;`, `\\`.
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Split a structured value on unescaped semicolons, unescaping each part.
fn split_components(value: &str) -> Vec<String> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in value.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ';' {
            components.push(unescape_text(&current));
            current.clear();
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    components.push(unescape_text(&current));
    components
}

fn join_components(value: &str) -> String {
    split_components(value)
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `N:Family;Given;Additional;Prefix;Suffix` in reading order.
fn join_name_components(value: &str) -> Option<String> {
    let parts = split_components(value);
    let part = |index: usize| parts.get(index).map(|p| p.trim()).unwrap_or_default();
    let ordered = [part(3), part(1), part(2), part(0), part(4)];
    let joined = ordered
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn strip_tel_scheme(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.get(..4) {
        Some(scheme) if scheme.eq_ignore_ascii_case("tel:") => &trimmed[4..],
        _ => trimmed,
    }
}
