//! Heuristic field extraction from unstructured text: pasted signatures,
//! business card transcriptions, message footers.
//!
//! Extraction is a chain of independent rules. Each rule looks at the whole
//! text or its line list and claims at most one value; a line may be claimed
//! by several rules. Whatever no rule claimed becomes the notes.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Field, RawContact};

const MIN_PHONE_DIGITS: usize = 9;
const MIN_NOTES_LEN: usize = 3;
const MAX_NAME_LEN: usize = 60;
const MAX_TITLE_LEN: usize = 60;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\(?\d[\d \t().-]*\d").expect("phone pattern"));

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"]+"#).expect("url pattern"));

static DIGIT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").expect("digit run pattern"));

static COMPANY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:Ltd|LLC|Inc|Corp|Agency|Studio|Group|Solutions|Services|Consulting|Foundation|Associates)\b|\bCo\.",
    )
    .expect("company pattern")
});

static TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:CEO|CTO|CFO|COO|Director|Manager|Engineer|Designer|Developer|Founder|President|VP|Lead|Head|Officer|Specialist|Consultant|Analyst|Coordinator|Executive)\b",
    )
    .expect("title pattern")
});

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\d+\s+\w+\s+(?:St|Street|Ave|Avenue|Rd|Road|Blvd|Boulevard|Dr|Drive|Ln|Lane|Way|Court|Ct|Place|Pl)\b|\b\d{5}(?:-\d{4})?\b",
    )
    .expect("address pattern")
});

/// Fields found in a text blob plus a readable trace of what was detected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub fields: RawContact,
    pub detected: Vec<String>,
}

/// The text under inspection, pre-split into trimmed non-empty lines.
struct Input<'a> {
    text: &'a str,
    lines: Vec<&'a str>,
}

impl<'a> Input<'a> {
    fn new(text: &'a str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        Self { text, lines }
    }

    fn first_line(&self, pred: impl Fn(&str) -> bool) -> Option<Claim> {
        self.lines
            .iter()
            .enumerate()
            .find(|(_, line)| pred(line))
            .map(|(index, line)| Claim {
                value: (*line).to_string(),
                line: Some(index),
            })
    }
}

/// A value taken by a rule: either a whole line or a substring of the text.
struct Claim {
    value: String,
    line: Option<usize>,
}

impl Claim {
    fn substring(value: &str) -> Self {
        Self {
            value: value.to_string(),
            line: None,
        }
    }
}

struct Rule {
    field: Field,
    label: &'static str,
    apply: fn(&Input<'_>) -> Option<Claim>,
}

const RULES: &[Rule] = &[
    Rule { field: Field::Email, label: "Email", apply: email_rule },
    Rule { field: Field::Phone, label: "Phone", apply: phone_rule },
    Rule { field: Field::Website, label: "Website", apply: website_rule },
    Rule { field: Field::Name, label: "Name", apply: name_rule },
    Rule { field: Field::Company, label: "Company", apply: company_rule },
    Rule { field: Field::Title, label: "Title", apply: title_rule },
    Rule { field: Field::Address, label: "Address", apply: address_rule },
];

/// Extract whatever contact fields `text` holds. Never fails; fields that
/// are not found are simply absent.
pub fn extract(text: &str) -> Extraction {
    let input = Input::new(text);
    let mut extraction = Extraction::default();
    let mut claimed_lines: BTreeSet<usize> = BTreeSet::new();
    let mut consumed: Vec<String> = Vec::new();

    for rule in RULES {
        let Some(claim) = (rule.apply)(&input) else {
            continue;
        };
        extraction.fields.set(rule.field, &claim.value);
        extraction
            .detected
            .push(format!("{}: {}", rule.label, claim.value));
        match claim.line {
            Some(index) => {
                claimed_lines.insert(index);
            }
            None => consumed.push(claim.value),
        }
    }

    let notes = input
        .lines
        .iter()
        .enumerate()
        .filter(|(index, _)| !claimed_lines.contains(index))
        .filter(|(_, line)| !fully_consumed(line, &consumed))
        .map(|(_, line)| *line)
        .collect::<Vec<_>>()
        .join(" ");

    if notes.chars().count() > MIN_NOTES_LEN {
        extraction.detected.push("Notes".to_string());
        extraction.fields.set(Field::Notes, notes);
    }

    extraction
}

fn email_rule(input: &Input<'_>) -> Option<Claim> {
    EMAIL_RE.find(input.text).map(|m| Claim::substring(m.as_str()))
}

fn phone_rule(input: &Input<'_>) -> Option<Claim> {
    PHONE_RE
        .find_iter(input.text)
        .find(|m| digit_count(m.as_str()) >= MIN_PHONE_DIGITS)
        .map(|m| Claim::substring(m.as_str()))
}

fn website_rule(input: &Input<'_>) -> Option<Claim> {
    URL_RE.find(input.text).map(|m| {
        let url = m
            .as_str()
            .trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ':' | ')' | '!' | '?'));
        Claim::substring(url)
    })
}

fn name_rule(input: &Input<'_>) -> Option<Claim> {
    input.first_line(looks_like_name)
}

fn company_rule(input: &Input<'_>) -> Option<Claim> {
    input.first_line(|line| !line.contains('@') && COMPANY_RE.is_match(line))
}

fn title_rule(input: &Input<'_>) -> Option<Claim> {
    input.first_line(|line| {
        !line.contains('@') && line.chars().count() < MAX_TITLE_LEN && TITLE_RE.is_match(line)
    })
}

fn address_rule(input: &Input<'_>) -> Option<Claim> {
    input.first_line(|line| ADDRESS_RE.is_match(line))
}

/// Title-case line without contact details, 3 to 59 characters long.
fn looks_like_name(line: &str) -> bool {
    let len = line.chars().count();
    if len <= 2 || len >= MAX_NAME_LEN {
        return false;
    }
    if line.contains('@') || DIGIT_RUN_RE.is_match(line) || URL_RE.is_match(line) {
        return false;
    }
    let mut chars = line.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(first), Some(second)) if first.is_uppercase() && second.is_lowercase()
    )
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(char::is_ascii_digit).count()
}

/// True when removing the email/phone/url matches leaves nothing but
/// punctuation or a lone label such as `Tel:`.
fn fully_consumed(line: &str, consumed: &[String]) -> bool {
    let mut residual = line.to_string();
    let mut touched = false;
    for value in consumed {
        if residual.contains(value.as_str()) {
            residual = residual.replace(value.as_str(), " ");
            touched = true;
        }
    }
    if !touched {
        return false;
    }

    let residual = residual.trim();
    if !residual.chars().any(char::is_alphanumeric) {
        return true;
    }
    let label = residual.trim_end_matches(|c: char| c == ':' || c.is_whitespace());
    residual.ends_with(':') && !label.contains(char::is_whitespace)
}
