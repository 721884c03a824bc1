//! Business-card and screenshot recognition.
//!
//! The image is sent to an external service that answers with a plain
//! `Label: value` block (or a flat JSON object, which is folded into the
//! same block). Only the block parser has semantics of its own here.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::model::{Field, RawContact};

const USER_AGENT: &str = concat!("rapport/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Labels the recognizer may emit and the fields they fill.
const LABELS: &[(&str, Field)] = &[
    ("name", Field::Name),
    ("email", Field::Email),
    ("phone", Field::Phone),
    ("company", Field::Company),
    ("title", Field::Title),
    ("website", Field::Website),
    ("address", Field::Address),
    ("notes", Field::Notes),
];

pub trait ImageRecognizer {
    /// Return the recognized `Label: value` block for an image.
    fn recognize(&self, image: &[u8], mime: &str) -> Result<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeRequest<'a> {
    base64_data: String,
    mime_type: &'a str,
}

pub struct HttpRecognizer {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRecognizer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

impl ImageRecognizer for HttpRecognizer {
    fn recognize(&self, image: &[u8], mime: &str) -> Result<String> {
        info!(endpoint = %self.endpoint, mime, bytes = image.len(), "sending image for recognition");

        let body = RecognizeRequest {
            base64_data: BASE64_STANDARD.encode(image),
            mime_type: mime,
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .with_context(|| format!("failed to reach recognizer at {}", self.endpoint))?;
        let status = response.status();
        let text = response
            .text()
            .context("failed to read recognizer response")?;
        if !status.is_success() {
            bail!("recognizer returned {}: {}", status, text.trim());
        }

        debug!(response = %text, "recognizer response");
        Ok(response_to_label_block(&text))
    }
}

/// Stand-in used when no recognizer endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingRecognizer;

impl ImageRecognizer for MissingRecognizer {
    fn recognize(&self, _image: &[u8], _mime: &str) -> Result<String> {
        bail!("no image recognizer configured (set `recognizer.endpoint`)")
    }
}

/// Fold a flat JSON object answer into `Label: value` lines; any other
/// answer is already a label block.
fn response_to_label_block(text: &str) -> String {
    let cleaned = text.replace("```json", "").replace("```", "");
    let Ok(object) = serde_json::from_str::<Map<String, Value>>(cleaned.trim()) else {
        return text.to_string();
    };

    object
        .iter()
        .filter_map(|(key, value)| {
            let value = value.as_str()?.trim();
            let label = match key.as_str() {
                "jobTitle" => "title",
                other => other,
            };
            Some(format!("{label}: {value}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a recognizer block. Labels are case-insensitive, the value is
/// everything after the first colon, unknown labels and empty values are
/// ignored and the first occurrence of a label wins.
pub fn parse_label_block(text: &str) -> RawContact {
    let mut raw = RawContact::new();
    for line in text.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim().to_ascii_lowercase();
        let Some((_, field)) = LABELS.iter().find(|(known, _)| *known == label) else {
            continue;
        };
        raw.set_if_absent(*field, value);
    }
    raw
}

/// Guess an image MIME type from the file extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
