//! The persisted contact collection.
//!
//! The importer only needs three things from storage: the category list,
//! the ids already taken, and a way to append a whole batch at once. The
//! file-backed store keeps everything in one JSON document
//! `{ "contacts": [...], "categories": [...] }` and leaves any other keys
//! (and unknown per-contact keys) untouched.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::model::{Category, Contact, VibeLabel, DEFAULT_VIBE_SCORE};
use crate::normalize::clamp_vibe;

pub trait ContactStore {
    fn categories(&self) -> Result<Vec<Category>>;
    fn contacts(&self) -> Result<Vec<Contact>>;
    /// Append every contact or none of them.
    fn append(&mut self, contacts: &[Contact]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    contacts: Vec<Value>,
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreDocument> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "store file missing, starting empty");
                return Ok(StoreDocument::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read store {}", self.path.display()))
            }
        };

        if content.trim().is_empty() {
            return Ok(StoreDocument::default());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse store {}", self.path.display()))
    }

    fn lock_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("store");
        self.path.with_file_name(format!(".{name}.lock"))
    }
}

impl ContactStore for JsonFileStore {
    fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.load()?.categories)
    }

    fn contacts(&self) -> Result<Vec<Contact>> {
        let document = self.load()?;
        let mut contacts = Vec::with_capacity(document.contacts.len());
        for (index, mut value) in document.contacts.into_iter().enumerate() {
            upgrade_stored_contact(&mut value);
            match serde_json::from_value::<Contact>(value) {
                Ok(contact) => contacts.push(contact),
                Err(err) => warn!(index, %err, "skipping unreadable stored contact"),
            }
        }
        Ok(contacts)
    }

    fn append(&mut self, contacts: &[Contact]) -> Result<()> {
        if contacts.is_empty() {
            return Ok(());
        }

        let _lock = StoreLock::acquire(self.lock_path())?;
        let mut document = self.load()?;
        for contact in contacts {
            document
                .contacts
                .push(serde_json::to_value(contact).context("failed to serialise contact")?);
        }

        let mut data = serde_json::to_vec_pretty(&document).context("failed to serialise store")?;
        data.push(b'\n');
        write_atomic(&self.path, &data)?;

        debug!(count = contacts.len(), path = %self.path.display(), "appended contacts");
        Ok(())
    }
}

/// Bring a contact written by an older client into the current shape.
/// Only the in-memory copy changes; the stored value is written back as is.
fn upgrade_stored_contact(value: &mut Value) {
    let Some(fields) = value.as_object_mut() else {
        return;
    };

    if let Some(Value::Number(id)) = fields.get("id") {
        let id = id.to_string();
        fields.insert("id".into(), Value::String(id));
    }

    let score = match fields.get("vibeScore") {
        Some(Value::Number(score)) => clamp_vibe(Some(&score.to_string())),
        Some(Value::String(score)) => clamp_vibe(Some(score)),
        _ => DEFAULT_VIBE_SCORE,
    };
    let label = fields
        .get("vibeLabel")
        .and_then(Value::as_str)
        .and_then(VibeLabel::parse)
        .unwrap_or_else(|| VibeLabel::from_score(score));

    fields.insert("vibeScore".into(), Value::from(score));
    fields.insert("vibeLabel".into(), Value::from(label.as_str()));
}

/// Exclusive lock held for the duration of one append.
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store dir {}", parent.display()))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => bail!(
                "store busy: locked by another import (remove {} if it is stale)",
                path.display()
            ),
            Err(err) => {
                Err(err).with_context(|| format!("failed to create lock {}", path.display()))
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Write `data` to `target` through a synced temporary file and a rename,
/// so readers see either the old document or the new one.
pub fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent dir {}", parent.display()))?;

    let name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("store path has no file name: {}", target.display()))?;

    let mut counter: u32 = 0;
    let temp_path = loop {
        let candidate = if counter == 0 {
            parent.join(format!(".{name}.tmp"))
        } else {
            parent.join(format!(".{name}.{counter}.tmp"))
        };
        if !candidate.exists() {
            break candidate;
        }
        counter += 1;
    };

    let written = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "failed to create temporary file {} for atomic write",
                    temp_path.display()
                )
            })?;
        file.write_all(data)
            .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync temporary file {}", temp_path.display()))?;
        fs::rename(&temp_path, target).with_context(|| {
            format!(
                "failed to rename temporary file {} to {}",
                temp_path.display(),
                target.display()
            )
        })
    })();

    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written?;

    if let Ok(dir_file) = fs::File::open(parent) {
        let _ = dir_file.sync_all();
    }

    Ok(())
}
