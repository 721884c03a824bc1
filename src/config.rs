use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::BaseDirs;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::import::{headers::DEFAULT_POSITIONAL_COLUMNS, DEFAULT_PLACEHOLDER_NAME};
use crate::model::Field;

const CONFIG_FILE_NAME: &str = "config.toml";
const STORE_FILE_NAME: &str = "contacts.json";
const APP_NAME: &str = "rapport";
const DEFAULT_API_KEY_ENV: &str = "RAPPORT_RECOGNIZER_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub config_path: PathBuf,
    pub store: PathBuf,
    pub import: ImportConfig,
    pub commands: Commands,
    pub recognizer: RecognizerConfig,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Name given to vCards that carry an email or phone but no name.
    pub placeholder_name: String,
    /// Column order assumed for delimited input without a header row.
    pub positional_columns: Vec<Field>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            placeholder_name: DEFAULT_PLACEHOLDER_NAME.to_string(),
            positional_columns: DEFAULT_POSITIONAL_COLUMNS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Commands {
    /// Converts a binary spreadsheet to CSV on stdout.
    pub sheet_to_csv: Option<CommandExec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExec {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub endpoint: Option<String>,
    pub api_key_env: String,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

impl RecognizerConfig {
    /// Bearer key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

/// Expand ~ to home directory in paths
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = home::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn config_root() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    Ok(base.config_dir().join(APP_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE_NAME))
}

fn default_store_path() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    Ok(base.data_dir().join(APP_NAME).join(STORE_FILE_NAME))
}

/// Load configuration from `explicit` or the default location.
/// A missing file yields defaults; a malformed one is an error.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => expand_tilde(path),
        None => config_path()?,
    };

    if !path.exists() {
        debug!(path = %path.display(), "no configuration file, using defaults");
        return Ok(Config {
            config_path: path,
            store: default_store_path()?,
            import: ImportConfig::default(),
            commands: Commands::default(),
            recognizer: RecognizerConfig::default(),
        });
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read configuration file at {}", path.display()))?;
    parse(&raw, path)
}

fn parse(raw: &str, path: PathBuf) -> Result<Config> {
    let value: toml::Value = toml::from_str(raw)
        .with_context(|| format!("failed to parse {} as TOML", path.display()))?;

    warn_unknown_keys(&value);

    let cfg_file: ConfigFile = value
        .try_into()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))?;

    let store = match cfg_file.store {
        Some(store) => expand_tilde(&store),
        None => default_store_path()?,
    };

    let import = cfg_file
        .import
        .into_config()
        .with_context(|| "failed to parse import configuration")?;

    Ok(Config {
        config_path: path,
        store,
        import,
        commands: cfg_file.commands.into(),
        recognizer: cfg_file.recognizer.into(),
    })
}

// =============================================================================
// Unknown key warnings
// =============================================================================

fn warn_unknown_keys(value: &toml::Value) {
    let Some(table) = value.as_table() else {
        return;
    };

    let known = HashSet::from(["store", "import", "commands", "recognizer"]);
    for key in table.keys() {
        if !known.contains(key.as_str()) {
            warn!("unknown configuration key `{}`", key);
        }
    }

    if let Some(v) = table.get("import") {
        warn_unknown_in_section(v, "import", &["placeholder_name", "positional_columns"]);
    }
    if let Some(v) = table.get("commands") {
        warn_unknown_in_section(v, "commands", &["sheet_to_csv"]);
    }
    if let Some(v) = table.get("recognizer") {
        warn_unknown_in_section(v, "recognizer", &["endpoint", "api_key_env"]);
    }
}

fn warn_unknown_in_section(value: &toml::Value, section: &str, known: &[&str]) {
    let Some(table) = value.as_table() else {
        return;
    };
    let known_set: HashSet<&str> = known.iter().copied().collect();
    for key in table.keys() {
        if !known_set.contains(key.as_str()) {
            warn!("unknown {} entry `{}`", section, key);
        }
    }
}

// =============================================================================
// File representation
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    store: Option<PathBuf>,
    import: ImportFile,
    commands: CommandsFile,
    recognizer: RecognizerFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportFile {
    placeholder_name: Option<String>,
    positional_columns: Option<Vec<String>>,
}

impl ImportFile {
    fn into_config(self) -> Result<ImportConfig> {
        let defaults = ImportConfig::default();

        let placeholder_name = self
            .placeholder_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or(defaults.placeholder_name);

        let positional_columns = match self.positional_columns {
            None => defaults.positional_columns,
            Some(columns) => {
                if columns.is_empty() {
                    return Err(anyhow!("`positional_columns` must name at least one field"));
                }
                let mut fields = Vec::with_capacity(columns.len());
                for column in &columns {
                    let field = Field::from_str(column).ok_or_else(|| {
                        anyhow!("unknown field `{}` in `positional_columns`", column)
                    })?;
                    fields.push(field);
                }
                fields
            }
        };

        Ok(ImportConfig {
            placeholder_name,
            positional_columns,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommandsFile {
    sheet_to_csv: Option<CommandDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CommandDef {
    Simple(String),
    List(Vec<String>),
}

impl From<CommandsFile> for Commands {
    fn from(file: CommandsFile) -> Self {
        Self {
            sheet_to_csv: file.sheet_to_csv.and_then(CommandExec::from_def),
        }
    }
}

impl CommandExec {
    fn from_def(def: CommandDef) -> Option<Self> {
        match def {
            CommandDef::Simple(cmd) => {
                let mut parts = cmd.split_whitespace().map(str::to_string);
                let program = parts.next()?;
                Some(Self {
                    program,
                    args: parts.collect(),
                })
            }
            CommandDef::List(mut parts) => {
                if parts.is_empty() || parts[0].trim().is_empty() {
                    return None;
                }
                let program = parts.remove(0);
                Some(Self {
                    program,
                    args: parts,
                })
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecognizerFile {
    endpoint: Option<String>,
    api_key_env: Option<String>,
}

impl From<RecognizerFile> for RecognizerConfig {
    fn from(file: RecognizerFile) -> Self {
        let defaults = RecognizerConfig::default();
        Self {
            endpoint: file
                .endpoint
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            api_key_env: file
                .api_key_env
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .unwrap_or(defaults.api_key_env),
        }
    }
}
