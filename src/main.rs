mod config;
mod import;
mod model;
mod normalize;
mod recognize;
mod store;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::Config;
use import::sheet::{CommandSheetDecoder, MissingSheetDecoder, SheetDecoder};
use import::{ImportOptions, Importer, SourceFormat};
use model::ImportResult;
use recognize::{HttpRecognizer, ImageRecognizer, MissingRecognizer};
use store::{ContactStore, JsonFileStore};

const LOG_ENV: &str = "RAPPORT_LOG";

#[derive(Parser, Debug)]
#[command(name = "rapport", version, about = "Import contacts from messy sources")]
struct Cli {
    /// Configuration file (defaults to the user config dir)
    #[arg(long, global = true, env = "RAPPORT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a CSV, TSV, spreadsheet or vCard file
    Import(ImportArgs),
    /// Extract one contact from pasted free text
    Paste(PasteArgs),
    /// Extract one contact from a photographed card or screenshot
    Scan(ScanArgs),
    /// List stored contacts
    List(ListArgs),
}

#[derive(Args, Debug)]
struct ImportTarget {
    /// Put every imported contact into this category
    #[arg(long)]
    category: Option<String>,

    /// Run the whole import without writing to the store
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Print the import diagnostic as JSON instead of text
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Override format detection (required when reading stdin)
    #[arg(long, value_enum)]
    format: Option<ImportFormat>,

    #[command(flatten)]
    target: ImportTarget,

    /// Input file, or `-` for stdin
    #[arg(value_name = "PATH")]
    input: String,
}

#[derive(Args, Debug)]
struct PasteArgs {
    #[command(flatten)]
    target: ImportTarget,

    /// Text file to read, or `-` / nothing for stdin
    #[arg(value_name = "PATH")]
    input: Option<String>,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Image MIME type (guessed from the extension otherwise)
    #[arg(long)]
    mime: Option<String>,

    #[command(flatten)]
    target: ImportTarget,

    #[arg(value_name = "IMAGE")]
    image: PathBuf,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Case-insensitive match on name, email or company
    filter: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ImportFormat {
    Csv,
    Tsv,
    Xlsx,
    Vcf,
    Text,
}

impl From<ImportFormat> for SourceFormat {
    fn from(format: ImportFormat) -> Self {
        match format {
            ImportFormat::Csv => SourceFormat::Csv,
            ImportFormat::Tsv => SourceFormat::Tsv,
            ImportFormat::Xlsx => SourceFormat::Spreadsheet,
            ImportFormat::Vcf => SourceFormat::VCard,
            ImportFormat::Text => SourceFormat::Text,
        }
    }
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    debug!(config = %config.config_path.display(), store = %config.store.display(), "configuration loaded");

    match cli.command {
        Command::Import(args) => handle_import(args, &config),
        Command::Paste(args) => handle_paste(args, &config),
        Command::Scan(args) => handle_scan(args, &config),
        Command::List(args) => handle_list(args, &config),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn import_options(target: &ImportTarget, config: &Config) -> ImportOptions {
    ImportOptions {
        category: target.category.clone(),
        dry_run: target.dry_run,
        ..ImportOptions::from_config(&config.import)
    }
}

fn handle_import(args: ImportArgs, config: &Config) -> Result<()> {
    let options = import_options(&args.target, config);
    let output = Output::from(&args.target);
    let format = args.format.map(SourceFormat::from);

    let mut store = JsonFileStore::new(&config.store);
    let mut importer = Importer::new(&mut store, options);

    let result = if args.input == "-" {
        let format = format.ok_or_else(|| anyhow!("reading from stdin requires --format"))?;
        if format == SourceFormat::Spreadsheet {
            bail!("spreadsheets cannot be read from stdin; pass a file path");
        }
        let content = read_stdin()?;
        match format {
            SourceFormat::Text => {
                let text = importer.import_free_text(&content)?;
                output.detected(&text.detected);
                text.result
            }
            _ => importer.import_content(&content, format)?,
        }
    } else {
        let sheets: Box<dyn SheetDecoder> = match config.commands.sheet_to_csv.clone() {
            Some(command) => Box::new(CommandSheetDecoder::new(command)),
            None => Box::new(MissingSheetDecoder),
        };
        importer.import_file(Path::new(&args.input), format, sheets.as_ref())?
    };

    output.summary(&result)
}

fn handle_paste(args: PasteArgs, config: &Config) -> Result<()> {
    let options = import_options(&args.target, config);
    let output = Output::from(&args.target);

    let text = match args.input.as_deref() {
        None | Some("-") => read_stdin()?,
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read pasted text from {}", path))?,
    };

    let mut store = JsonFileStore::new(&config.store);
    let imported = Importer::new(&mut store, options).import_free_text(&text)?;

    output.detected(&imported.detected);
    output.summary(&imported.result)
}

fn handle_scan(args: ScanArgs, config: &Config) -> Result<()> {
    let options = import_options(&args.target, config);
    let output = Output::from(&args.target);

    let mime = match args.mime {
        Some(mime) => mime,
        None => recognize::mime_for_path(&args.image)
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow!(
                    "cannot guess the image type of {}; pass --mime",
                    args.image.display()
                )
            })?,
    };
    let image = fs::read(&args.image)
        .with_context(|| format!("failed to read image {}", args.image.display()))?;

    let recognizer: Box<dyn ImageRecognizer> = match &config.recognizer.endpoint {
        Some(endpoint) => Box::new(HttpRecognizer::new(
            endpoint.clone(),
            config.recognizer.api_key(),
        )?),
        None => Box::new(MissingRecognizer),
    };

    let mut store = JsonFileStore::new(&config.store);
    let imported =
        Importer::new(&mut store, options).import_image(&image, &mime, recognizer.as_ref())?;

    output.detected(&imported.detected);
    output.summary(&imported.result)
}

fn handle_list(args: ListArgs, config: &Config) -> Result<()> {
    let store = JsonFileStore::new(&config.store);
    let needle = args
        .filter
        .as_deref()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty());

    let contacts: Vec<_> = store
        .contacts()?
        .into_iter()
        .filter(|contact| match &needle {
            None => true,
            Some(needle) => [&contact.name, &contact.email, &contact.company]
                .iter()
                .any(|value| value.to_lowercase().contains(needle.as_str())),
        })
        .collect();

    if contacts.is_empty() {
        match &needle {
            Some(needle) => eprintln!("No matches for \"{}\"", needle),
            None => eprintln!("No contacts in {}", store.path().display()),
        }
        return Ok(());
    }

    // name<TAB>email<TAB>score<TAB>label
    for contact in contacts {
        println!(
            "{}\t{}\t{}\t{}",
            contact.name, contact.email, contact.vibe_score, contact.vibe_label
        );
    }
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read stdin")?;
    Ok(buffer)
}

/// How import results are reported on stdout.
struct Output {
    dry_run: bool,
    json: bool,
}

impl From<&ImportTarget> for Output {
    fn from(target: &ImportTarget) -> Self {
        Self {
            dry_run: target.dry_run,
            json: target.json,
        }
    }
}

impl Output {
    fn detected(&self, detected: &[String]) {
        if self.json {
            return;
        }
        for descriptor in detected {
            println!("Detected: {}", descriptor);
        }
    }

    fn summary(&self, result: &ImportResult) -> Result<()> {
        if self.json {
            let diagnostic = serde_json::to_string_pretty(&result.diagnostic())
                .context("failed to serialise import diagnostic")?;
            println!("{}", diagnostic);
            return Ok(());
        }

        if self.dry_run {
            println!("Would import {} contacts (dry run).", result.accepted());
            for contact in &result.contacts {
                println!("  {} <{}>", contact.name, contact.email);
            }
        } else {
            println!("Imported {} contacts.", result.accepted());
        }

        if !result.dropped.is_empty() {
            println!("Dropped {} rows:", result.dropped.len());
            for (reason, count) in result.drop_summary() {
                println!("  {}: {}", reason, count);
            }
        }

        for warning in &result.warnings {
            eprintln!("warning: {}", warning);
        }
        Ok(())
    }
}
