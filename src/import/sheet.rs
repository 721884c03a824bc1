//! Binary spreadsheets are decoded by an external converter into CSV text,
//! which then takes the ordinary delimited path.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::config::CommandExec;

const INPUT_PLACEHOLDER: &str = "{input}";

pub trait SheetDecoder {
    /// Convert the first sheet of the workbook at `path` to CSV text.
    fn sheet_to_csv(&self, path: &Path) -> Result<String>;
}

/// Runs a configured converter command and reads CSV from its stdout.
#[derive(Debug, Clone)]
pub struct CommandSheetDecoder {
    command: CommandExec,
}

impl CommandSheetDecoder {
    pub fn new(command: CommandExec) -> Self {
        Self { command }
    }

    /// Arguments with `{input}` substituted; the path is appended when the
    /// command has no placeholder.
    fn arguments(&self, path: &Path) -> Vec<String> {
        let input = path.to_string_lossy();
        let mut args: Vec<String> = self
            .command
            .args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, &input))
            .collect();
        if !self.command.args.iter().any(|arg| arg.contains(INPUT_PLACEHOLDER)) {
            args.push(input.into_owned());
        }
        args
    }
}

impl SheetDecoder for CommandSheetDecoder {
    fn sheet_to_csv(&self, path: &Path) -> Result<String> {
        let args = self.arguments(path);
        info!(program = %self.command.program, "decoding spreadsheet {}", path.display());
        debug!(?args, "spreadsheet converter arguments");

        let output = Command::new(&self.command.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run `{}`", self.command.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "`{}` exited with {}: {}",
                self.command.program,
                output.status,
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout)
            .with_context(|| format!("`{}` produced non-UTF-8 output", self.command.program))
    }
}

/// Stand-in used when no converter is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingSheetDecoder;

impl SheetDecoder for MissingSheetDecoder {
    fn sheet_to_csv(&self, _path: &Path) -> Result<String> {
        bail!("no spreadsheet converter configured (set `commands.sheet_to_csv`)")
    }
}
