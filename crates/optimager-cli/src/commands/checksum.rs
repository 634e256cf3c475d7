//! Checksum command - writes a SHA-512 manifest for a directory of images

use super::println_if;
use crate::progress::format_size;
use anyhow::{bail, Context, Result};
use console::style;
use optimager_core::{checksum, OutputSettings, Settings};
use std::path::{Path, PathBuf};

/// Arguments for the checksum command
pub struct ChecksumArgs {
    /// Directory holding the images
    pub dir: PathBuf,
    /// Extension of the files to hash
    pub extension: Option<String>,
    /// Manifest file name
    pub manifest: Option<String>,
    /// Suppress output
    pub silent: bool,
    /// Custom configuration file path
    pub config_file: Option<PathBuf>,
}

/// Output naming from the configuration file, or built-in defaults when
/// there is none
pub(crate) fn output_settings(config_file: Option<PathBuf>) -> OutputSettings {
    match Settings::load(config_file) {
        Ok(settings) => settings.output,
        Err(e) => {
            tracing::debug!("Using default output names: {}", e);
            OutputSettings::default()
        }
    }
}

/// Execute the checksum command
pub fn execute(args: ChecksumArgs) -> Result<()> {
    let output = output_settings(args.config_file);
    let extension = args.extension.unwrap_or(output.extension);
    let manifest_name = args.manifest.unwrap_or(output.checksum_file);
    let silent = args.silent;

    if !args.dir.is_dir() {
        bail!("Not a directory: {}", args.dir.display());
    }

    let files = checksum::matching_files(&args.dir, &extension)
        .with_context(|| format!("Failed to list {}", args.dir.display()))?;
    if files.is_empty() {
        bail!(
            "No files with extension '{}' in {}",
            extension,
            args.dir.display()
        );
    }

    println_if!(
        silent,
        "{} {} file(s) in {}",
        style("Hashing").bold(),
        files.len(),
        style(args.dir.display()).cyan()
    );
    for file in &files {
        println_if!(silent, "  {} ({})", display_name(file), file_size(file));
    }

    let manifest_path = args.dir.join(&manifest_name);
    let report = checksum::compute(&args.dir, &extension, &manifest_path);

    for entry in report.manifest.iter() {
        let short = entry.digest.get(..16).unwrap_or(&entry.digest);
        println_if!(silent, "  {}  {}", style(short).dim(), entry.filename);
    }

    if !report.wrote {
        bail!(
            "Could not write checksum file {}, see messages above",
            manifest_path.display()
        );
    }

    println_if!(
        silent,
        "\n{} Wrote {}",
        style("Success:").green().bold(),
        manifest_path.display()
    );
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn file_size(path: &Path) -> String {
    std::fs::metadata(path)
        .map(|m| format_size(m.len()))
        .unwrap_or_else(|_| "unreadable".to_string())
}
