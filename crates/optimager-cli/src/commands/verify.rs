//! Verify command - re-hashes images against their manifest

use super::checksum::output_settings;
use super::println_if;
use anyhow::{bail, Context, Result};
use console::style;
use optimager_core::checksum;
use std::path::{Path, PathBuf};

/// Execute the verify command
pub fn execute(
    dir: &Path,
    manifest: Option<String>,
    config_file: Option<PathBuf>,
    silent: bool,
) -> Result<()> {
    let manifest_name = manifest.unwrap_or_else(|| output_settings(config_file).checksum_file);
    let manifest_path = dir.join(&manifest_name);

    println_if!(
        silent,
        "{} {}",
        style("Verifying").bold(),
        style(manifest_path.display()).cyan()
    );

    let report = checksum::verify_manifest(dir, &manifest_path)
        .with_context(|| format!("Failed to verify {}", manifest_path.display()))?;

    for name in &report.matched {
        println_if!(silent, "  {} {}", style("OK").green(), name);
    }
    for mismatch in &report.mismatched {
        println_if!(silent, "  {} {}", style("FAILED").red().bold(), mismatch.filename);
        println_if!(silent, "    expected: {}", mismatch.expected);
        println_if!(silent, "    actual:   {}", mismatch.actual);
    }
    for name in &report.missing {
        println_if!(silent, "  {} {}", style("MISSING").red().bold(), name);
    }

    if !report.is_ok() {
        bail!(
            "{} of {} file(s) failed verification",
            report.mismatched.len() + report.missing.len(),
            report.matched.len() + report.mismatched.len() + report.missing.len()
        );
    }

    println_if!(
        silent,
        "\n{} {} file(s) verified",
        style("Success:").green().bold(),
        report.matched.len()
    );
    Ok(())
}
