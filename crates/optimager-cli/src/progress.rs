//! Terminal display helpers for the CLI

use console::style;
use humansize::{format_size as humansize_format, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use optimager_core::LogRecord;
use std::time::Duration;
use tracing::Level;

/// Spinner shown while a run is in progress
pub fn spinner(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("  {spinner:.green} {elapsed_precise} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Render a log record for the live display
pub fn format_record(record: &LogRecord) -> String {
    let level = match record.level {
        Level::ERROR => style("ERROR").red().bold(),
        Level::WARN => style(" WARN").yellow(),
        Level::INFO => style(" INFO").dim(),
        Level::DEBUG => style("DEBUG").blue(),
        Level::TRACE => style("TRACE").magenta(),
    };
    format!("{} {}", level, record.message)
}

/// Format a byte count for display
pub fn format_size(bytes: u64) -> String {
    humansize_format(bytes, BINARY)
}
