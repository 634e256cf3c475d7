//! Configuration file management command

use anyhow::{Context, Result};
use console::style;
use optimager_core::Settings;
use std::path::PathBuf;

/// Arguments for the config command
pub struct ConfigArgs {
    /// Initialize a new configuration file with defaults
    pub init: bool,
    /// Show the path to the configuration file
    pub path: bool,
    /// Show configuration in JSON format
    pub json: bool,
    /// Suppress output (for scripting)
    pub silent: bool,
    /// Custom configuration file path (overrides default)
    pub config_file: Option<PathBuf>,
}

/// Execute the config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    if args.path {
        match Settings::resolve_path(args.config_file) {
            Some(path) if !args.silent => println!("{}", path.display()),
            Some(_) => {}
            None if !args.silent => {
                eprintln!("{}", style("Could not determine config path").yellow())
            }
            None => {}
        }
        return Ok(());
    }

    if args.init {
        // --init writes to the per-user location unless told otherwise
        let path = args.config_file.or_else(Settings::config_path);
        return init_config(path, args.silent);
    }

    show_config(args.config_file, args.json, args.silent)
}

/// Initialize a new configuration file with default values
fn init_config(config_path: Option<PathBuf>, silent: bool) -> Result<()> {
    let path = config_path.context("Could not determine configuration directory")?;

    if path.exists() {
        if !silent {
            eprintln!(
                "{} Configuration file already exists at: {}",
                style("Warning:").yellow(),
                path.display()
            );
            eprintln!("Use a text editor to modify it, or delete it to re-initialize.");
        }
        return Ok(());
    }

    let saved_path = Settings::default()
        .save_to_path(Some(path))
        .context("Failed to save configuration file")?;

    if !silent {
        println!(
            "{} Created configuration file at: {}",
            style("Success:").green(),
            saved_path.display()
        );
        println!();
        println!("Review the device path, output directory and timezone before imaging:");
        println!();
        println!("  [device]");
        println!("  path = \"/dev/sr0\"");
        println!();
        println!("  [imaging]");
        println!("  timezone = \"Europe/Amsterdam\"");
    }

    Ok(())
}

/// Show the current configuration
///
/// Unlike a run, nothing here falls back to defaults: a broken file is
/// reported as such.
fn show_config(explicit: Option<PathBuf>, json: bool, silent: bool) -> Result<()> {
    let path = Settings::resolve_path(explicit);
    let settings = Settings::load_from_path(path.clone()).context(
        "Configuration unavailable, run 'optimager config --init' to create a configuration file",
    )?;

    if silent {
        return Ok(());
    }

    if json {
        let json_output = serde_json::to_string_pretty(&settings)
            .context("Failed to serialize settings to JSON")?;
        println!("{}", json_output);
        return Ok(());
    }

    println!("{}", style("Optimager Configuration").bold());
    println!();
    if let Some(path) = &path {
        println!("  {} {}", style("Config file:").dim(), path.display());
    }
    println!();

    println!("{}", style("[device]").cyan());
    println!("  path = \"{}\"", settings.device.path);
    println!();

    println!("{}", style("[output]").cyan());
    println!(
        "  default_dir = \"{}\"",
        settings.output.default_dir.display()
    );
    println!("  prefix = \"{}\"", settings.output.prefix);
    println!("  extension = \"{}\"", settings.output.extension);
    println!("  log_file = \"{}\"", settings.output.log_file);
    println!("  checksum_file = \"{}\"", settings.output.checksum_file);
    println!("  metadata_file = \"{}\"", settings.output.metadata_file);
    println!();

    println!("{}", style("[imaging]").cyan());
    println!("  retries = {}", settings.imaging.retries);
    println!("  direct_disc_mode = {}", settings.imaging.direct_disc_mode);
    println!("  timezone = \"{}\"", settings.imaging.timezone);
    println!();

    println!("{}", style("[tools]").cyan());
    println!("  read_command = \"{}\"", settings.tools.read_command);
    println!("  rescue_command = \"{}\"", settings.tools.rescue_command);
    println!("  umount_command = \"{}\"", settings.tools.umount_command);
    println!();

    println!("{}", style("[timing]").cyan());
    println!("  startup_delay_ms = {}", settings.timing.startup_delay_ms);
    println!("  finish_delay_ms = {}", settings.timing.finish_delay_ms);
    println!("  poll_interval_ms = {}", settings.timing.poll_interval_ms);
    println!(
        "  termination_grace_ms = {}",
        settings.timing.termination_grace_ms
    );

    Ok(())
}
