//! Image command - supervised acquisition of one disc

use super::println_if;
use crate::progress::{format_record, format_size, spinner};
use anyhow::{bail, Context, Result};
use console::style;
use dialoguer::Confirm;
use indicatif::ProgressBar;
use optimager_core::{
    clear_previous_image, AcquisitionRequest, CancellationToken, ImagingTool, LogRecord, Pipeline,
    RunLogFile, RunOutcome, Settings, ValidationProblem,
};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::thread;

/// Arguments for the image command
pub struct ImageArgs {
    /// Optical device
    pub device: Option<PathBuf>,
    /// Output directory
    pub out_dir: Option<PathBuf>,
    /// Imaging tool for the first attempt
    pub tool: ImagingTool,
    /// Maximum read retries
    pub retries: Option<u32>,
    /// Direct disc mode (ddrescue only)
    pub direct_disc_mode: bool,
    /// Image file name prefix
    pub prefix: Option<String>,
    /// Image file extension
    pub extension: Option<String>,
    /// Identifier for the metadata
    pub identifier: Option<String>,
    /// Generate a UUID identifier
    pub uuid: bool,
    /// Description for the metadata
    pub description: String,
    /// Notes for the metadata
    pub notes: String,
    /// Answer yes to the overwrite prompt and never offer a retry
    pub skip_confirm: bool,
    /// Hide the live log
    pub quiet: bool,
    /// Suppress all output
    pub silent: bool,
    /// Custom configuration file path
    pub config_file: Option<PathBuf>,
    /// Set on Ctrl+C
    pub cancel: CancellationToken,
    /// Log events produced while the run is in progress
    pub records: Receiver<LogRecord>,
    /// Per-run log file sink
    pub run_log: RunLogFile,
}

/// Execute the image command
pub fn execute(args: ImageArgs) -> Result<()> {
    let silent = args.silent;

    let settings = Settings::load(args.config_file.clone()).context(
        "Configuration unavailable, run 'optimager config --init' to create a configuration file",
    )?;
    let pipeline = Pipeline::from_settings(&settings);
    let mut request = build_request(&settings, &args)?;

    loop {
        // Step 1: Validate
        println_if!(silent, "{}", style("Checking request...").bold());
        let validation = pipeline.validate(&request);
        if !validation.is_valid() {
            for problem in validation.problems() {
                eprintln!("  {} {}", style("✗").red().bold(), problem);
                if let Some(hint) = install_hint(&problem, &pipeline) {
                    eprintln!("    {}", style(hint).dim());
                }
            }
            bail!("Cannot start imaging, fix the problems listed above");
        }

        // Step 2: Deal with the outputs of an earlier run
        if validation.output_exists && request.tool == ImagingTool::ReadCommand {
            confirm_overwrite(&request, args.skip_confirm)?;
        }
        let removed = clear_previous_image(&request).with_context(|| {
            format!(
                "Failed to remove old image {}",
                request.image_path().display()
            )
        })?;
        for path in removed {
            println_if!(silent, "  {} Removed {}", style("ℹ").blue(), path.display());
        }
        let validated = validation.into_validated()?;

        // Step 3: Run
        let log_path = validated.log_path();
        args.run_log
            .open(&log_path, validated.timezone)
            .with_context(|| {
                format!("error trying to write log file to {}", log_path.display())
            })?;

        println_if!(
            silent,
            "\n{} {} with {}",
            style("Imaging").bold(),
            style(validated.device.display()).cyan(),
            style(validated.tool).cyan()
        );

        let handle = pipeline.spawn(validated, args.cancel.clone());
        let outcome = match handle {
            Ok(handle) => {
                let pb = spinner(silent);
                while !handle.is_finished() {
                    pb.set_message(handle.state().phase().to_string());
                    drain_records(&args.records, &pb, args.quiet || silent);
                    thread::sleep(pipeline.tunables().poll_interval);
                }
                let result = handle.wait();
                drain_records(&args.records, &pb, args.quiet || silent);
                pb.finish_and_clear();
                result
            }
            Err(e) => Err(e),
        };
        args.run_log.close();
        let outcome =
            outcome.context("An unexpected error occurred, see log file for details")?;

        // Step 4: Report
        if outcome.io_error {
            bail!(
                "Cannot access optical device {}. Check that device exists.",
                request.device.display()
            );
        }

        if outcome.success && !outcome.read_error_detected() {
            print_summary(&request, &outcome, silent);
            return Ok(());
        }

        if interrupted(&outcome, &args.cancel) {
            bail!(
                "Imaging interrupted, see log file {} for details",
                log_path.display()
            );
        }

        eprintln!(
            "\n{} One or more errors occurred while imaging, see log file {} for details",
            style("Warning:").yellow().bold(),
            log_path.display()
        );

        // Step 5: Offer another attempt
        if args.skip_confirm || !offer_retry(&mut request)? {
            bail!("Disc was not imaged without errors");
        }
        println_if!(silent);
    }
}

fn build_request(settings: &Settings, args: &ImageArgs) -> Result<AcquisitionRequest> {
    let mut request = AcquisitionRequest::from_settings(settings)?
        .tool(args.tool)
        .description(args.description.clone())
        .notes(args.notes.clone());

    if let Some(device) = &args.device {
        request = request.device(device);
    }
    if let Some(dir) = &args.out_dir {
        request = request.output_dir(dir);
    }
    if let Some(retries) = args.retries {
        request = request.retries(retries);
    }
    if args.direct_disc_mode {
        request = request.direct_disc_mode(true);
    }
    if let Some(prefix) = &args.prefix {
        request = request.prefix(prefix.clone());
    }
    if let Some(extension) = &args.extension {
        request = request.extension(extension.clone());
    }
    if args.uuid {
        request = request.identifier(uuid::Uuid::new_v4().to_string());
    } else if let Some(identifier) = &args.identifier {
        request = request.identifier(identifier.clone());
    }

    Ok(request)
}

fn install_hint(problem: &ValidationProblem, pipeline: &Pipeline) -> Option<&'static str> {
    match problem {
        ValidationProblem::ToolMissing(tool) if *tool == pipeline.commands().read => {
            Some("Install it with: sudo apt install wodim")
        }
        ValidationProblem::ToolMissing(tool) if *tool == pipeline.commands().rescue => {
            Some("Install it with: sudo apt install gddrescue")
        }
        _ => None,
    }
}

fn confirm_overwrite(request: &AcquisitionRequest, skip_confirm: bool) -> Result<()> {
    eprintln!(
        "{} Files with prefix '{}' and extension '{}' already exist in {}",
        style("Warning:").yellow().bold(),
        request.prefix,
        request.extension,
        request.output_dir.display()
    );
    if skip_confirm {
        return Ok(());
    }

    let proceed = Confirm::new()
        .with_prompt("Overwrite the existing image?")
        .default(false)
        .interact()?;
    if !proceed {
        bail!("Aborted by user");
    }
    Ok(())
}

/// A Ctrl+C ends the command even when the tool died from the signal
/// before the token was seen, so no retry is offered for it
fn interrupted(outcome: &RunOutcome, cancel: &CancellationToken) -> bool {
    outcome.cancelled() || cancel.is_cancelled()
}

/// Ask whether to try again, adjusting the request for the next attempt
fn offer_retry(request: &mut AcquisitionRequest) -> Result<bool> {
    match request.tool {
        ImagingTool::ReadCommand => {
            let again = Confirm::new()
                .with_prompt("Try again with ddrescue?")
                .default(true)
                .interact()?;
            if again {
                request.tool = ImagingTool::RescueCommand;
            }
            Ok(again)
        }
        ImagingTool::RescueCommand => {
            let again = Confirm::new()
                .with_prompt("Try another ddrescue pass?")
                .default(true)
                .interact()?;
            if again {
                let prompt = if request.direct_disc_mode {
                    "Turn direct disc mode off for this pass?"
                } else {
                    "Turn direct disc mode on for this pass?"
                };
                let toggle = Confirm::new()
                    .with_prompt(prompt)
                    .default(false)
                    .interact()?;
                if toggle {
                    request.direct_disc_mode = !request.direct_disc_mode;
                }
            }
            Ok(again)
        }
    }
}

fn drain_records(records: &Receiver<LogRecord>, pb: &ProgressBar, hide: bool) {
    for record in records.try_iter() {
        if !hide {
            pb.println(format_record(&record));
        }
    }
}

fn print_summary(request: &AcquisitionRequest, outcome: &RunOutcome, silent: bool) {
    if silent {
        return;
    }

    let image = request.image_path();
    let size = std::fs::metadata(&image)
        .map(|m| format_size(m.len()))
        .unwrap_or_else(|_| "unknown size".to_string());

    println!(
        "\n{} Disc processed without errors",
        style("Success:").green().bold()
    );
    println!("  {} {} ({})", style("Image:").dim(), image.display(), size);
    if let Some(checksums) = &outcome.checksums {
        println!(
            "  {} {} ({} file(s))",
            style("Checksums:").dim(),
            request.checksum_path().display(),
            checksums.manifest.len()
        );
    }
    println!(
        "  {} {}",
        style("Metadata:").dim(),
        request.metadata_path().display()
    );
    if let Some(metadata) = &outcome.metadata {
        if !metadata.identifier.is_empty() {
            println!("  {} {}", style("Identifier:").dim(), metadata.identifier);
        }
        println!(
            "  {} {} - {}",
            style("Acquired:").dim(),
            metadata.acquisition_start,
            metadata.acquisition_end
        );
    }
    println!("  {} {}", style("Log:").dim(), request.log_path().display());
}
