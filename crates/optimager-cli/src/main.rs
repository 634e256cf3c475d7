//! Optimager - supervised imaging of optical discs
//!
//! # Usage
//!
//! ```bash
//! # Create a configuration file
//! optimager config --init
//!
//! # Image a disc with readom
//! optimager image --out-dir /srv/discs/kb-0042 --identifier kb-0042
//!
//! # Image a damaged disc with ddrescue in direct disc mode
//! optimager image --out-dir /srv/discs/kb-0043 --tool ddrescue --direct-disc-mode --uuid
//!
//! # Re-check an acquisition later
//! optimager verify /srv/discs/kb-0042
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use clap_mangen::Man;
use console::style;
use optimager_core::{channel_layer, file_layer, CancellationToken, ImagingTool, RunLogFile};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

mod commands;
mod progress;

/// Optimager - image optical discs with readom or ddrescue
#[derive(Parser)]
#[command(name = "optimager")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Hide the live log while imaging
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Suppress ALL output (implies --quiet and --yes)
    #[arg(long, global = true)]
    silent: bool,

    /// Configuration file to use instead of the standard locations
    #[arg(long, global = true, value_name = "PATH", env = "OPTIMAGER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Imaging tool selectable on the command line
#[derive(Clone, Copy, Debug, ValueEnum)]
enum ToolArg {
    /// Fast read; gives up on damaged media
    Readom,
    /// Slow, resumable rescue of damaged media
    Ddrescue,
}

impl From<ToolArg> for ImagingTool {
    fn from(arg: ToolArg) -> Self {
        match arg {
            ToolArg::Readom => ImagingTool::ReadCommand,
            ToolArg::Ddrescue => ImagingTool::RescueCommand,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Image a disc, then write checksums and metadata
    Image {
        /// Optical device (default from configuration)
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// Output directory (default from configuration)
        #[arg(short, long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Imaging tool
        #[arg(short, long, value_enum, default_value = "readom")]
        tool: ToolArg,

        /// Maximum read retries
        #[arg(short, long)]
        retries: Option<u32>,

        /// Use direct disc access (ddrescue only)
        #[arg(long)]
        direct_disc_mode: bool,

        /// Image file name prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Image file extension
        #[arg(long)]
        extension: Option<String>,

        /// Identifier recorded in the metadata
        #[arg(long, conflicts_with = "uuid")]
        identifier: Option<String>,

        /// Generate a random UUID as identifier
        #[arg(long)]
        uuid: bool,

        /// Description recorded in the metadata
        #[arg(long, default_value = "")]
        description: String,

        /// Notes recorded in the metadata
        #[arg(long, default_value = "")]
        notes: String,

        /// Skip confirmation prompts (overwrite existing images without asking)
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Write a SHA-512 manifest for the images in a directory
    Checksum {
        /// Directory containing the images
        dir: PathBuf,

        /// Extension of the files to hash (default from configuration)
        #[arg(short, long)]
        extension: Option<String>,

        /// Manifest file name (default from configuration)
        #[arg(short, long)]
        manifest: Option<String>,
    },

    /// Check the images in a directory against their manifest
    Verify {
        /// Directory containing the images and manifest
        dir: PathBuf,

        /// Manifest file name (default from configuration)
        #[arg(short, long)]
        manifest: Option<String>,
    },

    /// Manage the configuration file
    Config {
        /// Create a configuration file with default values
        #[arg(long)]
        init: bool,

        /// Show the path of the configuration file
        #[arg(long)]
        path: bool,

        /// Show configuration in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate man pages
    Mangen {
        /// Output directory for man pages
        #[arg(short, long, default_value = ".")]
        out_dir: String,
    },
}

fn main() {
    // Set up panic handler for nicer error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{} {}", style("Error:").red().bold(), panic_info);
    }));

    if let Err(e) = run() {
        eprintln!("{} {}", style("Error:").red().bold(), e);

        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  {} {}", style("Caused by:").yellow(), cause);
            source = cause.source();
        }

        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // --silent implies --quiet and --yes
    let silent = cli.silent;
    let quiet = cli.quiet || silent;

    // Logging: stderr only when verbose; the run log file and the live
    // display always receive INFO and above
    let stderr_layer = cli.verbose.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::new("debug"))
    });
    let run_log = RunLogFile::new();
    let (channel, records) = channel_layer();

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer(run_log.clone()).with_filter(LevelFilter::INFO))
        .with(channel.with_filter(LevelFilter::INFO))
        .init();

    // First Ctrl+C interrupts the imaging tool, the second one exits
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        if flag.load(Ordering::SeqCst) {
            if !silent {
                eprintln!("\n{}", style("Forced exit").red().bold());
            }
            std::process::exit(130);
        }
        flag.store(true, Ordering::SeqCst);
        if !silent {
            eprintln!(
                "\n{}",
                style("Interrupting... Press Ctrl+C again to force exit").yellow()
            );
        }
    })?;

    match cli.command {
        Commands::Image {
            device,
            out_dir,
            tool,
            retries,
            direct_disc_mode,
            prefix,
            extension,
            identifier,
            uuid,
            description,
            notes,
            yes,
        } => commands::image::execute(commands::image::ImageArgs {
            device,
            out_dir,
            tool: tool.into(),
            retries,
            direct_disc_mode,
            prefix,
            extension,
            identifier,
            uuid,
            description,
            notes,
            skip_confirm: yes || silent, // --silent implies --yes
            quiet: quiet || cli.verbose,
            silent,
            config_file: cli.config,
            cancel: CancellationToken::from_flag(interrupted),
            records,
            run_log,
        }),
        Commands::Checksum {
            dir,
            extension,
            manifest,
        } => commands::checksum::execute(commands::checksum::ChecksumArgs {
            dir,
            extension,
            manifest,
            silent,
            config_file: cli.config,
        }),
        Commands::Verify { dir, manifest } => {
            commands::verify::execute(&dir, manifest, cli.config, silent)
        }
        Commands::Config { init, path, json } => {
            commands::config::execute(commands::config::ConfigArgs {
                init,
                path,
                json,
                silent,
                config_file: cli.config,
            })
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
        Commands::Mangen { out_dir } => {
            let cmd = Cli::command();
            let out_path = std::path::Path::new(&out_dir);
            std::fs::create_dir_all(out_path)?;

            let man = Man::new(cmd.clone());
            let mut buffer = Vec::new();
            man.render(&mut buffer)?;
            std::fs::write(out_path.join("optimager.1"), buffer)?;
            if !silent {
                println!("Generated: {}/optimager.1", out_dir);
            }

            for subcommand in cmd.get_subcommands() {
                let name = subcommand.get_name();
                if subcommand.is_hide_set()
                    || name == "completions"
                    || name == "mangen"
                    || name == "help"
                {
                    continue;
                }

                let man = Man::new(subcommand.clone());
                let mut buffer = Vec::new();
                man.render(&mut buffer)?;
                let filename = format!("optimager-{}.1", name);
                std::fs::write(out_path.join(&filename), buffer)?;
                if !silent {
                    println!("Generated: {}/{}", out_dir, filename);
                }
            }

            if !silent {
                println!(
                    "\nInstall with: sudo cp {}/*.1 /usr/local/share/man/man1/",
                    out_dir
                );
            }
            Ok(())
        }
    }
}
