//! Wrappers around the external programs used during acquisition
//!
//! Each wrapper builds an argv, runs it through a [`ProcessRunner`] and logs
//! what happened. The streaming wrappers forward every output line to the
//! log as it arrives and watch one stream for trouble:
//!
//! | Tool     | Watched stream | Error detection                      |
//! |----------|----------------|--------------------------------------|
//! | readom   | stderr         | line contains "error" (any case)     |
//! | ddrescue | stdout         | none; only the exit status counts    |
//!
//! Lines on the other stream are logged but never classified.

use crate::cancel::CancellationToken;
use crate::request::{AcquisitionRequest, ImagingTool};
use crate::settings::ToolSettings;
use optimager_platform::{
    command_line, LineControl, ProcessRunner, RunResult, StreamOptions, StreamSource,
};
use std::path::Path;

/// Sector size passed to ddrescue
pub const OPTICAL_SECTOR_SIZE: u32 = 2048;

/// Exit status umount uses for "not mounted"
pub const UMOUNT_NOT_MOUNTED_STATUS: i32 = 1;

/// Names or paths of the external programs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommands {
    /// readom executable
    pub read: String,
    /// ddrescue executable
    pub rescue: String,
    /// umount executable
    pub umount: String,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self::from(&ToolSettings::default())
    }
}

impl From<&ToolSettings> for ToolCommands {
    fn from(settings: &ToolSettings) -> Self {
        Self::new(
            &settings.read_command,
            &settings.rescue_command,
            &settings.umount_command,
        )
    }
}

impl ToolCommands {
    /// Create from explicit command names
    pub fn new(
        read: impl Into<String>,
        rescue: impl Into<String>,
        umount: impl Into<String>,
    ) -> Self {
        Self {
            read: read.into(),
            rescue: rescue.into(),
            umount: umount.into(),
        }
    }

    /// Executable for an imaging tool
    pub fn command_for(&self, tool: ImagingTool) -> &str {
        match tool {
            ImagingTool::ReadCommand => &self.read,
            ImagingTool::RescueCommand => &self.rescue,
        }
    }
}

/// How an imaging tool run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Exit 0 and no error lines
    Clean,
    /// Exit 0 but error lines were seen
    SoftError,
    /// Nonzero exit or launch failure
    HardError,
    /// Interrupted by the operator
    Cancelled,
}

/// Result of a streamed imaging tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    /// Space-joined argv
    pub command_line: String,
    /// Exit status, -99 when it could not be launched
    pub exit_status: i32,
    /// An output line on the watched stream looked like an error
    pub error_detected: bool,
    /// The run was stopped through the cancellation token
    pub cancelled: bool,
}

impl ToolResult {
    /// Classify the run
    pub fn outcome(&self) -> ToolOutcome {
        if self.cancelled {
            ToolOutcome::Cancelled
        } else if self.exit_status != 0 {
            ToolOutcome::HardError
        } else if self.error_detected {
            ToolOutcome::SoftError
        } else {
            ToolOutcome::Clean
        }
    }
}

/// Result of the unmount step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmountResult {
    /// Space-joined argv
    pub command_line: String,
    /// Exit status
    pub exit_status: i32,
}

impl UnmountResult {
    /// Exit 0, or 1 which only means the disc was not mounted
    pub fn is_benign(&self) -> bool {
        self.exit_status == 0 || self.exit_status == UMOUNT_NOT_MOUNTED_STATUS
    }
}

/// `readom retries=<N> dev=<device> f=<image>`
pub fn readom_argv(command: &str, retries: u32, device: &Path, image: &Path) -> Vec<String> {
    vec![
        command.to_string(),
        format!("retries={}", retries),
        format!("dev={}", device.display()),
        format!("f={}", image.display()),
    ]
}

/// `ddrescue -b 2048 -r<N> -v [-d] <device> <image> <map>`
pub fn ddrescue_argv(
    command: &str,
    retries: u32,
    direct_disc_mode: bool,
    device: &Path,
    image: &Path,
    map: &Path,
) -> Vec<String> {
    let mut argv = vec![
        command.to_string(),
        "-b".to_string(),
        OPTICAL_SECTOR_SIZE.to_string(),
        format!("-r{}", retries),
        "-v".to_string(),
    ];
    if direct_disc_mode {
        argv.push("-d".to_string());
    }
    argv.push(device.display().to_string());
    argv.push(image.display().to_string());
    argv.push(map.display().to_string());
    argv
}

/// Argv for the tool selected in `request`
pub fn imaging_argv(commands: &ToolCommands, request: &AcquisitionRequest) -> Vec<String> {
    let command = commands.command_for(request.tool);
    match request.tool {
        ImagingTool::ReadCommand => readom_argv(
            command,
            request.retries,
            &request.device,
            &request.image_path(),
        ),
        ImagingTool::RescueCommand => ddrescue_argv(
            command,
            request.retries,
            request.direct_disc_mode,
            &request.device,
            &request.image_path(),
            &request.map_path(),
        ),
    }
}

/// Argv printing the tool's version banner
pub fn version_argv(command: &str, tool: ImagingTool) -> Vec<String> {
    let flag = match tool {
        ImagingTool::ReadCommand => "-version",
        ImagingTool::RescueCommand => "--version",
    };
    vec![command.to_string(), flag.to_string()]
}

/// Stream that carries a tool's diagnostics
pub fn watched_stream(tool: ImagingTool) -> StreamSource {
    match tool {
        ImagingTool::ReadCommand => StreamSource::Stderr,
        ImagingTool::RescueCommand => StreamSource::Stdout,
    }
}

/// Whether a watched line signals a read error
pub fn flags_error(tool: ImagingTool, line: &str) -> bool {
    match tool {
        ImagingTool::ReadCommand => line.to_lowercase().contains("error"),
        // ddrescue prints "errors: 0" in every status block
        ImagingTool::RescueCommand => false,
    }
}

/// Run an imaging tool, logging its output as it arrives
///
/// The cancellation token is checked before each line is handled; once set
/// the line is dropped, the child is terminated and the result is marked
/// cancelled.
pub fn invoke(
    runner: &dyn ProcessRunner,
    tool: ImagingTool,
    argv: &[String],
    options: &StreamOptions,
    cancel: &CancellationToken,
) -> ToolResult {
    let watched = watched_stream(tool);
    let mut error_detected = false;

    let outcome = runner.stream(argv, options, &mut |source, line| {
        if cancel.is_cancelled() {
            tracing::warn!("Interrupt requested, stopping {}", tool);
            return LineControl::Stop;
        }

        if source == watched && flags_error(tool, line) {
            error_detected = true;
        }
        tracing::info!("{}", line);
        LineControl::Continue
    });

    let result = ToolResult {
        command_line: command_line(argv),
        exit_status: outcome.exit_status,
        error_detected,
        cancelled: outcome.stopped,
    };

    let name = argv.first().map(String::as_str).unwrap_or_default();
    tracing::info!("Command: {}", result.command_line);
    if result.exit_status == 0 {
        tracing::info!("{} status: {}", name, result.exit_status);
    } else {
        tracing::error!("{} status: {}", name, result.exit_status);
    }
    tracing::info!("{} errorFlag: {}", name, result.error_detected);

    result
}

/// Unmount the device
///
/// Never fatal. Exit status 1 means nothing was mounted and is logged at
/// INFO like success; anything else is logged at ERROR.
pub fn unmount(runner: &dyn ProcessRunner, command: &str, device: &Path) -> UnmountResult {
    let argv = vec![command.to_string(), device.display().to_string()];
    let output = runner.run(&argv);
    let result = UnmountResult {
        command_line: command_line(&argv),
        exit_status: output.exit_status,
    };

    tracing::info!("Command: {}", result.command_line);
    if result.is_benign() {
        tracing::info!("{} status: {}", command, result.exit_status);
        tracing::info!("{} stdout: {}", command, output.stdout.trim_end());
        tracing::info!("{} stderr: {}", command, output.stderr.trim_end());
    } else {
        tracing::error!("{} status: {}", command, result.exit_status);
        tracing::error!("{} stdout: {}", command, output.stdout.trim_end());
        tracing::error!("{} stderr: {}", command, output.stderr.trim_end());
    }

    result
}

/// Run a short command that needs no output processing
pub fn generic(runner: &dyn ProcessRunner, argv: &[String]) -> RunResult {
    let output = runner.run(argv);
    let name = argv.first().map(String::as_str).unwrap_or_default();

    tracing::info!("Command: {}", command_line(argv));
    if output.success() {
        tracing::info!("{} status: {}", name, output.exit_status);
        tracing::info!("{} stdout: {}", name, output.stdout.trim_end());
        tracing::info!("{} stderr: {}", name, output.stderr.trim_end());
    } else {
        tracing::error!("{} status: {}", name, output.exit_status);
        tracing::error!("{} stdout: {}", name, output.stdout.trim_end());
        tracing::error!("{} stderr: {}", name, output.stderr.trim_end());
    }

    output
}
