//! Disc acquisition pipeline
//!
//! A run moves through these phases:
//!
//! ```text
//! Idle -> Validating -> Unmounting -> Imaging -> Checksumming
//!      -> WritingMetadata -> Finished
//! ```
//!
//! If the device turns out to be inaccessible when the run starts, the run
//! jumps straight to `Finished` with `io_error` set and the output directory
//! untouched. Every other failure is recorded and the remaining phases still
//! run, so a failed or interrupted acquisition still leaves a checksum
//! manifest and a metadata record next to whatever image was produced.
//!
//! ## Example
//!
//! ```no_run
//! use optimager_core::{AcquisitionRequest, CancellationToken, Pipeline, Settings};
//!
//! let settings = Settings::load(None)?;
//! let pipeline = Pipeline::from_settings(&settings);
//! let request = AcquisitionRequest::from_settings(&settings)?.identifier("kb-0042");
//!
//! let validated = pipeline.prepare(&request)?;
//! let handle = pipeline.spawn(validated, CancellationToken::new())?;
//! let outcome = handle.wait()?;
//! println!("success: {}", outcome.success);
//! # Ok::<(), optimager_core::Error>(())
//! ```

use crate::cancel::CancellationToken;
use crate::checksum::{self, ChecksumReport};
use crate::error::{Error, Result};
use crate::metadata::{self, Metadata, TOOL_VERSION};
use crate::request::{self, AcquisitionRequest, DeviceCheck, ValidatedRequest, ValidationResult};
use crate::settings::{Settings, TimingSettings};
use crate::state::{Phase, RunState};
use crate::tools::{self, ToolCommands, ToolOutcome, ToolResult};
use optimager_platform::{ProcessRunner, StreamOptions, SystemRunner};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Delays used while supervising a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// Pause after launching the imaging tool before its output is read
    pub startup_delay: Duration,
    /// Pause before `finished` is published
    pub finish_delay: Duration,
    /// How often observers poll the run state
    pub poll_interval: Duration,
    /// How long an interrupted tool gets to exit before it is killed
    pub termination_grace: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self::from(&TimingSettings::default())
    }
}

impl From<&TimingSettings> for Tunables {
    fn from(timing: &TimingSettings) -> Self {
        Self {
            startup_delay: timing.startup_delay(),
            finish_delay: timing.finish_delay(),
            poll_interval: timing.poll_interval(),
            termination_grace: timing.termination_grace(),
        }
    }
}

impl Tunables {
    /// No delays at all, for tests and scripted runs
    pub fn immediate() -> Self {
        Self {
            startup_delay: Duration::ZERO,
            finish_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            termination_grace: Duration::from_secs(2),
        }
    }

    fn stream_options(&self) -> StreamOptions {
        StreamOptions::new()
            .startup_delay(self.startup_delay)
            .termination_grace(self.termination_grace)
    }
}

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The device was inaccessible; nothing else was attempted
    pub io_error: bool,
    /// Imaging exited 0 without error lines, was not interrupted, and both
    /// output files were written
    pub success: bool,
    /// Imaging tool result, absent after an I/O error
    pub tool: Option<ToolResult>,
    /// Checksum step result, absent after an I/O error
    pub checksums: Option<ChecksumReport>,
    /// Metadata record, absent after an I/O error
    pub metadata: Option<Metadata>,
    /// Whether the metadata file was written
    pub metadata_written: bool,
}

impl RunOutcome {
    fn io_error() -> Self {
        Self {
            io_error: true,
            success: false,
            tool: None,
            checksums: None,
            metadata: None,
            metadata_written: false,
        }
    }

    /// Whether the imaging tool reported read errors
    pub fn read_error_detected(&self) -> bool {
        self.tool.as_ref().is_some_and(|t| t.error_detected)
    }

    /// Whether imaging was interrupted
    pub fn cancelled(&self) -> bool {
        self.tool.as_ref().is_some_and(|t| t.cancelled)
    }
}

/// Runs acquisitions with a given process runner and tool set
#[derive(Clone)]
pub struct Pipeline {
    runner: Arc<dyn ProcessRunner>,
    commands: ToolCommands,
    tunables: Tunables,
    device_check: DeviceCheck,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("commands", &self.commands)
            .field("tunables", &self.tunables)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline launching real processes with default tools and delays
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemRunner::new()))
    }

    /// Pipeline using a custom process runner
    pub fn with_runner(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            commands: ToolCommands::default(),
            tunables: Tunables::default(),
            device_check: optimager_platform::is_block_device,
        }
    }

    /// Pipeline configured from settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new()
            .with_commands(ToolCommands::from(&settings.tools))
            .with_tunables(settings.tunables())
    }

    /// Set the external tool names
    pub fn with_commands(mut self, commands: ToolCommands) -> Self {
        self.commands = commands;
        self
    }

    /// Set the delays
    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }

    /// Replace the block device test used by validation and by the
    /// re-check at the start of a run
    pub fn with_device_check(mut self, device_check: DeviceCheck) -> Self {
        self.device_check = device_check;
        self
    }

    /// External tool names
    pub fn commands(&self) -> &ToolCommands {
        &self.commands
    }

    /// Delays
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Check a request against the environment (read-only)
    pub fn validate(&self, request: &AcquisitionRequest) -> ValidationResult {
        request::validate_with(request, &self.commands, self.device_check)
    }

    /// Validate and return a runnable request, or every problem found
    pub fn prepare(&self, request: &AcquisitionRequest) -> Result<ValidatedRequest> {
        self.validate(request).into_validated()
    }

    /// Run an acquisition on the current thread
    ///
    /// `state` is updated as the run progresses and `finished` is the last
    /// thing written.
    pub fn run(
        &self,
        request: &ValidatedRequest,
        state: &RunState,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        state.set_phase(Phase::Validating);

        if !(self.device_check)(&request.device) {
            tracing::error!(
                "Cannot access optical device {}",
                request.device.display()
            );
            state.set_io_error(true);
            state.mark_finished();
            return RunOutcome::io_error();
        }

        log_user_input(request);
        let acquisition_start = metadata::timestamp(&request.timezone);

        state.set_phase(Phase::Unmounting);
        tools::unmount(self.runner.as_ref(), &self.commands.umount, &request.device);

        state.set_phase(Phase::Imaging);
        let command = self.commands.command_for(request.tool);
        tools::generic(
            self.runner.as_ref(),
            &tools::version_argv(command, request.tool),
        );
        let argv = tools::imaging_argv(&self.commands, request);
        let tool_result = tools::invoke(
            self.runner.as_ref(),
            request.tool,
            &argv,
            &self.tunables.stream_options(),
            cancel,
        );
        state.set_read_error_detected(tool_result.error_detected);
        state.set_cancelled(tool_result.cancelled);
        if tool_result.cancelled {
            tracing::warn!("Imaging interrupted by user");
        }

        state.set_phase(Phase::Checksumming);
        tracing::info!("*** Creating checksum file ***");
        let checksums = checksum::compute(
            &request.output_dir,
            &request.extension,
            &request.checksum_path(),
        );

        let acquisition_end = metadata::timestamp(&request.timezone);

        state.set_phase(Phase::WritingMetadata);
        let mut success = tool_result.outcome() == ToolOutcome::Clean && checksums.wrote;

        let mut record = Metadata::for_request(request);
        record.acquisition_start = acquisition_start;
        record.acquisition_end = acquisition_end;
        record.success_flag = success;
        record.checksums = checksums.manifest.to_map();

        tracing::info!("*** Writing metadata file ***");
        let metadata_written = match record.write_to(&request.metadata_path()) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error while writing metadata file: {}", e);
                false
            }
        };
        success &= metadata_written;

        tracing::info!("Success: {}", success);
        if success {
            tracing::info!("Disc processed successfully without errors");
        } else {
            tracing::error!(
                "One or more errors occurred while processing disc, check log file for details"
            );
        }

        state.set_success(success);
        if !self.tunables.finish_delay.is_zero() {
            thread::sleep(self.tunables.finish_delay);
        }
        state.mark_finished();

        RunOutcome {
            io_error: false,
            success,
            tool: Some(tool_result),
            checksums: Some(checksums),
            metadata: Some(record),
            metadata_written,
        }
    }

    /// Run an acquisition on a background thread
    pub fn spawn(&self, request: ValidatedRequest, cancel: CancellationToken) -> Result<RunHandle> {
        let state = Arc::new(RunState::new());
        let pipeline = self.clone();
        let thread_state = Arc::clone(&state);
        let thread_cancel = cancel.clone();

        let thread = thread::Builder::new()
            .name("optimager-run".to_string())
            .spawn(move || pipeline.run(&request, &thread_state, &thread_cancel))?;

        Ok(RunHandle {
            state,
            cancel,
            thread,
        })
    }
}

fn log_user_input(request: &AcquisitionRequest) {
    tracing::info!("*** USER INPUT ***");
    tracing::info!("optimagerVersion: {}", TOOL_VERSION);
    tracing::info!("dirOut: {}", request.output_dir.display());
    tracing::info!("device: {}", request.device.display());
    tracing::info!("readCommand: {}", request.tool);
    tracing::info!("maxRetries: {}", request.retries);
    tracing::info!("prefix: {}", request.prefix);
    tracing::info!("extension: {}", request.extension);
    tracing::info!(
        "direct disc mode (ddrescue only): {}",
        request.direct_disc_mode
    );
}

/// Handle to a run executing on a background thread
#[derive(Debug)]
pub struct RunHandle {
    state: Arc<RunState>,
    cancel: CancellationToken,
    thread: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Shared run state
    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Request the imaging tool to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the run is over, including by panic
    pub fn is_finished(&self) -> bool {
        self.state.is_finished() || self.thread.is_finished()
    }

    /// Block until the run ends
    pub fn wait(self) -> Result<RunOutcome> {
        self.thread.join().map_err(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Acquisition thread panicked: {}", reason);
            Error::Internal(reason)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ImagingTool;
    use optimager_platform::{LineControl, RunResult, StreamOutcome, StreamSource};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ProcessRunner for RecordingRunner {
        fn run(&self, argv: &[String]) -> RunResult {
            self.calls.lock().unwrap().push(argv.to_vec());
            RunResult::default()
        }

        fn stream(
            &self,
            argv: &[String],
            _options: &StreamOptions,
            on_line: &mut dyn FnMut(StreamSource, &str) -> LineControl,
        ) -> StreamOutcome {
            self.calls.lock().unwrap().push(argv.to_vec());
            on_line(StreamSource::Stderr, "done");
            StreamOutcome {
                exit_status: 0,
                stopped: false,
            }
        }
    }

    #[test]
    fn test_tunables_from_timing() {
        let timing = TimingSettings {
            startup_delay_ms: 10,
            finish_delay_ms: 20,
            poll_interval_ms: 30,
            termination_grace_ms: 40,
        };
        let tunables = Tunables::from(&timing);
        assert_eq!(tunables.startup_delay, Duration::from_millis(10));
        assert_eq!(tunables.finish_delay, Duration::from_millis(20));
        assert_eq!(tunables.poll_interval, Duration::from_millis(30));
        assert_eq!(tunables.termination_grace, Duration::from_millis(40));
        assert_eq!(Tunables::default().startup_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_vanished_device_is_io_error() {
        let dir = TempDir::new().unwrap();
        let device_dir = TempDir::new().unwrap();
        let device = device_dir.path().join("sr9");
        std::fs::write(&device, b"").unwrap();

        let runner = Arc::new(RecordingRunner::default());
        let pipeline = Pipeline::with_runner(runner.clone())
            .with_commands(ToolCommands::new("sh", "sh", "sh"))
            .with_tunables(Tunables::immediate())
            .with_device_check(|path| path.exists());
        let request = AcquisitionRequest::from_settings(&Settings::default())
            .unwrap()
            .device(&device)
            .output_dir(dir.path())
            .tool(ImagingTool::ReadCommand);
        let validated = pipeline.prepare(&request).unwrap();

        // Disc tray ejected between validation and start
        std::fs::remove_file(&device).unwrap();
        let state = RunState::new();
        let outcome = pipeline.run(&validated, &state, &CancellationToken::new());

        assert!(outcome.io_error);
        assert!(!outcome.success);
        let snap = state.snapshot();
        assert!(snap.finished);
        assert!(snap.io_error);
        assert!(!snap.success);
        assert!(runner.calls.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_prepare_rejects_missing_output_dir() {
        let pipeline = Pipeline::with_runner(Arc::new(RecordingRunner::default()));
        let request = AcquisitionRequest::from_settings(&Settings::default())
            .unwrap()
            .output_dir(Path::new("/nonexistent/optimager"));

        let err = pipeline.prepare(&request).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_run_invokes_tools_in_order() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let pipeline = Pipeline::with_runner(runner.clone())
            .with_commands(ToolCommands::new("sh", "sh", "sh"))
            .with_tunables(Tunables::immediate())
            .with_device_check(|_| true);
        let request = AcquisitionRequest::from_settings(&Settings::default())
            .unwrap()
            .device("/dev/sr0")
            .output_dir(dir.path())
            .tool(ImagingTool::RescueCommand)
            .retries(2);
        let validated = pipeline.prepare(&request).unwrap();
        let state = RunState::new();

        let outcome = pipeline.run(&validated, &state, &CancellationToken::new());

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], vec!["sh", "/dev/sr0"]);
        assert_eq!(calls[1], vec!["sh", "--version"]);
        assert_eq!(calls[2][3], "-r2");
        assert!(outcome.success);
        assert!(outcome.metadata_written);
        assert!(state.is_finished());
        assert!(state.success());
        assert!(dir.path().join("metadata.json").exists());
        assert!(dir.path().join("checksums.sha512").exists());
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = RunOutcome::io_error();
        assert!(!outcome.read_error_detected());
        assert!(!outcome.cancelled());
    }

    #[test]
    fn test_spawned_panic_surfaces_as_internal_error() {
        let thread = thread::spawn(|| -> RunOutcome { panic!("boom") });
        let handle = RunHandle {
            state: Arc::new(RunState::new()),
            cancel: CancellationToken::new(),
            thread,
        };
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.state().is_finished());
        match handle.wait() {
            Err(Error::Internal(reason)) => assert_eq!(reason, "boom"),
            other => panic!("expected internal error, got {:?}", other.map(|o| o.success)),
        }
    }
}
