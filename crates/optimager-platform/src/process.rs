//! External command execution
//!
//! Commands are always launched from a literal argv vector, never through a
//! shell, so device paths and user-entered text cannot be interpreted as
//! shell syntax.
//!
//! Two modes are offered:
//! - [`ProcessRunner::run`] buffers stdout/stderr until the command exits
//! - [`ProcessRunner::stream`] delivers tidied output lines as they arrive,
//!   which is what long-running imaging tools need
//!
//! Launch failures never surface as errors: they produce
//! [`SPAWN_FAILURE_STATUS`] with empty output, and callers inspect the
//! status like any other exit code.

use std::fmt;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Exit status reported when a command could not be launched
pub const SPAWN_FAILURE_STATUS: i32 = -99;

/// Exit status reported when a command was ended by a signal
pub const SIGNAL_EXIT_STATUS: i32 = -1;

/// Cursor-up escape sequence some tools use to repaint progress lines
const CURSOR_UP: &str = "\x1b[A";

/// Bytes read from a pipe per chunk
const READ_CHUNK_SIZE: usize = 4096;

/// Default time given to a tool before its output is consumed
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(2);

/// Default time a stopped tool gets to exit after SIGTERM
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Output stream of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSource {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Stdout => write!(f, "stdout"),
            StreamSource::Stderr => write!(f, "stderr"),
        }
    }
}

/// Decision returned by a line handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineControl {
    /// Keep reading
    Continue,
    /// Terminate the child and stop reading
    Stop,
}

/// Result of a buffered command run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunResult {
    /// Exit status (or [`SPAWN_FAILURE_STATUS`])
    pub exit_status: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl RunResult {
    /// Result for a command that could not be launched
    pub fn spawn_failure() -> Self {
        Self {
            exit_status: SPAWN_FAILURE_STATUS,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Result of a streamed command run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Exit status (or [`SPAWN_FAILURE_STATUS`])
    pub exit_status: i32,
    /// Whether the line handler asked to stop the child
    pub stopped: bool,
}

impl StreamOutcome {
    /// Outcome for a command that could not be launched
    pub fn spawn_failure() -> Self {
        Self {
            exit_status: SPAWN_FAILURE_STATUS,
            stopped: false,
        }
    }
}

/// Timing knobs for streamed runs
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Pause after launch before output is consumed
    pub startup_delay: Duration,
    /// Time a stopped child gets to exit before it is killed
    pub termination_grace: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            startup_delay: DEFAULT_STARTUP_DELAY,
            termination_grace: DEFAULT_TERMINATION_GRACE,
        }
    }
}

impl StreamOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the startup delay
    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Set the termination grace period
    pub fn termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }
}

/// Executes external commands
pub trait ProcessRunner: Send + Sync {
    /// Run a short command to completion, buffering its output
    fn run(&self, argv: &[String]) -> RunResult;

    /// Run a command, handing each tidied output line to `on_line` as it
    /// arrives. Returning [`LineControl::Stop`] terminates the child.
    ///
    /// On Unix the child runs in its own process group, so a terminal
    /// interrupt only reaches the caller.
    fn stream(
        &self,
        argv: &[String],
        options: &StreamOptions,
        on_line: &mut dyn FnMut(StreamSource, &str) -> LineControl,
    ) -> StreamOutcome;
}

/// Render an argv vector for logs and metadata
pub fn command_line(argv: &[String]) -> String {
    argv.join(" ")
}

/// Remove line terminators and cursor-up sequences from a raw line
pub fn tidy_line(raw: &str) -> String {
    raw.replace('\n', "")
        .replace('\r', "")
        .replace(CURSOR_UP, "")
}

/// Reassembles complete lines from arbitrary byte chunks
///
/// Bytes are buffered until a `\n` arrives so multi-byte characters split
/// across reads decode correctly. Lines that are empty after tidying are
/// dropped.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completes
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            self.pending.push(byte);
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.pending);
                let line = tidy_line(&String::from_utf8_lossy(&raw));
                if !line.is_empty() {
                    lines.push(line);
                }
            }
        }
        lines
    }

    /// Flush whatever remains after the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        let line = tidy_line(&String::from_utf8_lossy(&raw));
        (!line.is_empty()).then_some(line)
    }
}

/// [`ProcessRunner`] backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new runner
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> RunResult {
        let Some((program, args)) = argv.split_first() else {
            return RunResult::spawn_failure();
        };

        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
        {
            Ok(output) => RunResult {
                exit_status: exit_code(output.status),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) => {
                tracing::debug!("Failed to launch {}: {}", program, e);
                RunResult::spawn_failure()
            }
        }
    }

    fn stream(
        &self,
        argv: &[String],
        options: &StreamOptions,
        on_line: &mut dyn FnMut(StreamSource, &str) -> LineControl,
    ) -> StreamOutcome {
        let Some((program, args)) = argv.split_first() else {
            return StreamOutcome::spawn_failure();
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Terminal Ctrl+C must not reach the tool; stopping goes through terminate_child
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!("Failed to launch {}: {}", program, e);
                return StreamOutcome::spawn_failure();
            }
        };

        if !options.startup_delay.is_zero() {
            thread::sleep(options.startup_delay);
        }

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, StreamSource::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, StreamSource::Stderr, tx.clone()));
        }
        drop(tx);

        let mut stdout_lines = LineAssembler::new();
        let mut stderr_lines = LineAssembler::new();
        let mut stopped = false;

        // Ends once both pipes reach EOF and the reader threads drop their senders
        'read: for (source, bytes) in &rx {
            let assembler = match source {
                StreamSource::Stdout => &mut stdout_lines,
                StreamSource::Stderr => &mut stderr_lines,
            };
            for line in assembler.push(&bytes) {
                if on_line(source, &line) == LineControl::Stop {
                    stopped = true;
                    break 'read;
                }
            }
        }

        if stopped {
            if let Err(e) = crate::terminate_child(&mut child, options.termination_grace) {
                tracing::warn!("Failed to terminate {}: {}", program, e);
                let _ = child.kill();
            }
            // Readers finish on their own once the pipes close
            drop(rx);
        } else {
            for (source, assembler) in [
                (StreamSource::Stdout, &mut stdout_lines),
                (StreamSource::Stderr, &mut stderr_lines),
            ] {
                if let Some(line) = assembler.finish() {
                    on_line(source, &line);
                }
            }
            for reader in readers {
                let _ = reader.join();
            }
        }

        let exit_status = match child.wait() {
            Ok(status) => exit_code(status),
            Err(e) => {
                tracing::warn!("Failed to wait for {}: {}", program, e);
                SIGNAL_EXIT_STATUS
            }
        };

        StreamOutcome {
            exit_status,
            stopped,
        }
    }
}

/// Forward raw chunks from a pipe to the collecting channel
fn spawn_reader<R>(
    mut pipe: R,
    source: StreamSource,
    tx: mpsc::Sender<(StreamSource, Vec<u8>)>,
) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((source, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Error reading {}: {}", source, e);
                    break;
                }
            }
        }
    })
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SIGNAL_EXIT_STATUS)
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    fn quick() -> StreamOptions {
        StreamOptions::new()
            .startup_delay(Duration::ZERO)
            .termination_grace(Duration::from_secs(2))
    }

    // -------------------------------------------------------------------------
    // Line tidying
    // -------------------------------------------------------------------------

    #[test]
    fn test_tidy_line_strips_terminators() {
        assert_eq!(tidy_line("hello\r\n"), "hello");
        assert_eq!(tidy_line("\x1b[Arescued: 100 kB\n"), "rescued: 100 kB");
        assert_eq!(tidy_line("\r\x1b[A\x1b[A\n"), "");
    }

    #[test]
    fn test_command_line_joins_with_spaces() {
        let args = argv(&["readom", "retries=4", "dev=/dev/sr0", "f=/out/disc.iso"]);
        assert_eq!(
            command_line(&args),
            "readom retries=4 dev=/dev/sr0 f=/out/disc.iso"
        );
    }

    // -------------------------------------------------------------------------
    // LineAssembler
    // -------------------------------------------------------------------------

    #[test]
    fn test_assembler_splits_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"first\nsecond\nthi");
        assert_eq!(lines, vec!["first", "second"]);
        let lines = assembler.push(b"rd\n");
        assert_eq!(lines, vec!["third"]);
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn test_assembler_skips_blank_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"\n\r\n\x1b[A\nreal\n");
        assert_eq!(lines, vec!["real"]);
    }

    #[test]
    fn test_assembler_keeps_trailing_partial_line() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"no newline").is_empty());
        assert_eq!(assembler.finish(), Some("no newline".to_string()));
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn test_assembler_multibyte_split_across_chunks() {
        let mut assembler = LineAssembler::new();
        let bytes = "schijf één\n".as_bytes();
        let (a, b) = bytes.split_at(8);
        assert!(assembler.push(a).is_empty());
        assert_eq!(assembler.push(b), vec!["schijf één"]);
    }

    // -------------------------------------------------------------------------
    // SystemRunner
    // -------------------------------------------------------------------------

    #[test]
    fn test_run_captures_output() {
        let result = SystemRunner.run(&argv(&["sh", "-c", "echo out; echo err >&2"]));
        assert!(result.success());
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[test]
    fn test_run_reports_exit_status() {
        let result = SystemRunner.run(&argv(&["sh", "-c", "exit 3"]));
        assert_eq!(result.exit_status, 3);
        assert!(!result.success());
    }

    #[test]
    fn test_run_missing_binary() {
        let result = SystemRunner.run(&argv(&["/nonexistent/optimager-tool"]));
        assert_eq!(result, RunResult::spawn_failure());
    }

    #[test]
    fn test_run_empty_argv() {
        assert_eq!(SystemRunner.run(&[]).exit_status, SPAWN_FAILURE_STATUS);
    }

    #[test]
    fn test_arguments_are_not_shell_interpreted() {
        let result = SystemRunner.run(&argv(&["echo", "$(id); rm -rf /"]));
        assert_eq!(result.stdout, "$(id); rm -rf /\n");
    }

    #[test]
    fn test_stream_delivers_both_streams() {
        let mut seen = Vec::new();
        let outcome = SystemRunner.stream(
            &argv(&["sh", "-c", "echo one; echo two >&2; printf 'tail'"]),
            &quick(),
            &mut |source, line| {
                seen.push((source, line.to_string()));
                LineControl::Continue
            },
        );

        assert_eq!(outcome.exit_status, 0);
        assert!(!outcome.stopped);
        assert!(seen.contains(&(StreamSource::Stdout, "one".to_string())));
        assert!(seen.contains(&(StreamSource::Stderr, "two".to_string())));
        assert!(seen.contains(&(StreamSource::Stdout, "tail".to_string())));
    }

    #[test]
    fn test_stream_strips_progress_escapes() {
        let mut seen = Vec::new();
        SystemRunner.stream(
            &argv(&["sh", "-c", "printf 'pct 10\\r\\n\\033[Apct 20\\n'"]),
            &quick(),
            &mut |_, line| {
                seen.push(line.to_string());
                LineControl::Continue
            },
        );
        assert_eq!(seen, vec!["pct 10", "pct 20"]);
    }

    #[test]
    fn test_stream_exit_status() {
        let outcome = SystemRunner.stream(
            &argv(&["sh", "-c", "echo done; exit 7"]),
            &quick(),
            &mut |_, _| LineControl::Continue,
        );
        assert_eq!(outcome.exit_status, 7);
    }

    #[test]
    fn test_stream_missing_binary() {
        let mut calls = 0;
        let outcome = SystemRunner.stream(
            &argv(&["/nonexistent/optimager-tool"]),
            &quick(),
            &mut |_, _| {
                calls += 1;
                LineControl::Continue
            },
        );
        assert_eq!(outcome, StreamOutcome::spawn_failure());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_stream_stop_terminates_child() {
        let mut lines = 0;
        let outcome = SystemRunner.stream(
            &argv(&["sh", "-c", "while true; do echo tick; sleep 0.05; done"]),
            &quick(),
            &mut |_, _| {
                lines += 1;
                if lines >= 3 {
                    LineControl::Stop
                } else {
                    LineControl::Continue
                }
            },
        );

        assert!(outcome.stopped);
        assert_ne!(outcome.exit_status, 0);
        assert_eq!(lines, 3);
    }
}
