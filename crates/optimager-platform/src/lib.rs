//! # Optimager Platform
//!
//! Platform adapters for supervising external imaging tools and for the
//! read-only device and directory checks done before a run.
//!
//! - [`process`]: launching commands without a shell, either buffered
//!   ([`ProcessRunner::run`]) or line-streamed ([`ProcessRunner::stream`])
//! - [`PlatformOps`]: block device detection, access checks and child
//!   termination, implemented per operating system

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::Duration;
use thiserror::Error;

pub mod process;

pub use process::{
    command_line, tidy_line, LineAssembler, LineControl, ProcessRunner, RunResult,
    StreamOptions, StreamOutcome, StreamSource, SystemRunner, SIGNAL_EXIT_STATUS,
    SPAWN_FAILURE_STATUS,
};

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Signal delivery to a child process failed
    #[error("Failed to signal process {pid}: {reason}")]
    SignalFailed {
        /// Process id of the child
        pid: u32,
        /// OS error description
        reason: String,
    },
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Platform operations interface
pub trait PlatformOps {
    /// Check if a path is a block device node
    fn is_block_device(path: &Path) -> bool;

    /// Check if the current user may create files in a directory
    fn is_writable_dir(path: &Path) -> bool;

    /// Ask a child to terminate, escalating to a hard kill after `grace`
    fn terminate_child(child: &mut Child, grace: Duration) -> Result<()>;
}

/// Locate an executable on `PATH` (or verify an explicit path)
pub fn find_program(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Check whether an executable can be found
pub fn is_program_installed(name: &str) -> bool {
    find_program(name).is_some()
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::LinuxPlatform as Platform;
    } else {
        mod fallback;
        pub use fallback::FallbackPlatform as Platform;
    }
}

/// Check if a path is a block device node
pub fn is_block_device(path: &Path) -> bool {
    Platform::is_block_device(path)
}

/// Check if the current user may create files in a directory
pub fn is_writable_dir(path: &Path) -> bool {
    Platform::is_writable_dir(path)
}

/// Terminate a child process, gracefully first
pub fn terminate_child(child: &mut Child, grace: Duration) -> Result<()> {
    Platform::terminate_child(child, grace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlatformError::SignalFailed {
            pid: 42,
            reason: "No such process".to_string(),
        };
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("No such process"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let platform_err: PlatformError = io_err.into();
        assert!(matches!(platform_err, PlatformError::Io(_)));
    }

    #[test]
    fn test_find_program_missing() {
        assert!(find_program("optimager-no-such-tool-xyz").is_none());
        assert!(!is_program_installed("optimager-no-such-tool-xyz"));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_program_shell() {
        assert!(is_program_installed("sh"));
    }

    #[test]
    fn test_regular_file_is_not_block_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(!is_block_device(file.path()));
        assert!(!is_block_device(Path::new("/nonexistent/optimager/sr0")));
    }
}
