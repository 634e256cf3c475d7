//! Observable state of an acquisition run
//!
//! A [`RunState`] is shared between the pipeline thread, which is its only
//! writer, and any number of observers that poll it. Every field is an
//! atomic written with `Release` and read with `Acquire`, so an observer that
//! sees `finished == true` also sees the final values of the other flags.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Step of the acquisition state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Not started
    Idle = 0,
    /// Checking the request against the environment
    Validating = 1,
    /// Unmounting the device
    Unmounting = 2,
    /// External imaging tool running
    Imaging = 3,
    /// Hashing output files
    Checksumming = 4,
    /// Writing the metadata record
    WritingMetadata = 5,
    /// Run complete
    Finished = 6,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Validating,
            2 => Phase::Unmounting,
            3 => Phase::Imaging,
            4 => Phase::Checksumming,
            5 => Phase::WritingMetadata,
            6 => Phase::Finished,
            _ => Phase::Idle,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Validating => write!(f, "Validating"),
            Phase::Unmounting => write!(f, "Unmounting"),
            Phase::Imaging => write!(f, "Imaging"),
            Phase::Checksumming => write!(f, "Calculating checksums"),
            Phase::WritingMetadata => write!(f, "Writing metadata"),
            Phase::Finished => write!(f, "Finished"),
        }
    }
}

/// Flags describing a run, safe to read from any thread
#[derive(Debug, Default)]
pub struct RunState {
    phase: AtomicU8,
    finished: AtomicBool,
    io_error: AtomicBool,
    success: AtomicBool,
    read_error_detected: AtomicBool,
    cancelled: AtomicBool,
}

/// Point-in-time copy of a [`RunState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSnapshot {
    /// Current phase
    pub phase: Phase,
    /// Run has ended
    pub finished: bool,
    /// Device was not accessible; nothing was attempted
    pub io_error: bool,
    /// Every step succeeded
    pub success: bool,
    /// The imaging tool reported errors in its output
    pub read_error_detected: bool,
    /// Imaging was interrupted
    pub cancelled: bool,
}

impl RunState {
    /// Fresh state for a new run
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Whether the run has ended
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Whether the device was inaccessible
    pub fn io_error(&self) -> bool {
        self.io_error.load(Ordering::Acquire)
    }

    /// Whether the run succeeded (meaningful once finished)
    pub fn success(&self) -> bool {
        self.success.load(Ordering::Acquire)
    }

    /// Whether the imaging tool reported read errors
    pub fn read_error_detected(&self) -> bool {
        self.read_error_detected.load(Ordering::Acquire)
    }

    /// Whether imaging was interrupted
    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Copy all flags at once
    pub fn snapshot(&self) -> RunSnapshot {
        // finished first: once it reads true every other flag is final
        let finished = self.is_finished();
        RunSnapshot {
            phase: self.phase(),
            finished,
            io_error: self.io_error(),
            success: self.success(),
            read_error_detected: self.read_error_detected(),
            cancelled: self.cancelled(),
        }
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        tracing::debug!("Entering phase: {}", phase);
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn set_io_error(&self, value: bool) {
        self.io_error.store(value, Ordering::Release);
    }

    pub(crate) fn set_success(&self, value: bool) {
        self.success.store(value, Ordering::Release);
    }

    pub(crate) fn set_read_error_detected(&self, value: bool) {
        self.read_error_detected.store(value, Ordering::Release);
    }

    pub(crate) fn set_cancelled(&self, value: bool) {
        self.cancelled.store(value, Ordering::Release);
    }

    /// Publish the end of the run. Must be the last write.
    pub(crate) fn mark_finished(&self) {
        self.phase.store(Phase::Finished as u8, Ordering::Release);
        self.finished.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_state_is_clear() {
        let state = RunState::new();
        let snap = state.snapshot();
        assert_eq!(snap.phase, Phase::Idle);
        assert!(!snap.finished);
        assert!(!snap.io_error);
        assert!(!snap.success);
        assert!(!snap.read_error_detected);
        assert!(!snap.cancelled);
    }

    #[test]
    fn test_phase_roundtrip() {
        let state = RunState::new();
        for phase in [
            Phase::Validating,
            Phase::Unmounting,
            Phase::Imaging,
            Phase::Checksumming,
            Phase::WritingMetadata,
        ] {
            state.set_phase(phase);
            assert_eq!(state.phase(), phase);
        }
    }

    #[test]
    fn test_mark_finished() {
        let state = RunState::new();
        state.set_success(true);
        state.mark_finished();
        assert!(state.is_finished());
        assert_eq!(state.phase(), Phase::Finished);
        assert!(state.success());
    }

    #[test]
    fn test_flags_visible_across_threads() {
        let state = Arc::new(RunState::new());
        let writer = Arc::clone(&state);

        std::thread::spawn(move || {
            writer.set_read_error_detected(true);
            writer.set_cancelled(true);
            writer.mark_finished();
        })
        .join()
        .unwrap();

        let snap = state.snapshot();
        assert!(snap.finished);
        assert!(snap.read_error_detected);
        assert!(snap.cancelled);
        assert!(!snap.success);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Imaging.to_string(), "Imaging");
        assert_eq!(Phase::Checksumming.to_string(), "Calculating checksums");
    }
}
