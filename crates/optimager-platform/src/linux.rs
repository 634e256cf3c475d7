//! Linux platform implementation

use crate::{PlatformError, PlatformOps, Result};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::process::Child;
use std::time::{Duration, Instant};

/// How often a terminating child is polled for exit
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Linux platform implementation
pub struct LinuxPlatform;

impl PlatformOps for LinuxPlatform {
    fn is_block_device(path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|m| m.file_type().is_block_device())
            .unwrap_or(false)
    }

    fn is_writable_dir(path: &Path) -> bool {
        let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
            return false;
        };
        // SAFETY: access() only reads the NUL-terminated path we own for the
        // duration of the call.
        #[allow(unsafe_code)]
        let rc = unsafe { libc::access(c_path.as_ptr(), libc::W_OK | libc::X_OK) };
        rc == 0 && path.is_dir()
    }

    fn terminate_child(child: &mut Child, grace: Duration) -> Result<()> {
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        let pid = child.id();
        let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
            child.kill()?;
            return Ok(());
        };

        // SIGTERM lets ddrescue flush its map file before exiting
        // SAFETY: kill() with a pid we spawned and have not yet reaped.
        #[allow(unsafe_code)]
        let rc = unsafe { libc::kill(raw_pid, libc::SIGTERM) };
        if rc != 0 {
            return Err(PlatformError::SignalFailed {
                pid,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                tracing::debug!("Process {} exited after SIGTERM", pid);
                return Ok(());
            }
            std::thread::sleep(TERMINATE_POLL_INTERVAL);
        }

        tracing::warn!("Process {} ignored SIGTERM, killing", pid);
        child.kill()?;
        Ok(())
    }
}
