//! Fallback for platforms without optical imaging support
//!
//! readom and ddrescue are Linux tools; elsewhere every device check fails
//! so validation refuses to start a run.

use crate::{PlatformOps, Result};
use std::path::Path;
use std::process::Child;
use std::time::Duration;

/// Platform without block device support
pub struct FallbackPlatform;

impl PlatformOps for FallbackPlatform {
    fn is_block_device(_path: &Path) -> bool {
        false
    }

    fn is_writable_dir(path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|m| m.is_dir() && !m.permissions().readonly())
            .unwrap_or(false)
    }

    fn terminate_child(child: &mut Child, _grace: Duration) -> Result<()> {
        if child.try_wait()?.is_none() {
            child.kill()?;
        }
        Ok(())
    }
}
