// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Free-space monitoring for the write path.
//!
//! The guard probes the filesystem holding the bag at most once per
//! 20 seconds. Below 1 GiB free it disables writing; below 5 GiB it warns;
//! otherwise it (re-)enables writing. While disabled, dropped-message
//! warnings are throttled to one per 5 seconds.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::{BagError, Result};

/// Disable writing below this much free space.
const MIN_FREE_SPACE: u64 = 1 << 30;
/// Warn below this much free space.
const LOW_FREE_SPACE: u64 = 5 << 30;
/// Minimum interval between probes.
const CHECK_INTERVAL: Duration = Duration::from_secs(20);
/// Minimum interval between dropped-message warnings.
const WARN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Clock {
    check_next: Instant,
    warn_next: Instant,
}

/// Periodic free-space probe guarding the write path.
#[derive(Debug)]
pub struct DiskGuard {
    path: PathBuf,
    enabled: AtomicBool,
    clock: Mutex<Clock>,
}

impl DiskGuard {
    /// Create a guard for the filesystem holding `path`.
    ///
    /// Writing starts enabled; call [`DiskGuard::check_disk`] for an
    /// immediate probe.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let now = Instant::now();
        DiskGuard {
            path: path.as_ref().to_path_buf(),
            enabled: AtomicBool::new(true),
            clock: Mutex::new(Clock {
                check_next: now + CHECK_INTERVAL,
                warn_next: now,
            }),
        }
    }

    /// Whether writing is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Probe at most once per 20 seconds; otherwise a no-op.
    pub fn scheduled_check(&self) {
        {
            let mut clock = lock(&self.clock);
            let now = Instant::now();
            if now < clock.check_next {
                return;
            }
            clock.check_next = now + CHECK_INTERVAL;
        }
        self.check_disk();
    }

    /// Probe free space now and update the write-enabled flag.
    pub fn check_disk(&self) {
        let free = match free_space(&self.path) {
            Ok(free) => free,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "failed to check filesystem stats");
                return;
            }
        };

        if free < MIN_FREE_SPACE {
            tracing::error!(
                path = %self.path.display(),
                free_bytes = free,
                "less than 1GB of space free on disk, disabling logging"
            );
            self.enabled.store(false, Ordering::Relaxed);
        } else if free < LOW_FREE_SPACE {
            tracing::warn!(
                path = %self.path.display(),
                free_bytes = free,
                "less than 5GB of space free on disk"
            );
            self.enabled.store(true, Ordering::Relaxed);
        } else {
            self.enabled.store(true, Ordering::Relaxed);
        }
    }

    /// Fail with [`BagError::DiskFull`] when writing is disabled.
    pub fn require_space(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(BagError::disk_full(self.path.display().to_string()))
        }
    }

    /// Warn that a message was dropped, at most once per 5 seconds.
    pub fn warn_dropped(&self) {
        let mut clock = lock(&self.clock);
        let now = Instant::now();
        if now >= clock.warn_next {
            clock.warn_next = now + WARN_INTERVAL;
            tracing::warn!(
                path = %self.path.display(),
                "not logging message because logging is disabled, most likely cause is a full disk"
            );
        }
    }
}

fn lock(clock: &Mutex<Clock>) -> std::sync::MutexGuard<'_, Clock> {
    clock.lock().unwrap_or_else(|e| e.into_inner())
}

/// Free bytes available on the filesystem holding `path`.
#[cfg(unix)]
pub fn free_space(path: &Path) -> Result<u64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| BagError::io("free_space", e))?;

    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if rc != 0 {
        return Err(BagError::io("free_space", std::io::Error::last_os_error()));
    }

    Ok(stats.f_bsize as u64 * stats.f_bavail as u64)
}

/// Free bytes available on the filesystem holding `path`.
///
/// No probe is available on this platform; writing stays enabled.
#[cfg(not(unix))]
pub fn free_space(_path: &Path) -> Result<u64> {
    Ok(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_free_space_probe() {
        let dir = TempDir::new().unwrap();
        let free = free_space(dir.path()).unwrap();
        assert!(free > 0);
    }

    #[test]
    fn test_guard_starts_enabled() {
        let dir = TempDir::new().unwrap();
        let guard = DiskGuard::new(dir.path());
        assert!(guard.is_enabled());
        assert!(guard.require_space().is_ok());
    }

    #[test]
    fn test_check_disk_with_room() {
        let dir = TempDir::new().unwrap();
        let guard = DiskGuard::new(dir.path());
        guard.check_disk();
        // Probe may warn on a nearly-full test machine but only disables
        // below the 1 GiB hard threshold.
        if free_space(dir.path()).unwrap() >= MIN_FREE_SPACE {
            assert!(guard.is_enabled());
        }
    }

    #[test]
    fn test_scheduled_check_is_throttled() {
        let dir = TempDir::new().unwrap();
        let guard = DiskGuard::new(dir.path());
        let next_before = lock(&guard.clock).check_next;
        guard.scheduled_check();
        // Inside the 20s window the probe does not run again
        assert_eq!(lock(&guard.clock).check_next, next_before);
    }

    #[test]
    fn test_require_space_when_disabled() {
        let dir = TempDir::new().unwrap();
        let guard = DiskGuard::new(dir.path());
        guard.enabled.store(false, Ordering::Relaxed);
        let err = guard.require_space().unwrap_err();
        assert!(matches!(err, BagError::DiskFull { .. }));
        guard.warn_dropped();
    }
}
