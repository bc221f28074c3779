//! Service marker: a PID file that hints whether the service is running.
//!
//! The marker is advisory. It is a liveness hint for status queries, not a
//! lock: two services started back to back both run, and the later write
//! wins. Every I/O failure is logged and swallowed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ServiceMarker {
    path: PathBuf,
}

impl ServiceMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the current process as the running service, superseding any
    /// existing marker.
    pub fn record_start(&self) {
        let pid = std::process::id();
        match self.write_pid(pid) {
            Ok(()) => info!("Service marker written to {} (PID {pid})", self.path.display()),
            Err(e) => warn!("Failed to write service marker {}: {e}", self.path.display()),
        }
    }

    /// Write `pid` through a sibling temp file and a rename, so readers see
    /// either the old value or the new one.
    pub(crate) fn write_pid(&self, pid: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(format!(".{pid}.tmp"));
        let tmp = self.path.with_file_name(tmp_name);

        fs::write(&tmp, pid.to_string())?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }

    /// Remove the marker. A missing marker is not an error.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Service marker removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove service marker {}: {e}", self.path.display()),
        }
    }

    /// PID recorded in the marker, if the marker exists and parses.
    pub fn read_pid(&self) -> Option<u32> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Unreadable service marker {}: {e}", self.path.display());
                }
                return None;
            }
        };

        match contents.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Some(pid),
            _ => {
                debug!("Ignoring malformed service marker {}", self.path.display());
                None
            }
        }
    }

    /// PID of the running service, or `None` when the marker is absent,
    /// unreadable or names a process that no longer exists.
    pub fn running_pid(&self) -> Option<u32> {
        self.read_pid().filter(|&pid| is_process_alive(pid))
    }

    /// Record the start and return a guard that clears the marker when
    /// dropped. Hold it for the lifetime of the service.
    #[must_use = "the marker is cleared as soon as the guard is dropped"]
    pub fn register_cleanup_on_exit(&self) -> MarkerGuard {
        self.record_start();
        MarkerGuard {
            marker: self.clone(),
        }
    }
}

/// Clears the service marker on drop, including during panic unwinding.
#[derive(Debug)]
pub struct MarkerGuard {
    marker: ServiceMarker,
}

impl MarkerGuard {
    pub fn marker(&self) -> &ServiceMarker {
        &self.marker
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        self.marker.clear();
    }
}

#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// No cheap portable probe; trust the marker.
#[cfg(not(target_os = "linux"))]
fn is_process_alive(_pid: u32) -> bool {
    true
}
