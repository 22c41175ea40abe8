//! Host probes used by preflight checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::transfer::BoxFuture;

/// Timeout of the connectivity probe.
const ONLINE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a lifecycle operation asks the host before touching files.
pub trait HostEnvironment: Send + Sync {
    /// Whether the release channel is reachable.
    fn is_online(&self) -> BoxFuture<'_, bool>;

    /// Free bytes on the filesystem holding `path`.
    fn available_space(&self, path: &Path) -> std::io::Result<u64>;

    fn is_game_running(&self) -> bool;

    /// Ask whether a running game may be closed.
    fn confirm_close_game(&self) -> bool;

    fn close_game(&self) -> std::io::Result<()>;

    /// Subset of `paths` currently held open exclusively by another process.
    fn locked_files(&self, paths: &[PathBuf]) -> Vec<PathBuf>;
}

/// Probes backed by the operating system.
#[derive(Debug, Clone, Default)]
pub struct SystemEnvironment {
    probe_host: Option<String>,
    executable: Option<String>,
}

impl SystemEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host resolved to decide whether we are online.
    pub fn with_probe_host(mut self, host: impl Into<String>) -> Self {
        self.probe_host = Some(host.into());
        self
    }

    /// Process name of the game executable.
    pub fn with_executable(mut self, name: impl Into<String>) -> Self {
        self.executable = Some(name.into());
        self
    }

    #[cfg(target_os = "linux")]
    fn game_pids(&self) -> Vec<i32> {
        let Some(executable) = &self.executable else {
            return Vec::new();
        };
        // /proc/<pid>/comm is truncated to 15 bytes
        let wanted: String = executable.chars().take(15).collect();

        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let pid: i32 = entry.file_name().to_str()?.parse().ok()?;
                let comm = std::fs::read_to_string(entry.path().join("comm")).ok()?;
                (comm.trim_end() == wanted).then_some(pid)
            })
            .collect()
    }

    #[cfg(not(target_os = "linux"))]
    fn game_pids(&self) -> Vec<i32> {
        Vec::new()
    }
}

impl HostEnvironment for SystemEnvironment {
    fn is_online(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Some(host) = &self.probe_host else {
                return true;
            };
            let lookup = tokio::net::lookup_host((host.as_str(), 443));
            match tokio::time::timeout(ONLINE_PROBE_TIMEOUT, lookup).await {
                Ok(Ok(mut addrs)) => addrs.next().is_some(),
                Ok(Err(e)) => {
                    debug!(host = %host, error = %e, "Connectivity probe failed");
                    false
                }
                Err(_) => {
                    debug!(host = %host, "Connectivity probe timed out");
                    false
                }
            }
        })
    }

    fn available_space(&self, path: &Path) -> std::io::Result<u64> {
        // The install root may not exist yet; measure its nearest ancestor
        let mut probe = path;
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent,
                None => break,
            }
        }
        free_space(probe)
    }

    fn is_game_running(&self) -> bool {
        !self.game_pids().is_empty()
    }

    fn confirm_close_game(&self) -> bool {
        false
    }

    fn close_game(&self) -> std::io::Result<()> {
        terminate(&self.game_pids())
    }

    fn locked_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        paths
            .iter()
            .filter(|path| {
                match std::fs::OpenOptions::new().read(true).write(true).open(path) {
                    Ok(_) => false,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "File is locked");
                        true
                    }
                }
            })
            .cloned()
            .collect()
    }
}

#[cfg(unix)]
fn free_space(path: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };

    // SAFETY: c_path is a valid NUL-terminated string and stat is a valid out pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> std::io::Result<u64> {
    Ok(u64::MAX)
}

#[cfg(unix)]
fn terminate(pids: &[i32]) -> std::io::Result<()> {
    for &pid in pids {
        // SAFETY: kill has no memory-safety preconditions.
        if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(pids: &[i32]) -> std::io::Result<()> {
    if pids.is_empty() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "closing the game is not supported on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_no_probe_host_is_online() {
        assert!(SystemEnvironment::new().is_online().await);
    }

    #[test]
    fn test_available_space_of_missing_dir_uses_ancestor() {
        let temp = TempDir::new().unwrap();
        let env = SystemEnvironment::new();
        let space = env
            .available_space(&temp.path().join("not/yet/created"))
            .unwrap();
        assert!(space > 0);
    }

    #[test]
    fn test_unlocked_files() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.pak");
        std::fs::write(&file, b"x").unwrap();

        let env = SystemEnvironment::new();
        assert!(env.locked_files(&[file, temp.path().join("missing")]).is_empty());
    }

    #[test]
    fn test_no_executable_means_not_running() {
        let env = SystemEnvironment::new();
        assert!(!env.is_game_running());
        assert!(env.close_game().is_ok());
    }
}
