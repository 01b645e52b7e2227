//! Host sysctl toggle saved while a virtual LAN is alive.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;

/// Captures a sysctl value, zeroes it, and restores it later.
///
/// A missing sysctl (module not loaded, sandboxed `/proc`) is accepted and
/// left untouched.
#[derive(Debug)]
pub struct SysctlGuard {
    path: PathBuf,
    saved: Option<String>,
}

impl SysctlGuard {
    /// Saves the current value of `path` and writes `0`.
    pub fn zero(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let saved = match std::fs::read_to_string(&path) {
            Ok(value) => {
                std::fs::write(&path, "0\n")?;
                info!(
                    sysctl = %path.display(),
                    saved = %value.trim(),
                    "disabled bridge netfilter"
                );
                Some(value)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(sysctl = %path.display(), "sysctl not present, leaving as is");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, saved })
    }

    /// Value captured at creation, if the sysctl exists.
    pub fn saved(&self) -> Option<&str> {
        self.saved.as_deref()
    }

    /// Sysctl file this guard manages.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the captured value back. Calling it twice is harmless.
    pub fn restore(&mut self) -> Result<()> {
        if let Some(value) = self.saved.take() {
            std::fs::write(&self.path, &value)?;
            info!(sysctl = %self.path.display(), value = %value.trim(), "restored sysctl");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_zero_and_restore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge-nf-call-iptables");
        std::fs::write(&path, "1\n").unwrap();

        let mut guard = SysctlGuard::zero(&path).unwrap();
        assert_eq!(guard.saved(), Some("1\n"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0\n");

        guard.restore().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n");

        // second restore is a no-op
        std::fs::write(&path, "0\n").unwrap();
        guard.restore().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0\n");
    }

    #[test]
    fn test_missing_sysctl_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent");

        let mut guard = SysctlGuard::zero(&path).unwrap();
        assert!(guard.saved().is_none());
        guard.restore().unwrap();
        assert!(!path.exists());
    }
}
