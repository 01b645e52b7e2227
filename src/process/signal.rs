//! POSIX signals delivered to supervised processes.

use crate::error::{Error, Result};

/// Signal to send to a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM (graceful shutdown).
    Term,
    /// SIGKILL (force kill).
    Kill,
    /// SIGQUIT (immediate shutdown of the supervised binary).
    Quit,
}

impl Signal {
    /// Returns the signal number.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::Quit => libc::SIGQUIT,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Term => write!(f, "SIGTERM"),
            Self::Kill => write!(f, "SIGKILL"),
            Self::Quit => write!(f, "SIGQUIT"),
        }
    }
}

/// Delivers `signal` to `pid`, or to the process group led by `pid`.
///
/// Returns `Ok(false)` when the target no longer exists (ESRCH): a process
/// that is already gone counts as stopped.
pub fn send(pid: u32, signal: Signal, group: bool) -> Result<bool> {
    let target = libc::pid_t::try_from(pid).map_err(|_| Error::SignalFailed {
        pid,
        signal: signal.to_string(),
        reason: "pid out of range".to_string(),
    })?;

    // SAFETY: kill/killpg have no memory-safety preconditions; a stale pid
    // at worst yields ESRCH.
    let ret = unsafe {
        if group {
            libc::killpg(target, signal.as_i32())
        } else {
            libc::kill(target, signal.as_i32())
        }
    };

    if ret == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(Error::SignalFailed {
        pid,
        signal: signal.to_string(),
        reason: err.to_string(),
    })
}
