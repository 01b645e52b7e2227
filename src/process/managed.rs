//! A spawned child process with continuously drained output pipes.
//!
//! ## Output Buffers
//!
//! stdout and stderr are read into buffers owned by the [`ManagedProcess`]
//! using cancel-safe reads. A wait that times out therefore never loses
//! output: whatever was read before the deadline stays buffered and is
//! reported in the timeout error, and the next wait continues from there.
//!
//! ## Lifecycle
//!
//! ```text
//!   spawn ──▶ Running ──(exit observed)──▶ Exited
//!               │                            ▲
//!               └──(kill / drop)─────────────┘
//! ```
//!
//! The child handle is reaped and released the moment its exit is
//! observed. Later waits return the captured output without error.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use super::context::ExecContext;
use super::signal::{self, Signal};
use crate::constants::COMMAND_TIMEOUT;
use crate::error::{Error, Result};

/// How long to keep reading pipes after the child exited.
///
/// Grandchildren may inherit the pipes and keep them open indefinitely.
const PIPE_CLOSE_GRACE: Duration = Duration::from_millis(200);

/// Output of an exited process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
    /// Everything written to stdout.
    pub stdout: String,
    /// Everything written to stderr.
    pub stderr: String,
}

impl ProcessOutput {
    /// Returns true for a zero exit code.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Child process in its own process group with piped stdio.
pub struct ManagedProcess {
    command: Vec<String>,
    namespace: Option<String>,
    pid: Option<u32>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stdout_buf: Vec<u8>,
    stderr_buf: Vec<u8>,
    status: Option<ExitStatus>,
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("command", &self.command)
            .field("namespace", &self.namespace)
            .field("pid", &self.pid)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl ManagedProcess {
    /// Spawns `argv` under `ctx`. Returns as soon as the child exists.
    pub fn spawn(ctx: &ExecContext, argv: &[String]) -> Result<Self> {
        let mut cmd = ctx.command(argv)?;
        let command = ctx.wrap(argv);

        let mut child = cmd.spawn().map_err(|e| Error::SpawnFailed {
            command: command.join(" "),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        debug!(
            pid = ?pid,
            namespace = ?ctx.namespace(),
            "spawned {}",
            command.join(" ")
        );

        Ok(Self {
            command,
            namespace: ctx.namespace().map(str::to_string),
            pid,
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child: Some(child),
            stdout_buf: Vec::new(),
            stderr_buf: Vec::new(),
            status: None,
        })
    }

    /// Full argument vector, including namespace and user wrapping.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Command line as a single string.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Namespace the process runs in.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Process id (also the process group id).
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit code once the process has exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// Returns true once exit has been observed.
    pub fn has_exited(&self) -> bool {
        self.status.is_some()
    }

    /// stdout captured so far.
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout_buf).into_owned()
    }

    /// stderr captured so far.
    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr_buf).into_owned()
    }

    /// Checks for exit without blocking.
    pub fn try_wait(&mut self) -> Result<bool> {
        if self.status.is_some() {
            return Ok(true);
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(true);
        };
        match child.try_wait()? {
            Some(status) => {
                self.record_exit(status);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Waits for exit for at most `timeout`, reading output meanwhile.
    ///
    /// Once the process has exited, returns the full captured output; calling
    /// again returns the same output. If the deadline passes first, fails
    /// with [`Error::ProcessTimeout`] carrying the output read so far. The
    /// process is left running in that case.
    pub async fn communicate(&mut self, timeout: Duration) -> Result<ProcessOutput> {
        // Close stdin so children reading it see EOF.
        self.stdin.take();

        if self.status.is_none() {
            let waited = tokio::time::timeout(timeout, self.pump_until_exit()).await;
            match waited {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::ProcessTimeout {
                        command: self.command_line(),
                        timeout,
                        stdout: self.stdout(),
                        stderr: self.stderr(),
                    });
                }
            }
        }

        self.finish_pipes().await?;
        Ok(self.output())
    }

    /// Reads whatever output arrives within `window`.
    ///
    /// Never fails on timeout. Returns true if the process has exited.
    pub async fn drain(&mut self, window: Duration) -> Result<bool> {
        if self.status.is_none() {
            let waited = tokio::time::timeout(window, self.pump_until_exit()).await;
            match waited {
                Ok(result) => result?,
                Err(_) => return Ok(false),
            }
        }
        self.finish_pipes().await?;
        Ok(true)
    }

    /// Sends `signal` to the process, or to its whole process group.
    ///
    /// A process that has already exited is treated as stopped.
    pub fn stop_with_signal(&mut self, signal: Signal, group: bool) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };

        if signal::send(pid, signal, group)? {
            debug!(pid, group, "sent {signal}");
        } else {
            debug!(pid, "process already gone, {signal} not sent");
        }
        Ok(())
    }

    /// SIGKILLs the process group and reaps the child.
    pub async fn kill(&mut self) -> Result<ProcessOutput> {
        self.stop_with_signal(Signal::Kill, true)?;
        self.communicate(COMMAND_TIMEOUT).await
    }

    fn output(&self) -> ProcessOutput {
        ProcessOutput {
            exit_code: self.status.and_then(|s| s.code()),
            signal: self.status.and_then(|s| s.signal()),
            stdout: self.stdout(),
            stderr: self.stderr(),
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        debug!(pid = ?self.pid, status = %status, "process exited");
        self.status = Some(status);
        // Reaped; the handle is released here and nowhere else.
        self.child = None;
    }

    /// Pumps both pipes until the child exits. Cancel safe.
    async fn pump_until_exit(&mut self) -> Result<()> {
        while self.status.is_none() {
            let Self {
                child,
                stdout,
                stderr,
                stdout_buf,
                stderr_buf,
                ..
            } = self;

            let exited = tokio::select! {
                n = read_pipe(stdout, stdout_buf) => {
                    if n? == 0 {
                        *stdout = None;
                    }
                    None
                }
                n = read_pipe(stderr, stderr_buf) => {
                    if n? == 0 {
                        *stderr = None;
                    }
                    None
                }
                status = wait_child(child) => Some(status?),
            };

            if let Some(status) = exited {
                self.record_exit(status);
            }
        }
        Ok(())
    }

    /// Reads the pipes of an exited child to EOF, bounded by a short grace.
    async fn finish_pipes(&mut self) -> Result<()> {
        let read_all = async {
            if let Some(out) = self.stdout.as_mut() {
                out.read_to_end(&mut self.stdout_buf).await?;
            }
            if let Some(err) = self.stderr.as_mut() {
                err.read_to_end(&mut self.stderr_buf).await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let finished = tokio::time::timeout(PIPE_CLOSE_GRACE, read_all).await;
        match finished {
            Ok(result) => result?,
            Err(_) => debug!(pid = ?self.pid, "pipes still held open after exit"),
        }
        self.stdout = None;
        self.stderr = None;
        Ok(())
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.status.is_some() {
            return;
        }
        if let Some(pid) = self.pid {
            match signal::send(pid, Signal::Kill, true) {
                Ok(true) => warn!(pid, "killed process group of dropped live process"),
                Ok(false) => {}
                Err(e) => warn!(pid, error = %e, "failed to kill dropped process"),
            }
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: &mut Option<R>, buf: &mut Vec<u8>) -> Result<usize> {
    match pipe {
        Some(p) => Ok(p.read_buf(buf).await?),
        None => std::future::pending().await,
    }
}

async fn wait_child(child: &mut Option<Child>) -> Result<ExitStatus> {
    match child {
        Some(c) => Ok(c.wait().await?),
        None => std::future::pending().await,
    }
}
