//! Supervisor for the control binary of one logical node.
//!
//! ## Command Line Rule
//!
//! Every subcommand of the supervised binary takes `--pgdata <dir>`. The
//! supervisor inserts it:
//!
//! - just before a `--` separator supplied by the caller (the separator is
//!   kept), so that it lands ahead of positional arguments, or
//! - at the end when the caller supplied no separator.
//!
//! ```text
//! args:  set node -- candidate-priority 5
//! built: pg_autoctl set node --pgdata <dir> -- candidate-priority 5
//! ```
//!
//! ## One-Shot vs Persistent
//!
//! A supervisor either runs one-shot commands to completion or owns one
//! persistent background run, never both. Issue one-shot commands for a node
//! with a running agent through [`ProcessSupervisor::sibling`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::context::ExecContext;
use super::managed::{ManagedProcess, ProcessOutput};
use super::signal::Signal;
use crate::constants::{COMMAND_TIMEOUT, PGDATA_FLAG, PGDATA_SEPARATOR, STOP_GRACE_PERIOD};
use crate::error::{Error, Result};

/// Result of a one-shot command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `128 + signal` when the process was killed by a signal.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true for exit code zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<ProcessOutput> for CommandOutput {
    fn from(output: ProcessOutput) -> Self {
        let exit_code = match (output.exit_code, output.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => -1,
        };
        Self {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Builds the argument vector for one invocation of `program`.
///
/// `preset` replaces the argument list entirely when given.
pub fn build_command_line(
    program: &Path,
    pgdata: &Path,
    preset: Option<&[String]>,
    args: &[&str],
) -> Vec<String> {
    let program = program.display().to_string();

    if let Some(preset) = preset {
        let mut command = vec![program];
        command.extend(preset.iter().cloned());
        return command;
    }

    let pgdata = pgdata.display().to_string();
    let mut command = Vec::with_capacity(args.len() + 3);
    command.push(program);

    let mut inserted = false;
    for arg in args {
        if *arg == PGDATA_SEPARATOR && !inserted {
            command.push(PGDATA_FLAG.to_string());
            command.push(pgdata.clone());
            inserted = true;
        }
        command.push((*arg).to_string());
    }

    if !inserted && !command.iter().any(|a| a == PGDATA_FLAG) {
        command.push(PGDATA_FLAG.to_string());
        command.push(pgdata);
    }

    command
}

/// Locates `name` on `PATH`, or checks an explicit override.
pub fn resolve_program(name: &str, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(Error::ProgramNotFound(path.display().to_string()))
        };
    }

    let path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| Error::ProgramNotFound(name.to_string()))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

/// Runs subcommands of the control binary for one node.
#[derive(Debug)]
pub struct ProcessSupervisor {
    context: ExecContext,
    program: PathBuf,
    pgdata: PathBuf,
    preset: Option<Vec<String>>,
    timeout: Duration,
    background: Option<ManagedProcess>,
}

impl ProcessSupervisor {
    /// Creates a supervisor for `program` working on `pgdata`.
    pub fn new(context: ExecContext, program: PathBuf, pgdata: PathBuf) -> Self {
        Self {
            context,
            program,
            pgdata,
            preset: None,
            timeout: COMMAND_TIMEOUT,
            background: None,
        }
    }

    /// Uses `argv` (without the program) instead of building a command
    /// line, e.g. a full `create postgres ... --run`.
    #[must_use]
    pub fn with_preset(mut self, argv: Vec<String>) -> Self {
        self.preset = Some(argv);
        self
    }

    /// Overrides the one-shot command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A fresh supervisor for the same node, without background run.
    pub fn sibling(&self) -> Self {
        Self::new(self.context.clone(), self.program.clone(), self.pgdata.clone())
            .with_timeout(self.timeout)
    }

    /// Execution context of the node.
    pub fn context(&self) -> &ExecContext {
        &self.context
    }

    /// Resolved control binary.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Working directory passed as `--pgdata`.
    pub fn pgdata(&self) -> &Path {
        &self.pgdata
    }

    /// Builds the command line for `args`.
    pub fn command_line(&self, args: &[&str]) -> Vec<String> {
        build_command_line(&self.program, &self.pgdata, self.preset.as_deref(), args)
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.background.is_some() {
            return Err(Error::SupervisorBusy(self.pgdata.display().to_string()));
        }
        Ok(())
    }

    /// Runs a one-shot command and returns its output whatever the exit code.
    ///
    /// A command still running after the timeout is killed and reaped, and
    /// reported as [`Error::CommandTimeout`] with its partial output.
    pub async fn try_execute(&self, name: &str, args: &[&str]) -> Result<CommandOutput> {
        self.ensure_idle()?;
        let argv = self.command_line(args);
        run_to_completion(&self.context, name, &argv, self.timeout).await
    }

    /// Runs a one-shot command and fails on a non-zero exit code.
    pub async fn execute(&self, name: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.try_execute(name, args).await?;
        if !output.success() {
            return Err(Error::CommandFailed {
                name: name.to_string(),
                command: self.command_line(args).join(" "),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Starts `run --pgdata <dir> <level>` (or the preset) in the background.
    pub fn run(&mut self, level: &str) -> Result<()> {
        let pgdata = self.pgdata.display().to_string();
        self.spawn_background(&["run", PGDATA_FLAG, &pgdata, level])
    }

    /// Starts an arbitrary subcommand in the background.
    pub fn spawn_background(&mut self, args: &[&str]) -> Result<()> {
        self.ensure_idle()?;
        let argv = match &self.preset {
            Some(_) => self.command_line(&[]),
            None => {
                let mut argv = vec![self.program.display().to_string()];
                argv.extend(args.iter().map(|a| (*a).to_string()));
                argv
            }
        };

        let process = ManagedProcess::spawn(&self.context, &argv)?;
        info!(
            pid = ?process.pid(),
            namespace = ?self.context.namespace(),
            "started {}",
            argv.join(" ")
        );
        self.background = Some(process);
        Ok(())
    }

    /// Returns true while a background run is supervised.
    pub fn is_running(&self) -> bool {
        self.background.as_ref().is_some_and(|p| !p.has_exited())
    }

    /// Background process, if any.
    pub fn background(&self) -> Option<&ManagedProcess> {
        self.background.as_ref()
    }

    /// Reads background output for up to `window` so its pipes never fill.
    ///
    /// Sleeps for `window` when nothing is running.
    pub async fn drain(&mut self, window: Duration) -> Result<()> {
        match self.background.as_mut() {
            Some(process) if !process.has_exited() => {
                if process.drain(window).await? {
                    warn!(
                        pid = ?process.pid(),
                        exit_code = ?process.exit_code(),
                        "background run exited"
                    );
                }
            }
            _ => tokio::time::sleep(window).await,
        }
        Ok(())
    }

    /// Output captured from the background run so far.
    pub fn background_output(&self) -> Option<(String, String)> {
        self.background
            .as_ref()
            .map(|p| (p.stdout(), p.stderr()))
    }

    /// Stops the background run with SIGQUIT to its process group.
    ///
    /// Escalates to SIGKILL after the grace period. Returns `None` when
    /// nothing was running.
    pub async fn stop(&mut self) -> Result<Option<CommandOutput>> {
        let Some(mut process) = self.background.take() else {
            return Ok(None);
        };

        info!(
            pid = ?process.pid(),
            pgdata = %self.pgdata.display(),
            "terminating {}",
            self.program.display()
        );
        process.stop_with_signal(Signal::Quit, true)?;

        let output = match process.communicate(STOP_GRACE_PERIOD).await {
            Ok(output) => output,
            Err(e) if e.is_timeout() => {
                warn!(pid = ?process.pid(), "still running after SIGQUIT, killing");
                process.kill().await?
            }
            Err(e) => return Err(e),
        };
        Ok(Some(output.into()))
    }
}

/// Spawns `argv`, waits up to `timeout`, kills it on timeout.
pub(crate) async fn run_to_completion(
    ctx: &ExecContext,
    name: &str,
    argv: &[String],
    timeout: Duration,
) -> Result<CommandOutput> {
    let mut process = ManagedProcess::spawn(ctx, argv)?;

    match process.communicate(timeout).await {
        Ok(output) => {
            let output = CommandOutput::from(output);
            debug!(task = name, exit_code = output.exit_code, "{}", process.command_line());
            Ok(output)
        }
        Err(Error::ProcessTimeout { command, .. }) => {
            let partial = process.kill().await?;
            Err(Error::CommandTimeout {
                name: name.to_string(),
                command,
                timeout,
                stdout: partial.stdout,
                stderr: partial.stderr,
            })
        }
        Err(e) => Err(e),
    }
}
