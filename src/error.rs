//! Error types for the network fabric and process harness.

use std::time::Duration;

use crate::poller::Diagnostics;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, driving or tearing down a cluster.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Kernel Object Errors
    // =========================================================================
    /// A namespace, interface or bridge operation failed.
    ///
    /// Fatal: indicates a misconfigured environment (missing privileges,
    /// leftover objects from a crashed run), never retried.
    #[error("kernel object operation '{operation}' on '{object}' failed: {reason}")]
    KernelObject {
        operation: String,
        object: String,
        reason: String,
    },

    /// The kernel object does not exist.
    ///
    /// Teardown paths match on this variant to treat deletion as done.
    #[error("kernel object '{object}' does not exist")]
    KernelObjectAbsent { object: String },

    /// Interface or namespace name rejected before reaching the kernel.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Subnet could not be parsed.
    #[error("invalid subnet '{subnet}': {reason}")]
    InvalidSubnet { subnet: String, reason: String },

    /// Every host address of the subnet has been handed out.
    #[error("no more host addresses available in {subnet}")]
    SubnetExhausted { subnet: String },

    /// The virtual LAN was already destroyed.
    #[error("virtual network '{0}' has been destroyed")]
    NetworkDestroyed(String),

    // =========================================================================
    // Process Errors
    // =========================================================================
    /// Program could not be located.
    #[error("program '{0}' not found (is it installed and in PATH?)")]
    ProgramNotFound(String),

    /// Spawning a child process failed.
    #[error("failed to spawn '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    /// Waiting on a process exceeded its deadline while it was still running.
    #[error("'{command}' still running after {timeout:?}\nout: {stdout}\nerr: {stderr}")]
    ProcessTimeout {
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    /// A one-shot command exited with a non-zero code.
    #[error("{name} failed with exit code {exit_code}: {command}\nout: {stdout}\nerr: {stderr}")]
    CommandFailed {
        name: String,
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// A one-shot command timed out and was killed.
    #[error("{name} timed out after {timeout:?}: {command}\nout: {stdout}\nerr: {stderr}")]
    CommandTimeout {
        name: String,
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    /// Signal delivery failed for a reason other than the process being gone.
    #[error("failed to send {signal} to pid {pid}: {reason}")]
    SignalFailed {
        pid: u32,
        signal: String,
        reason: String,
    },

    /// A persistent run is being supervised; one-shot commands must use
    /// a separate supervisor.
    #[error("supervisor for {0} already has a background process")]
    SupervisorBusy(String),

    // =========================================================================
    // Control Plane Errors
    // =========================================================================
    /// A query returned an unexpected shape.
    #[error("unexpected query result for '{query}': {reason}")]
    QueryResult { query: String, reason: String },

    /// The node is not registered on the control plane.
    #[error("node {node_id} in group {group} not found on the monitor")]
    NodeNotFound { node_id: u32, group: u32 },

    /// Operation needs a control-plane node and none exists.
    #[error("no monitor available for {0}")]
    NoMonitor(String),

    /// Polled state did not reach its target in time.
    ///
    /// Carries everything gathered at the deadline so the failure can be
    /// diagnosed without re-running.
    #[error("{subject} failed to reach {field} '{target}' after {waited:?}\n{diagnostics}")]
    StateTimeout {
        subject: String,
        field: String,
        target: String,
        waited: Duration,
        diagnostics: Box<Diagnostics>,
    },

    /// A polled predicate stayed false until the deadline.
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    /// A second control-plane node was requested.
    #[error("monitor has already been created")]
    MonitorAlreadyExists,

    /// Unknown data node handle.
    #[error("data node {0} does not exist")]
    UnknownNode(usize),

    /// Output of the supervised binary could not be interpreted.
    #[error("unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file could not be parsed or failed validation.
    #[error("invalid configuration ({origin}): {reason}")]
    Config { origin: String, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for the idempotent-absence condition.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::KernelObjectAbsent { .. })
    }

    /// Returns true for any timeout flavour.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ProcessTimeout { .. }
                | Self::CommandTimeout { .. }
                | Self::StateTimeout { .. }
                | Self::Timeout { .. }
        )
    }
}
