//! # Process Harness
//!
//! Spawning, draining, signalling and supervising external processes that
//! run inside virtual nodes.
//!
//! ```text
//!   ProcessSupervisor  (one per node, builds pg_autoctl command lines)
//!          │
//!          ▼
//!   ManagedProcess     (pipes drained into owned buffers, own process group)
//!          │
//!          ▼
//!   ExecContext        (ip netns exec + sudo + explicit environment)
//! ```
//!
//! Every wait is bounded. A timed-out wait leaves the process running; the
//! caller decides whether to keep polling, signal it, or kill it.

mod context;
mod managed;
pub mod signal;
mod supervisor;

pub use context::ExecContext;
pub use managed::{ManagedProcess, ProcessOutput};
pub use signal::Signal;
pub use supervisor::{
    CommandOutput, ProcessSupervisor, build_command_line, resolve_program,
};
pub(crate) use supervisor::run_to_completion;
