//! # State Polling
//!
//! Waits for an externally owned state machine to reach a target label.
//!
//! ```text
//!   ┌──────────────────────── every interval ─────────────────────────┐
//!   │ keepalive(window)  drain supervised output so pipes never fill  │
//!   │ observe()          read (reported, assigned) from control plane │
//!   │ compare            field == target? → Ok                        │
//!   └─────────────────────────────────────────────────────────────────┘
//!     deadline passed → diagnostics() + event_history() → StateTimeout
//! ```
//!
//! State labels are opaque; the poller only compares them for equality.
//! A transition is logged only when the observed value changes.
//!
//! Every step is bounded so that a target that is never reached fails
//! within `timeout + interval`. Local diagnostics (process output, logs)
//! are always kept; only the control-plane event query is subject to the
//! final bound. A timed-out wait does not stop the supervised process.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::constants::{POLL_INTERVAL, STATE_CHANGE_TIMEOUT};
use crate::control::NodeState;
use crate::error::{Error, Result};

/// Which half of a [`NodeState`] to wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    /// State the node reports having reached.
    Reported,
    /// State the control plane assigned to the node.
    Assigned,
}

impl StateField {
    /// Selects this field from `state`.
    pub fn pick(self, state: &NodeState) -> &str {
        match self {
            Self::Reported => &state.reported,
            Self::Assigned => &state.assigned,
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reported => write!(f, "state"),
            Self::Assigned => write!(f, "assigned state"),
        }
    }
}

/// Everything gathered when a wait gives up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Last value observed for the polled field.
    pub last_state: Option<String>,
    /// Recent control-plane events, formatted.
    pub events: Option<String>,
    /// stdout of the supervised process.
    pub stdout: Option<String>,
    /// stderr of the supervised process.
    pub stderr: Option<String>,
    /// Persisted log content of the workload.
    pub logs: Option<String>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "last observed: {}",
            self.last_state.as_deref().unwrap_or("<none>")
        )?;
        let sections = [
            ("stdout", &self.stdout),
            ("stderr", &self.stderr),
            ("events", &self.events),
            ("logs", &self.logs),
        ];
        for (title, body) in sections {
            if let Some(body) = body.as_deref().filter(|b| !b.trim().is_empty()) {
                writeln!(f, "--- {title} ---")?;
                writeln!(f, "{}", body.trim_end())?;
            }
        }
        Ok(())
    }
}

/// A node whose supervised processes need draining while someone waits
/// on it.
#[async_trait]
pub trait Supervised: Send {
    /// Human-readable subject used in logs and errors.
    fn describe(&self) -> String;

    /// Keeps supervised processes healthy for about `window`.
    ///
    /// Implementations drain process output here; with nothing to drain
    /// they simply sleep.
    async fn keepalive(&mut self, window: Duration) -> Result<()>;

    /// Failure context available on the host: captured process output and
    /// persisted logs. Never fails: problems while gathering are reported
    /// inside the returned record.
    fn diagnostics(&self) -> Diagnostics;
}

/// Something whose state can be polled.
#[async_trait]
pub trait StateProbe: Supervised {
    /// Reads the current state.
    async fn observe(&mut self) -> Result<NodeState>;

    /// Recent control-plane history, formatted.
    ///
    /// The control plane may be unreachable when this is asked for (a
    /// partitioned node, a stopped monitor), so callers bound it.
    async fn event_history(&mut self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Bounded polling loop.
#[derive(Debug, Clone, Copy)]
pub struct StatePoller {
    timeout: Duration,
    interval: Duration,
}

impl Default for StatePoller {
    fn default() -> Self {
        Self::new(STATE_CHANGE_TIMEOUT, POLL_INTERVAL)
    }
}

impl StatePoller {
    /// Creates a poller giving up after `timeout`, polling every `interval`.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Overall deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until `field` of the probe's state equals `target`.
    pub async fn wait_until<P>(&self, probe: &mut P, field: StateField, target: &str) -> Result<()>
    where
        P: StateProbe + ?Sized,
    {
        let subject = probe.describe();
        let start = Instant::now();
        let deadline = start + self.timeout;
        let slack = self.interval / 2;
        let mut previous: Option<String> = None;

        loop {
            let window = self.interval.min(deadline.saturating_duration_since(Instant::now()));
            probe.keepalive(window).await?;

            let budget = deadline.saturating_duration_since(Instant::now()) + slack;
            let observed = tokio::time::timeout(budget, probe.observe()).await;
            let state = match observed {
                Ok(result) => result?,
                Err(_) => break,
            };

            let current = field.pick(&state);
            if previous.as_deref() != Some(current) {
                if current == target {
                    info!("{field} of {subject} is '{current}', done waiting");
                } else {
                    info!("{field} of {subject} is '{current}', waiting for '{target}' ...");
                }
            }
            if current == target {
                return Ok(());
            }
            previous = Some(current.to_string());

            if Instant::now() >= deadline {
                break;
            }
        }

        let waited = start.elapsed();
        warn!(
            subject = %subject,
            target = %target,
            waited = ?waited,
            "{field} target not reached"
        );

        let mut diagnostics = probe.diagnostics();
        diagnostics.last_state = previous;

        let history = tokio::time::timeout(slack, probe.event_history()).await;
        diagnostics.events = match history {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => Some(format!("failed to fetch events: {e}")),
            Err(_) => Some(format!("event query timed out after {slack:?}")),
        };

        Err(Error::StateTimeout {
            subject,
            field: field.to_string(),
            target: target.to_string(),
            waited,
            diagnostics: Box::new(diagnostics),
        })
    }

    /// Same as [`wait_until`](Self::wait_until) on the reported state.
    pub async fn wait_until_reported<P>(&self, probe: &mut P, target: &str) -> Result<()>
    where
        P: StateProbe + ?Sized,
    {
        self.wait_until(probe, StateField::Reported, target).await
    }

    /// Same as [`wait_until`](Self::wait_until) on the assigned state.
    pub async fn wait_until_assigned<P>(&self, probe: &mut P, target: &str) -> Result<()>
    where
        P: StateProbe + ?Sized,
    {
        self.wait_until(probe, StateField::Assigned, target).await
    }
}

/// Polls `check` every `interval` until it returns true.
///
/// Fails with [`Error::Timeout`] once `timeout` has elapsed; errors from
/// `check` propagate immediately.
pub async fn poll_until<F, Fut>(
    operation: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                operation: operation.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
