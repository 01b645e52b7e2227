//! Kernel link and namespace operations.
//!
//! All kernel objects are manipulated through iproute2 (`ip`), the same way
//! the rest of the crate drives `unshare`, `nsenter` and friends: one
//! subprocess per operation, synchronous with respect to the kernel (the
//! command returns after netlink acknowledged the change).
//!
//! The [`IpRunner`] trait is the seam between the fabric logic and the
//! kernel. [`IpRoute2`] is the real implementation; tests plug in a
//! recording fake.
//!
//! ## Absence Classification
//!
//! iproute2 reports missing objects with a handful of well-known messages.
//! Those map to [`Error::KernelObjectAbsent`]; every other failure maps to
//! [`Error::KernelObject`], which is fatal.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::constants::COMMAND_TIMEOUT;
use crate::error::{Error, Result};

/// stderr fragments iproute2 emits when the target object does not exist.
const ABSENT_MARKERS: &[&str] = &[
    "Cannot find device",
    "does not exist",
    "No such file or directory",
    "Cannot open network namespace",
    "No such device",
];

// =============================================================================
// Runner Trait
// =============================================================================

/// Executes one `ip` invocation.
#[async_trait]
pub trait IpRunner: Send + Sync {
    /// Runs `ip <args>` and returns its stdout.
    ///
    /// `object` names the namespace or interface being acted on and is used
    /// for error reporting and absence classification.
    async fn ip(&self, object: &str, args: &[&str]) -> Result<String>;
}

/// Maps a failed `ip` invocation to the error taxonomy.
pub fn classify_failure(object: &str, args: &[&str], stderr: &str) -> Error {
    if ABSENT_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        return Error::KernelObjectAbsent {
            object: object.to_string(),
        };
    }

    Error::KernelObject {
        operation: format!("ip {}", args.join(" ")),
        object: object.to_string(),
        reason: stderr.trim().to_string(),
    }
}

/// iproute2-backed runner.
#[derive(Debug, Clone)]
pub struct IpRoute2 {
    program: PathBuf,
}

impl IpRoute2 {
    /// Uses `ip` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("ip")
    }

    /// Uses a specific `ip` binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for IpRoute2 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IpRunner for IpRoute2 {
    async fn ip(&self, object: &str, args: &[&str]) -> Result<String> {
        debug!(object = %object, "ip {}", args.join(" "));

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::KernelObject {
                    operation: format!("ip {}", args.join(" ")),
                    object: object.to_string(),
                    reason: format!("failed to execute {}: {e}", self.program.display()),
                });
            }
            Err(_) => {
                return Err(Error::Timeout {
                    operation: format!("ip {}", args.join(" ")),
                    timeout: COMMAND_TIMEOUT,
                });
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_failure(
                object,
                args,
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }
}

// =============================================================================
// Link Operations
// =============================================================================

/// Outcome of an idempotent removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The object existed and was removed.
    Removed,
    /// The object was already gone.
    AlreadyAbsent,
}

/// Converts the absence condition into a successful [`Removal`].
///
/// Any other error is propagated untouched.
pub fn tolerate_absence(result: Result<()>) -> Result<Removal> {
    match result {
        Ok(()) => Ok(Removal::Removed),
        Err(e) if e.is_absent() => Ok(Removal::AlreadyAbsent),
        Err(e) => Err(e),
    }
}

/// Typed wrapper over an [`IpRunner`].
#[derive(Clone)]
pub struct Links {
    runner: Arc<dyn IpRunner>,
}

impl std::fmt::Debug for Links {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Links").finish_non_exhaustive()
    }
}

impl Links {
    /// Wraps a runner.
    pub fn new(runner: Arc<dyn IpRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, object: &str, args: &[&str]) -> Result<()> {
        self.runner.ip(object, args).await.map(|_| ())
    }

    /// Runs a command either in the host namespace or inside `netns`.
    async fn run_in(&self, netns: Option<&str>, object: &str, args: &[&str]) -> Result<String> {
        match netns {
            Some(ns) => {
                let mut full = vec!["-n", ns];
                full.extend_from_slice(args);
                self.runner.ip(object, &full).await
            }
            None => self.runner.ip(object, args).await,
        }
    }

    // -------------------------------------------------------------------------
    // Namespaces
    // -------------------------------------------------------------------------

    /// Creates a named network namespace.
    pub async fn add_namespace(&self, name: &str) -> Result<()> {
        self.run(name, &["netns", "add", name]).await
    }

    /// Deletes a named network namespace; absence is not an error.
    pub async fn delete_namespace(&self, name: &str) -> Result<Removal> {
        tolerate_absence(self.run(name, &["netns", "delete", name]).await)
    }

    /// Lists named network namespaces.
    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        let out = self.runner.ip("netns", &["netns", "list"]).await?;
        Ok(parse_netns_list(&out))
    }

    // -------------------------------------------------------------------------
    // Interfaces
    // -------------------------------------------------------------------------

    /// Creates a bridge in the host namespace.
    pub async fn add_bridge(&self, name: &str) -> Result<()> {
        self.run(name, &["link", "add", "name", name, "type", "bridge"])
            .await
    }

    /// Creates a veth pair with `inner` placed directly in `netns` and `peer`
    /// left in the host namespace.
    pub async fn add_veth_pair(&self, inner: &str, netns: &str, peer: &str) -> Result<()> {
        self.run(
            peer,
            &[
                "link", "add", "name", inner, "netns", netns, "type", "veth", "peer", "name",
                peer,
            ],
        )
        .await
    }

    /// Assigns `address/prefix_len` to `dev`.
    pub async fn add_address(
        &self,
        netns: Option<&str>,
        dev: &str,
        address: std::net::Ipv4Addr,
        prefix_len: u8,
    ) -> Result<()> {
        let cidr = format!("{address}/{prefix_len}");
        self.run_in(netns, dev, &["addr", "add", &cidr, "dev", dev])
            .await
            .map(|_| ())
    }

    /// Sets the administrative state of `dev`.
    pub async fn set_up(&self, netns: Option<&str>, dev: &str, up: bool) -> Result<()> {
        let state = if up { "up" } else { "down" };
        self.run_in(netns, dev, &["link", "set", "dev", dev, state])
            .await
            .map(|_| ())
    }

    /// Reads back the administrative state of `dev`.
    pub async fn is_up(&self, netns: Option<&str>, dev: &str) -> Result<bool> {
        let out = self
            .run_in(netns, dev, &["-o", "link", "show", "dev", dev])
            .await?;
        Ok(parse_admin_up(&out))
    }

    /// Enslaves `dev` to `bridge`.
    pub async fn set_master(&self, dev: &str, bridge: &str) -> Result<()> {
        self.run(dev, &["link", "set", "dev", dev, "master", bridge])
            .await
    }

    /// Brings `dev` down then deletes it, tolerating absence at both steps.
    ///
    /// Works for bridges as well as veth peers: a bridge is an interface.
    pub async fn remove_interface_if_exists(&self, dev: &str) -> Result<Removal> {
        tolerate_absence(self.set_up(None, dev, false).await)?;
        tolerate_absence(self.run(dev, &["link", "delete", "dev", dev]).await)
    }
}

/// Parses `ip netns list` output (`name (id: N)` per line).
pub fn parse_netns_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Returns true when the `<...>` flag list of `ip -o link show` contains `UP`.
pub fn parse_admin_up(output: &str) -> bool {
    output
        .split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .is_some_and(|(flags, _)| flags.split(',').any(|f| f == "UP"))
}
