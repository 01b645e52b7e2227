//! # Harness Constants
//!
//! Timeouts, naming rules and well-known paths used by the network fabric
//! and the process harness. Every wait in the harness is bounded by one of
//! the durations below; nothing blocks indefinitely.
//!
//! ## Cross-References
//!
//! - [`crate::network`]: interface naming limits, sysctl path
//! - [`crate::process`]: command timeouts, signal used to stop supervised runs
//! - [`crate::poller`]: state-change timeout and poll interval

use std::time::Duration;

// =============================================================================
// Timeouts
// =============================================================================

/// Upper bound for a one-shot command of the supervised binary (60 seconds).
///
/// Covers `create`, `drop node`, `get`/`set` and `show` subcommands as well as
/// `psql` and `pg_ctl` invocations.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for a node to reach a target state (90 seconds).
///
/// Failovers include health-check timeouts on the control plane, so this
/// is intentionally larger than [`COMMAND_TIMEOUT`].
pub const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default interval between two state polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for a single control-plane query.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `stop()` waits for a signalled process to exit before
/// escalating to SIGKILL.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);

// =============================================================================
// Network Defaults
// =============================================================================
//
// 172.17.0.0/16 is Docker's default bridge network; the harness picks a
// private range next to it so both can coexist on CI hosts.
// =============================================================================

/// Default prefix for namespace, veth and bridge names.
pub const DEFAULT_NETWORK_PREFIX: &str = "pgauto";

/// Default subnet of the virtual LAN.
pub const DEFAULT_SUBNET: &str = "172.27.1.0/24";

/// Name of the veth end that lives inside every node namespace.
pub const NODE_VETH_NAME: &str = "veth0";

/// Suffix appended to the namespace name to form the bridge-side veth peer.
pub const VETH_PEER_SUFFIX: &str = "p";

/// Suffix appended to the network prefix to form the bridge name.
pub const BRIDGE_SUFFIX: &str = "-br";

/// Maximum interface name length (`IFNAMSIZ - 1`).
pub const MAX_IFNAME_LEN: usize = 15;

/// Host-wide toggle that sends bridged IPv4 traffic through iptables.
///
/// Zeroed while a virtual LAN is alive; some container-based CI hosts
/// otherwise drop traffic between namespaces at the bridge.
pub const BRIDGE_NF_CALL_IPTABLES: &str = "/proc/sys/net/bridge/bridge-nf-call-iptables";

/// Characters allowed in interface and namespace names.
pub const IFNAME_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.";

// =============================================================================
// Supervised Binary
// =============================================================================

/// Control binary supervised on every node.
pub const PG_AUTOCTL: &str = "pg_autoctl";

/// Postgres control binary.
pub const PG_CTL: &str = "pg_ctl";

/// SQL client used for the query contract.
pub const PSQL: &str = "psql";

/// Working-directory flag understood by every `pg_autoctl` subcommand.
pub const PGDATA_FLAG: &str = "--pgdata";

/// Separator marking where [`PGDATA_FLAG`] must be inserted.
pub const PGDATA_SEPARATOR: &str = "--";

/// Default Postgres port of every node.
pub const DEFAULT_PG_PORT: u16 = 5432;

/// Database served by the control-plane node.
pub const MONITOR_DATABASE: &str = "pg_auto_failover";

/// Role used to connect to the control-plane node.
pub const MONITOR_USER: &str = "autoctl_node";

/// Database served by data nodes.
pub const DATANODE_DATABASE: &str = "postgres";

/// Role used to connect to data nodes when no run-as user is configured.
pub const DEFAULT_DATANODE_USER: &str = "postgres";

/// Formation used when none is given.
pub const DEFAULT_FORMATION: &str = "default";

/// Number of events fetched for failure diagnostics.
pub const DIAGNOSTIC_EVENT_COUNT: u32 = 20;

/// Config file location relative to `$HOME`, followed by the absolute pgdata.
pub const CONFIG_DIR: &str = ".config/pg_autoctl";

/// State file location relative to `$HOME`, followed by the absolute pgdata.
pub const STATE_DIR: &str = ".local/share/pg_autoctl";

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "pg_autoctl.cfg";

/// State file name.
pub const STATE_FILE_NAME: &str = "pg_autoctl.state";

// =============================================================================
// Validation Functions
// =============================================================================

/// Validates a kernel interface or namespace name.
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[inline]
#[must_use = "validation result must be checked before creating kernel objects"]
pub fn validate_ifname(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("name cannot be empty");
    }
    if name.len() > MAX_IFNAME_LEN {
        return Err("name exceeds IFNAMSIZ");
    }
    if !name.chars().all(|c| IFNAME_VALID_CHARS.contains(c)) {
        return Err("name contains invalid characters");
    }
    Ok(())
}
