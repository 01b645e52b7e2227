//! # Harness Configuration
//!
//! One [`HarnessConfig`] per test run, built explicitly and passed to
//! [`Cluster`](crate::Cluster). Nothing is read from or written to the
//! driver's environment except the optional `NETFABRIC_CONFIG` lookup in
//! [`HarnessConfig::load`].
//!
//! ## YAML Format
//!
//! ```yaml
//! network_prefix: pgauto
//! subnet: 172.27.1.0/24
//! command_timeout: 60s
//! state_change_timeout: 90s
//! poll_interval: 1s
//! user: docker
//! programs:
//!   pg_autoctl: /usr/lib/postgresql/16/bin/pg_autoctl
//! env:
//!   PGHOST: localhost
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BRIDGE_NF_CALL_IPTABLES, BRIDGE_SUFFIX, COMMAND_TIMEOUT, DEFAULT_NETWORK_PREFIX,
    DEFAULT_SUBNET, PG_AUTOCTL, PG_CTL, POLL_INTERVAL, PSQL, STATE_CHANGE_TIMEOUT,
    VETH_PEER_SUFFIX, validate_ifname,
};
use crate::error::{Error, Result};
use crate::network::Ipv4Subnet;
use crate::poller::StatePoller;
use crate::process::{ExecContext, resolve_program};

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV_VAR: &str = "NETFABRIC_CONFIG";

/// Explicit program locations. `None` means "search `PATH`".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Programs {
    pub pg_autoctl: Option<PathBuf>,
    pub pg_ctl: Option<PathBuf>,
    pub psql: Option<PathBuf>,
}

/// Resolved program paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub pg_autoctl: PathBuf,
    pub pg_ctl: PathBuf,
    pub psql: PathBuf,
}

impl Programs {
    /// Resolves every program, failing on the first one missing.
    pub fn resolve(&self) -> Result<Toolchain> {
        Ok(Toolchain {
            pg_autoctl: resolve_program(PG_AUTOCTL, self.pg_autoctl.as_deref())?,
            pg_ctl: resolve_program(PG_CTL, self.pg_ctl.as_deref())?,
            psql: resolve_program(PSQL, self.psql.as_deref())?,
        })
    }
}

/// Test-run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Prefix of every namespace, veth and bridge name.
    pub network_prefix: String,
    /// Subnet of the virtual LAN in CIDR form.
    pub subnet: String,
    /// Upper bound for one-shot commands.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Upper bound for state waits.
    #[serde(with = "humantime_serde")]
    pub state_change_timeout: Duration,
    /// Poll period of state waits.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// User the supervised binaries run as.
    pub user: Option<String>,
    /// Program overrides.
    pub programs: Programs,
    /// Bridge netfilter sysctl zeroed while the LAN exists.
    pub bridge_sysctl: PathBuf,
    /// Environment of every spawned child.
    pub env: BTreeMap<String, String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let env = [
            ("PG_REGRESS_SOCK_DIR", ""),
            ("PG_AUTOCTL_DEBUG", ""),
            ("PGHOST", "localhost"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            network_prefix: DEFAULT_NETWORK_PREFIX.to_string(),
            subnet: DEFAULT_SUBNET.to_string(),
            command_timeout: COMMAND_TIMEOUT,
            state_change_timeout: STATE_CHANGE_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            user: std::env::var("USER").ok(),
            programs: Programs::default(),
            bridge_sysctl: PathBuf::from(BRIDGE_NF_CALL_IPTABLES),
            env,
        }
    }
}

impl HarnessConfig {
    /// Parses YAML. `origin` names the source in error messages.
    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| Error::Config {
            origin: origin.to_string(),
            reason: e.to_string(),
        })?;
        config.validate().map_err(|e| match e {
            Error::Config { reason, .. } => Error::Config {
                origin: origin.to_string(),
                reason,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Reads and parses a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml, &path.display().to_string())
    }

    /// Loads the file named by `NETFABRIC_CONFIG`, or the defaults.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Checks names against kernel limits and parses the subnet.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::Config {
            origin: "validation".to_string(),
            reason,
        };

        // Longest names derived from the prefix: the bridge and the veth
        // peer of a node with a three-digit index.
        for name in [
            format!("{}{BRIDGE_SUFFIX}", self.network_prefix),
            format!("{}-999{VETH_PEER_SUFFIX}", self.network_prefix),
        ] {
            validate_ifname(&name)
                .map_err(|reason| invalid(format!("network_prefix '{name}': {reason}")))?;
        }

        self.subnet_parsed()
            .map_err(|e| invalid(format!("subnet: {e}")))?;

        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be positive".to_string()));
        }
        if self.poll_interval > self.state_change_timeout {
            return Err(invalid(
                "poll_interval must not exceed state_change_timeout".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed subnet.
    pub fn subnet_parsed(&self) -> Result<Ipv4Subnet> {
        self.subnet.parse()
    }

    /// Context for processes run inside nodes: user switch and environment.
    pub fn exec_context(&self) -> ExecContext {
        let ctx = self.host_context();
        match &self.user {
            Some(user) => ctx.with_user(user),
            None => ctx,
        }
    }

    /// Context for processes run by the driver itself: environment only.
    pub fn host_context(&self) -> ExecContext {
        self.env
            .iter()
            .fold(ExecContext::host(), |ctx, (k, v)| ctx.with_env(k, v))
    }

    /// Poller configured with the state-change timeout and poll interval.
    pub fn poller(&self) -> StatePoller {
        StatePoller::new(self.state_change_timeout, self.poll_interval)
    }
}
