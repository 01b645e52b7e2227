//! # Cluster Orchestration
//!
//! A [`Cluster`] owns one [`VirtualLan`] and its nodes, each tagged as a
//! [`ClusterNode`]: at most one monitor and any number of data nodes.
//!
//! ```text
//!   Cluster
//!   ├── VirtualLan ............ bridge + subnet allocator
//!   └── ClusterNode[] ......... creation order preserved
//!       ├── Monitor(MonitorNode)  0..1, control plane
//!       └── Data(DataNode)        0..n
//! ```
//!
//! ## Teardown Order
//!
//! [`Cluster::destroy`] runs every step even when earlier ones fail:
//!
//! 1. data nodes, most recent first
//! 2. the monitor
//! 3. the LAN (nodes, bridge, sysctl)
//!
//! Failures are collected into a [`TeardownReport`]; leaked namespaces or
//! bridges would poison later runs on the same host.

mod datanode;
mod monitor;
mod node;
mod pg;
mod role;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

pub use datanode::{DataNode, STANDBY_SLOT_PREFIX};
pub use monitor::MonitorNode;
pub use node::ClusterNode;
pub use pg::PgNode;
pub use role::{Feature, Role};

use crate::config::{HarnessConfig, Toolchain};
use crate::constants::{
    DATANODE_DATABASE, DEFAULT_DATANODE_USER, DEFAULT_PG_PORT, MONITOR_DATABASE, MONITOR_USER,
};
use crate::error::{Error, Result};
use crate::network::{IpRoute2, Links, VirtualLan, VirtualNode};
use crate::process::ExecContext;
use datanode::Registration;
use pg::PgNodeSpec;

/// Parameters of the control-plane node.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub pgdata: PathBuf,
    pub port: u16,
    /// Defaults to the node's address.
    pub nodename: Option<String>,
    pub auth_method: Option<String>,
}

impl MonitorOptions {
    /// Monitor on the default port.
    pub fn new(pgdata: impl Into<PathBuf>) -> Self {
        Self {
            pgdata: pgdata.into(),
            port: DEFAULT_PG_PORT,
            nodename: None,
            auth_method: None,
        }
    }
}

/// Parameters of a data node.
#[derive(Debug, Clone)]
pub struct DataNodeOptions {
    pub pgdata: PathBuf,
    pub port: u16,
    pub group: u32,
    /// Pass the node address as `--pghost` and `--listen`.
    pub listen: bool,
    pub role: Role,
    pub formation: Option<String>,
    pub auth_method: Option<String>,
}

impl DataNodeOptions {
    /// Postgres data node in group 0 on the default port.
    pub fn new(pgdata: impl Into<PathBuf>) -> Self {
        Self {
            pgdata: pgdata.into(),
            port: DEFAULT_PG_PORT,
            group: 0,
            listen: false,
            role: Role::Postgres,
            formation: None,
            auth_method: None,
        }
    }
}

/// One failed teardown step.
#[derive(Debug)]
pub struct TeardownFailure {
    /// What was being torn down.
    pub step: String,
    pub error: Error,
}

/// Outcome of [`Cluster::destroy`].
#[derive(Debug, Default)]
pub struct TeardownReport {
    steps: Vec<String>,
    failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    fn record(&mut self, step: &str, errors: Vec<Error>) {
        self.steps.push(step.to_string());
        for error in errors {
            warn!(step, error = %error, "teardown step failed");
            self.failures.push(TeardownFailure {
                step: step.to_string(),
                error,
            });
        }
    }

    /// Returns true when every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Every step that ran, in execution order.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Failed steps, in execution order.
    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "teardown complete");
        }
        write!(f, "{} teardown step(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.step, failure.error)?;
        }
        Ok(())
    }
}

/// Virtual LAN plus the nodes living on it.
#[derive(Debug)]
pub struct Cluster {
    config: HarnessConfig,
    toolchain: Toolchain,
    context: ExecContext,
    host_context: ExecContext,
    lan: VirtualLan,
    nodes: Vec<ClusterNode>,
}

impl Cluster {
    /// Builds the virtual LAN with iproute2.
    pub async fn new(config: HarnessConfig) -> Result<Self> {
        Self::with_links(config, Links::new(Arc::new(IpRoute2::new()))).await
    }

    /// Builds the virtual LAN with a custom link runner.
    pub async fn with_links(config: HarnessConfig, links: Links) -> Result<Self> {
        config.validate()?;
        let toolchain = config.programs.resolve()?;
        let subnet = config.subnet_parsed()?;

        let lan =
            VirtualLan::with_sysctl(links, &config.network_prefix, subnet, &config.bridge_sysctl)
                .await?;

        Ok(Self {
            context: config.exec_context(),
            host_context: config.host_context(),
            toolchain,
            config,
            lan,
            nodes: Vec::new(),
        })
    }

    /// Configuration the cluster was built with.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The virtual LAN.
    pub fn lan(&self) -> &VirtualLan {
        &self.lan
    }

    /// Every node, in creation order.
    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    /// The monitor, if created.
    pub fn monitor(&self) -> Option<&MonitorNode> {
        self.nodes.iter().find_map(ClusterNode::as_monitor)
    }

    /// Mutable access to the monitor.
    pub fn monitor_mut(&mut self) -> Option<&mut MonitorNode> {
        self.nodes.iter_mut().find_map(ClusterNode::as_monitor_mut)
    }

    /// Data nodes in creation order.
    pub fn datanodes(&self) -> impl Iterator<Item = &DataNode> {
        self.nodes.iter().filter_map(ClusterNode::as_data)
    }

    /// Data node at `index` (creation order).
    pub fn datanode(&self, index: usize) -> Result<&DataNode> {
        self.datanodes().nth(index).ok_or(Error::UnknownNode(index))
    }

    /// Mutable data node at `index`.
    pub fn datanode_mut(&mut self, index: usize) -> Result<&mut DataNode> {
        self.nodes
            .iter_mut()
            .filter_map(ClusterNode::as_data_mut)
            .nth(index)
            .ok_or(Error::UnknownNode(index))
    }

    fn pg_node(&self, vnode: VirtualNode, spec: PgNodeSpec) -> PgNode {
        PgNode::new(
            vnode,
            spec,
            self.toolchain.clone(),
            &self.context,
            self.host_context.clone(),
            self.config.command_timeout,
        )
    }

    /// Allocates a virtual node for the monitor and returns its handle.
    ///
    /// Fails before touching the network if a monitor already exists. The
    /// returned node is not created yet; call [`MonitorNode::create`].
    pub async fn create_monitor(&mut self, options: MonitorOptions) -> Result<&mut MonitorNode> {
        if self.monitor().is_some() {
            return Err(Error::MonitorAlreadyExists);
        }

        let pgdata = options.pgdata.display().to_string();
        let vnode = self.lan.create_node().await?;
        let pg = self.pg_node(
            vnode,
            PgNodeSpec {
                pgdata: options.pgdata,
                port: options.port,
                username: MONITOR_USER.to_string(),
                auth_method: options.auth_method,
                database: MONITOR_DATABASE.to_string(),
                role: Role::Monitor,
            },
        );
        info!(address = %pg.address(), "allocated monitor node");

        self.nodes
            .push(ClusterNode::Monitor(MonitorNode::new(pg, options.nodename)));
        self.monitor_mut().ok_or(Error::NoMonitor(pgdata))
    }

    /// Allocates a virtual node for a data node and returns its handle.
    ///
    /// The node is registered against the current monitor connection
    /// string; set monitor passwords before calling this. Node ids follow
    /// creation order starting at 1. Call [`DataNode::create`] next.
    pub async fn create_datanode(&mut self, options: DataNodeOptions) -> Result<&mut DataNode> {
        let monitor = self
            .monitor()
            .map(MonitorNode::client)
            .ok_or_else(|| Error::NoMonitor(options.pgdata.display().to_string()))?;

        let index = self.datanodes().count();
        let node_id = u32::try_from(index + 1).unwrap_or(u32::MAX);

        let vnode = self.lan.create_node().await?;
        let username = self
            .config
            .user
            .clone()
            .unwrap_or_else(|| DEFAULT_DATANODE_USER.to_string());
        let pg = self.pg_node(
            vnode,
            PgNodeSpec {
                pgdata: options.pgdata,
                port: options.port,
                username,
                auth_method: options.auth_method,
                database: DATANODE_DATABASE.to_string(),
                role: options.role,
            },
        );
        info!(address = %pg.address(), node_id, "allocated data node");

        let node = DataNode::new(
            pg,
            Registration {
                node_id,
                group: options.group,
                listen: options.listen,
                formation: options.formation,
                monitor,
            },
            self.config.poller(),
        );
        self.nodes.push(ClusterNode::Data(node));
        self.datanode_mut(index)
    }

    /// Tears everything down, best effort. See the module docs for order.
    pub async fn destroy(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        let (monitors, datanodes): (Vec<_>, Vec<_>) = std::mem::take(&mut self.nodes)
            .into_iter()
            .partition(ClusterNode::is_monitor);

        for mut node in datanodes.into_iter().rev().chain(monitors) {
            let step = node.step();
            let errors = node.destroy().await;
            report.record(&step, errors);
        }

        let errors = self.lan.destroy().await;
        report.record(&format!("network {}", self.lan.prefix()), errors);

        info!("{report}");
        report
    }
}
