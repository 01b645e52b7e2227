//! # netfabric
//!
//! **Virtual Network Fabric and Process Orchestration for Cluster Tests**
//!
//! This crate builds a throwaway LAN of Linux network namespaces on a single
//! host and drives a small high-availability Postgres cluster on top of it:
//! one monitor (control plane) and any number of data nodes, each living in
//! its own namespace with its own address.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            netfabric                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                         Cluster                             │    │
//! │  │   create_monitor → create_datanode* → ... → destroy         │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │             │                    │                    │             │
//! │  ┌──────────┴─────┐   ┌──────────┴─────────┐  ┌───────┴─────────┐   │
//! │  │  MonitorNode   │   │     DataNode       │  │  StatePoller    │   │
//! │  │  formations    │   │  states, slots     │  │  wait_until     │   │
//! │  │  failover      │   │  maintenance       │  │  diagnostics    │   │
//! │  └──────────┬─────┘   └──────────┬─────────┘  └─────────────────┘   │
//! │             └──────────┬─────────┘                                  │
//! │  ┌─────────────────────┴───────────────────────────────────────┐    │
//! │  │   PgNode: ProcessSupervisor (pg_autoctl) + PsqlClient       │    │
//! │  └─────────────────────┬───────────────────────────────────────┘    │
//! ├────────────────────────┼────────────────────────────────────────────┤
//! │  ┌─────────────────────┴─────┐      ┌───────────────────────────┐   │
//! │  │  ExecContext              │      │  VirtualLan               │   │
//! │  │  ip netns exec + sudo -u  │      │  bridge + veth per node   │   │
//! │  │  explicit environment     │      │  subnet allocator         │   │
//! │  └───────────────────────────┘      └───────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Node Lifecycle
//!
//! ```text
//!   ┌───────────┐  create_*  ┌───────────┐  create(run)  ┌─────────┐
//!   │ (none)    │ ─────────► │ Allocated │ ────────────► │ Running │
//!   └───────────┘            └─────┬─────┘               └────┬────┘
//!                                  │                          │ fail / ifdown
//!                                  │ destroy                  ▼
//!                                  │                     ┌─────────┐
//!                                  └──────────────────►  │ Removed │
//!                                                        └─────────┘
//! ```
//!
//! # Privileges
//!
//! Creating namespaces, bridges and veth pairs needs `CAP_NET_ADMIN`. Tests
//! that touch the kernel are `#[ignore]`d and meant to be run as root:
//!
//! ```text
//! sudo -E cargo test -- --ignored
//! ```
//!
//! # Cleanup
//!
//! Teardown is best effort: every step runs even when an earlier one fails,
//! and absent kernel objects count as already removed. See
//! [`Cluster::destroy`] and [`TeardownReport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use netfabric::{Cluster, DataNodeOptions, HarnessConfig, MonitorOptions};
//!
//! #[tokio::main]
//! async fn main() -> netfabric::Result<()> {
//!     netfabric::init_tracing();
//!     let mut cluster = Cluster::new(HarnessConfig::load()?).await?;
//!
//!     cluster.create_monitor(MonitorOptions::new("/tmp/monitor")).await?
//!         .create(true).await?;
//!     let node = cluster.create_datanode(DataNodeOptions::new("/tmp/node1")).await?;
//!     node.create(true).await?;
//!     node.wait_until_state("single").await?;
//!
//!     println!("{}", cluster.destroy().await);
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod constants;
pub mod control;
pub mod error;
pub mod network;
pub mod poller;
pub mod process;

use tracing_subscriber::EnvFilter;

// Re-exports
pub use cluster::{
    Cluster, ClusterNode, DataNode, DataNodeOptions, Feature, MonitorNode, MonitorOptions, PgNode,
    Role, TeardownFailure, TeardownReport,
};
pub use config::{HarnessConfig, Programs, Toolchain};
pub use control::{ControlPlane, MonitorClient, NodeEvent, NodeState, PsqlClient};
pub use error::{Error, Result};
pub use network::{IpRoute2, IpRunner, Ipv4Subnet, Links, VirtualLan, VirtualNode};
pub use poller::{Diagnostics, StateField, StatePoller, StateProbe, Supervised};
pub use process::{CommandOutput, ExecContext, ManagedProcess, ProcessSupervisor, Signal};

/// Installs a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Defaults to `netfabric=info`. Safe to call more than once; only the first
/// call installs a subscriber.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("netfabric=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init()
        .ok();
}
