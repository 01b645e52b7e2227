//! The closed set of node kinds a cluster holds.

use std::time::Duration;

use async_trait::async_trait;

use super::datanode::DataNode;
use super::monitor::MonitorNode;
use super::pg::PgNode;
use crate::error::{Error, Result};
use crate::poller::{Diagnostics, Supervised};

/// A node of the cluster, tagged by kind.
///
/// Both kinds share the Postgres plumbing of [`PgNode`] and the
/// [`Supervised`] capability; only data nodes carry a monitor-assigned
/// state and implement [`StateProbe`](crate::poller::StateProbe).
#[derive(Debug)]
pub enum ClusterNode {
    /// The control-plane node.
    Monitor(MonitorNode),
    /// A Postgres node registered with the monitor.
    Data(DataNode),
}

impl ClusterNode {
    /// The Postgres instance behind the node.
    pub fn pg(&self) -> &PgNode {
        match self {
            Self::Monitor(node) => node.pg(),
            Self::Data(node) => node.pg(),
        }
    }

    /// Mutable access to the Postgres instance.
    pub fn pg_mut(&mut self) -> &mut PgNode {
        match self {
            Self::Monitor(node) => node.pg_mut(),
            Self::Data(node) => node.pg_mut(),
        }
    }

    /// Returns true for the control-plane node.
    pub fn is_monitor(&self) -> bool {
        matches!(self, Self::Monitor(_))
    }

    pub fn as_monitor(&self) -> Option<&MonitorNode> {
        match self {
            Self::Monitor(node) => Some(node),
            Self::Data(_) => None,
        }
    }

    pub fn as_monitor_mut(&mut self) -> Option<&mut MonitorNode> {
        match self {
            Self::Monitor(node) => Some(node),
            Self::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataNode> {
        match self {
            Self::Data(node) => Some(node),
            Self::Monitor(_) => None,
        }
    }

    pub fn as_data_mut(&mut self) -> Option<&mut DataNode> {
        match self {
            Self::Data(node) => Some(node),
            Self::Monitor(_) => None,
        }
    }

    /// Label used for this node's teardown step.
    pub fn step(&self) -> String {
        let kind = match self {
            Self::Monitor(_) => "monitor",
            Self::Data(_) => "data node",
        };
        format!("{kind} {}", self.pg().pgdata().display())
    }

    /// Tears the node down. See [`PgNode::destroy`].
    pub async fn destroy(&mut self) -> Vec<Error> {
        self.pg_mut().destroy().await
    }

    /// Cuts the node off the LAN.
    pub async fn ifdown(&self) -> Result<()> {
        self.pg().ifdown().await
    }

    /// Reconnects the node to the LAN.
    pub async fn ifup(&self) -> Result<()> {
        self.pg().ifup().await
    }

    /// Stops the agent and Postgres. See [`PgNode::fail`].
    pub async fn fail(&mut self) -> Result<()> {
        self.pg_mut().fail().await
    }
}

#[async_trait]
impl Supervised for ClusterNode {
    fn describe(&self) -> String {
        match self {
            Self::Monitor(node) => node.describe(),
            Self::Data(node) => node.describe(),
        }
    }

    async fn keepalive(&mut self, window: Duration) -> Result<()> {
        match self {
            Self::Monitor(node) => node.keepalive(window).await,
            Self::Data(node) => node.keepalive(window).await,
        }
    }

    fn diagnostics(&self) -> Diagnostics {
        match self {
            Self::Monitor(node) => node.diagnostics(),
            Self::Data(node) => node.diagnostics(),
        }
    }
}
