//! A virtual LAN: one bridge, one subnet, many virtual nodes.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use tracing::{info, warn};

use super::link::{Links, Removal};
use super::node::VirtualNode;
use super::subnet::{HostAllocator, Ipv4Subnet};
use super::sysctl::SysctlGuard;
use crate::constants::{BRIDGE_NF_CALL_IPTABLES, BRIDGE_SUFFIX, validate_ifname};
use crate::error::{Error, Result};

/// Bridge plus address allocator over a private subnet.
///
/// ```text
///                 <prefix>-br (first host address)
///        ┌──────────────┼──────────────┐
///   <prefix>-0p    <prefix>-1p    <prefix>-2p
///        │              │              │
///   ns <prefix>-0  ns <prefix>-1  ns <prefix>-2
///   (2nd host)     (3rd host)     (4th host)
/// ```
///
/// Addresses come from a forward-only cursor: destroying a node never
/// returns its address to the pool.
#[derive(Debug)]
pub struct VirtualLan {
    prefix: String,
    bridge: String,
    bridge_address: Ipv4Addr,
    hosts: HostAllocator,
    nodes: Vec<VirtualNode>,
    sysctl: SysctlGuard,
    links: Links,
    destroyed: bool,
}

impl VirtualLan {
    /// Creates the bridge, assigns it the first host address and brings it up.
    ///
    /// Zeroes `bridge-nf-call-iptables` for the lifetime of the LAN.
    pub async fn new(links: Links, prefix: &str, subnet: Ipv4Subnet) -> Result<Self> {
        Self::with_sysctl(links, prefix, subnet, BRIDGE_NF_CALL_IPTABLES).await
    }

    /// Same as [`new`](Self::new) with a custom sysctl path.
    pub async fn with_sysctl(
        links: Links,
        prefix: &str,
        subnet: Ipv4Subnet,
        sysctl_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let bridge = format!("{prefix}{BRIDGE_SUFFIX}");
        validate_ifname(&bridge).map_err(|reason| Error::InvalidName {
            name: bridge.clone(),
            reason: reason.to_string(),
        })?;

        let mut hosts = subnet.hosts();
        let bridge_address = hosts.allocate()?;

        if links.remove_interface_if_exists(&bridge).await? == Removal::Removed {
            warn!(bridge = %bridge, "removed leftover bridge from a previous run");
        }
        links.add_bridge(&bridge).await?;
        links
            .add_address(None, &bridge, bridge_address, subnet.prefix_len())
            .await?;
        links.set_up(None, &bridge, true).await?;

        let sysctl = SysctlGuard::zero(sysctl_path)?;

        info!(
            bridge = %bridge,
            address = %bridge_address,
            subnet = %subnet,
            "created virtual LAN"
        );

        Ok(Self {
            prefix: prefix.to_string(),
            bridge,
            bridge_address,
            hosts,
            nodes: Vec::new(),
            sysctl,
            links,
            destroyed: false,
        })
    }

    /// Name prefix shared by every kernel object of this LAN.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Bridge interface name.
    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    /// Address held by the bridge in the host namespace.
    pub fn bridge_address(&self) -> Ipv4Addr {
        self.bridge_address
    }

    /// Subnet addresses are drawn from.
    pub fn subnet(&self) -> Ipv4Subnet {
        self.hosts.subnet()
    }

    /// Nodes created so far, in creation order.
    pub fn nodes(&self) -> &[VirtualNode] {
        &self.nodes
    }

    /// Shared link handle.
    pub fn links(&self) -> &Links {
        &self.links
    }

    /// Creates a node on the next free address and attaches it to the bridge.
    ///
    /// A node that fails to attach is removed again. If that removal fails
    /// too, the node stays in [`nodes`](Self::nodes) so that
    /// [`destroy`](Self::destroy) retries it.
    pub async fn create_node(&mut self) -> Result<VirtualNode> {
        if self.destroyed {
            return Err(Error::NetworkDestroyed(self.prefix.clone()));
        }

        let namespace = format!("{}-{}", self.prefix, self.nodes.len());
        let address = self.hosts.allocate()?;
        let prefix_len = self.hosts.subnet().prefix_len();

        let node = VirtualNode::create(self.links.clone(), namespace, address, prefix_len).await?;
        if let Err(e) = self.attach(&node).await {
            if let Err(cleanup) = node.destroy().await {
                warn!(
                    namespace = %node.namespace(),
                    error = %cleanup,
                    "failed to remove unattached node"
                );
                self.nodes.push(node);
            }
            return Err(e);
        }

        self.nodes.push(node.clone());
        Ok(node)
    }

    async fn attach(&self, node: &VirtualNode) -> Result<()> {
        self.links.set_master(node.veth_peer(), &self.bridge).await?;
        self.links.set_up(None, node.veth_peer(), true).await
    }

    /// Tears down every node, then the bridge, then restores the sysctl.
    ///
    /// Every step runs even if an earlier one failed; the failures are
    /// returned together. A second call is a no-op.
    pub async fn destroy(&mut self) -> Vec<Error> {
        let mut failures = Vec::new();
        if self.destroyed {
            return failures;
        }
        self.destroyed = true;

        for node in self.nodes.iter().rev() {
            if let Err(e) = node.destroy().await {
                warn!(namespace = %node.namespace(), error = %e, "failed to destroy node");
                failures.push(e);
            }
        }

        if let Err(e) = self.links.remove_interface_if_exists(&self.bridge).await {
            warn!(bridge = %self.bridge, error = %e, "failed to remove bridge");
            failures.push(e);
        }

        if let Err(e) = self.sysctl.restore() {
            warn!(sysctl = %self.sysctl.path().display(), error = %e, "failed to restore sysctl");
            failures.push(e);
        }

        info!(prefix = %self.prefix, failures = failures.len(), "destroyed virtual LAN");
        failures
    }

    /// Returns true once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Namespaces currently present on the host that carry this LAN's prefix.
    pub async fn remaining_namespaces(&self) -> Result<Vec<String>> {
        let marker = format!("{}-", self.prefix);
        Ok(self
            .links
            .list_namespaces()
            .await?
            .into_iter()
            .filter(|ns| ns.starts_with(&marker))
            .collect())
    }
}

impl Drop for VirtualLan {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!(
                prefix = %self.prefix,
                bridge = %self.bridge,
                "virtual LAN dropped without destroy(); kernel objects are leaked"
            );
        }
    }
}
