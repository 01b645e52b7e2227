//! A virtual node: one network namespace joined to the LAN by a veth pair.

use std::net::Ipv4Addr;

use tracing::{debug, info, warn};

use super::link::{Links, Removal};
use crate::constants::{NODE_VETH_NAME, VETH_PEER_SUFFIX, validate_ifname};
use crate::error::{Error, Result};
use crate::process::ExecContext;

/// Handle to a namespace, its veth pair and its address.
///
/// ```text
///   host namespace                      node namespace <ns>
///   ┌──────────────┐                   ┌──────────────────────┐
///   │ <prefix>-br  │── <ns>p ═════════ │ veth0  <address>/len │
///   └──────────────┘   (bridge side)   │ lo                   │
///                                      └──────────────────────┘
/// ```
///
/// Cloning the handle does not duplicate kernel objects; every clone refers
/// to the same namespace. Destruction is idempotent so any clone may tear
/// the node down.
#[derive(Debug, Clone)]
pub struct VirtualNode {
    namespace: String,
    address: Ipv4Addr,
    prefix_len: u8,
    veth_peer: String,
    links: Links,
}

impl VirtualNode {
    /// Creates the namespace and veth pair and brings the node side up.
    ///
    /// Leftovers from a previous crashed run with the same names are
    /// removed first. On failure, whatever was already created is removed
    /// again. Attaching the peer to a bridge is the caller's job.
    pub(crate) async fn create(
        links: Links,
        namespace: String,
        address: Ipv4Addr,
        prefix_len: u8,
    ) -> Result<Self> {
        let veth_peer = format!("{namespace}{VETH_PEER_SUFFIX}");
        for name in [&namespace, &veth_peer] {
            validate_ifname(name).map_err(|reason| Error::InvalidName {
                name: name.clone(),
                reason: reason.to_string(),
            })?;
        }

        let node = Self {
            namespace,
            address,
            prefix_len,
            veth_peer,
            links,
        };

        node.links.delete_namespace(&node.namespace).await?;
        node.links.remove_interface_if_exists(&node.veth_peer).await?;

        if let Err(e) = node.build().await {
            if let Err(cleanup) = node.destroy().await {
                warn!(
                    namespace = %node.namespace,
                    error = %cleanup,
                    "failed to remove partially created node"
                );
            }
            return Err(e);
        }

        info!(
            namespace = %node.namespace,
            address = %node.address,
            peer = %node.veth_peer,
            "created virtual node"
        );
        Ok(node)
    }

    async fn build(&self) -> Result<()> {
        self.links.add_namespace(&self.namespace).await?;
        self.links
            .add_veth_pair(NODE_VETH_NAME, &self.namespace, &self.veth_peer)
            .await?;

        let ns = Some(self.namespace.as_str());
        self.links
            .add_address(ns, NODE_VETH_NAME, self.address, self.prefix_len)
            .await?;
        self.links.set_up(ns, NODE_VETH_NAME, true).await?;
        self.links.set_up(ns, "lo", true).await
    }

    /// Namespace name (`<prefix>-<index>`).
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Address assigned inside the namespace.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Prefix length of the assigned address.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Host-side veth peer attached to the bridge.
    pub fn veth_peer(&self) -> &str {
        &self.veth_peer
    }

    /// Execution context that runs commands inside this node.
    pub fn context(&self, base: &ExecContext) -> ExecContext {
        base.clone().in_namespace(&self.namespace)
    }

    /// Cuts the node off the LAN by bringing the bridge-side peer down.
    ///
    /// Processes inside the node keep running. Returns once the kernel
    /// reports the link administratively down.
    pub async fn ifdown(&self) -> Result<()> {
        self.set_link(false).await
    }

    /// Reconnects the node after [`ifdown`](Self::ifdown).
    pub async fn ifup(&self) -> Result<()> {
        self.set_link(true).await
    }

    /// Returns the administrative state of the bridge-side peer.
    pub async fn is_link_up(&self) -> Result<bool> {
        self.links.is_up(None, &self.veth_peer).await
    }

    async fn set_link(&self, up: bool) -> Result<()> {
        let state = if up { "up" } else { "down" };
        self.links.set_up(None, &self.veth_peer, up).await?;

        if self.is_link_up().await? != up {
            return Err(Error::KernelObject {
                operation: format!("ip link set dev {} {state}", self.veth_peer),
                object: self.veth_peer.clone(),
                reason: "link state did not change".to_string(),
            });
        }

        info!(namespace = %self.namespace, peer = %self.veth_peer, "link {state}");
        Ok(())
    }

    /// Removes the veth pair and the namespace.
    ///
    /// Objects already gone are skipped. The namespace is removed even when
    /// removing the link failed; the first failure is returned.
    pub async fn destroy(&self) -> Result<()> {
        let link = self.links.remove_interface_if_exists(&self.veth_peer).await;
        let ns = self.links.delete_namespace(&self.namespace).await;

        debug!(
            namespace = %self.namespace,
            link_removed = matches!(link, Ok(Removal::Removed)),
            namespace_removed = matches!(ns, Ok(Removal::Removed)),
            "destroyed virtual node"
        );
        link.and(ns).map(|_| ())
    }
}
