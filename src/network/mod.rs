//! # Virtual Network Fabric
//!
//! Isolated, addressable nodes on a single host built from kernel
//! primitives:
//!
//! ```text
//! ┌──────────────────────────── host namespace ────────────────────────────┐
//! │                                                                        │
//! │                     <prefix>-br  172.27.1.1/24                         │
//! │              ┌────────────┼────────────┬────────────┐                  │
//! │         <prefix>-0p  <prefix>-1p  <prefix>-2p  ...                     │
//! └──────────────┼────────────┼────────────┼───────────────────────────────┘
//!            veth0        veth0        veth0
//!          .2 (ns -0)   .3 (ns -1)   .4 (ns -2)
//! ```
//!
//! - [`VirtualLan`] owns the bridge, the address allocator and the
//!   bridge netfilter sysctl guard.
//! - [`VirtualNode`] owns one namespace and its veth pair.
//! - [`Links`] issues the kernel operations through an [`IpRunner`].
//!
//! Partitions are simulated by bringing the bridge-side veth peer down
//! ([`VirtualNode::ifdown`]); the node keeps running but its traffic is cut.

mod lan;
pub mod link;
mod node;
pub mod subnet;
pub mod sysctl;

pub use lan::VirtualLan;
pub use link::{IpRoute2, IpRunner, Links, Removal};
pub use node::VirtualNode;
pub use subnet::{HostAllocator, Ipv4Subnet};
pub use sysctl::SysctlGuard;
