//! IPv4 subnet parsing and forward-only host allocation.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// An IPv4 network in CIDR form, e.g. `172.27.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Subnet {
    /// Creates a subnet, rejecting host bits set in `network`.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::InvalidSubnet {
                subnet: format!("{network}/{prefix_len}"),
                reason: "prefix length must be at most 32".to_string(),
            });
        }
        let subnet = Self {
            network,
            prefix_len,
        };
        if u32::from(network) & !subnet.mask() != 0 {
            return Err(Error::InvalidSubnet {
                subnet: subnet.to_string(),
                reason: "host bits set".to_string(),
            });
        }
        Ok(subnet)
    }

    /// Network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length in bits.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn mask(&self) -> u32 {
        match self.prefix_len {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n)),
        }
    }

    /// Returns true if `addr` belongs to this subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.network)
    }

    /// First and last usable host addresses as integers.
    ///
    /// Network and broadcast addresses are excluded except for /31 and /32,
    /// where every address is a host.
    fn host_range(&self) -> (u32, u32) {
        let base = u32::from(self.network);
        let last = base | !self.mask();
        if self.prefix_len >= 31 {
            (base, last)
        } else {
            (base + 1, last - 1)
        }
    }

    /// Number of usable host addresses.
    pub fn host_count(&self) -> u64 {
        let (first, last) = self.host_range();
        u64::from(last - first) + 1
    }

    /// Returns a fresh allocator positioned at the first host.
    pub fn hosts(&self) -> HostAllocator {
        let (first, last) = self.host_range();
        HostAllocator {
            subnet: *self,
            next: Some(first),
            last,
        }
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Ipv4Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidSubnet {
            subnet: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, len) = s.trim().split_once('/').ok_or_else(|| invalid("missing '/'"))?;
        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| invalid("network is not an IPv4 address"))?;
        let prefix_len: u8 = len
            .parse()
            .map_err(|_| invalid("prefix length is not a number"))?;

        Self::new(network, prefix_len)
    }
}

/// Forward-only cursor over the hosts of a subnet.
///
/// Addresses are never handed out twice, even after the node that held
/// one is destroyed.
#[derive(Debug, Clone)]
pub struct HostAllocator {
    subnet: Ipv4Subnet,
    next: Option<u32>,
    last: u32,
}

impl HostAllocator {
    /// Allocates the next unused host address.
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        let current = self.next.ok_or_else(|| Error::SubnetExhausted {
            subnet: self.subnet.to_string(),
        })?;
        self.next = if current < self.last {
            Some(current + 1)
        } else {
            None
        };
        Ok(Ipv4Addr::from(current))
    }

    /// Subnet this allocator draws from.
    pub fn subnet(&self) -> Ipv4Subnet {
        self.subnet
    }
}
