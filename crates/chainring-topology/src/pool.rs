//! `/30` subnet allocation for chain networks.
//!
//! Each chain network gets one `/30`: host 1 for the owner (the gateway of
//! the downstream member), host 2 for the downstream member.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Result, TopologyError};

/// Pool used when nothing else is configured.
pub const DEFAULT_POOL: &str = "172.16.0.0/12";

const BLOCK_PREFIX: u8 = 30;
const BLOCK_SIZE: u32 = 4;

/// One `/30` chain subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    base: u32,
}

impl Subnet {
    fn at(base: u32) -> Self {
        Self {
            base: base & !(BLOCK_SIZE - 1),
        }
    }

    /// Parse `a.b.c.d/30`. Other prefix lengths are not chain subnets.
    pub fn from_cidr(cidr: &str) -> Option<Self> {
        let (addr, len) = cidr.split_once('/')?;
        if len.parse::<u8>().ok()? != BLOCK_PREFIX {
            return None;
        }
        let addr = Ipv4Addr::from_str(addr).ok()?;
        Some(Self::at(u32::from(addr)))
    }

    /// `a.b.c.d/30` form.
    pub fn cidr(&self) -> String {
        format!("{}/{}", Ipv4Addr::from(self.base), BLOCK_PREFIX)
    }

    /// Host 1: the owner's address.
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base + 1)
    }

    /// Host 2: the downstream member's address.
    pub fn peer(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base + 2)
    }
}

/// An IPv4 range carved into `/30` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetPool {
    base: u32,
    prefix: u8,
}

impl Default for SubnetPool {
    fn default() -> Self {
        Self {
            base: u32::from(Ipv4Addr::new(172, 16, 0, 0)),
            prefix: 12,
        }
    }
}

impl FromStr for SubnetPool {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl SubnetPool {
    /// Parse `a.b.c.d/n` with `n <= 30`.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || TopologyError::InvalidPool(s.to_string());
        let (addr, len) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr = Ipv4Addr::from_str(addr).map_err(|_| invalid())?;
        let prefix: u8 = len.parse().map_err(|_| invalid())?;
        if prefix > BLOCK_PREFIX {
            return Err(invalid());
        }
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        Ok(Self {
            base: u32::from(addr) & mask,
            prefix,
        })
    }

    /// Number of `/30` blocks in the pool.
    pub fn capacity(&self) -> u32 {
        1u32 << (BLOCK_PREFIX - self.prefix)
    }

    /// True if `subnet` lies inside the pool.
    pub fn contains(&self, subnet: &Subnet) -> bool {
        subnet.base >= self.base && (subnet.base - self.base) / BLOCK_SIZE < self.capacity()
    }

    /// Lowest block whose CIDR is not in `used`.
    pub fn next_free<'a>(&self, used: impl IntoIterator<Item = &'a str>) -> Option<Subnet> {
        let taken: HashSet<Subnet> = used.into_iter().filter_map(Subnet::from_cidr).collect();
        (0..self.capacity())
            .map(|i| Subnet::at(self.base + i * BLOCK_SIZE))
            .find(|s| !taken.contains(s))
    }
}

impl std::fmt::Display for SubnetPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.base), self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_hosts() {
        let s = Subnet::from_cidr("172.16.0.4/30").unwrap();
        assert_eq!(s.cidr(), "172.16.0.4/30");
        assert_eq!(s.gateway().to_string(), "172.16.0.5");
        assert_eq!(s.peer().to_string(), "172.16.0.6");
        assert!(Subnet::from_cidr("172.16.0.0/24").is_none());
        assert!(Subnet::from_cidr("0.0.0.0/0").is_none());
    }

    #[test]
    fn allocation_fills_holes() {
        let pool = SubnetPool::default();
        assert_eq!(pool.to_string(), DEFAULT_POOL);
        assert_eq!(pool.next_free(Vec::<&str>::new()).unwrap().cidr(), "172.16.0.0/30");

        let used = ["172.16.0.0/30", "172.16.0.8/30", "0.0.0.0/0"];
        assert_eq!(pool.next_free(used).unwrap().cidr(), "172.16.0.4/30");
    }

    #[test]
    fn small_pool_exhausts() {
        let pool = SubnetPool::parse("10.0.0.0/29").unwrap();
        assert_eq!(pool.capacity(), 2);
        assert!(pool.next_free(["10.0.0.0/30", "10.0.0.4/30"]).is_none());
        assert!(pool.contains(&Subnet::from_cidr("10.0.0.4/30").unwrap()));
        assert!(!pool.contains(&Subnet::from_cidr("10.0.0.8/30").unwrap()));
    }

    #[test]
    fn bad_pools() {
        assert!(SubnetPool::parse("10.0.0.0").is_err());
        assert!(SubnetPool::parse("10.0.0.0/31").is_err());
        assert!(SubnetPool::parse("banana/8").is_err());
        assert_eq!(SubnetPool::parse("10.1.2.3/8").unwrap().to_string(), "10.0.0.0/8");
    }
}
