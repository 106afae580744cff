#![no_std]
extern crate alloc;

pub mod macros;

use alloc::string::{
    String,
    ToString,
};
use core::{
    fmt::{
        Debug,
        Display,
        Formatter,
    },
    net::{
        AddrParseError,
        IpAddr,
        Ipv4Addr,
        Ipv6Addr,
    },
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Expected format <address>/<mask> (a.e. 192.168.2.0/24), but got '{0}'")]
    InvalidPrefixFormat(String),
    #[error("Unable to parse address => '{0}'")]
    IpAddrParse(#[from] AddrParseError),
    #[error("Unable to parse int => '{0}'")]
    IntParse(#[from] ParseIntError),
    #[error("Mask {0} is too long for the address family")]
    MaskTooLong(u8),
}

/// This value represents a IPv6/IPv4 network prefix. This prefix represents a sub-share of the network like the local network at home or
/// a subnetwork in a bigger network.
#[derive(Ord, PartialOrd, Eq, PartialEq, Hash, Clone, Copy)]
pub struct Prefix {
    pub address: IpAddr,
    pub mask: u8,
}

impl FromStr for Prefix {
    type Err = CommonError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let (addr, mask) = string.split_once("/").ok_or(CommonError::InvalidPrefixFormat(string.to_string()))?;
        let prefix = Self {
            address: IpAddr::from_str(addr)?,
            mask: mask.parse()?,
        };
        if prefix.mask > prefix.max_mask() {
            return Err(CommonError::MaskTooLong(prefix.mask));
        }
        Ok(prefix)
    }
}

impl Debug for Prefix {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        write!(formatter, "{}/{}", self.address, self.mask)
    }
}

impl Display for Prefix {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        write!(formatter, "{}/{}", self.address, self.mask)
    }
}

impl From<IpAddr> for Prefix {
    fn from(address: IpAddr) -> Self {
        let mask = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        Self { address, mask }
    }
}

impl Prefix {
    pub const ANY_IPV4: Prefix = Prefix {
        address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
        mask: 0,
    };
    pub const ANY_IPV6: Prefix = Prefix {
        address: IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0)),
        mask: 0,
    };

    pub fn new(address: IpAddr, mask: u8) -> Self {
        Self { address, mask }
    }

    #[inline]
    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    /// Returns the width of the address family in bits (32 for IPv4, 128 for IPv6).
    #[inline]
    pub fn max_mask(&self) -> u8 {
        match self.address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    /// The address interpreted as an unsigned integer in the low bits of an u128.
    fn address_bits(&self) -> u128 {
        match self.address {
            IpAddr::V4(addr) => u32::from(addr) as u128,
            IpAddr::V6(addr) => u128::from(addr),
        }
    }

    fn netmask_bits(&self) -> u128 {
        netmask(self.max_mask(), self.mask)
    }

    fn from_bits(bits: u128, mask: u8, ipv4: bool) -> Self {
        let address = if ipv4 {
            IpAddr::V4(Ipv4Addr::from(bits as u32))
        } else {
            IpAddr::V6(Ipv6Addr::from(bits))
        };
        Self { address, mask }
    }

    /// Returns the canonical form of this prefix with all host bits zeroed.
    pub fn network(&self) -> Prefix {
        Self::from_bits(self.address_bits() & self.netmask_bits(), self.mask, self.is_ipv4())
    }

    /// Whether this prefix covers the `other` prefix. A prefix covers itself; prefixes of different address families never cover each
    /// other.
    pub fn contains(&self, other: &Prefix) -> bool {
        if self.is_ipv4() != other.is_ipv4() || self.mask > other.mask {
            return false;
        }
        let netmask = self.netmask_bits();
        (other.address_bits() & netmask) == (self.address_bits() & netmask)
    }

    pub fn contains_address(&self, address: &IpAddr) -> bool {
        self.contains(&Prefix::from(*address))
    }

    /// Returns the supernet of this prefix truncated to `mask` bits. Masks longer than the own mask just canonicalize the prefix.
    pub fn supernet(&self, mask: u8) -> Prefix {
        let mask = mask.min(self.mask);
        let bits = self.address_bits() & netmask(self.max_mask(), mask);
        Self::from_bits(bits, mask, self.is_ipv4())
    }

    /// Maps an IPv4 prefix into the IPv4-mapped IPv6 space (`::ffff:0:0/96`). IPv6 prefixes are returned unchanged.
    pub fn mapped_ipv6(&self) -> Prefix {
        match self.address {
            IpAddr::V4(addr) => Prefix {
                address: IpAddr::V6(addr.to_ipv6_mapped()),
                mask: self.mask + 96,
            },
            IpAddr::V6(_) => *self,
        }
    }

    /// The inverse of [`Prefix::mapped_ipv6`]: extracts the IPv4 prefix out of an IPv4-mapped IPv6 prefix. Returns `None` when the
    /// address lies outside of `::ffff:0:0/96` or the mask does not reach into the IPv4 bits.
    pub fn mapped_ipv4(&self) -> Option<Prefix> {
        match self.address {
            IpAddr::V4(_) => Some(*self),
            IpAddr::V6(addr) => {
                let addr = addr.to_ipv4_mapped()?;
                if self.mask < 96 {
                    return None;
                }
                Some(Prefix {
                    address: IpAddr::V4(addr),
                    mask: self.mask - 96,
                })
            }
        }
    }
}

fn netmask(total_bits: u8, mask: u8) -> u128 {
    if mask == 0 {
        return 0;
    }
    let ones = !0u128 >> (128 - total_bits as u32);
    if mask >= total_bits {
        return ones;
    }
    ones & !(ones >> mask as u32)
}

#[cfg(test)]
mod test {
    use crate::Prefix;
    use core::{
        net::IpAddr,
        str::FromStr,
    };

    #[test]
    fn test_contains() {
        let net = Prefix::from_str("10.0.0.0/8").unwrap();
        assert!(net.contains(&Prefix::from_str("10.1.0.0/16").unwrap()));
        assert!(net.contains(&net));
        assert!(!net.contains(&Prefix::from_str("11.0.0.0/8").unwrap()));
        assert!(!net.contains(&Prefix::from_str("0.0.0.0/0").unwrap()));
        assert!(!net.contains(&Prefix::from_str("fd00::/8").unwrap()));
        assert!(net.contains_address(&IpAddr::from_str("10.200.1.1").unwrap()));
        assert!(!net.contains_address(&IpAddr::from_str("192.0.2.1").unwrap()));
    }

    #[test]
    fn test_contains_any() {
        assert!(Prefix::ANY_IPV4.contains(&Prefix::from_str("203.0.113.0/24").unwrap()));
        assert!(Prefix::ANY_IPV6.contains(&Prefix::from_str("2001:db8::/32").unwrap()));
    }

    #[test]
    fn test_supernet() {
        let net = Prefix::from_str("10.1.1.0/24").unwrap();
        assert_eq!(net.supernet(16), Prefix::from_str("10.1.0.0/16").unwrap());
        assert_eq!(net.supernet(8), Prefix::from_str("10.0.0.0/8").unwrap());
        let net = Prefix::from_str("2001:db8:cafe::/48").unwrap();
        assert_eq!(net.supernet(32), Prefix::from_str("2001:db8::/32").unwrap());
    }

    #[test]
    fn test_network_canonicalization() {
        let net = Prefix::from_str("10.1.2.3/8").unwrap();
        assert_eq!(net.network(), Prefix::from_str("10.0.0.0/8").unwrap());
    }

    #[test]
    fn test_mapped_roundtrip() {
        let net = Prefix::from_str("192.0.2.0/24").unwrap();
        let mapped = net.mapped_ipv6();
        assert_eq!(mapped, Prefix::from_str("::ffff:192.0.2.0/120").unwrap());
        assert_eq!(mapped.mapped_ipv4(), Some(net));
        assert_eq!(Prefix::from_str("2001:db8::/32").unwrap().mapped_ipv4(), None);
    }
}
