//! Networking utilities for the relay.
//!
//! This library provides helpers for:
//! - CIDR prefixes over IPv4 and IPv6
//! - Source address allow-lists built from comma-separated CIDR blocks

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use thiserror::Error;

/// Networking errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid CIDR prefix.
    #[error("invalid CIDR prefix: {0}")]
    InvalidPrefix(String),

    /// Allow-list with no entries.
    #[error("allow-list must contain at least one CIDR block")]
    EmptyList,
}

// ============================================================================
// CIDR prefixes
// ============================================================================

/// An IPv4 or IPv6 network range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    /// Network address (host bits cleared).
    pub address: IpAddr,

    /// Prefix length (e.g., 24 for /24).
    pub prefix_len: u8,
}

impl IpPrefix {
    /// Create a new prefix, masking the address to the prefix length.
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, NetworkError> {
        let max_len = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max_len {
            return Err(NetworkError::InvalidPrefix(format!(
                "prefix length {} exceeds {}",
                prefix_len, max_len
            )));
        }

        Ok(Self {
            address: mask(address, prefix_len),
            prefix_len,
        })
    }

    /// Parse from CIDR notation (e.g., "192.168.1.0/24" or "2001:db8::/32").
    pub fn from_cidr(s: &str) -> Result<Self, NetworkError> {
        let Some((addr_str, prefix_str)) = s.split_once('/') else {
            return Err(NetworkError::InvalidPrefix(format!(
                "missing '/' in CIDR: {}",
                s
            )));
        };

        let address = IpAddr::from_str(addr_str)
            .map_err(|_| NetworkError::InvalidAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| NetworkError::InvalidPrefix(prefix_str.to_string()))?;

        Self::new(address, prefix_len)
    }

    /// Check if an address is within this prefix.
    ///
    /// IPv4-mapped IPv6 addresses are compared as IPv4.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        match (self.address, addr) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                mask(addr, self.prefix_len) == self.address
            }
            _ => false,
        }
    }
}

impl FromStr for IpPrefix {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

impl std::fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

fn mask(addr: IpAddr, prefix_len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => IpAddr::V4(mask_ipv4(v4, prefix_len)),
        IpAddr::V6(v6) => IpAddr::V6(mask_ipv6(v6, prefix_len)),
    }
}

/// Mask an IPv4 address to a prefix length.
fn mask_ipv4(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let bits = u32::from_be_bytes(addr.octets());
    let mask = if prefix_len == 0 {
        0
    } else if prefix_len >= 32 {
        u32::MAX
    } else {
        u32::MAX << (32 - prefix_len)
    };
    Ipv4Addr::from((bits & mask).to_be_bytes())
}

/// Mask an IPv6 address to a prefix length.
fn mask_ipv6(addr: Ipv6Addr, prefix_len: u8) -> Ipv6Addr {
    let bits = u128::from_be_bytes(addr.octets());
    let mask = if prefix_len == 0 {
        0
    } else if prefix_len >= 128 {
        u128::MAX
    } else {
        u128::MAX << (128 - prefix_len)
    };
    Ipv6Addr::from((bits & mask).to_be_bytes())
}

// ============================================================================
// Allow-lists
// ============================================================================

/// Default allow-list: every IPv4 and IPv6 source.
pub const ALLOW_ALL: &str = "0.0.0.0/0,::/0";

/// Ordered set of CIDR ranges a peer address must fall into.
///
/// IPv4 and IPv6 ranges can be mixed freely in one list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAllowList {
    prefixes: Vec<IpPrefix>,
}

impl IpAllowList {
    /// Create an allow-list from already parsed prefixes.
    pub fn new(prefixes: Vec<IpPrefix>) -> Result<Self, NetworkError> {
        if prefixes.is_empty() {
            return Err(NetworkError::EmptyList);
        }
        Ok(Self { prefixes })
    }

    /// Parse a comma-separated list of CIDR blocks.
    ///
    /// Surrounding whitespace is ignored; empty entries are rejected.
    pub fn parse(list: &str) -> Result<Self, NetworkError> {
        let prefixes = list
            .split(',')
            .map(|entry| {
                let entry = entry.trim();
                if entry.is_empty() {
                    return Err(NetworkError::InvalidPrefix(format!(
                        "empty entry in CIDR list: {:?}",
                        list
                    )));
                }
                IpPrefix::from_cidr(entry)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(prefixes)
    }

    /// Check whether an address falls into at least one configured range.
    pub fn allows(&self, addr: IpAddr) -> bool {
        self.prefixes.iter().any(|p| p.contains(addr))
    }

    /// The configured ranges, in order.
    pub fn prefixes(&self) -> &[IpPrefix] {
        &self.prefixes
    }
}

impl FromStr for IpAllowList {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Default for IpAllowList {
    fn default() -> Self {
        Self {
            prefixes: vec![
                IpPrefix {
                    address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    prefix_len: 0,
                },
                IpPrefix {
                    address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                    prefix_len: 0,
                },
            ],
        }
    }
}

impl std::fmt::Display for IpAllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, prefix) in self.prefixes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", prefix)?;
        }
        Ok(())
    }
}
