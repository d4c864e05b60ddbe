//! IP address blocks written as a single address (`10.0.0.7`) or CIDR (`10.0.0.0/8`).

use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A network a client address is tested against; a bare address is a /32 or /128
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpBlock(IpNet);

impl IpBlock {
    pub fn network(&self) -> &IpNet {
        &self.0
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip) || unmap(ip).is_some_and(|v4| self.0.contains(&v4))
    }
}

/// The IPv4 address behind a v4-mapped IPv6 client (`::ffff:a.b.c.d`)
fn unmap(ip: &IpAddr) -> Option<IpAddr> {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4),
        IpAddr::V4(_) => None,
    }
}

impl FromStr for IpBlock {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.contains('/') {
            return IpNet::from_str(value)
                .map(Self)
                .map_err(|e| format!("'{}' is not a valid network: {}", value, e));
        }

        let address = IpAddr::from_str(value).map_err(|_| format!("'{}' is not an IP address", value))?;
        let prefix_len = if address.is_ipv4() { 32 } else { 128 };
        IpNet::new(address, prefix_len)
            .map(Self)
            .map_err(|e| format!("'{}' is not a valid address: {}", value, e))
    }
}

impl fmt::Display for IpBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
