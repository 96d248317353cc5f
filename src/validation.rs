//! Address entry parsing and validation.
//!
//! IP list lines come in three shapes:
//! - a bare host address (`203.0.113.7`), normalized to `/32` or `/128`
//! - a CIDR block (`203.0.113.0/24`)
//! - an inclusive dash range (`203.0.113.10-203.0.113.20`)

use anyhow::{bail, Result};
use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A validated network target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressEntry {
    Host(IpAddr),
    Network(IpNet),
    Range(IpAddr, IpAddr),
}

impl AddressEntry {
    pub fn is_ipv4(&self) -> bool {
        match self {
            AddressEntry::Host(ip) => ip.is_ipv4(),
            AddressEntry::Network(net) => matches!(net, IpNet::V4(_)),
            AddressEntry::Range(start, _) => start.is_ipv4(),
        }
    }
}

/// Renders entries the way firewall tools expect them: hosts always carry
/// an explicit prefix length.
impl fmt::Display for AddressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressEntry::Host(ip) => write!(f, "{}", IpNet::from(*ip)),
            AddressEntry::Network(net) => write!(f, "{}", net),
            AddressEntry::Range(start, end) => write!(f, "{}-{}", start, end),
        }
    }
}

impl FromStr for AddressEntry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        validate_entry(s)
    }
}

/// Validate a single IP address string.
///
/// # Examples
/// ```
/// use regionwall::validation::validate_ip;
/// assert!(validate_ip("192.168.1.1").is_ok());
/// assert!(validate_ip("::1").is_ok());
/// assert!(validate_ip("invalid").is_err());
/// ```
pub fn validate_ip(ip_str: &str) -> Result<IpAddr> {
    ip_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid IP address: {}", ip_str))
}

/// Validate one list entry and classify it.
///
/// # Examples
/// ```
/// use regionwall::validation::{validate_entry, AddressEntry};
/// assert!(matches!(validate_entry("10.0.0.1"), Ok(AddressEntry::Host(_))));
/// assert!(matches!(validate_entry("10.0.0.0/8"), Ok(AddressEntry::Network(_))));
/// assert!(matches!(validate_entry("10.0.0.1-10.0.0.9"), Ok(AddressEntry::Range(_, _))));
/// assert!(validate_entry("10.0.0.0/33").is_err());
/// ```
pub fn validate_entry(entry: &str) -> Result<AddressEntry> {
    let entry = entry.trim();
    if entry.is_empty() {
        bail!("Empty address entry");
    }

    if entry.contains('/') {
        let net: IpNet = entry
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid CIDR: {}", entry))?;
        return Ok(AddressEntry::Network(net));
    }

    if let Some((start, end)) = entry.split_once('-') {
        let start = validate_ip(start)?;
        let end = validate_ip(end)?;
        if start.is_ipv4() != end.is_ipv4() {
            bail!("Range mixes IPv4 and IPv6: {}", entry);
        }
        if start > end {
            bail!("Range start is after range end: {}", entry);
        }
        return Ok(AddressEntry::Range(start, end));
    }

    Ok(AddressEntry::Host(validate_ip(entry)?))
}
