use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use ipnet::IpNet;

use super::error::Error;

// Upper bound of addresses one family of a pool may expand to.
pub const MAX_POOL_SIZE: u128 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Family {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    fn of_net(net: &IpNet) -> Family {
        match net {
            IpNet::V4(_) => Family::V4,
            IpNet::V6(_) => Family::V6,
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4 => write!(f, "ipv4"),
            Self::V6 => write!(f, "ipv6"),
        }
    }
}

pub fn parse_addr(s: &str, family: Family) -> Result<IpAddr, Error> {
    let addr = IpAddr::from_str(s.trim()).map_err(|_| Error::InvalidAddress(s.to_string()))?;
    if Family::of(&addr) != family {
        return Err(Error::ProtocolMismatch);
    }
    Ok(addr)
}

/// Expands pool entries into an ordered list of addresses.
///
/// An entry is a single address (`10.6.1.21`), an inclusive range
/// (`10.6.1.22-10.6.1.30`) or a CIDR (`10.6.1.64/30`).
/// Addresses keep the declaration order of the entries.
pub fn parse_entries(entries: &[String], family: Family) -> Result<Vec<IpAddr>, Error> {
    let mut addrs = Vec::new();
    let mut seen = HashSet::new();
    for entry in entries.iter() {
        for addr in parse_entry(entry.trim(), family)? {
            if !seen.insert(addr) {
                return Err(Error::Duplicated(addr));
            }
            addrs.push(addr);
        }
        if addrs.len() as u128 > MAX_POOL_SIZE {
            return Err(Error::PoolTooLarge(MAX_POOL_SIZE));
        }
    }
    Ok(addrs)
}

fn parse_entry(entry: &str, family: Family) -> Result<Vec<IpAddr>, Error> {
    if let Some((start, end)) = entry.split_once('-') {
        let start = addr_to_bits(&parse_addr(start, family)?);
        let end = addr_to_bits(&parse_addr(end, family)?);
        if start > end {
            return Err(Error::InvalidRange(entry.to_string()));
        }
        if end - start >= MAX_POOL_SIZE {
            return Err(Error::PoolTooLarge(MAX_POOL_SIZE));
        }
        return Ok((start..=end).map(|b| bits_to_addr(b, family)).collect());
    }

    if entry.contains('/') {
        let cidr = IpNet::from_str(entry).map_err(|_| Error::InvalidEntry(entry.to_string()))?;
        if Family::of_net(&cidr) != family {
            return Err(Error::ProtocolMismatch);
        }
        let host_bits = u32::from(cidr.max_prefix_len() - cidr.prefix_len());
        if 1u128 << host_bits.min(127) > MAX_POOL_SIZE || host_bits == 128 {
            return Err(Error::PoolTooLarge(MAX_POOL_SIZE));
        }
        let base = addr_to_bits(&cidr.network());
        return Ok((0..(1u128 << host_bits))
            .map(|i| bits_to_addr(base + i, family))
            .collect());
    }

    Ok(vec![parse_addr(entry, family)?])
}

fn addr_to_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u128::from(u32::from(*a)),
        IpAddr::V6(a) => u128::from(*a),
    }
}

fn bits_to_addr(bits: u128, family: Family) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}
