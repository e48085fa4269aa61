use std::{
    collections::{BTreeSet, HashMap},
    net::IpAddr,
    str::FromStr,
};

use super::{
    error::Error,
    range::{parse_addr, parse_entries, Family},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Discipline {
    #[default]
    Default,
    RoundRobin,
}

impl FromStr for Discipline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "default" => Ok(Discipline::Default),
            "rr" | "round-robin" => Ok(Discipline::RoundRobin),
            _ => Err(Error::InvalidEntry(s.to_string())),
        }
    }
}

impl std::fmt::Display for Discipline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::RoundRobin => write!(f, "round-robin"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total: u64,
    pub free: u64,
}

/// Address pool of one family of an egress gateway.
///
/// The designated default address is shared by every default-discipline
/// allocation. It is never handed out by round-robin and never held,
/// so it does not count against `free`.
#[derive(Debug, Clone)]
pub struct EipPool {
    family: Family,
    addrs: Vec<IpAddr>,
    index: HashMap<IpAddr, usize>,
    default: Option<usize>,
    held: BTreeSet<usize>,
}

impl EipPool {
    pub fn new(family: Family, entries: &[String], default: Option<&str>) -> Result<EipPool, Error> {
        let addrs = parse_entries(entries, family)?;
        let index: HashMap<IpAddr, usize> =
            addrs.iter().enumerate().map(|(i, a)| (*a, i)).collect();

        let default = match default.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => {
                let addr = parse_addr(d, family)?;
                match index.get(&addr) {
                    Some(i) => Some(*i),
                    None => return Err(Error::DefaultNotContained(addr)),
                }
            }
            None if addrs.is_empty() => None,
            None => Some(0),
        };

        Ok(EipPool {
            family,
            addrs,
            index,
            default,
            held: BTreeSet::new(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.index.contains_key(addr)
    }

    pub fn default_addr(&self) -> Option<IpAddr> {
        self.default.map(|i| self.addrs[i])
    }

    pub fn is_default(&self, addr: &IpAddr) -> bool {
        match (self.default, self.index.get(addr)) {
            (Some(d), Some(i)) => d == *i,
            _ => false,
        }
    }

    pub fn is_allocated(&self, addr: &IpAddr) -> bool {
        match self.index.get(addr) {
            Some(i) => self.held.contains(i),
            None => false,
        }
    }

    pub fn allocate(&mut self, discipline: Discipline, requested: Option<&IpAddr>) -> Result<IpAddr, Error> {
        if self.addrs.is_empty() {
            return Err(Error::EmptyPool);
        }
        if let Some(addr) = requested {
            return self.allocate_addr(addr);
        }
        match discipline {
            Discipline::Default => self.default_addr().ok_or(Error::EmptyPool),
            Discipline::RoundRobin => self.allocate_next(),
        }
    }

    pub fn allocate_addr(&mut self, addr: &IpAddr) -> Result<IpAddr, Error> {
        if Family::of(addr) != self.family {
            return Err(Error::ProtocolMismatch);
        }
        let idx = *self.index.get(addr).ok_or(Error::NotContains)?;
        if self.default == Some(idx) {
            return Ok(*addr);
        }
        if !self.held.insert(idx) {
            return Err(Error::AlreadyAllocated(*addr));
        }
        Ok(*addr)
    }

    pub fn allocate_next(&mut self) -> Result<IpAddr, Error> {
        let size = self.addrs.len();
        if size == 0 {
            return Err(Error::EmptyPool);
        }
        let start = match self.held.iter().next_back() {
            Some(last) => last + 1,
            None => 0,
        };
        for offset in 0..size {
            let idx = (start + offset) % size;
            if self.default == Some(idx) || self.held.contains(&idx) {
                continue;
            }
            self.held.insert(idx);
            return Ok(self.addrs[idx]);
        }
        Err(Error::Exhausted)
    }

    /// Marks an address as held without treating an existing hold as a conflict.
    /// Used when rebuilding the pool state from persisted allocations.
    pub fn reserve(&mut self, addr: &IpAddr) -> Result<(), Error> {
        let idx = *self.index.get(addr).ok_or(Error::NotContains)?;
        if self.default != Some(idx) {
            self.held.insert(idx);
        }
        Ok(())
    }

    pub fn release(&mut self, addr: &IpAddr) -> Result<IpAddr, Error> {
        let idx = *self.index.get(addr).ok_or(Error::NotContains)?;
        if self.default == Some(idx) {
            return Ok(*addr);
        }
        if !self.held.remove(&idx) {
            return Err(Error::NoReleasableAddress);
        }
        Ok(*addr)
    }

    pub fn usage(&self) -> Usage {
        let total = self.addrs.len() as u64;
        Usage {
            total,
            free: total - self.held.len() as u64,
        }
    }
}
