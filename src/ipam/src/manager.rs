use std::net::IpAddr;

use super::{
    allocator::{EipPool, Usage},
    error::Error,
    range::Family,
};

/// Both address families of one egress gateway.
#[derive(Debug, Clone)]
pub struct GatewayPools {
    pub v4: EipPool,
    pub v6: EipPool,
}

impl GatewayPools {
    pub fn new(
        ipv4: &[String],
        ipv6: &[String],
        ipv4_default: Option<&str>,
        ipv6_default: Option<&str>,
    ) -> Result<GatewayPools, Error> {
        Ok(GatewayPools {
            v4: EipPool::new(Family::V4, ipv4, ipv4_default)?,
            v6: EipPool::new(Family::V6, ipv6, ipv6_default)?,
        })
    }

    pub fn get(&self, family: Family) -> &EipPool {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    pub fn get_mut(&mut self, family: Family) -> &mut EipPool {
        match family {
            Family::V4 => &mut self.v4,
            Family::V6 => &mut self.v6,
        }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.get(Family::of(addr)).contains(addr)
    }

    pub fn usage(&self, family: Family) -> Usage {
        self.get(family).usage()
    }

    // Returns addresses of this pool which also appear in the other.
    pub fn overlaps(&self, other: &GatewayPools) -> Vec<IpAddr> {
        let mut res = Vec::new();
        for family in [Family::V4, Family::V6] {
            let theirs = other.get(family);
            for addr in self.get(family).addrs().iter() {
                if theirs.contains(addr) {
                    res.push(*addr);
                }
            }
        }
        res
    }
}
