use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
    str::FromStr,
};

use egressd_ipam::{allocator::Discipline, manager::GatewayPools, range::Family};

use crate::crd::{
    egress_gateway::{EgressGateway, PolicyRef},
    egress_policy::EgressIP,
};

use super::{
    elector::{CandidateSet, ElectionStrategy},
    error::Error,
};

/// Identity of an Eip group inside one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    NodeIp,
    Pool {
        ipv4: Option<IpAddr>,
        ipv6: Option<IpAddr>,
    },
}

impl GroupKey {
    /// Builds a key from the string form used in the gateway status.
    /// Both empty means the useNodeIP group.
    pub fn from_strs(ipv4: &str, ipv6: &str) -> Result<GroupKey, Error> {
        let parse = |s: &str| -> Result<Option<IpAddr>, Error> {
            if s.is_empty() {
                return Ok(None);
            }
            IpAddr::from_str(s)
                .map(Some)
                .map_err(|_| Error::InvalidAddress(s.to_string()))
        };
        let ipv4 = parse(ipv4)?;
        let ipv6 = parse(ipv6)?;
        if ipv4.is_none() && ipv6.is_none() {
            return Ok(GroupKey::NodeIp);
        }
        Ok(GroupKey::Pool { ipv4, ipv6 })
    }

    pub fn addr(&self, family: Family) -> Option<IpAddr> {
        match self {
            GroupKey::NodeIp => None,
            GroupKey::Pool { ipv4, ipv6 } => match family {
                Family::V4 => *ipv4,
                Family::V6 => *ipv6,
            },
        }
    }

    fn addrs(&self) -> Vec<IpAddr> {
        [Family::V4, Family::V6]
            .into_iter()
            .filter_map(|f| self.addr(f))
            .collect()
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKey::NodeIp => write!(f, "useNodeIP"),
            GroupKey::Pool { ipv4, ipv6 } => {
                let v4 = ipv4.map(|a| a.to_string()).unwrap_or_default();
                let v6 = ipv6.map(|a| a.to_string()).unwrap_or_default();
                write!(f, "{v4}/{v6}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EipGroup {
    pub key: GroupKey,
    pub owner: Option<String>,
    pub members: BTreeSet<PolicyRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Families {
    pub ipv4: bool,
    pub ipv6: bool,
}

impl Default for Families {
    fn default() -> Self {
        Families {
            ipv4: true,
            ipv6: true,
        }
    }
}

impl Families {
    pub fn enabled(&self, family: Family) -> bool {
        match family {
            Family::V4 => self.ipv4,
            Family::V6 => self.ipv6,
        }
    }
}

/// What a policy asks its gateway for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Desired {
    NodeIp,
    Pool {
        discipline: Discipline,
        ipv4: Option<IpAddr>,
        ipv6: Option<IpAddr>,
    },
}

impl Desired {
    pub fn from_egress_ip(egress_ip: &EgressIP) -> Result<Desired, Error> {
        if egress_ip.use_node_ip {
            return Ok(Desired::NodeIp);
        }
        let parse = |s: Option<&str>, family: Family| -> Result<Option<IpAddr>, Error> {
            match s {
                None => Ok(None),
                Some(s) => egressd_ipam::range::parse_addr(s, family)
                    .map(Some)
                    .map_err(|_| Error::InvalidAddress(s.to_string())),
            }
        };
        Ok(Desired::Pool {
            discipline: egress_ip.allocator_policy.into(),
            ipv4: parse(egress_ip.ipv4(), Family::V4)?,
            ipv6: parse(egress_ip.ipv6(), Family::V6)?,
        })
    }

    fn requested(&self, family: Family) -> Option<IpAddr> {
        match self {
            Desired::NodeIp => None,
            Desired::Pool { ipv4, ipv6, .. } => match family {
                Family::V4 => *ipv4,
                Family::V6 => *ipv6,
            },
        }
    }
}

/// Eip groups of one gateway, indexed by key and by member policy.
///
/// The table is rebuilt from the gateway status on every reconcile, mutated,
/// then rendered back. Pool addresses are held exactly while a group using
/// them exists.
#[derive(Debug, Clone)]
pub struct AllocationTable {
    pools: GatewayPools,
    families: Families,
    groups: BTreeMap<GroupKey, EipGroup>,
    by_policy: BTreeMap<PolicyRef, GroupKey>,
}

impl AllocationTable {
    pub fn new(pools: GatewayPools, families: Families) -> AllocationTable {
        AllocationTable {
            pools,
            families,
            groups: BTreeMap::new(),
            by_policy: BTreeMap::new(),
        }
    }

    /// Restores the table from the persisted gateway status.
    ///
    /// Groups whose addresses are no longer part of the pool are dropped, so
    /// their members get a fresh allocation on their next reconcile.
    pub fn load(gateway: &EgressGateway, families: Families) -> Result<AllocationTable, Error> {
        let pools = gateway.pools().map_err(Error::InvalidPool)?;
        let mut table = AllocationTable::new(pools, families);

        let Some(status) = gateway.status.as_ref() else {
            return Ok(table);
        };

        let owned = status
            .node_list
            .iter()
            .flat_map(|node| node.eips.iter().map(|eip| (Some(node.name.clone()), eip)));
        let pending = status.pending_eips.iter().map(|eip| (None, eip));

        for (owner, eip) in owned.chain(pending) {
            let key = match GroupKey::from_strs(&eip.ipv4, &eip.ipv6) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(error=?e, "drop unparsable Eip group");
                    continue;
                }
            };
            if let Some(addr) = key.addrs().iter().find(|a| !table.pools.contains(a)) {
                tracing::info!(group=%key, addr=%addr, "drop Eip group whose address left the pool");
                continue;
            }
            for policy in eip.policies.iter() {
                if table.by_policy.contains_key(policy) {
                    continue;
                }
                table.join(key.clone(), policy.clone());
                let group = table.groups.get_mut(&key).ok_or(Error::NoPool)?;
                if group.owner.is_none() {
                    group.owner = owner.clone();
                }
            }
            if table.groups.contains_key(&key) {
                for addr in key.addrs() {
                    table
                        .pools
                        .get_mut(Family::of(&addr))
                        .reserve(&addr)
                        .map_err(Error::Ipam)?;
                }
            }
        }

        Ok(table)
    }

    pub fn pools(&self) -> &GatewayPools {
        &self.pools
    }

    pub fn groups(&self) -> impl Iterator<Item = &EipGroup> {
        self.groups.values()
    }

    pub fn group_of(&self, policy: &PolicyRef) -> Option<&EipGroup> {
        self.by_policy
            .get(policy)
            .and_then(|key| self.groups.get(key))
    }

    pub fn members(&self) -> impl Iterator<Item = &PolicyRef> {
        self.by_policy.keys()
    }

    /// Places the policy into the group satisfying `desired`.
    ///
    /// A policy whose current group still satisfies `desired` keeps it.
    /// Otherwise it leaves its current group first. An explicit address
    /// already in use joins the group holding it. Addresses acquired for a
    /// failed allocation are returned to the pool.
    pub fn assign(&mut self, policy: &PolicyRef, desired: &Desired) -> Result<GroupKey, Error> {
        if let Some(key) = self.by_policy.get(policy) {
            if self.satisfies(key, desired) {
                return Ok(key.clone());
            }
        }
        self.detach(policy);

        let key = match desired {
            Desired::NodeIp => GroupKey::NodeIp,
            Desired::Pool { discipline, .. } => self.acquire(*discipline, desired)?,
        };
        self.join(key.clone(), policy.clone());
        Ok(key)
    }

    fn satisfies(&self, key: &GroupKey, desired: &Desired) -> bool {
        let discipline = match (key, desired) {
            (GroupKey::NodeIp, Desired::NodeIp) => return true,
            (GroupKey::Pool { .. }, Desired::Pool { discipline, .. }) => *discipline,
            _ => return false,
        };
        // an explicit address pins the whole pair
        let anchored = !self.wanted(desired).is_empty();
        [Family::V4, Family::V6].into_iter().all(|family| {
            let pool = self.pools.get(family);
            let have = key.addr(family);
            if !self.usable(family) {
                return have.is_none();
            }
            match (desired.requested(family), discipline) {
                (Some(requested), _) => have == Some(requested),
                (None, _) if anchored => true,
                (None, Discipline::Default) => have == pool.default_addr(),
                (None, Discipline::RoundRobin) => have
                    .map(|a| pool.contains(&a) && !pool.is_default(&a))
                    .unwrap_or(false),
            }
        })
    }

    fn usable(&self, family: Family) -> bool {
        self.families.enabled(family) && !self.pools.get(family).is_empty()
    }

    /// Explicit addresses of `desired` on the families this gateway serves.
    fn wanted(&self, desired: &Desired) -> Vec<(Family, IpAddr)> {
        [Family::V4, Family::V6]
            .into_iter()
            .filter(|family| self.usable(*family))
            .filter_map(|family| desired.requested(family).map(|a| (family, a)))
            .collect()
    }

    /// Finds the existing group holding the explicit addresses of `desired`.
    /// The group's address is taken for any family left unrequested. An
    /// explicit address held by a group whose pair disagrees with the other
    /// explicit address is a conflict.
    fn anchored_group(&self, desired: &Desired) -> Result<Option<GroupKey>, Error> {
        let wanted = self.wanted(desired);
        if wanted.is_empty() {
            return Ok(None);
        }
        let joinable = self
            .groups
            .keys()
            .find(|key| wanted.iter().all(|(family, a)| key.addr(*family) == Some(*a)));
        if let Some(key) = joinable {
            return Ok(Some(key.clone()));
        }
        match wanted
            .iter()
            .find(|(family, a)| self.pools.get(*family).is_allocated(a))
        {
            Some((_, a)) => Err(Error::AddressInUse(*a)),
            None => Ok(None),
        }
    }

    fn acquire(&mut self, discipline: Discipline, desired: &Desired) -> Result<GroupKey, Error> {
        if let Some(key) = self.anchored_group(desired)? {
            return Ok(key);
        }

        let mut acquired = Vec::new();
        let mut addrs: [Option<IpAddr>; 2] = [None, None];
        for (i, family) in [Family::V4, Family::V6].into_iter().enumerate() {
            if !self.usable(family) {
                continue;
            }
            let pool = self.pools.get_mut(family);
            match pool.allocate(discipline, desired.requested(family).as_ref()) {
                Ok(addr) => {
                    if pool.is_allocated(&addr) {
                        acquired.push(addr);
                    }
                    addrs[i] = Some(addr);
                }
                Err(e) => {
                    self.release_addrs(&acquired);
                    return Err(Error::Ipam(e));
                }
            }
        }

        if addrs.iter().all(|a| a.is_none()) {
            return Err(Error::NoPool);
        }
        Ok(GroupKey::Pool {
            ipv4: addrs[0],
            ipv6: addrs[1],
        })
    }

    fn join(&mut self, key: GroupKey, policy: PolicyRef) {
        self.groups
            .entry(key.clone())
            .or_insert_with(|| EipGroup {
                key: key.clone(),
                owner: None,
                members: BTreeSet::new(),
            })
            .members
            .insert(policy.clone());
        self.by_policy.insert(policy, key);
    }

    /// Removes the policy from its group. The group is destroyed and its
    /// addresses released when it becomes empty.
    pub fn detach(&mut self, policy: &PolicyRef) -> bool {
        let Some(key) = self.by_policy.remove(policy) else {
            return false;
        };
        let emptied = match self.groups.get_mut(&key) {
            Some(group) => {
                group.members.remove(policy);
                group.members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.groups.remove(&key);
            self.release_addrs(&key.addrs());
        }
        true
    }

    /// Detaches every member for which `keep` returns false.
    pub fn retain<F: Fn(&PolicyRef) -> bool>(&mut self, keep: F) -> Vec<PolicyRef> {
        let stale = self
            .by_policy
            .keys()
            .filter(|p| !keep(p))
            .cloned()
            .collect::<Vec<PolicyRef>>();
        for policy in stale.iter() {
            self.detach(policy);
        }
        stale
    }

    /// Re-runs the election of every group and returns how many groups
    /// changed their owner.
    pub fn reelect(&mut self, candidates: &CandidateSet, strategy: ElectionStrategy) -> usize {
        let mut transfers = 0;
        for group in self.groups.values_mut() {
            let owner = strategy
                .elect(&group.key, candidates)
                .map(|c| c.name.clone());
            if owner != group.owner {
                tracing::info!(group=%group.key, from=?group.owner, to=?owner, "transfer Eip group ownership");
                group.owner = owner;
                transfers += 1;
            }
        }
        transfers
    }

    fn release_addrs(&mut self, addrs: &[IpAddr]) {
        for addr in addrs.iter() {
            if let Err(e) = self.pools.get_mut(Family::of(addr)).release(addr) {
                tracing::warn!(addr=%addr, error=?e, "failed to release address");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crd::{
            egress_gateway::{EgressGatewaySpec, EgressGatewayStatus, EgressNode, Eip, IpPools},
            egress_policy::AllocatorPolicy,
        },
        egress::elector::Candidate,
        fixture::reconciler::test_policy,
    };
    use egressd_ipam::allocator::Usage;
    use kube::core::ObjectMeta;

    fn addr(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap()
    }

    fn gateway(ipv4: &[&str], ipv6: &[&str], default4: Option<&str>) -> EgressGateway {
        EgressGateway {
            metadata: ObjectMeta {
                name: Some("egw".to_string()),
                ..Default::default()
            },
            spec: EgressGatewaySpec {
                ippools: IpPools {
                    ipv4: ipv4.iter().map(|s| s.to_string()).collect(),
                    ipv6: ipv6.iter().map(|s| s.to_string()).collect(),
                    ipv4_default_eip: default4.map(|s| s.to_string()),
                    ipv6_default_eip: None,
                },
                ..Default::default()
            },
            status: None,
        }
    }

    fn table(ipv4: &[&str], ipv6: &[&str], default4: Option<&str>) -> AllocationTable {
        AllocationTable::load(&gateway(ipv4, ipv6, default4), Families::default()).unwrap()
    }

    fn default_pool() -> Desired {
        Desired::Pool {
            discipline: Discipline::Default,
            ipv4: None,
            ipv6: None,
        }
    }

    fn round_robin() -> Desired {
        Desired::Pool {
            discipline: Discipline::RoundRobin,
            ipv4: None,
            ipv6: None,
        }
    }

    fn v4_key(s: &str) -> GroupKey {
        GroupKey::Pool {
            ipv4: Some(addr(s)),
            ipv6: None,
        }
    }

    fn candidates(names: &[&str]) -> CandidateSet {
        CandidateSet::new(
            names
                .iter()
                .map(|n| Candidate {
                    name: n.to_string(),
                    ipv4: None,
                    ipv6: None,
                })
                .collect(),
        )
    }

    #[test]
    fn works_default_discipline_shares_group() {
        let mut t = table(&["10.10.10.1", "10.10.10.2"], &[], Some("10.10.10.1"));
        let p1 = PolicyRef::namespaced("default", "p1");
        let p2 = PolicyRef::namespaced("default", "p2");

        assert_eq!(t.assign(&p1, &default_pool()).unwrap(), v4_key("10.10.10.1"));
        assert_eq!(t.assign(&p2, &default_pool()).unwrap(), v4_key("10.10.10.1"));
        assert_eq!(t.groups().count(), 1);
        assert_eq!(t.pools().usage(Family::V4), Usage { total: 2, free: 2 });

        t.reelect(&candidates(&["node1"]), ElectionStrategy::FirstByName);
        assert_eq!(t.group_of(&p1), t.group_of(&p2));
        assert_eq!(t.group_of(&p1).unwrap().owner.as_deref(), Some("node1"));
    }

    #[test]
    fn works_round_robin_until_exhausted() {
        let mut t = table(&["10.10.10.1", "10.10.10.2"], &[], Some("10.10.10.1"));
        let p1 = PolicyRef::namespaced("default", "p1");
        let p2 = PolicyRef::namespaced("default", "p2");
        let p3 = PolicyRef::namespaced("default", "p3");

        t.assign(&p1, &default_pool()).unwrap();
        assert_eq!(t.assign(&p2, &round_robin()).unwrap(), v4_key("10.10.10.2"));
        assert_eq!(t.pools().usage(Family::V4), Usage { total: 2, free: 1 });

        let err = t.assign(&p3, &round_robin()).unwrap_err();
        assert!(err.is_exhausted());
        assert!(t.group_of(&p3).is_none());
        assert_eq!(t.pools().usage(Family::V4), Usage { total: 2, free: 1 });
    }

    #[test]
    fn works_assign_is_idempotent() {
        let mut t = table(&["10.10.10.1-10.10.10.4"], &[], None);
        let p1 = PolicyRef::cluster("p1");

        let first = t.assign(&p1, &round_robin()).unwrap();
        let second = t.assign(&p1, &round_robin()).unwrap();
        assert_eq!(first, second);
        assert_eq!(t.pools().usage(Family::V4).free, 3);
    }

    #[test]
    fn works_release_on_last_member() {
        let mut t = table(&["10.10.10.1-10.10.10.3"], &[], None);
        let p1 = PolicyRef::cluster("p1");
        let p2 = PolicyRef::cluster("p2");
        let explicit = Desired::Pool {
            discipline: Discipline::Default,
            ipv4: Some(addr("10.10.10.3")),
            ipv6: None,
        };

        t.assign(&p1, &explicit).unwrap();
        t.assign(&p2, &explicit).unwrap();
        assert_eq!(t.groups().count(), 1);
        assert_eq!(t.pools().usage(Family::V4).free, 2);

        assert!(t.detach(&p1));
        assert_eq!(t.pools().usage(Family::V4).free, 2);
        assert!(t.detach(&p2));
        assert_eq!(t.pools().usage(Family::V4).free, 3);
        assert_eq!(t.groups().count(), 0);
        assert!(!t.detach(&p2));
    }

    #[test]
    fn works_switch_discipline_releases_previous() {
        let mut t = table(&["10.10.10.1-10.10.10.3"], &[], Some("10.10.10.1"));
        let p1 = PolicyRef::cluster("p1");

        assert_eq!(t.assign(&p1, &round_robin()).unwrap(), v4_key("10.10.10.2"));
        assert_eq!(t.assign(&p1, &default_pool()).unwrap(), v4_key("10.10.10.1"));
        assert_eq!(t.pools().usage(Family::V4).free, 3);
    }

    #[test]
    fn works_explicit_address_joins_existing_group() {
        let mut t = table(&["10.10.10.1-10.10.10.3"], &["fd00::1-fd00::3"], None);
        let p1 = PolicyRef::cluster("p1");
        let p2 = PolicyRef::cluster("p2");
        let pinned = GroupKey::Pool {
            ipv4: Some(addr("10.10.10.3")),
            ipv6: Some(addr("fd00::2")),
        };

        let rr_with_v4 = Desired::Pool {
            discipline: Discipline::RoundRobin,
            ipv4: Some(addr("10.10.10.3")),
            ipv6: None,
        };
        assert_eq!(t.assign(&p1, &rr_with_v4).unwrap(), pinned);
        assert_eq!(t.assign(&p2, &rr_with_v4).unwrap(), pinned);
        assert_eq!(t.groups().count(), 1);
        assert_eq!(t.pools().usage(Family::V6).free, 2);

        // the discipline does not matter once the pair exists
        let p3 = PolicyRef::cluster("p3");
        let default_with_v4 = Desired::Pool {
            discipline: Discipline::Default,
            ipv4: Some(addr("10.10.10.3")),
            ipv6: None,
        };
        assert_eq!(t.assign(&p3, &default_with_v4).unwrap(), pinned);
        assert_eq!(t.assign(&p3, &default_with_v4).unwrap(), pinned);
        assert_eq!(t.group_of(&p3).unwrap().members.len(), 3);
        assert_eq!(t.pools().usage(Family::V4).free, 2);
        assert_eq!(t.pools().usage(Family::V6).free, 2);
    }

    #[test]
    fn fails_explicit_pair_contradicting_existing_group() {
        let mut t = table(&["10.10.10.1-10.10.10.3"], &["fd00::1-fd00::3"], None);
        let p1 = PolicyRef::cluster("p1");
        let p2 = PolicyRef::cluster("p2");

        t.assign(
            &p1,
            &Desired::Pool {
                discipline: Discipline::RoundRobin,
                ipv4: Some(addr("10.10.10.3")),
                ipv6: None,
            },
        )
        .unwrap();

        let both = Desired::Pool {
            discipline: Discipline::RoundRobin,
            ipv4: Some(addr("10.10.10.3")),
            ipv6: Some(addr("fd00::3")),
        };
        assert_eq!(
            t.assign(&p2, &both).unwrap_err(),
            Error::AddressInUse(addr("10.10.10.3"))
        );
        assert!(t.group_of(&p2).is_none());
        assert_eq!(t.pools().usage(Family::V6).free, 2);
    }

    #[test]
    fn works_edit_applied_to_keeps_group() {
        let mut t = table(&["10.10.10.1-10.10.10.3"], &["fd00::1-fd00::3"], None);
        let pref = PolicyRef::namespaced("default", "policy");
        let mut policy = test_policy();
        policy.spec.egress_ip.allocator_policy = AllocatorPolicy::RoundRobin;

        let key = t
            .assign(&pref, &Desired::from_egress_ip(&policy.spec.egress_ip).unwrap())
            .unwrap();
        t.reelect(&candidates(&["node1", "node2"]), ElectionStrategy::Rendezvous);
        let owner = t.group_of(&pref).unwrap().owner.clone();
        let usage = (t.pools().usage(Family::V4), t.pools().usage(Family::V6));

        policy.spec.applied_to.pod_selector = None;
        policy.spec.applied_to.pod_subnet = Some(vec!["10.244.1.0/24".to_string()]);
        policy.spec.dest_subnet = vec!["192.168.0.0/24".to_string()];
        let desired = Desired::from_egress_ip(&policy.spec.egress_ip).unwrap();

        assert_eq!(t.assign(&pref, &desired).unwrap(), key);
        assert_eq!(
            t.reelect(&candidates(&["node1", "node2"]), ElectionStrategy::Rendezvous),
            0
        );
        assert_eq!(t.group_of(&pref).unwrap().owner, owner);
        assert_eq!(
            (t.pools().usage(Family::V4), t.pools().usage(Family::V6)),
            usage
        );
    }

    #[test]
    fn works_rollback_on_partial_failure() {
        let mut t = table(&["10.10.10.1-10.10.10.3"], &["fd00::1"], None);
        let p1 = PolicyRef::cluster("p1");

        let err = t.assign(&p1, &round_robin()).unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(t.pools().usage(Family::V4).free, 3);
    }

    #[test]
    fn works_families_limit_allocation() {
        let gw = gateway(&["10.10.10.1"], &["fd00::1"], None);
        let mut t = AllocationTable::load(
            &gw,
            Families {
                ipv4: false,
                ipv6: true,
            },
        )
        .unwrap();
        let key = t.assign(&PolicyRef::cluster("p1"), &default_pool()).unwrap();
        assert_eq!(
            key,
            GroupKey::Pool {
                ipv4: None,
                ipv6: Some(addr("fd00::1")),
            }
        );

        let gw = gateway(&[], &["fd00::1"], None);
        let mut t = AllocationTable::load(
            &gw,
            Families {
                ipv4: true,
                ipv6: false,
            },
        )
        .unwrap();
        assert_eq!(
            t.assign(&PolicyRef::cluster("p1"), &default_pool()).unwrap_err(),
            Error::NoPool
        );
    }

    #[test]
    fn works_node_ip_group() {
        let mut t = table(&["10.10.10.1"], &[], None);
        let p1 = PolicyRef::cluster("p1");
        let p2 = PolicyRef::namespaced("ns", "p2");

        assert_eq!(t.assign(&p1, &Desired::NodeIp).unwrap(), GroupKey::NodeIp);
        assert_eq!(t.assign(&p2, &Desired::NodeIp).unwrap(), GroupKey::NodeIp);
        assert_eq!(t.groups().count(), 1);
        assert_eq!(t.pools().usage(Family::V4).free, 1);
    }

    #[test]
    fn works_reelect() {
        let mut t = table(&["10.10.10.1-10.10.10.3"], &[], None);
        t.assign(&PolicyRef::cluster("p1"), &round_robin()).unwrap();
        t.assign(&PolicyRef::cluster("p2"), &Desired::NodeIp).unwrap();

        assert_eq!(t.reelect(&candidates(&["node1", "node2"]), ElectionStrategy::FirstByName), 2);
        assert!(t.groups().all(|g| g.owner.as_deref() == Some("node1")));
        assert_eq!(t.reelect(&candidates(&["node1", "node2"]), ElectionStrategy::FirstByName), 0);

        assert_eq!(t.reelect(&candidates(&["node2"]), ElectionStrategy::FirstByName), 2);
        assert!(t.groups().all(|g| g.owner.as_deref() == Some("node2")));

        assert_eq!(t.reelect(&CandidateSet::default(), ElectionStrategy::FirstByName), 2);
        assert!(t.groups().all(|g| g.owner.is_none()));
    }

    #[test]
    fn works_retain() {
        let mut t = table(&["10.10.10.1-10.10.10.3"], &[], None);
        let p1 = PolicyRef::cluster("p1");
        let p2 = PolicyRef::cluster("p2");
        t.assign(&p1, &round_robin()).unwrap();
        t.assign(&p2, &round_robin()).unwrap();

        let removed = t.retain(|p| p.name == "p1");
        assert_eq!(removed, vec![p2]);
        assert_eq!(t.members().count(), 1);
        assert_eq!(t.pools().usage(Family::V4).free, 2);
    }

    #[test]
    fn works_load() {
        let mut gw = gateway(&["10.10.10.1-10.10.10.3"], &[], Some("10.10.10.1"));
        gw.status = Some(EgressGatewayStatus {
            node_list: vec![EgressNode {
                name: "node1".to_string(),
                status: "Ready".to_string(),
                eips: vec![
                    Eip {
                        ipv4: "10.10.10.1".to_string(),
                        ipv6: String::new(),
                        policies: vec![PolicyRef::namespaced("default", "p1")],
                    },
                    Eip {
                        ipv4: "10.10.10.2".to_string(),
                        ipv6: String::new(),
                        policies: vec![PolicyRef::namespaced("default", "p2")],
                    },
                    Eip {
                        ipv4: "10.10.20.1".to_string(),
                        ipv6: String::new(),
                        policies: vec![PolicyRef::namespaced("default", "p3")],
                    },
                    Eip {
                        ipv4: String::new(),
                        ipv6: String::new(),
                        policies: vec![PolicyRef::cluster("c1")],
                    },
                ],
            }],
            pending_eips: vec![Eip {
                ipv4: "10.10.10.3".to_string(),
                ipv6: String::new(),
                policies: vec![PolicyRef::cluster("c2")],
            }],
            ..Default::default()
        });

        let t = AllocationTable::load(&gw, Families::default()).unwrap();
        assert_eq!(t.groups().count(), 4);
        assert!(t.group_of(&PolicyRef::namespaced("default", "p3")).is_none());
        assert_eq!(
            t.group_of(&PolicyRef::cluster("c1")).unwrap().owner.as_deref(),
            Some("node1")
        );
        assert_eq!(t.group_of(&PolicyRef::cluster("c2")).unwrap().owner, None);
        assert_eq!(t.pools().usage(Family::V4), Usage { total: 3, free: 1 });
    }

    #[test]
    fn works_desired_from_egress_ip() {
        let eip = EgressIP {
            ipv4: Some("10.10.10.2".to_string()),
            ipv6: Some(String::new()),
            use_node_ip: false,
            allocator_policy: crate::crd::egress_policy::AllocatorPolicy::RoundRobin,
        };
        assert_eq!(
            Desired::from_egress_ip(&eip).unwrap(),
            Desired::Pool {
                discipline: Discipline::RoundRobin,
                ipv4: Some(addr("10.10.10.2")),
                ipv6: None,
            }
        );

        let bad = EgressIP {
            ipv4: Some("fd00::1".to_string()),
            ..Default::default()
        };
        assert!(Desired::from_egress_ip(&bad).is_err());

        let node_ip = EgressIP {
            use_node_ip: true,
            ..Default::default()
        };
        assert_eq!(Desired::from_egress_ip(&node_ip).unwrap(), Desired::NodeIp);
    }
}
