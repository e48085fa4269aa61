use std::{
    collections::HashSet,
    net::IpAddr,
    str::FromStr,
};

use k8s_openapi::{api::core::v1::Node, apimachinery::pkg::apis::meta::v1::LabelSelector};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::{crd::egress_tunnel::EgressTunnel, util::match_selector};

use super::{allocation::GroupKey, error::Error};

/// A node eligible to own Eip groups of a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub ipv4: Option<IpAddr>,
    pub ipv6: Option<IpAddr>,
}

/// Candidates of one gateway, sorted by node name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet(Vec<Candidate>);

impl CandidateSet {
    pub fn new(mut candidates: Vec<Candidate>) -> CandidateSet {
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates.dedup_by(|a, b| a.name == b.name);
        CandidateSet(candidates)
    }

    pub fn get(&self, name: &str) -> Option<&Candidate> {
        self.0.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.0.iter()
    }
}

/// Builds the candidate set of a gateway: nodes matching its selector whose
/// tunnel reports Ready.
pub fn collect_candidates(
    selector: &LabelSelector,
    nodes: &[Node],
    tunnels: &[EgressTunnel],
) -> Result<CandidateSet, crate::error::Error> {
    let ready = tunnels
        .iter()
        .filter(|t| t.is_ready())
        .map(|t| t.name_any())
        .collect::<HashSet<String>>();

    let mut candidates = Vec::new();
    for node in nodes.iter() {
        let name = node.name_any();
        if !ready.contains(&name) || !match_selector(selector, node.labels())? {
            continue;
        }
        let (ipv4, ipv6) = native_addresses(node);
        candidates.push(Candidate { name, ipv4, ipv6 });
    }
    Ok(CandidateSet::new(candidates))
}

// First InternalIP of each family, falling back to ExternalIP.
fn native_addresses(node: &Node) -> (Option<IpAddr>, Option<IpAddr>) {
    let addresses = node
        .status
        .as_ref()
        .and_then(|status| status.addresses.as_ref())
        .map(|a| a.as_slice())
        .unwrap_or_default();

    let find = |v4: bool| {
        ["InternalIP", "ExternalIP"].iter().find_map(|kind| {
            addresses
                .iter()
                .filter(|a| a.type_ == *kind)
                .filter_map(|a| IpAddr::from_str(&a.address).ok())
                .find(|a| a.is_ipv4() == v4)
        })
    };
    (find(true), find(false))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ElectionStrategy {
    #[default]
    #[serde(rename = "first-by-name")]
    FirstByName,
    #[serde(rename = "rendezvous")]
    Rendezvous,
}

impl FromStr for ElectionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-by-name" => Ok(ElectionStrategy::FirstByName),
            "rendezvous" => Ok(ElectionStrategy::Rendezvous),
            _ => Err(Error::UnknownElectionStrategy(s.to_string())),
        }
    }
}

impl std::fmt::Display for ElectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstByName => write!(f, "first-by-name"),
            Self::Rendezvous => write!(f, "rendezvous"),
        }
    }
}

impl ElectionStrategy {
    /// Picks the owner of a group. The result depends only on the key and
    /// the candidate set.
    pub fn elect<'a>(&self, key: &GroupKey, candidates: &'a CandidateSet) -> Option<&'a Candidate> {
        match self {
            ElectionStrategy::FirstByName => candidates.iter().next(),
            ElectionStrategy::Rendezvous => candidates
                .iter()
                .max_by_key(|c| (weight(key, &c.name), std::cmp::Reverse(c.name.clone()))),
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// 64-bit FNV-1a over "<key>\0<node>". Must stay stable across replicas and releases.
fn weight(key: &GroupKey, node: &str) -> u64 {
    let key = key.to_string();
    key.bytes()
        .chain(std::iter::once(0))
        .chain(node.bytes())
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}
