use crate::crd::{
    egress_gateway::{EgressGatewayStatus, EgressNode, Eip, IpUsage, PolicyRef, NODE_STATUS_READY},
    egress_policy::{EgressPolicyStatus, EipStatus, PolicyPhase},
};

use egressd_ipam::range::Family;

use super::{
    allocation::{AllocationTable, EipGroup, GroupKey},
    elector::CandidateSet,
};

/// Renders the gateway status from the allocation table.
///
/// Every candidate gets a node entry even when it owns nothing. Groups without
/// a current candidate as owner are reported as pending.
pub fn gateway_status(table: &AllocationTable, candidates: &CandidateSet) -> EgressGatewayStatus {
    let node_list = candidates
        .iter()
        .map(|c| EgressNode {
            name: c.name.clone(),
            status: NODE_STATUS_READY.to_string(),
            eips: table
                .groups()
                .filter(|g| g.owner.as_deref() == Some(c.name.as_str()))
                .map(eip)
                .collect(),
        })
        .collect();

    let pending_eips = table
        .groups()
        .filter(|g| match g.owner.as_deref() {
            Some(owner) => !candidates.contains(owner),
            None => true,
        })
        .map(eip)
        .collect();

    EgressGatewayStatus {
        node_list,
        pending_eips,
        ip_usage: ip_usage(table),
    }
}

pub fn ip_usage(table: &AllocationTable) -> IpUsage {
    let v4 = table.pools().usage(Family::V4);
    let v6 = table.pools().usage(Family::V6);
    IpUsage {
        ipv4_total: v4.total,
        ipv4_free: v4.free,
        ipv6_total: v6.total,
        ipv6_free: v6.free,
    }
}

fn eip(group: &EipGroup) -> Eip {
    let addr = |family| {
        group
            .key
            .addr(family)
            .map(|a| a.to_string())
            .unwrap_or_default()
    };
    Eip {
        ipv4: addr(Family::V4),
        ipv6: addr(Family::V6),
        // BTreeSet iterates in order
        policies: group.members.iter().cloned().collect(),
    }
}

/// Renders the status of one member policy. `None` when the policy holds no
/// group in this table.
pub fn policy_status(
    table: &AllocationTable,
    policy: &PolicyRef,
    candidates: &CandidateSet,
) -> Option<EgressPolicyStatus> {
    let group = table.group_of(policy)?;
    let owner = group.owner.as_deref().and_then(|o| candidates.get(o));

    let (ipv4, ipv6) = match (&group.key, owner) {
        (GroupKey::NodeIp, Some(node)) => (node.ipv4, node.ipv6),
        (GroupKey::NodeIp, None) => (None, None),
        (key, _) => (key.addr(Family::V4), key.addr(Family::V6)),
    };
    let eip = if ipv4.is_none() && ipv6.is_none() {
        None
    } else {
        Some(EipStatus {
            ipv4: ipv4.map(|a| a.to_string()),
            ipv6: ipv6.map(|a| a.to_string()),
        })
    };

    Some(match owner {
        Some(node) => EgressPolicyStatus {
            eip,
            node: Some(node.name.clone()),
            phase: Some(PolicyPhase::Ready),
            message: None,
        },
        None => EgressPolicyStatus {
            eip,
            node: None,
            phase: Some(PolicyPhase::NoReadyNode),
            message: Some("no ready node matches the gateway".to_string()),
        },
    })
}

/// Status of a policy that could not be placed into any group.
pub fn unplaced_status(phase: PolicyPhase, message: impl ToString) -> EgressPolicyStatus {
    EgressPolicyStatus {
        eip: None,
        node: None,
        phase: Some(phase),
        message: Some(message.to_string()),
    }
}
