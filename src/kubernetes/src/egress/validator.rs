use std::collections::BTreeMap;

use egressd_ipam::range::{parse_addr, Family};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;

use crate::{
    crd::{
        egress_cluster_info::{EgressClusterInfo, EGRESS_CLUSTER_INFO_NAME},
        egress_gateway::EgressGateway,
        egress_policy::EgressPolicyLike,
    },
    util::{match_selector, parse_cidrs},
};

use super::{allocation::GroupKey, error::Error};

fn invalid(msg: impl ToString) -> Error {
    Error::Invalid(msg.to_string())
}

fn check_selector(field: &str, selector: &LabelSelector) -> Result<(), Error> {
    match_selector(selector, &BTreeMap::new())
        .map(|_| ())
        .map_err(|e| invalid(format!("{field}: {e}")))
}

/// Structural checks of a policy of either kind.
///
/// `gateways` is the live gateway list, used to check the referenced gateway
/// and the pool membership of explicit addresses.
pub fn validate_policy<P: EgressPolicyLike>(
    policy: &P,
    gateways: &[EgressGateway],
) -> Result<(), Error> {
    let selection = policy.selection();
    match (selection.pod_subnet, selection.pod_selector) {
        (Some(_), Some(_)) => {
            return Err(invalid(
                "appliedTo: podSubnet and podSelector are mutually exclusive",
            ))
        }
        (None, None) => {
            return Err(invalid(
                "appliedTo: one of podSubnet or podSelector is required",
            ))
        }
        (Some(subnets), None) => {
            parse_cidrs(subnets).map_err(|e| invalid(format!("appliedTo.podSubnet: {e}")))?;
        }
        (None, Some(selector)) => check_selector("appliedTo.podSelector", selector)?,
    }
    if let Some(selector) = selection.namespace_selector {
        if selection.pod_selector.is_none() {
            return Err(invalid(
                "appliedTo: namespaceSelector requires podSelector",
            ));
        }
        check_selector("appliedTo.namespaceSelector", selector)?;
    }

    parse_cidrs(policy.dest_subnet()).map_err(|e| invalid(format!("destSubnet: {e}")))?;

    let egress_ip = policy.egress_ip();
    if egress_ip.use_node_ip && egress_ip.has_explicit() {
        return Err(invalid(
            "egressIP: useNodeIP and an explicit address are mutually exclusive",
        ));
    }

    let gateway = match policy.gateway_name() {
        Some(name) => Some(
            gateways
                .iter()
                .find(|gw| gw.name_any() == name)
                .ok_or_else(|| invalid(format!("egressGatewayName: EgressGateway {name} does not exist")))?,
        ),
        None => None,
    };
    let pools = match gateway {
        Some(gw) => Some(
            gw.pools()
                .map_err(|e| invalid(format!("EgressGateway {}: {e}", gw.name_any())))?,
        ),
        None => None,
    };

    for (field, value, family) in [
        ("egressIP.ipv4", egress_ip.ipv4(), Family::V4),
        ("egressIP.ipv6", egress_ip.ipv6(), Family::V6),
    ] {
        let Some(value) = value else {
            continue;
        };
        let addr = parse_addr(value, family).map_err(|e| invalid(format!("{field}: {value}: {e}")))?;
        if let Some(pools) = pools.as_ref() {
            if !pools.get(family).contains(&addr) {
                return Err(invalid(format!(
                    "{field}: {addr} is not in the {family} pool of the gateway"
                )));
            }
        }
    }

    Ok(())
}

/// Immutability checks of a policy update.
pub fn validate_policy_update<P: EgressPolicyLike>(old: &P, new: &P) -> Result<(), Error> {
    if let Some(name) = old.gateway_name() {
        if new.gateway_name() != Some(name) {
            return Err(invalid("egressGatewayName is immutable once set"));
        }
    }
    let (old_ip, new_ip) = (old.egress_ip(), new.egress_ip());
    if old_ip.ipv4().is_some() && old_ip.ipv4() != new_ip.ipv4() {
        return Err(invalid("egressIP.ipv4 is immutable once set"));
    }
    if old_ip.ipv6().is_some() && old_ip.ipv6() != new_ip.ipv6() {
        return Err(invalid("egressIP.ipv6 is immutable once set"));
    }
    Ok(())
}

/// Checks a gateway against itself and the other live gateways.
pub fn validate_gateway(gateway: &EgressGateway, others: &[EgressGateway]) -> Result<(), Error> {
    let pools = gateway
        .pools()
        .map_err(|e| invalid(format!("ippools: {e}")))?;
    check_selector("nodeSelector", &gateway.spec.node_selector)?;

    let name = gateway.name_any();
    for other in others.iter().filter(|o| o.name_any() != name) {
        if gateway.spec.cluster_default && other.spec.cluster_default {
            return Err(invalid(format!(
                "clusterDefault: EgressGateway {} is already the cluster default",
                other.name_any()
            )));
        }
        let Ok(other_pools) = other.pools() else {
            continue;
        };
        if let Some(addr) = pools.overlaps(&other_pools).first() {
            return Err(invalid(format!(
                "ippools: {addr} is already in the pool of EgressGateway {}",
                other.name_any()
            )));
        }
    }
    Ok(())
}

/// Addresses held by Eip groups must stay in the pool.
pub fn validate_gateway_update(old: &EgressGateway, new: &EgressGateway) -> Result<(), Error> {
    let pools = new.pools().map_err(|e| invalid(format!("ippools: {e}")))?;
    for eip in old.eips().filter(|eip| !eip.policies.is_empty()) {
        let Ok(GroupKey::Pool { ipv4, ipv6 }) = GroupKey::from_strs(&eip.ipv4, &eip.ipv6) else {
            continue;
        };
        if let Some(addr) = ipv4.iter().chain(ipv6.iter()).find(|a| !pools.contains(a)) {
            return Err(invalid(format!(
                "ippools: {addr} is in use and cannot be removed"
            )));
        }
    }
    Ok(())
}

pub fn validate_gateway_delete(gateway: &EgressGateway) -> Result<(), Error> {
    if gateway.has_members() {
        return Err(invalid(format!(
            "EgressGateway {} is still referenced by policies",
            gateway.name_any()
        )));
    }
    Ok(())
}

pub fn validate_cluster_info(info: &EgressClusterInfo) -> Result<(), Error> {
    if info.name_any() != EGRESS_CLUSTER_INFO_NAME {
        return Err(invalid(format!(
            "EgressClusterInfo must be named {EGRESS_CLUSTER_INFO_NAME}"
        )));
    }
    parse_cidrs(&info.spec.extra_cidr).map_err(|e| invalid(format!("extraCidr: {e}")))?;
    Ok(())
}
