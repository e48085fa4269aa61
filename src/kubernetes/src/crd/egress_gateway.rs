use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use egressd_ipam::{error::Error as IpamError, manager::GatewayPools};

pub const EGRESS_GATEWAY_FINALIZER: &str = "egressgateway.egressd.io/finalizer";
pub const DEFAULT_GATEWAY_LABEL: &str = "egressd.io/default-egressgateway";
pub const NODE_STATUS_READY: &str = "Ready";

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(group = "egressd.io", version = "v1beta1", kind = "EgressGateway")]
#[kube(status = "EgressGatewayStatus")]
#[kube(
    printcolumn = r#"{"name":"DEFAULT", "type":"boolean", "description":"cluster default gateway", "jsonPath":".spec.clusterDefault"}"#,
    printcolumn = r#"{"name":"IPV4FREE", "type":"integer", "description":"free IPv4 addresses", "jsonPath":".status.ipUsage.ipv4Free"}"#,
    printcolumn = r#"{"name":"IPV6FREE", "type":"integer", "description":"free IPv6 addresses", "jsonPath":".status.ipUsage.ipv6Free"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "description":"Date from created", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EgressGatewaySpec {
    #[serde(default)]
    pub node_selector: LabelSelector,
    #[serde(default)]
    pub ippools: IpPools,
    #[serde(default)]
    pub cluster_default: bool,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct IpPools {
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Vec<String>,
    #[serde(
        default,
        rename = "ipv4DefaultEIP",
        skip_serializing_if = "Option::is_none"
    )]
    pub ipv4_default_eip: Option<String>,
    #[serde(
        default,
        rename = "ipv6DefaultEIP",
        skip_serializing_if = "Option::is_none"
    )]
    pub ipv6_default_eip: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EgressGatewayStatus {
    #[serde(default)]
    pub node_list: Vec<EgressNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_eips: Vec<Eip>,
    #[serde(default)]
    pub ip_usage: IpUsage,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct EgressNode {
    pub name: String,
    #[serde(default)]
    pub eips: Vec<Eip>,
    #[serde(default)]
    pub status: String,
}

/// One Eip group of a gateway. Both addresses empty means the group of
/// policies using the owning node's own address.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct Eip {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ipv4: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ipv6: String,
    #[serde(default)]
    pub policies: Vec<PolicyRef>,
}

#[derive(
    Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct PolicyRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl PolicyRef {
    pub fn namespaced(namespace: &str, name: &str) -> PolicyRef {
        PolicyRef {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    pub fn cluster(name: &str) -> PolicyRef {
        PolicyRef {
            name: name.to_string(),
            namespace: None,
        }
    }
}

impl std::fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IpUsage {
    pub ipv4_total: u64,
    pub ipv4_free: u64,
    pub ipv6_total: u64,
    pub ipv6_free: u64,
}

impl EgressGateway {
    pub fn pools(&self) -> Result<GatewayPools, IpamError> {
        let ippools = &self.spec.ippools;
        GatewayPools::new(
            &ippools.ipv4,
            &ippools.ipv6,
            ippools.ipv4_default_eip.as_deref(),
            ippools.ipv6_default_eip.as_deref(),
        )
    }

    /// Every Eip group recorded in the status, owned or pending.
    pub fn eips(&self) -> impl Iterator<Item = &Eip> {
        self.status.iter().flat_map(|status| {
            status
                .node_list
                .iter()
                .flat_map(|node| node.eips.iter())
                .chain(status.pending_eips.iter())
        })
    }

    pub fn has_members(&self) -> bool {
        self.eips().any(|eip| !eip.policies.is_empty())
    }
}
