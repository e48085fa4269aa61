use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use egressd_ipam::allocator::Discipline;

use super::egress_gateway::PolicyRef;

pub const EGRESS_POLICY_FINALIZER: &str = "egresspolicy.egressd.io/finalizer";

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "egressd.io",
    version = "v1beta1",
    kind = "EgressPolicy",
    namespaced
)]
#[kube(status = "EgressPolicyStatus")]
#[kube(
    printcolumn = r#"{"name":"GATEWAY", "type":"string", "description":"egress gateway", "jsonPath":".spec.egressGatewayName"}"#,
    printcolumn = r#"{"name":"IPV4", "type":"string", "description":"egress IPv4 address", "jsonPath":".status.eip.ipv4"}"#,
    printcolumn = r#"{"name":"IPV6", "type":"string", "description":"egress IPv6 address", "jsonPath":".status.eip.ipv6"}"#,
    printcolumn = r#"{"name":"NODE", "type":"string", "description":"active node", "jsonPath":".status.node"}"#,
    printcolumn = r#"{"name":"PHASE", "type":"string", "description":"phase", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EgressPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_gateway_name: Option<String>,
    #[serde(default, rename = "egressIP")]
    pub egress_ip: EgressIP,
    #[serde(default)]
    pub applied_to: AppliedTo,
    #[serde(default)]
    pub dest_subnet: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EgressIP {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(default, rename = "useNodeIP")]
    pub use_node_ip: bool,
    #[serde(default)]
    pub allocator_policy: AllocatorPolicy,
}

impl EgressIP {
    pub fn ipv4(&self) -> Option<&str> {
        self.ipv4.as_deref().filter(|s| !s.is_empty())
    }

    pub fn ipv6(&self) -> Option<&str> {
        self.ipv6.as_deref().filter(|s| !s.is_empty())
    }

    pub fn has_explicit(&self) -> bool {
        self.ipv4().is_some() || self.ipv6().is_some()
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
pub enum AllocatorPolicy {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "round-robin", alias = "rr")]
    RoundRobin,
}

impl From<AllocatorPolicy> for Discipline {
    fn from(p: AllocatorPolicy) -> Discipline {
        match p {
            AllocatorPolicy::Default => Discipline::Default,
            AllocatorPolicy::RoundRobin => Discipline::RoundRobin,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedTo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_subnet: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EgressPolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip: Option<EipStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PolicyPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct EipStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum PolicyPhase {
    Ready,
    NoReadyNode,
    Unresolved,
    GatewayNotFound,
    PoolExhausted,
    Failed,
}

impl std::fmt::Display for PolicyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::NoReadyNode => write!(f, "NoReadyNode"),
            Self::Unresolved => write!(f, "Unresolved"),
            Self::GatewayNotFound => write!(f, "GatewayNotFound"),
            Self::PoolExhausted => write!(f, "PoolExhausted"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Workload selection of either policy kind.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub pod_subnet: Option<&'a Vec<String>>,
    pub pod_selector: Option<&'a LabelSelector>,
    pub namespace_selector: Option<&'a LabelSelector>,
}

/// Common view over EgressPolicy and EgressClusterPolicy.
pub trait EgressPolicyLike:
    kube::Resource<DynamicType = ()> + Clone + Serialize + std::fmt::Debug + Send + Sync + 'static
{
    fn policy_ref(&self) -> PolicyRef;
    fn gateway_name(&self) -> Option<&str>;
    fn egress_ip(&self) -> &EgressIP;
    fn selection(&self) -> Selection<'_>;
    fn dest_subnet(&self) -> &[String];
    fn policy_status(&self) -> Option<&EgressPolicyStatus>;
    fn set_policy_status(&mut self, status: EgressPolicyStatus);
}

impl EgressPolicyLike for EgressPolicy {
    fn policy_ref(&self) -> PolicyRef {
        PolicyRef::namespaced(&self.namespace().unwrap_or_default(), &self.name_any())
    }

    fn gateway_name(&self) -> Option<&str> {
        self.spec
            .egress_gateway_name
            .as_deref()
            .filter(|s| !s.is_empty())
    }

    fn egress_ip(&self) -> &EgressIP {
        &self.spec.egress_ip
    }

    fn selection(&self) -> Selection<'_> {
        Selection {
            pod_subnet: self.spec.applied_to.pod_subnet.as_ref(),
            pod_selector: self.spec.applied_to.pod_selector.as_ref(),
            namespace_selector: None,
        }
    }

    fn dest_subnet(&self) -> &[String] {
        &self.spec.dest_subnet
    }

    fn policy_status(&self) -> Option<&EgressPolicyStatus> {
        self.status.as_ref()
    }

    fn set_policy_status(&mut self, status: EgressPolicyStatus) {
        self.status = Some(status);
    }
}
