use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    egress_gateway::PolicyRef,
    egress_policy::{EgressIP, EgressPolicyLike, EgressPolicyStatus, Selection},
};

pub const EGRESS_CLUSTER_POLICY_FINALIZER: &str = "egressclusterpolicy.egressd.io/finalizer";

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(group = "egressd.io", version = "v1beta1", kind = "EgressClusterPolicy")]
#[kube(status = "EgressPolicyStatus")]
#[kube(
    printcolumn = r#"{"name":"GATEWAY", "type":"string", "description":"egress gateway", "jsonPath":".spec.egressGatewayName"}"#,
    printcolumn = r#"{"name":"IPV4", "type":"string", "description":"egress IPv4 address", "jsonPath":".status.eip.ipv4"}"#,
    printcolumn = r#"{"name":"IPV6", "type":"string", "description":"egress IPv6 address", "jsonPath":".status.eip.ipv6"}"#,
    printcolumn = r#"{"name":"NODE", "type":"string", "description":"active node", "jsonPath":".status.node"}"#,
    printcolumn = r#"{"name":"PHASE", "type":"string", "description":"phase", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EgressClusterPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_gateway_name: Option<String>,
    #[serde(default, rename = "egressIP")]
    pub egress_ip: EgressIP,
    #[serde(default)]
    pub applied_to: ClusterAppliedTo,
    #[serde(default)]
    pub dest_subnet: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAppliedTo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_subnet: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

impl EgressPolicyLike for EgressClusterPolicy {
    fn policy_ref(&self) -> PolicyRef {
        PolicyRef::cluster(&self.name_any())
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
            namespace_selector: self.spec.applied_to.namespace_selector.as_ref(),
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
