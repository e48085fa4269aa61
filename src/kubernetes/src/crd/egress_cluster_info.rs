use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const EGRESS_CLUSTER_INFO_FINALIZER: &str = "egressclusterinfo.egressd.io/finalizer";
// EgressClusterInfo is a singleton and must have this name.
pub const EGRESS_CLUSTER_INFO_NAME: &str = "default";

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(group = "egressd.io", version = "v1beta1", kind = "EgressClusterInfo")]
#[kube(status = "EgressClusterInfoStatus")]
#[kube(
    printcolumn = r#"{"name":"DEFAULT", "type":"string", "description":"cluster default gateway", "jsonPath":".status.clusterDefaultGateway"}"#,
    printcolumn = r#"{"name":"SYNCED", "type":"boolean", "description":"synced", "jsonPath":".status.synced"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EgressClusterInfoSpec {
    #[serde(default)]
    pub extra_cidr: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EgressClusterInfoStatus {
    #[serde(default)]
    pub extra_cidr: Vec<String>,
    #[serde(default)]
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_default_gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EgressClusterInfo {
    pub fn cluster_default_gateway(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.cluster_default_gateway.as_deref())
    }
}
