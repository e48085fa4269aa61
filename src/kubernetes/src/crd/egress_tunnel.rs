use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// EgressTunnel is written by the node agent, one per node named after it.
#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(group = "egressd.io", version = "v1beta1", kind = "EgressTunnel")]
#[kube(status = "EgressTunnelStatus")]
#[kube(
    printcolumn = r#"{"name":"PHASE", "type":"string", "description":"tunnel phase", "jsonPath":".status.phase"}"#
)]
pub struct EgressTunnelSpec {}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct EgressTunnelStatus {
    #[serde(default)]
    pub phase: TunnelPhase,
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
pub enum TunnelPhase {
    #[default]
    Pending,
    Init,
    Ready,
    Failed,
    HeartbeatTimeout,
}

impl EgressTunnel {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|status| status.phase == TunnelPhase::Ready)
            .unwrap_or(false)
    }
}
