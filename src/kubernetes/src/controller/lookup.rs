use k8s_openapi::api::core::v1::Namespace;
use kube::{api::ListParams, Api, Client, ResourceExt};

use crate::{
    crd::{
        egress_cluster_info::{EgressClusterInfo, EGRESS_CLUSTER_INFO_NAME},
        egress_gateway::{EgressGateway, DEFAULT_GATEWAY_LABEL},
        egress_policy::EgressPolicyLike,
    },
    egress::{
        error::Error as EgressError,
        resolver::{resolve, Resolution},
    },
};

/// Gathers the resolution inputs of a policy from the API server and
/// resolves its gateway. The outer error is an API failure, the inner one a
/// resolution failure.
pub async fn resolve_gateway<P: EgressPolicyLike>(
    client: Client,
    policy: &P,
) -> Result<Result<String, EgressError>, kube::Error> {
    let gateways = Api::<EgressGateway>::all(client.clone())
        .list(&ListParams::default())
        .await?;

    let namespace_default = match policy.namespace() {
        Some(ns) => Api::<Namespace>::all(client.clone())
            .get_opt(&ns)
            .await?
            .and_then(|n| n.labels().get(DEFAULT_GATEWAY_LABEL).cloned()),
        None => None,
    };

    let claim = Api::<EgressClusterInfo>::all(client)
        .get_opt(EGRESS_CLUSTER_INFO_NAME)
        .await?
        .and_then(|info| info.cluster_default_gateway().map(|s| s.to_string()));

    Ok(resolve(
        &Resolution {
            explicit: policy.gateway_name(),
            namespace_default: namespace_default.as_deref(),
            claim: claim.as_deref(),
        },
        &gateways.items,
    ))
}
