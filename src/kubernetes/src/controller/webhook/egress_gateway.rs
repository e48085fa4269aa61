use actix_web::{web, HttpRequest, HttpResponse, Responder};
use egressd_ipam::range::Family;
use json_patch::{AddOperation, PatchOperation};
use kube::{
    api::ListParams,
    core::admission::{AdmissionResponse, AdmissionReview, Operation},
    Api, Client, ResourceExt,
};

use crate::{
    controller::error::Error,
    crd::egress_gateway::EgressGateway,
    egress::{
        error::Error as EgressError,
        validator::{validate_gateway, validate_gateway_delete, validate_gateway_update},
    },
};

use super::{admission_request, allow, forbid, internal_error};

#[tracing::instrument(skip_all)]
pub async fn handle_validation(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressGateway>>,
) -> impl Responder {
    tracing::info!(method=?req.method(), uri=?req.uri(), "Call validating webhook for EgressGateway");

    let admission_req = match admission_request(&req, body) {
        Ok(admission_req) => admission_req,
        Err(res) => return res,
    };
    let resp = AdmissionResponse::from(&admission_req);

    let others = match admission_req.operation {
        Operation::Create | Operation::Update => {
            let client = match Client::try_default().await {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(error=?e, "Failed to create kube client");
                    return internal_error(e);
                }
            };
            match Api::<EgressGateway>::all(client)
                .list(&ListParams::default())
                .await
            {
                Ok(list) => list.items,
                Err(e) => {
                    tracing::error!("CRD is not queryable; {e:?}. Is the CRD installed?");
                    return internal_error(e);
                }
            }
        }
        _ => Vec::new(),
    };

    let resp = match validate(
        &admission_req.operation,
        admission_req.old_object.as_ref(),
        admission_req.object.as_ref(),
        &others,
    ) {
        Ok(()) => allow(resp),
        Err(e) => {
            tracing::warn!(name = %admission_req.name, error=%e, "Denied by validating webhook");
            forbid(resp, e)
        }
    };
    HttpResponse::Ok().json(resp.into_review())
}

/// Fills unset default EIPs with the first address of each pool.
#[tracing::instrument(skip_all)]
pub async fn handle_mutation(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressGateway>>,
) -> impl Responder {
    tracing::info!(method=?req.method(), uri=?req.uri(), "Call mutating webhook for EgressGateway");

    let admission_req = match admission_request(&req, body) {
        Ok(admission_req) => admission_req,
        Err(res) => return res,
    };
    let resp = AdmissionResponse::from(&admission_req);

    let Some(gw) = admission_req.object.as_ref() else {
        return HttpResponse::Ok().json(resp.into_review());
    };
    let patches = default_eip_patch(gw);
    if patches.is_empty() {
        return HttpResponse::Ok().json(resp.into_review());
    }

    match resp.clone().with_patch(json_patch::Patch(patches)) {
        Ok(patched) => {
            tracing::info!(name = %gw.name_any(), "Set default EIP by mutating webhook");
            HttpResponse::Ok().json(patched.into_review())
        }
        Err(e) => {
            let e = Error::SerializePatch(e);
            tracing::error!(error=%e, "Failed to build patch");
            HttpResponse::Ok().json(resp.deny(e.to_string()).into_review())
        }
    }
}

fn validate(
    operation: &Operation,
    old: Option<&EgressGateway>,
    new: Option<&EgressGateway>,
    others: &[EgressGateway],
) -> Result<(), EgressError> {
    match (operation, old, new) {
        (Operation::Create, _, Some(new)) => validate_gateway(new, others),
        (Operation::Update, Some(old), Some(new)) => {
            validate_gateway_update(old, new)?;
            validate_gateway(new, others)
        }
        (Operation::Delete, Some(old), _) => validate_gateway_delete(old),
        _ => Ok(()),
    }
}

fn default_eip_patch(gw: &EgressGateway) -> Vec<PatchOperation> {
    // malformed pools are rejected by the validating webhook
    let Ok(pools) = gw.pools() else {
        return Vec::new();
    };
    let ippools = &gw.spec.ippools;
    [
        ("ipv4DefaultEIP", Family::V4, ippools.ipv4_default_eip.as_deref()),
        ("ipv6DefaultEIP", Family::V6, ippools.ipv6_default_eip.as_deref()),
    ]
    .into_iter()
    .filter(|(_, _, current)| current.map_or(true, str::is_empty))
    .filter_map(|(field, family, _)| {
        pools.get(family).addrs().first().map(|addr| {
            PatchOperation::Add(AddOperation {
                path: format!("/spec/ippools/{field}"),
                value: serde_json::Value::String(addr.to_string()),
            })
        })
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use kube::core::admission::Operation;
    use rstest::rstest;

    use crate::{
        crd::egress_gateway::{EgressGatewayStatus, EgressNode, Eip, IpPools, PolicyRef},
        fixture::reconciler::test_gateway,
    };

    use super::*;

    fn gateway_with_member() -> EgressGateway {
        let mut gw = test_gateway();
        gw.status = Some(EgressGatewayStatus {
            node_list: vec![EgressNode {
                name: "node1".to_string(),
                status: "Ready".to_string(),
                eips: vec![Eip {
                    ipv4: "10.10.10.2".to_string(),
                    ipv6: String::new(),
                    policies: vec![PolicyRef::namespaced("default", "policy")],
                }],
            }],
            ..Default::default()
        });
        gw
    }

    #[rstest(
        ippools,
        expected,
        case(
            IpPools {
                ipv4: vec!["10.10.10.1-10.10.10.3".to_string()],
                ipv6: vec!["fddd:10::10".to_string()],
                ..Default::default()
            },
            serde_json::json!([
                {"op": "add", "path": "/spec/ippools/ipv4DefaultEIP", "value": "10.10.10.1"},
                {"op": "add", "path": "/spec/ippools/ipv6DefaultEIP", "value": "fddd:10::10"},
            ])
        ),
        case(
            IpPools {
                ipv4: vec!["10.10.10.1-10.10.10.3".to_string()],
                ipv4_default_eip: Some("10.10.10.2".to_string()),
                ..Default::default()
            },
            serde_json::json!([])
        ),
        case(
            IpPools {
                ipv4: vec!["10.10.10.0/33".to_string()],
                ..Default::default()
            },
            serde_json::json!([])
        ),
    )]
    fn works_default_eip_patch(ippools: IpPools, expected: serde_json::Value) {
        let mut gw = test_gateway();
        gw.spec.ippools = ippools;
        let patches = default_eip_patch(&gw);
        assert_eq!(serde_json::to_value(&patches).unwrap(), expected);
    }

    #[test]
    fn works_validate_create() {
        assert!(validate(&Operation::Create, None, Some(&test_gateway()), &[]).is_ok());

        let mut other = test_gateway();
        other.metadata.name = Some("egw-other".to_string());
        other.spec.ippools.ipv4 = vec!["10.10.10.2-10.10.10.5".to_string()];
        other.spec.ippools.ipv4_default_eip = None;
        other.spec.cluster_default = false;
        assert!(validate(&Operation::Create, None, Some(&test_gateway()), &[other]).is_err());
    }

    #[test]
    fn fails_shrink_pool_in_use() {
        let old = gateway_with_member();
        let mut new = gateway_with_member();
        new.spec.ippools.ipv4 = vec!["10.10.10.1".to_string()];
        assert!(validate(&Operation::Update, Some(&old), Some(&new), &[]).is_err());
    }

    #[test]
    fn works_validate_delete() {
        assert!(validate(&Operation::Delete, Some(&test_gateway()), None, &[]).is_ok());
        assert!(validate(&Operation::Delete, Some(&gateway_with_member()), None, &[]).is_err());
    }
}
