use actix_web::{web, HttpRequest, HttpResponse};
use json_patch::{AddOperation, PatchOperation};
use kube::{
    api::ListParams,
    core::admission::{AdmissionResponse, AdmissionReview, Operation},
    Api, Client, ResourceExt,
};
use serde::de::DeserializeOwned;

use crate::{
    controller::{error::Error, lookup},
    crd::{egress_gateway::EgressGateway, egress_policy::EgressPolicyLike},
    egress::{
        error::Error as EgressError,
        validator::{validate_policy, validate_policy_update},
    },
};

use super::{admission_request, allow, forbid, internal_error};

/// Validating admission shared by EgressPolicy and EgressClusterPolicy.
pub async fn handle_validation<P>(req: HttpRequest, body: web::Json<AdmissionReview<P>>) -> HttpResponse
where
    P: EgressPolicyLike + DeserializeOwned,
{
    tracing::info!(method=?req.method(), uri=?req.uri(), kind = %P::kind(&()), "Call validating webhook");

    let admission_req = match admission_request(&req, body) {
        Ok(admission_req) => admission_req,
        Err(res) => return res,
    };
    let resp = AdmissionResponse::from(&admission_req);

    let Some(new) = admission_req.object.as_ref() else {
        return HttpResponse::Ok().json(allow(resp).into_review());
    };

    let gateways = match list_gateways().await {
        Ok(gateways) => gateways,
        Err(e) => {
            tracing::error!(error=?e, "Failed to list EgressGateway");
            return internal_error(e);
        }
    };

    let resp = match validate(
        &admission_req.operation,
        admission_req.old_object.as_ref(),
        new,
        &gateways,
    ) {
        Ok(()) => allow(resp),
        Err(e) => {
            tracing::warn!(name = %admission_req.name, error=%e, "Denied by validating webhook");
            forbid(resp, e)
        }
    };
    HttpResponse::Ok().json(resp.into_review())
}

/// Resolves the gateway of a new policy and freezes it into
/// `spec.egressGatewayName`. A policy left unresolved is admitted and resolved
/// later by the controller.
pub async fn handle_mutation<P>(req: HttpRequest, body: web::Json<AdmissionReview<P>>) -> HttpResponse
where
    P: EgressPolicyLike + DeserializeOwned,
{
    tracing::info!(method=?req.method(), uri=?req.uri(), kind = %P::kind(&()), "Call mutating webhook");

    let admission_req = match admission_request(&req, body) {
        Ok(admission_req) => admission_req,
        Err(res) => return res,
    };
    let resp = AdmissionResponse::from(&admission_req);

    let Some(policy) = admission_req.object.as_ref() else {
        return HttpResponse::Ok().json(resp.into_review());
    };
    if admission_req.operation != Operation::Create || policy.gateway_name().is_some() {
        return HttpResponse::Ok().json(resp.into_review());
    }
    // the namespace may be omitted from the object on create
    let mut policy = policy.clone();
    if policy.meta().namespace.is_none() {
        policy.meta_mut().namespace = admission_req.namespace.clone();
    }
    let policy = &policy;

    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error=?e, "Failed to create kube client");
            return internal_error(e);
        }
    };
    let resolved = match lookup::resolve_gateway(client, policy).await {
        Ok(Ok(name)) => Some(name),
        Ok(Err(e)) => {
            tracing::warn!(name = %policy.name_any(), error=%e, "Leave egress gateway unresolved");
            None
        }
        Err(e) => {
            tracing::error!(error=?e, "Failed to resolve egress gateway");
            return internal_error(e);
        }
    };

    let patches = gateway_patch(policy, resolved.as_deref());
    if patches.is_empty() {
        return HttpResponse::Ok().json(resp.into_review());
    }
    match resp.clone().with_patch(json_patch::Patch(patches)) {
        Ok(patched) => {
            tracing::info!(name = %policy.name_any(), gateway = ?resolved, "Accepted by mutating webhook");
            HttpResponse::Ok().json(patched.into_review())
        }
        Err(e) => {
            let e = Error::SerializePatch(e);
            tracing::error!(error=%e, "Failed to build patch");
            HttpResponse::Ok().json(resp.deny(e.to_string()).into_review())
        }
    }
}

async fn list_gateways() -> Result<Vec<EgressGateway>, kube::Error> {
    let client = Client::try_default().await?;
    let gateways = Api::<EgressGateway>::all(client)
        .list(&ListParams::default())
        .await?;
    Ok(gateways.items)
}

fn validate<P: EgressPolicyLike>(
    operation: &Operation,
    old: Option<&P>,
    new: &P,
    gateways: &[EgressGateway],
) -> Result<(), EgressError> {
    if let (Operation::Update, Some(old)) = (operation, old) {
        validate_policy_update(old, new)?;
    }
    validate_policy(new, gateways)
}

fn gateway_patch<P: EgressPolicyLike>(policy: &P, resolved: Option<&str>) -> Vec<PatchOperation> {
    match (policy.gateway_name(), resolved) {
        (None, Some(name)) => vec![PatchOperation::Add(AddOperation {
            path: "/spec/egressGatewayName".into(),
            value: serde_json::Value::String(name.to_string()),
        })],
        _ => Vec::new(),
    }
}
