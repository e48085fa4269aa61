use actix_web::{web, HttpRequest, HttpResponse, Responder};
use kube::core::admission::{AdmissionResponse, AdmissionReview, Operation};

use crate::{crd::egress_cluster_info::EgressClusterInfo, egress::validator::validate_cluster_info};

use super::{admission_request, allow, forbid};

#[tracing::instrument(skip_all)]
pub async fn handle_validation(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressClusterInfo>>,
) -> impl Responder {
    tracing::info!(method=?req.method(), uri=?req.uri(), "Call validating webhook for EgressClusterInfo");

    let admission_req = match admission_request(&req, body) {
        Ok(admission_req) => admission_req,
        Err(res) => return res,
    };
    let resp = AdmissionResponse::from(&admission_req);

    let result = match (&admission_req.operation, admission_req.object.as_ref()) {
        (Operation::Create | Operation::Update, Some(eci)) => validate_cluster_info(eci),
        _ => Ok(()),
    };
    let resp = match result {
        Ok(()) => allow(resp),
        Err(e) => {
            tracing::warn!(name = %admission_req.name, error=%e, "Denied by validating webhook");
            forbid(resp, e)
        }
    };
    HttpResponse::Ok().json(resp.into_review())
}
