use actix_web::{web, HttpRequest, Responder};
use kube::core::admission::AdmissionReview;

use crate::crd::egress_cluster_policy::EgressClusterPolicy;

use super::policy;

#[tracing::instrument(skip_all)]
pub async fn handle_validation(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressClusterPolicy>>,
) -> impl Responder {
    policy::handle_validation(req, body).await
}

#[tracing::instrument(skip_all)]
pub async fn handle_mutation(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressClusterPolicy>>,
) -> impl Responder {
    policy::handle_mutation(req, body).await
}
