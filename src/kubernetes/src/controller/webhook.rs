use actix_web::{http, web, HttpRequest, HttpResponse};
use kube::{
    core::{
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
        response::StatusSummary,
        Status,
    },
    Resource,
};

pub mod egress_cluster_info;
pub mod egress_cluster_policy;
pub mod egress_gateway;
pub mod egress_policy;
pub mod policy;

/// Checks the content type and unwraps the AdmissionRequest. The error is the
/// response to return as is.
fn admission_request<T: Resource>(
    req: &HttpRequest,
    body: web::Json<AdmissionReview<T>>,
) -> Result<AdmissionRequest<T>, HttpResponse> {
    if let Some(content_type) = req.head().headers.get("content-type") {
        if content_type != "application/json" {
            let msg = format!("invalid content-type: {:?}", content_type);
            return Err(HttpResponse::BadRequest().json(msg));
        }
    }

    TryInto::<AdmissionRequest<T>>::try_into(body.into_inner()).map_err(|e| {
        tracing::error!(error=?e, "Invalid request");
        HttpResponse::InternalServerError()
            .json(&AdmissionResponse::invalid(e.to_string()).into_review())
    })
}

fn allow(mut resp: AdmissionResponse) -> AdmissionResponse {
    resp.allowed = true;
    resp.result = Status {
        status: Some(StatusSummary::Success),
        code: http::StatusCode::OK.as_u16(),
        ..Default::default()
    };
    resp
}

fn forbid(mut resp: AdmissionResponse, reason: impl ToString) -> AdmissionResponse {
    resp.allowed = false;
    resp.result = Status {
        status: Some(StatusSummary::Failure),
        code: http::StatusCode::FORBIDDEN.as_u16(),
        message: reason.to_string(),
        reason: "Forbidden by validating webhook".to_string(),
        details: None,
    };
    resp
}

fn internal_error(e: impl ToString) -> HttpResponse {
    HttpResponse::InternalServerError()
        .json(&AdmissionResponse::invalid(e.to_string()).into_review())
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test::TestRequest, web};
    use kube::core::admission::{AdmissionReview, Operation};

    use crate::{crd::egress_gateway::EgressGateway, fixture::reconciler::test_gateway};

    use super::admission_request;

    fn review(request: Option<serde_json::Value>) -> web::Json<AdmissionReview<EgressGateway>> {
        let mut review = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
        });
        if let Some(request) = request {
            review["request"] = request;
        }
        web::Json(serde_json::from_value(review).unwrap())
    }

    fn create_request() -> serde_json::Value {
        serde_json::json!({
            "uid": "b6b1e5a4-1f0c-4c1e-9d64-3f0f5d6f0a01",
            "kind": {"group": "egressd.io", "version": "v1beta1", "kind": "EgressGateway"},
            "resource": {"group": "egressd.io", "version": "v1beta1", "resource": "egressgateways"},
            "name": "egw",
            "operation": "CREATE",
            "userInfo": {"username": "admin"},
            "object": serde_json::to_value(test_gateway()).unwrap(),
            "dryRun": false,
        })
    }

    #[test]
    fn works_admission_request() {
        let req = TestRequest::default()
            .insert_header(("content-type", "application/json"))
            .to_http_request();
        let admission_req = admission_request(&req, review(Some(create_request()))).unwrap();
        assert_eq!(admission_req.operation, Operation::Create);
        assert_eq!(admission_req.name, "egw");
        assert!(admission_req.object.is_some());
    }

    #[test]
    fn fails_admission_request_without_request() {
        let req = TestRequest::default().to_http_request();
        let res = admission_request(&req, review(None)).unwrap_err();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn fails_admission_request_content_type() {
        let req = TestRequest::default()
            .insert_header(("content-type", "text/plain"))
            .to_http_request();
        let res = admission_request(&req, review(Some(create_request()))).unwrap_err();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
