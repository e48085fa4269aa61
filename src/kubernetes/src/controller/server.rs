use std::sync::{Arc, Mutex};

use actix_web::{
    get, middleware, post,
    web::{self, Data},
    App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use kube::core::admission::AdmissionReview;
use prometheus::{Encoder, TextEncoder};
use egressd_trace::init::{prepare_tracing, TraceConfig};

use crate::crd::{
    egress_cluster_info::EgressClusterInfo, egress_cluster_policy::EgressClusterPolicy,
    egress_gateway::EgressGateway, egress_policy::EgressPolicy,
};

use super::{
    config::Config, context::State, error::Error, metrics::Metrics, reconciler, webhook,
};

pub fn start(config: Config, trace: TraceConfig) -> Result<(), Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::StdIo)?
        .block_on(run(config, trace))
}

#[tracing::instrument(skip_all)]
async fn run(config: Config, trace_config: TraceConfig) -> Result<(), Error> {
    prepare_tracing(trace_config).map_err(Error::Trace)?;

    let server_config =
        egressd_cert::util::server_config(&config.tls.cert, &config.tls.key).map_err(Error::Cert)?;

    // Initiatilize Kubernetes controller state
    let state = State::new("controller");
    let metrics = Metrics::default()
        .register(&state.registry)
        .map_err(Error::Metrics)?;
    let metrics = Arc::new(Mutex::new(metrics));
    let config = Arc::new(config);

    let server_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(server_state.clone()))
            .service(index)
            .service(health)
            .service(ready)
            .service(metrics_)
            .service(egress_gateway_validating_webhook)
            .service(egress_gateway_mutating_webhook)
            .service(egress_policy_validating_webhook)
            .service(egress_policy_mutating_webhook)
            .service(egress_cluster_policy_validating_webhook)
            .service(egress_cluster_policy_mutating_webhook)
            .service(egress_cluster_info_validating_webhook)
            .wrap(
                middleware::Logger::default()
                    .exclude("/healthz")
                    .exclude("/readyz"),
            )
    })
    .bind_rustls_021(format!("0.0.0.0:{}", config.https_port), server_config)?
    .bind(format!("0.0.0.0:{}", config.http_port))?
    .shutdown_timeout(5);

    tracing::info!(
        http_port = config.http_port,
        https_port = config.https_port,
        election = ?config.election,
        "Start egressd controller"
    );

    let (s, c, m) = (state.clone(), config.clone(), metrics.clone());
    tokio::spawn(async move {
        reconciler::egress_cluster_info::run(s, c, m).await;
    });

    let (s, c, m) = (state.clone(), config.clone(), metrics.clone());
    tokio::spawn(async move {
        reconciler::egress_gateway::run(s, c, m).await;
    });

    let (s, c, m) = (state.clone(), config.clone(), metrics.clone());
    tokio::spawn(async move {
        reconciler::egress_policy::run(s, c, m).await;
    });

    let (s, c, m) = (state, config, metrics);
    tokio::spawn(async move {
        reconciler::egress_cluster_policy::run(s, c, m).await;
    });

    server.run().await.map_err(Error::StdIo)
}

#[get("/healthz")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/readyz")]
async fn ready(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("ready")
}

#[get("/metrics")]
async fn metrics_(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metrics, &mut buffer) {
        tracing::error!(error=?e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok().body(buffer)
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[post("/validate-egressd-io-v1beta1-egressgateway")]
async fn egress_gateway_validating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressGateway>>,
) -> impl Responder {
    webhook::egress_gateway::handle_validation(req, body).await
}

#[post("/mutate-egressd-io-v1beta1-egressgateway")]
async fn egress_gateway_mutating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressGateway>>,
) -> impl Responder {
    webhook::egress_gateway::handle_mutation(req, body).await
}

#[post("/validate-egressd-io-v1beta1-egresspolicy")]
async fn egress_policy_validating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressPolicy>>,
) -> impl Responder {
    webhook::egress_policy::handle_validation(req, body).await
}

#[post("/mutate-egressd-io-v1beta1-egresspolicy")]
async fn egress_policy_mutating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressPolicy>>,
) -> impl Responder {
    webhook::egress_policy::handle_mutation(req, body).await
}

#[post("/validate-egressd-io-v1beta1-egressclusterpolicy")]
async fn egress_cluster_policy_validating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressClusterPolicy>>,
) -> impl Responder {
    webhook::egress_cluster_policy::handle_validation(req, body).await
}

#[post("/mutate-egressd-io-v1beta1-egressclusterpolicy")]
async fn egress_cluster_policy_mutating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressClusterPolicy>>,
) -> impl Responder {
    webhook::egress_cluster_policy::handle_mutation(req, body).await
}

#[post("/validate-egressd-io-v1beta1-egressclusterinfo")]
async fn egress_cluster_info_validating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<EgressClusterInfo>>,
) -> impl Responder {
    webhook::egress_cluster_info::handle_validation(req, body).await
}
