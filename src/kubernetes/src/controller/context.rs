use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use http::{Request, Response};
use hyper::Body;
pub use kube::{runtime::controller::Action, Client, Resource};
use prometheus::Registry;
use serde::Serialize;
use tokio::sync::RwLock;

use egressd_trace::error::TraceableError;

use crate::{fixture::reconciler::ApiServerVerifier, util::get_namespaced_name};

use super::{backoff::ExponentialBackoff, config::Config, error::Error, metrics::Metrics};

pub const ERROR_BACKOFF_BASE: Duration = Duration::from_secs(5);
pub const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(300);

pub trait Ctx {
    fn metrics(&self) -> Arc<Mutex<Metrics>>;
    fn client(&self) -> &Client;
    /// Next requeue delay of a failing object.
    fn error_backoff(&self, key: &str) -> Duration;
    fn reset_backoff(&self, key: &str);
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    // Kubernetes client
    pub client: Client,
    // Reconcile interval
    pub interval: u64,
    pub config: Arc<Config>,
    // Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    // Prometheus metrics
    pub metrics: Arc<Mutex<Metrics>>,
    // Error backoff per object, reset on success
    pub backoffs: Arc<Mutex<HashMap<String, ExponentialBackoff>>>,
}

impl Ctx for Context {
    fn client(&self) -> &Client {
        &self.client
    }

    fn metrics(&self) -> Arc<Mutex<Metrics>> {
        self.metrics.clone()
    }

    fn error_backoff(&self, key: &str) -> Duration {
        match self.backoffs.lock() {
            Ok(mut backoffs) => backoffs
                .entry(key.to_string())
                .or_insert_with(|| ExponentialBackoff::new(ERROR_BACKOFF_BASE, ERROR_BACKOFF_MAX))
                .next_backoff(),
            Err(e) => {
                tracing::warn!(error=%e, "failed to lock backoff states, using default backoff");
                ERROR_BACKOFF_BASE
            }
        }
    }

    fn reset_backoff(&self, key: &str) {
        if let Ok(mut backoffs) = self.backoffs.lock() {
            backoffs.remove(key);
        }
    }
}

impl Context {
    /// Runs a Kubernetes API call bounded by the configured timeout.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        tokio::time::timeout(self.config.api_timeout(), fut)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::Kube)
    }

    /// Repeats `op` while it fails with a conflict, sleeping with exponential
    /// backoff between attempts.
    pub async fn retry_on_conflict<T, F, Fut>(&self, resource: &str, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut backoff = self.config.retry.backoff();
        loop {
            match op().await {
                Err(e) if e.is_conflict() => {
                    if backoff.attempts() + 1 >= self.config.retry.max_attempts {
                        return Err(Error::ConflictRetriesExhausted(resource.to_string()));
                    }
                    self.metrics
                        .lock()
                        .map_err(|_| Error::FailedToGetLock)?
                        .conflict_retry(resource);
                    let delay = backoff.next_backoff();
                    tracing::info!(resource, attempt = backoff.attempts(), ?delay, "retry after conflict");
                    tokio::time::sleep(delay).await;
                }
                res => return res,
            }
        }
    }

    pub fn requeue(&self) -> Action {
        Action::requeue(Duration::from_secs(self.interval))
    }

    pub async fn touch(&self) {
        self.diagnostics.write().await.last_event = Utc::now();
    }
}

#[derive(Debug, Clone, Default)]
pub struct State {
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub registry: prometheus::Registry,
}

impl State {
    pub fn new(component: &str) -> State {
        State {
            diagnostics: Arc::new(RwLock::new(Diagnostics::new(component.to_string()))),
            registry: prometheus::Registry::default(),
        }
    }
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(
        &self,
        client: Client,
        config: Arc<Config>,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Arc<Context> {
        Arc::new(Context {
            client,
            interval: config.requeue_interval,
            config,
            metrics,
            diagnostics: self.diagnostics.clone(),
            backoffs: Arc::default(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub reporter: String,
}

impl Diagnostics {
    pub fn new(component: String) -> Self {
        Self {
            last_event: Utc::now(),
            reporter: component,
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "egressd".to_string(),
        }
    }
}

#[tracing::instrument(skip_all)]
pub fn error_policy<T: Resource<DynamicType = ()>, E: TraceableError, C: Ctx>(
    resource: Arc<T>,
    error: &E,
    ctx: Arc<C>,
) -> Action {
    let key = backoff_key(resource.as_ref());
    let delay = ctx.error_backoff(&key);
    tracing::warn!(name = %key, error = %error, requeue_after = ?delay, "reconcile failed");
    if let Ok(metrics) = ctx.metrics().lock() {
        metrics.reconcile_failure(resource.as_ref(), error);
    }
    Action::requeue(delay)
}

/// Key of the error backoff state of an object.
pub fn backoff_key<T: Resource<DynamicType = ()>>(resource: &T) -> String {
    format!("{}/{}", T::kind(&()), get_namespaced_name(resource))
}

impl Context {
    pub fn test() -> (Arc<Self>, ApiServerVerifier, Registry) {
        Self::test_with(Config::default())
    }

    pub fn test_with(config: Config) -> (Arc<Self>, ApiServerVerifier, Registry) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let mock_client = Client::new(mock_service, "default");
        let registry = Registry::default();
        let ctx = Self {
            client: mock_client,
            interval: 30,
            config: Arc::new(config),
            metrics: Arc::new(Mutex::new(Metrics::default().register(&registry).unwrap())),
            diagnostics: Arc::default(),
            backoffs: Arc::default(),
        };
        (Arc::new(ctx), ApiServerVerifier(handle), registry)
    }
}
