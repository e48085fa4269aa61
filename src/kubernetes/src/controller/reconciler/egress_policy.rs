use std::sync::{Arc, Mutex};

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{field, Span};

use crate::{
    controller::{
        config::Config,
        context::{error_policy, Context, Ctx, State},
        error::Error,
        metrics::Metrics,
    },
    crd::{
        egress_gateway::EgressGateway,
        egress_policy::{EgressPolicy, EGRESS_POLICY_FINALIZER},
    },
};

use super::policy;

#[tracing::instrument(skip_all, fields(trace_id))]
pub async fn reconciler(ep: Arc<EgressPolicy>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = egressd_trace::telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    let _timer = {
        let metrics = ctx.metrics();
        let metrics = metrics.lock().map_err(|_| Error::FailedToGetLock)?;
        metrics.reconciliation(ep.as_ref());
        metrics.measure()
    };

    let ns = ep.namespace().unwrap_or_default();
    let egress_policies = Api::<EgressPolicy>::namespaced(ctx.client.clone(), &ns);

    finalizer(&egress_policies, EGRESS_POLICY_FINALIZER, ep, |event| async {
        match event {
            Event::Apply(ep) => reconcile(&egress_policies, &ep, ctx.clone()).await,
            Event::Cleanup(ep) => cleanup(&ep, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

#[tracing::instrument(skip_all, fields(name = ep.name_any(), namespace = ep.namespace()))]
async fn reconcile(
    api: &Api<EgressPolicy>,
    ep: &EgressPolicy,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    tracing::info!("reconcile EgressPolicy");

    policy::reconcile(api, ep, ctx).await
}

#[tracing::instrument(skip_all, fields(name = ep.name_any(), namespace = ep.namespace()))]
async fn cleanup(ep: &EgressPolicy, ctx: Arc<Context>) -> Result<Action, Error> {
    tracing::info!("clean up EgressPolicy");

    policy::cleanup(ep, ctx).await
}

pub async fn run(state: State, config: Arc<Config>, metrics: Arc<Mutex<Metrics>>) {
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error=?e, "Failed to create kube client");
            std::process::exit(1);
        }
    };

    let egress_policies = Api::<EgressPolicy>::all(client.clone());
    if let Err(e) = egress_policies.list(&ListParams::default().limit(1)).await {
        tracing::error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    tracing::info!("Start EgressPolicy reconciler");

    let controller = Controller::new(egress_policies, WatcherConfig::default().any_semantic());
    let store = controller.store();

    controller
        .watches(
            Api::<EgressGateway>::all(client.clone()),
            WatcherConfig::default(),
            move |gw: EgressGateway| policy::affected_by(store.state().into_iter(), &gw),
        )
        .shutdown_on_signal()
        .run(
            reconciler,
            error_policy::<EgressPolicy, Error, Context>,
            state.to_context(client, config, metrics),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
