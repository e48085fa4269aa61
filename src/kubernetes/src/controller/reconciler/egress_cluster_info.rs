use std::sync::{Arc, Mutex};

use futures::StreamExt;
use kube::{
    api::{ListParams, PostParams},
    core::ObjectMeta,
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
        context::{backoff_key, error_policy, Context, Ctx, State},
        error::Error,
        metrics::Metrics,
    },
    crd::egress_cluster_info::{
        EgressClusterInfo, EgressClusterInfoSpec, EgressClusterInfoStatus,
        EGRESS_CLUSTER_INFO_FINALIZER, EGRESS_CLUSTER_INFO_NAME,
    },
    util::normalize_cidrs,
};

#[tracing::instrument(skip_all, fields(trace_id))]
pub async fn reconciler(eci: Arc<EgressClusterInfo>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = egressd_trace::telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    let _timer = {
        let metrics = ctx.metrics();
        let metrics = metrics.lock().map_err(|_| Error::FailedToGetLock)?;
        metrics.reconciliation(eci.as_ref());
        metrics.measure()
    };

    let infos = Api::<EgressClusterInfo>::all(ctx.client.clone());

    finalizer(&infos, EGRESS_CLUSTER_INFO_FINALIZER, eci, |event| async {
        match event {
            Event::Apply(eci) => reconcile(&infos, &eci, ctx.clone()).await,
            Event::Cleanup(eci) => cleanup(&eci, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

#[tracing::instrument(skip_all, fields(name = eci.name_any()))]
async fn reconcile(
    api: &Api<EgressClusterInfo>,
    eci: &EgressClusterInfo,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    tracing::info!("reconcile EgressClusterInfo");

    if eci.name_any() != EGRESS_CLUSTER_INFO_NAME {
        tracing::warn!("EgressClusterInfo other than {EGRESS_CLUSTER_INFO_NAME} is ignored");
        return Ok(Action::await_change());
    }

    let name = eci.name_any();
    let ctx_ref = ctx.as_ref();
    let name_ref = name.as_str();
    ctx.retry_on_conflict(name_ref, move || sync_status(ctx_ref, api, name_ref))
        .await?;

    ctx.reset_backoff(&backoff_key(eci));
    ctx.touch().await;

    Ok(ctx.requeue())
}

/// Status derived from the spec. The cluster default claim belongs to the
/// gateway controller and is carried over.
fn desired_status(eci: &EgressClusterInfo) -> EgressClusterInfoStatus {
    let current = eci.status.clone().unwrap_or_default();
    match normalize_cidrs(&eci.spec.extra_cidr) {
        Ok(extra_cidr) => EgressClusterInfoStatus {
            extra_cidr,
            synced: true,
            cluster_default_gateway: current.cluster_default_gateway,
            message: None,
        },
        Err(e) => EgressClusterInfoStatus {
            extra_cidr: current.extra_cidr,
            synced: false,
            cluster_default_gateway: current.cluster_default_gateway,
            message: Some(e.to_string()),
        },
    }
}

async fn sync_status(
    ctx: &Context,
    api: &Api<EgressClusterInfo>,
    name: &str,
) -> Result<(), Error> {
    let Some(eci) = ctx.call(api.get_opt(name)).await? else {
        return Ok(());
    };
    let status = desired_status(&eci);
    if eci.status.as_ref() == Some(&status) {
        return Ok(());
    }
    if !status.synced {
        tracing::warn!(reason = ?status.message, "failed to normalize extraCidr");
    }

    tracing::info!(extra_cidr=?status.extra_cidr, "update EgressClusterInfo status");
    let mut new_eci = eci;
    new_eci.status = Some(status);
    let data = serde_json::to_vec(&new_eci).map_err(Error::Serialization)?;
    ctx.call(api.replace_status(name, &PostParams::default(), data))
        .await?;
    Ok(())
}

#[tracing::instrument(skip_all, fields(name = eci.name_any()))]
async fn cleanup(eci: &EgressClusterInfo, _ctx: Arc<Context>) -> Result<Action, Error> {
    tracing::info!("clean up EgressClusterInfo");
    Ok(Action::await_change())
}

/// Creates the singleton when it is missing.
async fn ensure_default(api: &Api<EgressClusterInfo>) -> Result<(), Error> {
    if api
        .get_opt(EGRESS_CLUSTER_INFO_NAME)
        .await
        .map_err(Error::Kube)?
        .is_some()
    {
        return Ok(());
    }
    let eci = EgressClusterInfo {
        metadata: ObjectMeta {
            name: Some(EGRESS_CLUSTER_INFO_NAME.to_string()),
            ..Default::default()
        },
        spec: EgressClusterInfoSpec::default(),
        status: None,
    };
    tracing::info!("create EgressClusterInfo {EGRESS_CLUSTER_INFO_NAME}");
    match api.create(&PostParams::default(), &eci).await {
        Ok(_) => Ok(()),
        // created concurrently
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(Error::Kube(e)),
    }
}

pub async fn run(state: State, config: Arc<Config>, metrics: Arc<Mutex<Metrics>>) {
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error=?e, "Failed to create kube client");
            std::process::exit(1);
        }
    };

    let infos = Api::<EgressClusterInfo>::all(client.clone());
    if let Err(e) = infos.list(&ListParams::default().limit(1)).await {
        tracing::error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }
    if let Err(e) = ensure_default(&infos).await {
        tracing::error!(error=?e, "Failed to ensure EgressClusterInfo");
        std::process::exit(1);
    }

    tracing::info!("Start EgressClusterInfo reconciler");

    Controller::new(infos, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(
            reconciler,
            error_policy::<EgressClusterInfo, Error, Context>,
            state.to_context(client, config, metrics),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
