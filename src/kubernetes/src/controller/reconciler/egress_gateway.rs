use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{ListParams, PostParams},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        reflector::{ObjectRef, Store},
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
    crd::{
        egress_cluster_info::{EgressClusterInfo, EGRESS_CLUSTER_INFO_NAME},
        egress_cluster_policy::EgressClusterPolicy,
        egress_gateway::{EgressGateway, PolicyRef, EGRESS_GATEWAY_FINALIZER},
        egress_policy::{EgressPolicy, EgressPolicyLike},
        egress_tunnel::EgressTunnel,
    },
};

use super::gateway_sync::{publish_metrics, sync_gateway};

#[tracing::instrument(skip_all, fields(trace_id))]
pub async fn reconciler(gw: Arc<EgressGateway>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = egressd_trace::telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    let _timer = {
        let metrics = ctx.metrics();
        let metrics = metrics.lock().map_err(|_| Error::FailedToGetLock)?;
        metrics.reconciliation(gw.as_ref());
        metrics.measure()
    };

    let gateways = Api::<EgressGateway>::all(ctx.client.clone());

    finalizer(&gateways, EGRESS_GATEWAY_FINALIZER, gw, |event| async {
        match event {
            Event::Apply(gw) => reconcile(&gw, ctx.clone()).await,
            Event::Cleanup(gw) => cleanup(&gw, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

#[tracing::instrument(skip_all, fields(name = gw.name_any()))]
async fn reconcile(gw: &EgressGateway, ctx: Arc<Context>) -> Result<Action, Error> {
    tracing::info!("reconcile EgressGateway");

    let name = gw.name_any();

    // Members present in the observed status had an existing policy when the
    // status was written, so a member missing from the listing below is gone.
    // Members added after the observation are left alone.
    let observed = gw
        .eips()
        .flat_map(|eip| eip.policies.iter().cloned())
        .collect::<BTreeSet<PolicyRef>>();
    let existing = existing_policies(&ctx).await?;

    let synced = sync_gateway(&ctx, &name, |table| {
        table.retain(|p| existing.contains(p) || !observed.contains(p))
    })
    .await?;
    let Some(synced) = synced else {
        return Ok(Action::await_change());
    };
    for policy in synced.value.iter() {
        tracing::info!(policy=%policy, "remove member whose policy no longer exists");
    }

    publish_metrics(&ctx, &name, &synced)?;
    claim_cluster_default(&ctx, &synced.gateway).await?;

    ctx.reset_backoff(&backoff_key(gw));
    ctx.touch().await;

    Ok(ctx.requeue())
}

#[tracing::instrument(skip_all, fields(name = gw.name_any()))]
async fn cleanup(gw: &EgressGateway, ctx: Arc<Context>) -> Result<Action, Error> {
    tracing::info!("clean up EgressGateway");

    if gw.has_members() {
        tracing::warn!("EgressGateway is deleted while policies still use it");
    }

    let mut released = gw.clone();
    released.spec.cluster_default = false;
    claim_cluster_default(&ctx, &released).await?;

    ctx.metrics
        .lock()
        .map_err(|_| Error::FailedToGetLock)?
        .forget_gateway(&gw.name_any());

    Ok(Action::await_change())
}

async fn existing_policies(ctx: &Context) -> Result<BTreeSet<PolicyRef>, Error> {
    let policies = Api::<EgressPolicy>::all(ctx.client.clone());
    let cluster_policies = Api::<EgressClusterPolicy>::all(ctx.client.clone());

    let policy_list = ctx.call(policies.list(&ListParams::default())).await?;
    let cluster_policy_list = ctx.call(cluster_policies.list(&ListParams::default())).await?;

    Ok(policy_list
        .iter()
        .map(|p| p.policy_ref())
        .chain(cluster_policy_list.iter().map(|p| p.policy_ref()))
        .collect())
}

/// Keeps `status.clusterDefaultGateway` of EgressClusterInfo in line with
/// the gateway's clusterDefault flag.
///
/// A flagged gateway claims the slot only when it is free or its holder no
/// longer exists or is no longer flagged. The claim is written with the read
/// resourceVersion, so of two gateways racing for the slot only one wins.
async fn claim_cluster_default(ctx: &Context, gw: &EgressGateway) -> Result<(), Error> {
    let infos = Api::<EgressClusterInfo>::all(ctx.client.clone());
    let gateways = Api::<EgressGateway>::all(ctx.client.clone());
    let (infos, gateways) = (&infos, &gateways);
    ctx.retry_on_conflict(EGRESS_CLUSTER_INFO_NAME, move || {
        claim_once(ctx, infos, gateways, gw)
    })
    .await
}

async fn claim_once(
    ctx: &Context,
    infos: &Api<EgressClusterInfo>,
    gateways: &Api<EgressGateway>,
    gw: &EgressGateway,
) -> Result<(), Error> {
    let Some(info) = ctx.call(infos.get_opt(EGRESS_CLUSTER_INFO_NAME)).await? else {
        tracing::warn!("EgressClusterInfo is not found, skip the cluster default claim");
        return Ok(());
    };

    let name = gw.name_any();
    let holder = info.cluster_default_gateway().map(|s| s.to_string());
    let next = match (gw.spec.cluster_default, holder.as_deref()) {
        (true, Some(h)) if h == name => return Ok(()),
        (true, None) => Some(name.clone()),
        (true, Some(h)) => {
            let valid = ctx
                .call(gateways.get_opt(h))
                .await?
                .map(|g| g.spec.cluster_default && g.metadata.deletion_timestamp.is_none())
                .unwrap_or(false);
            if valid {
                tracing::warn!(holder = h, "another EgressGateway holds the cluster default");
                return Ok(());
            }
            Some(name.clone())
        }
        (false, Some(h)) if h == name => None,
        (false, _) => return Ok(()),
    };

    tracing::info!(from=?holder, to=?next, "update cluster default gateway");
    let mut new_info = info.clone();
    let mut status = new_info.status.unwrap_or_default();
    status.cluster_default_gateway = next;
    new_info.status = Some(status);
    let data = serde_json::to_vec(&new_info).map_err(Error::Serialization)?;
    ctx.call(infos.replace_status(EGRESS_CLUSTER_INFO_NAME, &PostParams::default(), data))
        .await?;
    Ok(())
}

fn all_gateways(store: &Store<EgressGateway>) -> Vec<ObjectRef<EgressGateway>> {
    store
        .state()
        .iter()
        .map(|gw| ObjectRef::from_obj(gw.as_ref()))
        .collect()
}

pub async fn run(state: State, config: Arc<Config>, metrics: Arc<Mutex<Metrics>>) {
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error=?e, "Failed to create kube client");
            std::process::exit(1);
        }
    };

    let gateways = Api::<EgressGateway>::all(client.clone());
    if let Err(e) = gateways.list(&ListParams::default().limit(1)).await {
        tracing::error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    tracing::info!("Start EgressGateway reconciler");

    let controller = Controller::new(gateways, WatcherConfig::default().any_semantic());
    let node_store = controller.store();
    let tunnel_store = controller.store();

    // Any node or tunnel change may alter the candidate set of every gateway.
    controller
        .watches(
            Api::<Node>::all(client.clone()),
            WatcherConfig::default(),
            move |_: Node| all_gateways(&node_store),
        )
        .watches(
            Api::<EgressTunnel>::all(client.clone()),
            WatcherConfig::default(),
            move |_: EgressTunnel| all_gateways(&tunnel_store),
        )
        .shutdown_on_signal()
        .run(
            reconciler,
            error_policy::<EgressGateway, Error, Context>,
            state.to_context(client, config, metrics),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
