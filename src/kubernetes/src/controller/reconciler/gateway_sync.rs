use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{ListParams, PostParams},
    Api,
};

use egressd_ipam::range::Family;

use crate::{
    controller::{context::Context, error::Error},
    crd::{egress_gateway::EgressGateway, egress_tunnel::EgressTunnel},
    egress::{
        allocation::AllocationTable,
        elector::{collect_candidates, CandidateSet},
        status::gateway_status,
    },
};

/// Outcome of one successful gateway synchronization.
pub struct Synced<R> {
    pub value: R,
    pub gateway: EgressGateway,
    pub table: AllocationTable,
    pub candidates: CandidateSet,
    pub transfers: usize,
}

pub async fn candidates(ctx: &Context, gateway: &EgressGateway) -> Result<CandidateSet, Error> {
    let nodes = Api::<Node>::all(ctx.client.clone());
    let tunnels = Api::<EgressTunnel>::all(ctx.client.clone());

    let node_list = ctx.call(nodes.list(&ListParams::default())).await?;
    let tunnel_list = ctx.call(tunnels.list(&ListParams::default())).await?;

    collect_candidates(
        &gateway.spec.node_selector,
        &node_list.items,
        &tunnel_list.items,
    )
    .map_err(Error::KubeLibrary)
}

/// Loads the allocation table of a gateway, applies `mutate`, re-elects every
/// group and writes the rendered status back.
///
/// The write carries the resourceVersion that was read, so a concurrent
/// writer makes it fail with a conflict and the whole sequence is repeated
/// on fresh data. Returns `None` when the gateway does not exist.
#[tracing::instrument(skip_all, fields(gateway = name))]
pub async fn sync_gateway<R, F>(
    ctx: &Context,
    name: &str,
    mutate: F,
) -> Result<Option<Synced<R>>, Error>
where
    F: Fn(&mut AllocationTable) -> R,
{
    let gateways = Api::<EgressGateway>::all(ctx.client.clone());
    let api = &gateways;
    let mutate = &mutate;
    ctx.retry_on_conflict(name, move || sync_once(ctx, api, name, mutate))
        .await
}

async fn sync_once<R, F>(
    ctx: &Context,
    api: &Api<EgressGateway>,
    name: &str,
    mutate: &F,
) -> Result<Option<Synced<R>>, Error>
where
    F: Fn(&mut AllocationTable) -> R,
{
    let Some(gateway) = ctx.call(api.get_opt(name)).await? else {
        return Ok(None);
    };
    let candidates = candidates(ctx, &gateway).await?;

    let mut table =
        AllocationTable::load(&gateway, ctx.config.families()).map_err(Error::Egress)?;
    let value = mutate(&mut table);
    let transfers = table.reelect(&candidates, ctx.config.election);
    let status = gateway_status(&table, &candidates);

    let gateway = if gateway.status.as_ref() != Some(&status) {
        let mut new_gateway = gateway.clone();
        new_gateway.status = Some(status);
        let data = serde_json::to_vec(&new_gateway).map_err(Error::Serialization)?;
        tracing::info!(transfers, "update EgressGateway status");
        ctx.call(api.replace_status(name, &PostParams::default(), data))
            .await?
    } else {
        gateway
    };

    Ok(Some(Synced {
        value,
        gateway,
        table,
        candidates,
        transfers,
    }))
}

pub fn publish_metrics<R>(ctx: &Context, name: &str, synced: &Synced<R>) -> Result<(), Error> {
    let metrics = ctx.metrics.lock().map_err(|_| Error::FailedToGetLock)?;
    for family in [Family::V4, Family::V6] {
        metrics.pool_usage(name, family, synced.table.pools().usage(family));
    }
    metrics.eip_groups_set(name, synced.table.groups().count() as i64);
    if synced.transfers > 0 {
        metrics.ownership_transfers_inc_by(name, synced.transfers as u64);
    }
    Ok(())
}
