use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::{controller::Action, reflector::ObjectRef},
    Api, ResourceExt,
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{
    controller::{
        context::{backoff_key, Context, Ctx},
        error::Error,
        lookup,
    },
    crd::{
        egress_gateway::EgressGateway,
        egress_policy::{EgressPolicyLike, EgressPolicyStatus, PolicyPhase},
    },
    egress::{
        allocation::Desired,
        error::Error as EgressError,
        status::{policy_status, unplaced_status},
    },
};

use super::gateway_sync::{publish_metrics, sync_gateway};

/// Places a policy into an Eip group of its gateway and mirrors the outcome
/// into the policy status. Shared by EgressPolicy and EgressClusterPolicy.
pub async fn reconcile<P>(api: &Api<P>, policy: &P, ctx: Arc<Context>) -> Result<Action, Error>
where
    P: EgressPolicyLike + DeserializeOwned,
{
    let key = backoff_key(policy);
    let pref = policy.policy_ref();

    let (policy, gateway) = match policy.gateway_name() {
        Some(name) => (policy.clone(), name.to_string()),
        None => match ctx
            .call(lookup::resolve_gateway(ctx.client.clone(), policy))
            .await?
        {
            Ok(name) => {
                tracing::info!(gateway = %name, "resolved egress gateway");
                let patch = json!({"spec": {"egressGatewayName": name}});
                let patched = ctx
                    .call(api.patch(
                        &policy.name_any(),
                        &PatchParams::default(),
                        &Patch::Merge(&patch),
                    ))
                    .await?;
                (patched, name)
            }
            Err(e) => {
                tracing::warn!(error=%e, "failed to resolve egress gateway");
                let phase = match e {
                    EgressError::GatewayNotFound(_) => PolicyPhase::GatewayNotFound,
                    _ => PolicyPhase::Unresolved,
                };
                write_status(&ctx, api, policy, &unplaced_status(phase, &e)).await?;
                return Ok(Action::requeue(ctx.error_backoff(&key)));
            }
        },
    };

    let desired = match Desired::from_egress_ip(policy.egress_ip()) {
        Ok(desired) => desired,
        Err(e) => {
            tracing::warn!(error=%e, "invalid egressIP");
            write_status(&ctx, api, &policy, &unplaced_status(PolicyPhase::Failed, &e)).await?;
            return Ok(Action::await_change());
        }
    };

    let synced = match sync_gateway(&ctx, &gateway, |table| table.assign(&pref, &desired)).await {
        Ok(synced) => synced,
        Err(e) => {
            if let Err(write_err) =
                write_status(&ctx, api, &policy, &unplaced_status(PolicyPhase::Failed, &e)).await
            {
                tracing::warn!(error=%write_err, "failed to write Failed status");
            }
            return Err(e);
        }
    };

    let Some(synced) = synced else {
        let e = EgressError::GatewayNotFound(gateway);
        tracing::warn!(error=%e, "egress gateway is missing");
        write_status(
            &ctx,
            api,
            &policy,
            &unplaced_status(PolicyPhase::GatewayNotFound, &e),
        )
        .await?;
        return Ok(Action::requeue(ctx.error_backoff(&key)));
    };
    publish_metrics(&ctx, &gateway, &synced)?;

    let status = match &synced.value {
        Ok(group) => {
            tracing::info!(gateway = %gateway, group=%group, "assigned Eip group");
            policy_status(&synced.table, &pref, &synced.candidates)
                .unwrap_or_else(|| unplaced_status(PolicyPhase::Failed, "no Eip group is held"))
        }
        Err(e) if e.is_exhausted() => {
            tracing::warn!(gateway = %gateway, error=%e, "gateway pool is exhausted");
            unplaced_status(PolicyPhase::PoolExhausted, e)
        }
        Err(e) => {
            tracing::warn!(gateway = %gateway, error=%e, "failed to assign Eip group");
            unplaced_status(PolicyPhase::Failed, e)
        }
    };
    write_status(&ctx, api, &policy, &status).await?;

    match status.phase {
        Some(PolicyPhase::Ready) => {
            ctx.reset_backoff(&key);
            ctx.touch().await;
            Ok(ctx.requeue())
        }
        Some(PolicyPhase::NoReadyNode) => Ok(ctx.requeue()),
        _ => Ok(Action::requeue(ctx.error_backoff(&key))),
    }
}

/// Releases the membership of a deleted policy.
pub async fn cleanup<P>(policy: &P, ctx: Arc<Context>) -> Result<Action, Error>
where
    P: EgressPolicyLike,
{
    let Some(gateway) = policy.gateway_name() else {
        return Ok(Action::await_change());
    };
    let pref = policy.policy_ref();

    match sync_gateway(&ctx, gateway, |table| table.detach(&pref)).await? {
        Some(synced) => {
            if synced.value {
                tracing::info!(gateway, "released Eip group membership");
            }
            publish_metrics(&ctx, gateway, &synced)?;
        }
        None => tracing::warn!(gateway, "egress gateway is already deleted"),
    }
    ctx.reset_backoff(&backoff_key(policy));

    Ok(Action::await_change())
}

/// Writes the policy status when it differs from the current one.
///
/// The first attempt uses the object in hand. After a conflict the object is
/// fetched again.
async fn write_status<P>(
    ctx: &Context,
    api: &Api<P>,
    policy: &P,
    status: &EgressPolicyStatus,
) -> Result<(), Error>
where
    P: EgressPolicyLike + DeserializeOwned,
{
    let name = policy.name_any();
    let refetch = AtomicBool::new(false);
    let (name, refetch) = (&name, &refetch);
    ctx.retry_on_conflict(name, move || {
        write_status_once(ctx, api, policy, status, refetch.swap(true, Ordering::Relaxed))
    })
    .await
}

async fn write_status_once<P>(
    ctx: &Context,
    api: &Api<P>,
    policy: &P,
    status: &EgressPolicyStatus,
    refetch: bool,
) -> Result<(), Error>
where
    P: EgressPolicyLike + DeserializeOwned,
{
    let current = if refetch {
        match ctx.call(api.get_opt(&policy.name_any())).await? {
            Some(current) => current,
            None => return Ok(()),
        }
    } else {
        policy.clone()
    };
    if current.policy_status() == Some(status) {
        return Ok(());
    }

    tracing::info!(phase=?status.phase, "update policy status");
    let mut new_policy = current;
    new_policy.set_policy_status(status.clone());
    let data = serde_json::to_vec(&new_policy).map_err(Error::Serialization)?;
    ctx.call(api.replace_status(&policy.name_any(), &PostParams::default(), data))
        .await?;
    Ok(())
}

/// Policies to requeue when a gateway changes: those pointing at it and
/// those still waiting for resolution.
pub fn affected_by<P: EgressPolicyLike>(
    policies: impl Iterator<Item = Arc<P>>,
    gateway: &EgressGateway,
) -> Vec<ObjectRef<P>> {
    let name = gateway.name_any();
    policies
        .filter(|p| match p.gateway_name() {
            Some(gw) => gw == name,
            None => true,
        })
        .map(|p| ObjectRef::from_obj(p.as_ref()))
        .collect()
}
