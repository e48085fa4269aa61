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
        egress_cluster_policy::{EgressClusterPolicy, EGRESS_CLUSTER_POLICY_FINALIZER},
        egress_gateway::EgressGateway,
    },
};

use super::policy;

#[tracing::instrument(skip_all, fields(trace_id))]
pub async fn reconciler(ecp: Arc<EgressClusterPolicy>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = egressd_trace::telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    let _timer = {
        let metrics = ctx.metrics();
        let metrics = metrics.lock().map_err(|_| Error::FailedToGetLock)?;
        metrics.reconciliation(ecp.as_ref());
        metrics.measure()
    };

    let egress_cluster_policies = Api::<EgressClusterPolicy>::all(ctx.client.clone());

    finalizer(
        &egress_cluster_policies,
        EGRESS_CLUSTER_POLICY_FINALIZER,
        ecp,
        |event| async {
            match event {
                Event::Apply(ecp) => reconcile(&egress_cluster_policies, &ecp, ctx.clone()).await,
                Event::Cleanup(ecp) => cleanup(&ecp, ctx.clone()).await,
            }
        },
    )
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

#[tracing::instrument(skip_all, fields(name = ecp.name_any()))]
async fn reconcile(
    api: &Api<EgressClusterPolicy>,
    ecp: &EgressClusterPolicy,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    tracing::info!("reconcile EgressClusterPolicy");

    policy::reconcile(api, ecp, ctx).await
}

#[tracing::instrument(skip_all, fields(name = ecp.name_any()))]
async fn cleanup(ecp: &EgressClusterPolicy, ctx: Arc<Context>) -> Result<Action, Error> {
    tracing::info!("clean up EgressClusterPolicy");

    policy::cleanup(ecp, ctx).await
}

pub async fn run(state: State, config: Arc<Config>, metrics: Arc<Mutex<Metrics>>) {
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error=?e, "Failed to create kube client");
            std::process::exit(1);
        }
    };

    let egress_cluster_policies = Api::<EgressClusterPolicy>::all(client.clone());
    if let Err(e) = egress_cluster_policies
        .list(&ListParams::default().limit(1))
        .await
    {
        tracing::error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    tracing::info!("Start EgressClusterPolicy reconciler");

    let controller = Controller::new(
        egress_cluster_policies,
        WatcherConfig::default().any_semantic(),
    );
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
            error_policy::<EgressClusterPolicy, Error, Context>,
            state.to_context(client, config, metrics),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use kube::{runtime::controller::Action, Api};

    use crate::{
        controller::context::{Context, ERROR_BACKOFF_BASE},
        crd::{
            egress_cluster_policy::EgressClusterPolicy,
            egress_gateway::{EgressGateway, EgressGatewayStatus, EgressNode, Eip, PolicyRef},
            egress_policy::PolicyPhase,
        },
        fixture::reconciler::{
            object_list, test_cluster_info, test_cluster_policy, test_gateway,
            timeout_after_1s, ApiServerVerifier,
        },
    };

    use super::{cleanup, reconcile};

    enum Scenario {
        Unresolved(EgressClusterPolicy),
        NodeIp(EgressClusterPolicy),
        Cleanup,
    }

    impl ApiServerVerifier {
        fn egress_cluster_policy_run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
            tokio::spawn(async move {
                match scenario {
                    Scenario::Unresolved(ecp) => self.cluster_policy_unresolved(&ecp).await,
                    Scenario::NodeIp(ecp) => self.cluster_policy_node_ip(&ecp).await,
                    Scenario::Cleanup => self.cluster_policy_cleanup().await,
                }
            })
        }

        async fn cluster_policy_unresolved(self, ecp: &EgressClusterPolicy) {
            let mut gw = test_gateway();
            gw.spec.cluster_default = false;
            let (_, written) = self
                .list(&test_gateway(), object_list(vec![gw]))
                .await
                .get_not_found(&test_cluster_info())
                .await
                .replace_status(ecp)
                .await;
            let status = written.status.unwrap();
            assert_eq!(status.phase, Some(PolicyPhase::Unresolved));
            assert_eq!(status.eip, None);
        }

        async fn cluster_policy_node_ip(self, ecp: &EgressClusterPolicy) {
            let gw = test_gateway();
            let (verifier, written) = self
                .get(&gw)
                .await
                .list_candidates()
                .await
                .replace_status(&gw)
                .await;
            let eips = written.eips().cloned().collect::<Vec<Eip>>();
            assert_eq!(
                eips,
                vec![Eip {
                    ipv4: String::new(),
                    ipv6: String::new(),
                    policies: vec![PolicyRef::cluster("cluster-policy")],
                }]
            );

            let (_, written) = verifier.replace_status(ecp).await;
            let status = written.status.unwrap();
            assert_eq!(status.phase, Some(PolicyPhase::Ready));
            assert_eq!(status.node.as_deref(), Some("node1"));
            assert_eq!(status.eip.unwrap().ipv4.as_deref(), Some("172.18.0.2"));
        }

        async fn cluster_policy_cleanup(self) {
            let gw = gateway_with_member();
            let (_, written) = self
                .get(&gw)
                .await
                .list_candidates()
                .await
                .replace_status(&gw)
                .await;
            assert!(!written.has_members());
            assert_eq!(written.status.unwrap().ip_usage.ipv4_free, 2);
        }
    }

    fn gateway_with_member() -> EgressGateway {
        let mut gw = test_gateway();
        gw.status = Some(EgressGatewayStatus {
            node_list: vec![EgressNode {
                name: "node1".to_string(),
                status: "Ready".to_string(),
                eips: vec![Eip {
                    ipv4: "10.10.10.2".to_string(),
                    ipv6: String::new(),
                    policies: vec![PolicyRef::cluster("cluster-policy")],
                }],
            }],
            ..Default::default()
        });
        gw
    }

    #[tokio::test]
    async fn works_unresolved_gateway() {
        let (testctx, fakeserver, _) = Context::test();
        let mut ecp = test_cluster_policy();
        ecp.spec.egress_gateway_name = None;
        let api = Api::<EgressClusterPolicy>::all(testctx.client.clone());

        let mocksvr = fakeserver.egress_cluster_policy_run(Scenario::Unresolved(ecp.clone()));
        let action = reconcile(&api, &ecp, testctx).await.expect("reconciler");
        assert_eq!(action, Action::requeue(ERROR_BACKOFF_BASE));
        timeout_after_1s(mocksvr).await;
    }

    #[tokio::test]
    async fn works_use_node_ip() {
        let (testctx, fakeserver, _) = Context::test();
        let mut ecp = test_cluster_policy();
        ecp.spec.egress_ip.use_node_ip = true;
        let api = Api::<EgressClusterPolicy>::all(testctx.client.clone());

        let mocksvr = fakeserver.egress_cluster_policy_run(Scenario::NodeIp(ecp.clone()));
        reconcile(&api, &ecp, testctx).await.expect("reconciler");
        timeout_after_1s(mocksvr).await;
    }

    #[tokio::test]
    async fn works_cleanup_releases_address() {
        let (testctx, fakeserver, _) = Context::test();
        let ecp = test_cluster_policy();

        let mocksvr = fakeserver.egress_cluster_policy_run(Scenario::Cleanup);
        let action = cleanup(&ecp, testctx).await.expect("cleanup");
        assert_eq!(action, Action::await_change());
        timeout_after_1s(mocksvr).await;
    }
}
