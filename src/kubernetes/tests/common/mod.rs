use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Patch, PatchParams},
    runtime::wait::{await_condition, conditions},
    Api, Client, CustomResourceExt, ResourceExt,
};
use egressd_kubernetes::crd::{
    egress_cluster_info::EgressClusterInfo,
    egress_cluster_policy::EgressClusterPolicy,
    egress_gateway::EgressGateway,
    egress_policy::EgressPolicy,
    egress_tunnel::{EgressTunnel, EgressTunnelSpec},
};

// Make sure kind binary is in here
const KIND_BIN: &str = "../../bin/kind";
const KUBECTL_BIN: &str = "../../bin/kubectl";
const KIND_CLUSTER_NAME: &str = "egressd-integration";
pub(super) const KIND_NODE_CP: &str = "egressd-integration-control-plane";
const KIND_CLUSTER_IMAGE: &str = "kindest/node";
const KIND_CLUSTER_IMAGE_VERSION_ENV: &str = "KIND_NODE_VERSION";

pub fn setup_kind() {
    cleanup_kind_no_output();
    let mut binding = std::process::Command::new(KIND_BIN);
    binding.args(["create", "cluster", "--name", KIND_CLUSTER_NAME]);
    if let Ok(v) = std::env::var(KIND_CLUSTER_IMAGE_VERSION_ENV) {
        binding.args(["--image", &format!("{}:{}", KIND_CLUSTER_IMAGE, v)]);
    };

    let out = binding.output().expect("failed to create kind cluster");
    output_result(out);

    kubectl_label("nodes", KIND_NODE_CP, "egress=true");

    std::thread::sleep(std::time::Duration::from_secs(2));
}

pub fn cleanup_kind() {
    let out = std::process::Command::new(KIND_BIN)
        .args(["delete", "cluster", "--name", KIND_CLUSTER_NAME])
        .output()
        .expect("failed to delete kind cluster");
    output_result(out);

    std::thread::sleep(std::time::Duration::from_secs(5));
}

pub fn cleanup_kind_no_output() {
    let _ = std::process::Command::new(KIND_BIN)
        .args(["delete", "cluster", "--name", KIND_CLUSTER_NAME])
        .output();
}

pub fn kubectl_label(resource: &str, name: &str, label: &str) {
    let out = std::process::Command::new(KUBECTL_BIN)
        .args(["label", resource, "--overwrite", name, label])
        .output()
        .expect("failed to add label");
    output_result(out);
}

/// Applies the CRDs generated from the derived types and waits for them.
pub async fn install_crds(client: Client) {
    let crds = Api::<CustomResourceDefinition>::all(client);
    let ssapply = PatchParams::apply("ctrltest").force();
    for crd in [
        EgressGateway::crd(),
        EgressPolicy::crd(),
        EgressClusterPolicy::crd(),
        EgressClusterInfo::crd(),
        EgressTunnel::crd(),
    ] {
        let name = crd.name_any();
        crds.patch(&name, &ssapply, &Patch::Apply(&crd))
            .await
            .unwrap();
        let established = await_condition(crds.clone(), &name, conditions::is_crd_established());
        tokio::time::timeout(Duration::from_secs(30), established)
            .await
            .expect("crd is not established in time")
            .unwrap();
    }
}

/// Stands in for the node agent by reporting a Ready tunnel for the node.
pub async fn ready_tunnel(client: Client, node: &str) {
    let tunnels = Api::<EgressTunnel>::all(client);
    let tunnel = EgressTunnel::new(node, EgressTunnelSpec {});
    tunnels
        .patch(node, &PatchParams::apply("ctrltest"), &Patch::Apply(&tunnel))
        .await
        .unwrap();
    let status = serde_json::json!({"status": {"phase": "Ready"}});
    tunnels
        .patch_status(node, &PatchParams::default(), &Patch::Merge(&status))
        .await
        .unwrap();
}

fn output_result(out: std::process::Output) {
    if out.status.success() {
        println!("STDOUT");
        println!("{}", String::from_utf8_lossy(&out.stdout));
    } else {
        println!("STDERR: exit status is {}", out.status);
        println!("{}", String::from_utf8_lossy(&out.stderr));
    }
}
