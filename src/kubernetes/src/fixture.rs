// #[cfg(test)]
pub mod reconciler {
    use std::collections::BTreeMap;

    use http::{Request, Response};
    use hyper::Body;
    use k8s_openapi::{
        api::core::v1::{Node, NodeAddress, NodeStatus},
        apimachinery::pkg::apis::meta::v1::LabelSelector,
    };
    use kube::{
        core::{ListMeta, ObjectList, ObjectMeta},
        discovery::ApiResource,
        Resource, ResourceExt,
    };
    use serde::{de::DeserializeOwned, Serialize};

    use crate::crd::{
        egress_cluster_info::{
            EgressClusterInfo, EgressClusterInfoSpec, EgressClusterInfoStatus,
            EGRESS_CLUSTER_INFO_FINALIZER, EGRESS_CLUSTER_INFO_NAME,
        },
        egress_cluster_policy::{
            ClusterAppliedTo, EgressClusterPolicy, EgressClusterPolicySpec,
            EGRESS_CLUSTER_POLICY_FINALIZER,
        },
        egress_gateway::{EgressGateway, EgressGatewaySpec, IpPools, EGRESS_GATEWAY_FINALIZER},
        egress_policy::{
            AppliedTo, EgressIP, EgressPolicy, EgressPolicySpec, EGRESS_POLICY_FINALIZER,
        },
        egress_tunnel::{EgressTunnel, EgressTunnelSpec, EgressTunnelStatus, TunnelPhase},
    };

    const GROUP: &str = "egressd.io";

    pub type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
    pub struct ApiServerVerifier(pub ApiServerHandle);

    pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario succeeded")
    }

    fn base_uri<T: Resource<DynamicType = ()>>() -> String {
        let api_resource = ApiResource::erase::<T>(&());
        if api_resource.group.eq(GROUP) {
            format!("/apis/{}", api_resource.api_version)
        } else {
            format!("/api/{}", api_resource.api_version)
        }
    }

    fn collection_uri<T: Resource<DynamicType = ()>>(res: &T) -> String {
        let api_resource = ApiResource::erase::<T>(&());
        match res.namespace() {
            Some(ns) => format!(
                "{}/namespaces/{}/{}",
                base_uri::<T>(),
                ns,
                api_resource.plural
            ),
            None => format!("{}/{}", base_uri::<T>(), api_resource.plural),
        }
    }

    pub fn get_uri<T: Resource<DynamicType = ()>>(res: &T) -> String {
        format!("{}/{}", collection_uri(res), res.name_any())
    }

    pub fn post_uri<T: Resource<DynamicType = ()>>(res: &T) -> String {
        format!("{}?", collection_uri(res))
    }

    pub fn put_uri<T: Resource<DynamicType = ()>>(res: &T, subresource: Option<&str>) -> String {
        match subresource {
            Some(s) => format!("{}/{s}?", get_uri(res)),
            None => format!("{}?", get_uri(res)),
        }
    }

    fn list_uri<T: Resource<DynamicType = ()>>(res: &T) -> String {
        format!("{}?", collection_uri(res))
    }

    fn patch_uri<T: Resource<DynamicType = ()>>(res: &T) -> String {
        format!("{}?", get_uri(res))
    }

    pub fn assert_resource_request<T: Resource<DynamicType = ()>>(
        request: &Request<Body>,
        res: &T,
        subresource: Option<&str>,
        list: bool,
        query: Option<String>,
        method: http::Method,
    ) {
        assert_eq!(request.method(), method);
        let uri = match method {
            http::Method::GET => {
                if list {
                    list_uri(res)
                } else {
                    get_uri(res)
                }
            }
            http::Method::POST => post_uri(res),
            http::Method::PUT => put_uri(res, subresource),
            http::Method::PATCH => patch_uri(res),
            _ => panic!("unimplemented method"),
        };
        let uri = if let Some(query) = query {
            format!("{uri}{}", query)
        } else {
            uri
        };
        assert_eq!(request.uri().to_string(), uri);
    }

    pub fn api_server_response_not_found<T: Resource<DynamicType = ()>>(res: &T) -> String {
        let api_resource = ApiResource::erase::<T>(&());
        let (group_kind, details) = if api_resource.group.eq(GROUP) {
            (
                format!("{}.{}", api_resource.plural, api_resource.group),
                format!(r#""group": "{}","#, api_resource.group),
            )
        } else {
            (api_resource.plural.clone(), String::new())
        };
        format!(
            r#"{{
  "kind": "Status",
  "apiVersion": "v1",
  "metadata": {{}},
  "status": "Failure",
  "message": "{} \"{}\" not found",
  "reason": "NotFound",
  "details": {{
    "name": "{}",
    {}
    "kind": "{}"
  }},
  "code": 404
}}"#,
            group_kind,
            res.name_any(),
            res.name_any(),
            details,
            api_resource.plural,
        )
    }

    pub fn api_server_response_conflict<T: Resource<DynamicType = ()>>(res: &T) -> String {
        let api_resource = ApiResource::erase::<T>(&());
        format!(
            r#"{{
  "kind": "Status",
  "apiVersion": "v1",
  "metadata": {{}},
  "status": "Failure",
  "message": "Operation cannot be fulfilled on {}.{} \"{}\": the object has been modified; please apply your changes to the latest version and try again",
  "reason": "Conflict",
  "details": {{
    "name": "{}",
    "group": "{}",
    "kind": "{}"
  }},
  "code": 409
}}"#,
            api_resource.plural,
            api_resource.group,
            res.name_any(),
            res.name_any(),
            api_resource.group,
            api_resource.plural,
        )
    }

    pub fn api_server_response_internal_error() -> String {
        r#"{
  "kind": "Status",
  "apiVersion": "v1",
  "metadata": {},
  "status": "Failure",
  "message": "etcdserver: request timed out",
  "reason": "InternalError",
  "code": 500
}"#
        .to_string()
    }

    pub fn api_server_response_resource<T: Resource<DynamicType = ()> + Serialize>(
        res: &T,
    ) -> Vec<u8> {
        serde_json::to_vec(res).unwrap()
    }

    impl ApiServerVerifier {
        pub async fn get<T: Resource<DynamicType = ()> + Serialize>(mut self, res: &T) -> Self {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_resource_request(&request, res, None, false, None, http::Method::GET);
            send.send_response(
                Response::builder()
                    .body(Body::from(api_server_response_resource(res)))
                    .unwrap(),
            );
            self
        }

        pub async fn get_not_found<T: Resource<DynamicType = ()>>(mut self, res: &T) -> Self {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_resource_request(&request, res, None, false, None, http::Method::GET);
            send.send_response(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::from(api_server_response_not_found(res)))
                    .unwrap(),
            );
            self
        }

        /// Answers a cluster wide list. `sample` only selects the resource type.
        pub async fn list<T: Resource<DynamicType = ()> + Clone + Serialize>(
            mut self,
            sample: &T,
            items: ObjectList<T>,
        ) -> Self {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_resource_request(&request, sample, None, true, None, http::Method::GET);
            send.send_response(
                Response::builder()
                    .body(Body::from(serde_json::to_vec(&items).unwrap()))
                    .unwrap(),
            );
            self
        }

        /// Accepts a status replacement and echoes the written object back.
        pub async fn replace_status<T>(mut self, res: &T) -> (Self, T)
        where
            T: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
        {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_resource_request(
                &request,
                res,
                Some("status"),
                false,
                None,
                http::Method::PUT,
            );
            let body = hyper::body::to_bytes(request.into_body()).await.unwrap();
            let written: T = serde_json::from_slice(&body).unwrap();
            send.send_response(Response::builder().body(Body::from(body)).unwrap());
            (self, written)
        }

        /// Answers the node and tunnel lists read to build a candidate set.
        pub async fn list_candidates(self) -> Self {
            self.list(&Node::default(), test_node_list())
                .await
                .list(&test_tunnel("sample", TunnelPhase::Ready), test_tunnel_list())
                .await
        }

        pub async fn replace_status_error<T: Resource<DynamicType = ()>>(mut self, res: &T) -> Self {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_resource_request(
                &request,
                res,
                Some("status"),
                false,
                None,
                http::Method::PUT,
            );
            send.send_response(
                Response::builder()
                    .status(http::StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::from(api_server_response_internal_error()))
                    .unwrap(),
            );
            self
        }

        pub async fn replace_status_conflict<T: Resource<DynamicType = ()>>(
            mut self,
            res: &T,
        ) -> Self {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_resource_request(
                &request,
                res,
                Some("status"),
                false,
                None,
                http::Method::PUT,
            );
            send.send_response(
                Response::builder()
                    .status(http::StatusCode::CONFLICT)
                    .body(Body::from(api_server_response_conflict(res)))
                    .unwrap(),
            );
            self
        }
    }

    pub fn object_list<T: Clone>(items: Vec<T>) -> ObjectList<T> {
        ObjectList {
            metadata: ListMeta::default(),
            items,
        }
    }

    fn egress_selector() -> LabelSelector {
        LabelSelector {
            match_labels: Some(BTreeMap::from([(
                "egress".to_string(),
                "true".to_string(),
            )])),
            match_expressions: None,
        }
    }

    pub fn test_gateway() -> EgressGateway {
        EgressGateway {
            metadata: ObjectMeta {
                name: Some("egw".to_string()),
                finalizers: Some(vec![EGRESS_GATEWAY_FINALIZER.to_string()]),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            spec: EgressGatewaySpec {
                node_selector: egress_selector(),
                ippools: IpPools {
                    ipv4: vec!["10.10.10.1".to_string(), "10.10.10.2".to_string()],
                    ipv6: Vec::new(),
                    ipv4_default_eip: Some("10.10.10.1".to_string()),
                    ipv6_default_eip: None,
                },
                cluster_default: true,
            },
            status: None,
        }
    }

    pub fn test_policy() -> EgressPolicy {
        EgressPolicy {
            metadata: ObjectMeta {
                name: Some("policy".to_string()),
                namespace: Some("default".to_string()),
                finalizers: Some(vec![EGRESS_POLICY_FINALIZER.to_string()]),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            spec: EgressPolicySpec {
                egress_gateway_name: Some("egw".to_string()),
                egress_ip: EgressIP::default(),
                applied_to: AppliedTo {
                    pod_subnet: None,
                    pod_selector: Some(LabelSelector {
                        match_labels: Some(BTreeMap::from([(
                            "app".to_string(),
                            "web".to_string(),
                        )])),
                        match_expressions: None,
                    }),
                },
                dest_subnet: Vec::new(),
            },
            status: None,
        }
    }

    pub fn test_cluster_policy() -> EgressClusterPolicy {
        EgressClusterPolicy {
            metadata: ObjectMeta {
                name: Some("cluster-policy".to_string()),
                finalizers: Some(vec![EGRESS_CLUSTER_POLICY_FINALIZER.to_string()]),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            spec: EgressClusterPolicySpec {
                egress_gateway_name: Some("egw".to_string()),
                egress_ip: EgressIP::default(),
                applied_to: ClusterAppliedTo {
                    pod_subnet: Some(vec!["10.244.0.0/16".to_string()]),
                    pod_selector: None,
                    namespace_selector: None,
                },
                dest_subnet: Vec::new(),
            },
            status: None,
        }
    }

    pub fn test_cluster_info() -> EgressClusterInfo {
        EgressClusterInfo {
            metadata: ObjectMeta {
                name: Some(EGRESS_CLUSTER_INFO_NAME.to_string()),
                finalizers: Some(vec![EGRESS_CLUSTER_INFO_FINALIZER.to_string()]),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            spec: EgressClusterInfoSpec {
                extra_cidr: vec!["10.6.0.0/16".to_string()],
            },
            status: Some(EgressClusterInfoStatus::default()),
        }
    }

    pub fn test_node(name: &str, ipv4: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    "egress".to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            spec: None,
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    address: ipv4.to_string(),
                    type_: "InternalIP".to_string(),
                }]),
                ..Default::default()
            }),
        }
    }

    pub fn test_node_list() -> ObjectList<Node> {
        object_list(vec![
            test_node("node1", "172.18.0.2"),
            test_node("node2", "172.18.0.3"),
        ])
    }

    pub fn test_tunnel(name: &str, phase: TunnelPhase) -> EgressTunnel {
        EgressTunnel {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: EgressTunnelSpec {},
            status: Some(EgressTunnelStatus { phase }),
        }
    }

    pub fn test_tunnel_list() -> ObjectList<EgressTunnel> {
        object_list(vec![
            test_tunnel("node1", TunnelPhase::Ready),
            test_tunnel("node2", TunnelPhase::Ready),
        ])
    }
}

pub fn test_trace() {
    let _ = egressd_trace::init::prepare_tracing(egressd_trace::init::TraceConfig {
        level: "info".to_string(),
        format: String::new(),
        file: None,
    });
}
