pub mod egress_cluster_info;
pub mod egress_cluster_policy;
pub mod egress_gateway;
pub mod egress_policy;
pub mod gateway_sync;
pub mod policy;
