use std::net::IpAddr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Ipam Error: {0}")]
    Ipam(#[source] egressd_ipam::error::Error),

    #[error("Gateway pool error: {0}")]
    InvalidPool(#[source] egressd_ipam::error::Error),

    #[error("EgressGateway {0} is not found")]
    GatewayNotFound(String),

    #[error("No egress gateway is resolvable")]
    Unresolved,

    #[error("Address {0} is already used by another Eip group")]
    AddressInUse(IpAddr),

    #[error("No enabled address family has a pool on the gateway")]
    NoPool,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown election strategy: {0}")]
    UnknownElectionStrategy(String),

    #[error("{0}")]
    Invalid(String),
}

impl Error {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::Ipam(egressd_ipam::error::Error::Exhausted))
    }
}
