use std::net::IpAddr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Protocol mismatch")]
    ProtocolMismatch,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid pool entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Duplicated address in pool: {0}")]
    Duplicated(IpAddr),

    #[error("Pool too large: more than {0} addresses")]
    PoolTooLarge(u128),

    #[error("Default address {0} is not a member of the pool")]
    DefaultNotContained(IpAddr),

    #[error("Not contains")]
    NotContains,

    #[error("Already allocated: {0}")]
    AlreadyAllocated(IpAddr),

    #[error("No releasable address")]
    NoReleasableAddress,

    #[error("Pool is empty")]
    EmptyPool,

    #[error("Pool exhausted")]
    Exhausted,
}
