use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("Invalid label selector operator: {0}")]
    InvalidSelectorOperator(String),
}
