use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("std::io::Error: {0}")]
    StdIo(#[from] std::io::Error),

    #[error("no certificate found in {0}")]
    NoCertificate(String),

    #[error("no PKCS8-encoded private key found in {0}")]
    NoPrivateKey(String),

    #[error("more than one PKCS8-encoded private key found in {0}")]
    TooManyPrivateKeys(String),

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}
