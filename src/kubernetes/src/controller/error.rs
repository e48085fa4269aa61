use kube::core::admission::SerializePatchError;
use egressd_trace::error::TraceableError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("std::io::Error")]
    StdIo(#[from] std::io::Error),

    #[error("failed to get lock")]
    FailedToGetLock,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("SerializationError: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("SerializePatchError: {0}")]
    SerializePatch(#[source] SerializePatchError),

    #[error("Kube Error: {0}")]
    Kube(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("Kube Library Error: {0}")]
    KubeLibrary(#[source] crate::error::Error),

    #[error("Egress Error: {0}")]
    Egress(#[source] crate::egress::error::Error),

    #[error("Cert Error: {0}")]
    Cert(#[source] egressd_cert::error::Error),

    #[error("Trace Error: {0}")]
    Trace(#[source] egressd_trace::error::InitError),

    #[error("Metrics Error: {0}")]
    Metrics(#[source] prometheus::Error),

    #[error("API call timed out")]
    Timeout,

    #[error("gave up writing {0} after repeated conflicts")]
    ConflictRetriesExhausted(String),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load: {0}")]
    FailedToLoad(#[source] serde_yaml::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl TraceableError for &Error {
    fn metric_label(&self) -> String {
        (*self).metric_label()
    }
}

impl TraceableError for Error {
    fn metric_label(&self) -> String {
        let label = match self {
            Error::StdIo(_) => "stdio",
            Error::FailedToGetLock => "lock",
            Error::Config(_) => "config",
            Error::Serialization(_) | Error::SerializePatch(_) => "serialization",
            Error::Kube(_) => "kube",
            Error::Finalizer(_) => "finalizer",
            Error::KubeLibrary(_) => "kube_library",
            Error::Egress(e) if e.is_exhausted() => "pool_exhausted",
            Error::Egress(_) => "egress",
            Error::Cert(_) => "cert",
            Error::Trace(_) => "trace",
            Error::Metrics(_) => "metrics",
            Error::Timeout => "timeout",
            Error::ConflictRetriesExhausted(_) => "conflict",
        };
        label.to_string()
    }
}
