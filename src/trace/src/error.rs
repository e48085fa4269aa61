pub trait TraceableError: std::error::Error {
    fn metric_label(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("invalid log filter: {0}")]
    Filter(#[source] tracing_subscriber::filter::ParseError),

    #[error("failed to open log file: {0}")]
    LogFile(#[source] std::io::Error),

    #[error("failed to set global subscriber: {0}")]
    Subscriber(#[source] tracing_subscriber::util::TryInitError),
}
