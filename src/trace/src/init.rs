use std::{fs::File, sync::Arc};

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use crate::error::InitError;

#[derive(Debug)]
pub struct TraceConfig {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
}

/// Installs the global subscriber.
///
/// `level` accepts anything `EnvFilter` understands, e.g. `info` or
/// `info,kube=warn`. Output goes to stdout in plain or json format, and is
/// also written to `file` when one is given.
pub fn prepare_tracing(conf: TraceConfig) -> Result<(), InitError> {
    let filter = EnvFilter::try_new(&conf.level).map_err(InitError::Filter)?;

    let file_layer = match conf.file {
        Some(path) => {
            let file = File::create(path).map_err(InitError::LogFile)?;
            Some(
                fmt::Layer::new()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    let (plain, json) = if conf.format == "json" {
        (None, Some(fmt::Layer::new().json()))
    } else {
        (Some(fmt::Layer::new().with_ansi(true)), None)
    };

    Registry::default()
        .with(filter)
        .with(file_layer)
        .with(plain)
        .with(json)
        .try_init()
        .map_err(InitError::Subscriber)
}
