pub mod backoff;
pub mod config;
pub mod context;
pub mod error;
pub mod lookup;
pub mod metrics;
pub mod reconciler;
pub mod server;
pub mod webhook;
