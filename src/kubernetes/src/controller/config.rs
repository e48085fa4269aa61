use std::{fs, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{config::Tls, egress::{allocation::Families, elector::ElectionStrategy}};

use super::{
    backoff::ExponentialBackoff,
    error::{ConfigError, Error},
};

pub const DEFAULT_HTTP_PORT: u32 = 8080;
pub const DEFAULT_HTTPS_PORT: u32 = 8443;
pub const DEFAULT_REQUEUE_INTERVAL: u64 = 30 * 60;
pub const DEFAULT_API_TIMEOUT: u64 = 10;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub http_port: u32,
    pub https_port: u32,
    pub tls: Tls,
    // seconds
    pub requeue_interval: u64,
    // seconds
    pub api_timeout: u64,
    pub enable_ipv4: bool,
    pub enable_ipv6: bool,
    pub election: ElectionStrategy,
    pub retry: Retry,
}

/// Retry of conflicting gateway status writes.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_millis: u64,
    pub max_millis: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            max_attempts: 5,
            base_millis: 100,
            max_millis: 3000,
        }
    }
}

impl Retry {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.base_millis),
            Duration::from_millis(self.max_millis),
        )
    }
}

impl Config {
    pub fn load(file: &str) -> Result<Self, Error> {
        let contents = fs::read_to_string(file).map_err(Error::StdIo)?;
        serde_yaml::from_str(&contents).map_err(|e| Error::Config(ConfigError::FailedToLoad(e)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.enable_ipv4 && !self.enable_ipv6 {
            return Err(Error::Config(ConfigError::InvalidArgument(
                "at least one of enableIpv4 and enableIpv6 must be true".to_string(),
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(ConfigError::InvalidArgument(
                "retry.maxAttempts must be positive".to_string(),
            )));
        }
        if self.retry.base_millis > self.retry.max_millis {
            return Err(Error::Config(ConfigError::InvalidArgument(
                "retry.baseMillis must not exceed retry.maxMillis".to_string(),
            )));
        }
        if self.api_timeout == 0 {
            return Err(Error::Config(ConfigError::InvalidArgument(
                "apiTimeout must be positive".to_string(),
            )));
        }
        Ok(())
    }

    pub fn families(&self) -> Families {
        Families {
            ipv4: self.enable_ipv4,
            ipv6: self.enable_ipv6,
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            tls: Tls::default(),
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
            api_timeout: DEFAULT_API_TIMEOUT,
            enable_ipv4: true,
            enable_ipv6: true,
            election: ElectionStrategy::default(),
            retry: Retry::default(),
        }
    }
}
