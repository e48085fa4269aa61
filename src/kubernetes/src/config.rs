use serde::{Deserialize, Serialize};

use egressd_cert::constants::{DEFAULT_TLS_CERT, DEFAULT_TLS_KEY};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Tls {
    pub cert: String,
    pub key: String,
}

impl Default for Tls {
    fn default() -> Self {
        Tls {
            cert: DEFAULT_TLS_CERT.to_string(),
            key: DEFAULT_TLS_KEY.to_string(),
        }
    }
}
