pub const DEFAULT_TLS_CERT: &str = "/etc/egressd/webhook/tls.crt";
pub const DEFAULT_TLS_KEY: &str = "/etc/egressd/webhook/tls.key";
