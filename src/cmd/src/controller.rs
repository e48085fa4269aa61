use clap::Parser;
use egressd_kubernetes::{
    controller::config::{DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT},
    egress::elector::ElectionStrategy,
};

#[derive(Debug, Clone, Parser)]
pub struct ControllerCmd {
    #[arg(long = "http-port", default_value_t = DEFAULT_HTTP_PORT, help = "HTTP server serving port")]
    pub http_port: u32,

    #[arg(long = "https-port", default_value_t = DEFAULT_HTTPS_PORT, help = "HTTPS server serving port")]
    pub https_port: u32,

    #[arg(short = 'f', long, help = "Config file path for egressd controller")]
    pub file: Option<String>,

    #[arg(long = "tls-cert", help = "path to TLS Certificate for admission webhooks")]
    pub tls_cert: Option<String>,

    #[arg(long = "tls-key", help = "path to TLS Key for admission webhooks")]
    pub tls_key: Option<String>,

    #[arg(long = "requeue-interval", help = "Requeue interval of reconcilers in seconds")]
    pub requeue_interval: Option<u64>,

    #[arg(long = "enable-ipv4", help = "Allocate IPv4 egress addresses")]
    pub enable_ipv4: Option<bool>,

    #[arg(long = "enable-ipv6", help = "Allocate IPv6 egress addresses")]
    pub enable_ipv6: Option<bool>,

    #[arg(long, help = "Active node election strategy(first-by-name, rendezvous)")]
    pub election: Option<ElectionStrategy>,
}
