use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use egressd_kubernetes::controller::config::Config;
use egressd_trace::init::TraceConfig;

use crate::controller::ControllerCmd;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cmd {
    #[arg(
        short,
        long,
        global = true,
        required = false,
        default_value = "info",
        help = "Log level(trace, debug, info, warn, error)"
    )]
    pub level: String,

    #[arg(
        value_enum,
        short = 'd',
        long,
        global = true,
        required = false,
        default_value = "plain",
        help = "Log display format"
    )]
    pub format: Format,

    #[arg(short = 'o', long = "log-file", global = true, help = "Log output file path")]
    pub log_file: Option<String>,

    #[clap(subcommand)]
    pub sub: SubCmd,
}

#[derive(Debug, Clone, Parser, ValueEnum)]
pub enum Format {
    Plain,
    Json,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Plain => write!(f, "plain"),
            Format::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum SubCmd {
    Controller(ControllerCmd),
    Version,
}

pub fn run() -> anyhow::Result<()> {
    let command = Cmd::parse();

    let trace_conf = TraceConfig {
        level: command.level,
        format: command.format.to_string(),
        file: command.log_file,
    };

    match command.sub {
        SubCmd::Version => println!("{}", env!("CARGO_PKG_VERSION")),
        SubCmd::Controller(c) => {
            let config = controller_config(c)?;
            egressd_kubernetes::controller::server::start(config, trace_conf)
                .context("egressd controller stopped")?;
        }
    }
    Ok(())
}

// Flags override values loaded from the config file.
fn controller_config(c: ControllerCmd) -> anyhow::Result<Config> {
    let mut config = match c.file {
        None => Config::default(),
        Some(file) => Config::load(&file).with_context(|| format!("failed to load {file}"))?,
    };

    config.http_port = c.http_port;
    config.https_port = c.https_port;

    if let Some(cert) = c.tls_cert {
        config.tls.cert = cert;
    }
    if let Some(key) = c.tls_key {
        config.tls.key = key;
    }
    if let Some(interval) = c.requeue_interval {
        config.requeue_interval = interval;
    }
    if let Some(v4) = c.enable_ipv4 {
        config.enable_ipv4 = v4;
    }
    if let Some(v6) = c.enable_ipv6 {
        config.enable_ipv6 = v6;
    }
    if let Some(election) = c.election {
        config.election = election;
    }
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use egressd_kubernetes::egress::elector::ElectionStrategy;

    #[test]
    fn works_controller_flags_override_defaults() {
        let cmd = Cmd::parse_from([
            "egressd",
            "--level",
            "debug",
            "controller",
            "--tls-cert",
            "/tmp/tls.crt",
            "--enable-ipv6",
            "true",
            "--election",
            "rendezvous",
        ]);
        assert_eq!(cmd.level, "debug");
        let SubCmd::Controller(c) = cmd.sub else {
            panic!("controller subcommand expected");
        };
        let config = controller_config(c).unwrap();
        assert_eq!(config.tls.cert, "/tmp/tls.crt");
        assert!(config.enable_ipv4);
        assert!(config.enable_ipv6);
        assert_eq!(config.election, ElectionStrategy::Rendezvous);
    }

    #[test]
    fn fails_all_families_disabled() {
        let cmd = Cmd::parse_from([
            "egressd",
            "controller",
            "--enable-ipv4",
            "false",
            "--enable-ipv6",
            "false",
        ]);
        let SubCmd::Controller(c) = cmd.sub else {
            panic!("controller subcommand expected");
        };
        assert!(controller_config(c).is_err());
    }
}
