//! Relay configuration.
//!
//! Flags with environment fallbacks; everything is validated once at startup
//! so a bad value stops the process before the listener binds.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tlsmux_networking::{IpAllowList, NetworkError, ALLOW_ALL};

use crate::proxy::{validate_host_port, BackendTarget, DomainError, DomainPolicy, ALLOW_ANY};

/// Command line for `tlsmux`.
#[derive(Debug, Clone, Parser)]
#[command(name = "tlsmux", version, about = "Transparent TLS/HTTP relay with SNI and Host filtering")]
pub struct Args {
    /// Listen address (host:port).
    #[arg(long, env = "TLSMUX_SRC", default_value = "0.0.0.0:1234")]
    pub src: String,

    /// Comma-separated backends. With filtering on, the first takes plaintext
    /// and the second takes TLS.
    #[arg(long, env = "TLSMUX_DST", default_value = "127.0.0.1:4321")]
    pub dst: String,

    /// Comma-separated CIDR blocks allowed to connect.
    #[arg(long, env = "TLSMUX_CIDR", default_value = ALLOW_ALL)]
    pub cidr: String,

    /// Comma-separated domain patterns, or `*` to allow everything.
    #[arg(long, env = "TLSMUX_DOMAIN", default_value = ALLOW_ANY)]
    pub domain: String,

    /// Backend connect timeout in milliseconds (0 = none).
    #[arg(long, env = "TLSMUX_CONNECT_TIMEOUT_MS", default_value_t = 0)]
    pub connect_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, env = "TLSMUX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address: {0}")]
    InvalidListenAddr(String),

    #[error("no backends configured")]
    NoBackends,

    #[error("invalid backend: {0}")]
    InvalidBackend(String),

    #[error("invalid CIDR list: {0}")]
    Network(#[from] NetworkError),

    #[error("invalid domain list: {0}")]
    Domain(#[from] DomainError),
}

/// Validated relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port`; a host name is resolved when the listener binds.
    pub listen_addr: String,
    /// Ordered; position matters when domain filtering is on.
    pub backends: Vec<BackendTarget>,
    pub allow_list: IpAllowList,
    pub domains: DomainPolicy,
    /// Deadline for the backend dial only.
    pub connect_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Validate parsed arguments.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let listen_addr = validate_host_port(&args.src)
            .map_err(ConfigError::InvalidListenAddr)?
            .to_string();

        let backends = parse_backends(&args.dst)?;
        let allow_list = IpAllowList::parse(&args.cidr)?;
        let domains = DomainPolicy::parse(&args.domain)?;

        let connect_timeout =
            (args.connect_timeout_ms > 0).then(|| Duration::from_millis(args.connect_timeout_ms));

        Ok(Self {
            listen_addr,
            backends,
            allow_list,
            domains,
            connect_timeout,
            log_level: args.log_level,
        })
    }
}

fn parse_backends(list: &str) -> Result<Vec<BackendTarget>, ConfigError> {
    if list.trim().is_empty() {
        return Err(ConfigError::NoBackends);
    }
    list.split(',')
        .map(|entry| BackendTarget::new(entry).map_err(ConfigError::InvalidBackend))
        .collect()
}
