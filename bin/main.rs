#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::path::PathBuf;

use clap::Parser;
use empath_proxy::{
    config::{InboundTls, ProxyConfig, TlsPolicy},
    controller::Controller,
};

/// Transparent SMTP proxy that rewrites HTML parts on their way to the relay
#[derive(Parser, Debug)]
#[command(name = "empath-proxy")]
#[command(version)]
struct Args {
    /// TOML configuration file; command-line options override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long = "in-hostport")]
    listen: Option<String>,

    /// Relay to forward to, as host:port
    #[arg(long = "out-hostport")]
    upstream: Option<String>,

    /// Log bridge diagnostics at INFO
    #[arg(short, long)]
    verbose: bool,

    /// Certificate for inbound STARTTLS
    #[arg(long = "certfile", requires = "key")]
    certificate: Option<PathBuf>,

    /// Private key for inbound STARTTLS
    #[arg(long = "privkeyfile", requires = "certificate")]
    key: Option<PathBuf>,

    /// Append a transcript of every client session to this file
    #[arg(long)]
    server_debug: Option<PathBuf>,

    /// Refuse to relay unless the upstream leg is encrypted
    #[arg(long)]
    require_upstream_tls: bool,

    /// Name to announce instead of the certificate or host name
    #[arg(long)]
    domain: Option<String>,

    /// Accept any upstream certificate
    #[arg(long)]
    accept_invalid_certs: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ProxyConfig> {
        let mut config = match find_config_file(self.config)? {
            Some(path) => ProxyConfig::from_file(&path)?,
            None => ProxyConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(upstream) = self.upstream {
            config.upstream = upstream;
        }
        if let (Some(certificate), Some(key)) = (self.certificate, self.key) {
            config.tls = Some(InboundTls { certificate, key });
        }
        if self.server_debug.is_some() {
            config.server_debug = self.server_debug;
        }
        if self.domain.is_some() {
            config.domain = self.domain;
        }

        config.verbose |= self.verbose;
        config.upstream_tls.accept_invalid_certs |= self.accept_invalid_certs;
        if self.require_upstream_tls {
            config.upstream_tls.policy = TlsPolicy::Required;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    Controller::new(config).run().await
}

/// Find the configuration file using the following precedence:
/// 1. `--config`
/// 2. `EMPATH_PROXY_CONFIG` environment variable
/// 3. ./empath-proxy.toml (current working directory)
/// 4. /etc/empath-proxy/empath-proxy.toml (system-wide config)
///
/// Without any of these the built-in defaults are used.
fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path));
    }

    if let Ok(env_path) = std::env::var("EMPATH_PROXY_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "EMPATH_PROXY_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    Ok([
        PathBuf::from("./empath-proxy.toml"),
        PathBuf::from("/etc/empath-proxy/empath-proxy.toml"),
    ]
    .into_iter()
    .find(|path| path.exists()))
}
