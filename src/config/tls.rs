//! TLS settings for both legs: the policy applied to the upstream relay,
//! and the certificate offered to submitting clients.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer},
    },
};

use crate::error::ConfigError;

/// When the upstream leg is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Upgrade the upstream leg only when the client asks for STARTTLS,
    /// and only if the relay offers it.
    #[default]
    Opportunistic,

    /// Upgrade the upstream leg straight after the greeting. A relay that
    /// cannot be secured blocks the session.
    Required,
}

/// Upstream TLS configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UpstreamTls {
    /// Default: `Opportunistic`
    #[serde(default)]
    pub policy: TlsPolicy,

    /// Whether to accept invalid upstream certificates (self-signed, expired, etc.).
    ///
    /// **SECURITY WARNING**: only for testing against a relay with a
    /// self-signed certificate.
    ///
    /// Default: `false`
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl UpstreamTls {
    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self.policy, TlsPolicy::Required)
    }
}

/// Certificate and key offered to clients that issue STARTTLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTls {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// The loaded inbound certificate, ready for use by every session.
#[derive(Clone)]
pub struct TlsContext {
    pub acceptor: TlsAcceptor,
    /// Subject common name of the leaf certificate, if it has one.
    pub common_name: Option<String>,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("common_name", &self.common_name)
            .finish_non_exhaustive()
    }
}

impl InboundTls {
    /// Load the certificate chain and private key.
    ///
    /// # Errors
    ///
    /// Fails if either file cannot be read or parsed, or rustls rejects the
    /// pair.
    pub fn load(&self) -> Result<TlsContext, ConfigError> {
        let certs = load_certs(&self.certificate)?;
        let key = load_key(&self.key)?;

        let common_name = certs.first().and_then(|leaf| common_name(leaf.as_ref()));

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(TlsContext {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            common_name,
        })
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let error = |reason: String| ConfigError::CertificateLoad {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| error(e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| error(e.to_string()))?;

    if certs.is_empty() {
        return Err(error("no certificates found".to_string()));
    }

    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let path_str = path.display().to_string();
    let mut reader = BufReader::new(File::open(path).map_err(|e| ConfigError::KeyLoad {
        path: path_str.clone(),
        reason: e.to_string(),
    })?);

    match rustls_pemfile::read_one(&mut reader).map_err(|e| ConfigError::KeyLoad {
        path: path_str.clone(),
        reason: e.to_string(),
    })? {
        Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
        Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
        Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
        _ => Err(ConfigError::KeyLoad {
            path: path_str,
            reason: "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)"
                .to_string(),
        }),
    }
}

fn common_name(der: &[u8]) -> Option<String> {
    let (_, certificate) = x509_parser::parse_x509_certificate(der).ok()?;

    certificate
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}
