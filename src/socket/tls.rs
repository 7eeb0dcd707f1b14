//! TLS configuration for clients and servers.

use crate::base::{Error, Result};
use boring::ssl::{
    ConnectConfiguration, SslAcceptor, SslConnector, SslFiletype, SslMethod, SslVerifyMode,
    SslVersion,
};
use std::path::{Path, PathBuf};

/// Server certificate verification mode.
///
/// `HostName` verifies the certificate chain and checks the certificate
/// against the SNI name. `None` disables verification entirely and must
/// only be used against trusted test peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslVerify {
    #[default]
    HostName,
    None,
}

/// Client-side TLS knobs: verification mode and CA bundle source.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub verify: SslVerify,
    pub ca_file: Option<PathBuf>,
}

impl TlsConfig {
    /// Build the per-connection TLS configuration. SNI is set by the
    /// handshake from the request host.
    pub(crate) fn connect_config(&self) -> Result<ConnectConfiguration> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| Error::Handshake)?;

        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|_| Error::Handshake)?;

        match &self.ca_file {
            Some(path) => builder.set_ca_file(path).map_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "cannot load CA file");
                Error::Handshake
            })?,
            None => builder
                .set_default_verify_paths()
                .map_err(|_| Error::Handshake)?,
        }

        match self.verify {
            SslVerify::HostName => builder.set_verify(SslVerifyMode::PEER),
            SslVerify::None => builder.set_verify(SslVerifyMode::NONE),
        }

        let mut config = builder
            .build()
            .configure()
            .map_err(|_| Error::Handshake)?;

        if self.verify == SslVerify::None {
            config.set_verify_hostname(false);
        }

        Ok(config)
    }
}

/// Build a server-side acceptor from PEM certificate chain and key files.
pub(crate) fn acceptor_from_pem(cert_file: &Path, key_file: &Path) -> Result<SslAcceptor> {
    let mut builder =
        SslAcceptor::mozilla_intermediate(SslMethod::tls()).map_err(|_| Error::Handshake)?;
    builder
        .set_private_key_file(key_file, SslFiletype::PEM)
        .map_err(|e| {
            tracing::error!(path = %key_file.display(), error = %e, "cannot load TLS key");
            Error::Handshake
        })?;
    builder
        .set_certificate_chain_file(cert_file)
        .map_err(|e| {
            tracing::error!(path = %cert_file.display(), error = %e, "cannot load TLS cert");
            Error::Handshake
        })?;
    Ok(builder.build())
}
