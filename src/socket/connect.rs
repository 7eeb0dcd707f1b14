//! The connect sequence: DNS resolve, TCP connect, TLS handshake.
//!
//! Phase deadlines are applied by the caller; each step here maps its
//! failure to the matching error kind.

use crate::base::{Error, Result};
use crate::socket::tls::TlsConfig;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_boring::SslStream;

/// Resolve `host:port` to socket addresses.
pub(crate) async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| {
            tracing::debug!(host, error = %e, "resolve failed");
            Error::Resolve
        })?
        .collect();

    if addrs.is_empty() {
        return Err(Error::Resolve);
    }
    tracing::debug!(host, count = addrs.len(), "host resolved");
    Ok(addrs)
}

/// Resolve and connect, trying each address in resolver order.
pub(crate) async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let addrs = resolve(host, port).await?;

    let mut last_error = Error::Connect;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::debug!(%addr, "socket connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect failed");
                last_error = Error::Connect;
            }
        }
    }
    Err(last_error)
}

/// TLS handshake with SNI set to `host`.
pub(crate) async fn handshake(
    stream: TcpStream,
    host: &str,
    tls: &TlsConfig,
) -> Result<SslStream<TcpStream>> {
    let config = tls.connect_config()?;
    tokio_boring::connect(config, host, stream)
        .await
        .map_err(|e| {
            tracing::debug!(host, error = ?e, "TLS handshake failed");
            Error::Handshake
        })
}
