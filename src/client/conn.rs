//! Client connection driver.
//!
//! One `Conn` owns one transport and drives single request/response
//! exchanges over it: serialize and write the head, stream the body
//! payloads, then feed reads into a response parser until it finishes.
//! Each phase runs under its own deadline.

use crate::base::{Error, Result};
use crate::http::message::{Request, Response};
use crate::http::parser::{BodySink, ParseStatus, Parser};
use crate::socket::{connect, Socket, TlsConfig};
use crate::url::{Scheme, Url};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Informed about response progress: `(received, total)` where `total` is
/// the declared `Content-Length` when known.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Options for opening a connection. The connect timeout covers resolve,
/// TCP connect and TLS handshake together.
pub(crate) struct ConnectOptions {
    pub connect_timeout: Duration,
    pub tls: TlsConfig,
    pub proxy: Option<Url>,
}

/// Options for one exchange on an open connection.
pub(crate) struct ExchangeOptions {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub buffer_size: usize,
}

pub(crate) struct Conn {
    socket: Socket,
    /// Plain-http target reached through a forward proxy: request targets
    /// use the absolute-URI form.
    absolute_form: bool,
}

impl Conn {
    /// Resolve, connect and (for https) handshake, all under the connect
    /// timeout.
    pub(crate) async fn open(url: &Url, opts: &ConnectOptions) -> Result<Self> {
        match timeout(opts.connect_timeout, Self::open_inner(url, opts)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn open_inner(url: &Url, opts: &ConnectOptions) -> Result<Self> {
        match &opts.proxy {
            None => {
                let tcp = connect::connect_tcp(url.host(), url.port()).await?;
                let socket = if url.scheme() == Scheme::Https {
                    Socket::Ssl(connect::handshake(tcp, url.host(), &opts.tls).await?)
                } else {
                    Socket::Tcp(tcp)
                };
                Ok(Self {
                    socket,
                    absolute_form: false,
                })
            }
            Some(proxy) => {
                let mut tcp = connect::connect_tcp(proxy.host(), proxy.port()).await?;
                if url.scheme() == Scheme::Https {
                    tunnel(&mut tcp, url).await?;
                    let ssl = connect::handshake(tcp, url.host(), &opts.tls).await?;
                    Ok(Self {
                        socket: Socket::Ssl(ssl),
                        absolute_form: false,
                    })
                } else {
                    Ok(Self {
                        socket: Socket::Tcp(tcp),
                        absolute_form: true,
                    })
                }
            }
        }
    }

    pub(crate) fn is_reusable(&self) -> bool {
        self.socket.is_reusable()
    }

    /// Drive one exchange. An optional sink streams the response body
    /// instead of accumulating it.
    pub(crate) async fn exchange(
        &mut self,
        request: &mut Request,
        opts: &ExchangeOptions,
        sink: Option<Box<dyn BodySink>>,
        progress: Option<&ProgressCallback>,
    ) -> Result<Response> {
        let head = request.serialize_head(self.absolute_form);
        tracing::debug!(
            method = %request.method(),
            target = %request.url(),
            "send request"
        );

        let write_all = async {
            self.socket.write_all(&head).await.map_err(|_| Error::Write)?;
            request.body_mut().init_payload();
            loop {
                let payload = request.body_mut().next_payload().await?;
                if payload.is_empty() {
                    break;
                }
                self.socket
                    .write_all(&payload)
                    .await
                    .map_err(|_| Error::Write)?;
            }
            self.socket.flush().await.map_err(|_| Error::Write)
        };
        timeout(opts.write_timeout, write_all)
            .await
            .map_err(|_| Error::Timeout)??;

        let mut parser = Parser::response();
        if request.method() == Method::HEAD {
            parser.set_ignore_body(true);
        }
        if let Some(sink) = sink {
            parser.set_sink(sink)?;
        }

        // The read deadline restarts with every byte received.
        let mut buf = vec![0u8; opts.buffer_size.max(1)];
        loop {
            let n = timeout(opts.read_timeout, self.socket.read(&mut buf))
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(|_| Error::Read)?;

            if n == 0 {
                if parser.finish_on_eof() {
                    break;
                }
                tracing::debug!("peer closed mid-response");
                return Err(Error::Read);
            }

            let status = parser.feed(&buf[..n])?;
            if let Some(callback) = progress {
                callback(
                    parser.body_len() as u64,
                    parser.content_length().map(|len| len as u64),
                );
            }
            if status == ParseStatus::Finished {
                break;
            }
        }

        parser.take_response()
    }

    /// Close the connection. A completed TLS session gets a close_notify
    /// bounded by its own timer; the socket itself closes on drop.
    pub(crate) async fn close(mut self, ssl_shutdown_timeout: Duration) {
        if self.socket.is_tls() {
            match timeout(ssl_shutdown_timeout, self.socket.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "TLS shutdown error"),
                Err(_) => tracing::debug!("TLS shutdown timed out"),
            }
        }
    }
}

/// Establish an HTTP CONNECT tunnel through a forward proxy.
async fn tunnel(stream: &mut TcpStream, target: &Url) -> Result<()> {
    let authority = format!("{}:{}", target.host(), target.port());
    let connect_req = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
    stream
        .write_all(connect_req.as_bytes())
        .await
        .map_err(|_| Error::Write)?;

    let mut response = Vec::with_capacity(256);
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf).await.map_err(|_| Error::Read)?;
        if n == 0 {
            return Err(Error::Connect);
        }
        response.extend_from_slice(&buf[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if response.len() > 8192 {
            return Err(Error::Connect);
        }
    }

    let head = String::from_utf8_lossy(&response);
    if !head.starts_with("HTTP/1.1 200") && !head.starts_with("HTTP/1.0 200") {
        tracing::debug!(target = %target, "proxy refused CONNECT");
        return Err(Error::Connect);
    }
    Ok(())
}
