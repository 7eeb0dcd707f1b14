//! Polymorphic socket over plain TCP and TLS.

use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

/// A connected transport, either plain TCP or TLS over TCP.
#[derive(Debug)]
pub enum Socket {
    Tcp(TcpStream),
    Ssl(SslStream<TcpStream>),
}

impl Socket {
    pub fn is_tls(&self) -> bool {
        matches!(self, Socket::Ssl(_))
    }

    /// Whether the socket is still connected and idle, i.e. usable for a
    /// new exchange. Unread data on an idle keep-alive connection means the
    /// peer closed it or went off-script, so it is not reusable either.
    pub fn is_reusable(&self) -> bool {
        let stream = match self {
            Socket::Tcp(s) => s,
            Socket::Ssl(s) => s.get_ref(),
        };

        if stream.peer_addr().is_err() {
            return false;
        }

        let mut buf = [0u8; 1];
        match stream.try_read(&mut buf) {
            Ok(0) => false,
            Ok(_) => false,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Socket::Ssl(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Socket::Ssl(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_flush(cx),
            Socket::Ssl(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Socket::Ssl(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
