//! Transport layer: plain TCP and TLS-over-TCP sockets, the connect
//! sequence (resolve, connect, handshake) and TLS configuration.

pub mod connect;
pub mod stream;
pub mod tls;

pub use stream::Socket;
pub use tls::{SslVerify, TlsConfig};
