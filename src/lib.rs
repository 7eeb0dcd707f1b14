//! # webwire
//!
//! An HTTP/1.1 client and server library over plain TCP and TLS.
//!
//! `webwire` speaks HTTP/1.1 end to end: a streaming message parser, a
//! fluent request builder with file and multipart bodies, a pooling client
//! session with redirects and timeouts, and a routing server with a fixed
//! worker pool.
//!
//! ## Features
//!
//! - **Client session**: keep-alive connection pooling keyed by
//!   `(scheme, host, port)`, redirect following, per-phase timeouts
//! - **Server**: pattern routing with `:name` captures, method dispatch,
//!   graceful stop
//! - **Bodies**: in-memory, streamed-from-file and multipart form bodies,
//!   optional gzip (the `gzip` cargo feature, on by default)
//! - **TLS**: BoringSSL via `tokio-boring`, SNI, hostname verification,
//!   CA bundle from file or system defaults
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use webwire::{RequestBuilder, Session};
//!
//! #[tokio::main]
//! async fn main() -> webwire::Result<()> {
//!     let session = Session::new();
//!     let request = RequestBuilder::get("http://example.com/").build()?;
//!     let response = session.send(request).await?;
//!     println!("{} {}", response.status(), response.text());
//!     Ok(())
//! }
//! ```
//!
//! Serving:
//!
//! ```rust,ignore
//! use webwire::{ResponseBuilder, Server};
//!
//! #[tokio::main]
//! async fn main() -> webwire::Result<()> {
//!     let mut server = Server::new("127.0.0.1:8080");
//!     server.route("/users/:id", |_req, args| {
//!         ResponseBuilder::ok()
//!             .body(format!("hello {}", args.get("id").unwrap_or("?")))
//!             .build()
//!     });
//!     server.run(4).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - error types
//! - [`http`] - message model, bodies, multipart, parser, builders
//! - [`url`] - URL model with order-preserving queries
//! - [`socket`] - transports and TLS configuration
//! - [`client`] - connection driver, pool and session
//! - [`server`] - acceptor, worker pool and router

pub mod base;
pub mod client;
pub mod http;
pub mod server;
pub mod socket;
pub mod url;
pub mod util;

pub use base::{Error, ParseErrorKind, Result};
pub use client::{ProgressCallback, Session};
pub use crate::http::{
    Body, BodySink, FileBody, FormBody, FormPart, Headers, ParseStatus, Parser, Request,
    RequestBuilder, Response, ResponseBuilder, StringBody,
};
pub use server::{Router, Server, UrlArgs, View};
pub use socket::{SslVerify, TlsConfig};
pub use crate::url::Url;

pub use ::http::{Method, StatusCode};
