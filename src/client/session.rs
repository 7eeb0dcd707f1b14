//! Client session: connection reuse, cross-request defaults, redirects.
//!
//! A session multiplexes requests over a pool of keep-alive connections
//! keyed by `(scheme, host, port)`. Sends are async; a session shared
//! across tasks serializes nothing beyond the pool itself.

use crate::base::{Error, Result};
use crate::client::conn::{Conn, ConnectOptions, ExchangeOptions, ProgressCallback};
use crate::client::pool::{ClientPool, PoolKey};
use crate::http::body::{Body, FileBody};
use crate::http::message::{Request, Response};
use crate::http::parser::BodySink;
use crate::socket::{SslVerify, TlsConfig};
use crate::url::Url;
use crate::util;
use http::{Method, StatusCode};
use std::collections::HashSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SSL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BUFFER_SIZE: usize = 1024;
const DEFAULT_MAX_REDIRECTS: usize = 20;

/// A client session with per-request defaults and a keep-alive pool.
pub struct Session {
    pool: ClientPool,

    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    ssl_shutdown_timeout: Duration,
    buffer_size: usize,

    headers: Vec<(String, String)>,
    media_type: String,
    charset: String,

    tls: TlsConfig,
    proxy: Option<Url>,

    follow_redirects: bool,
    max_redirects: usize,
    post_to_get_on_redirect: bool,
}

impl Session {
    pub fn new() -> Self {
        let mut headers = Vec::new();
        headers.push((
            "User-Agent".to_owned(),
            concat!("webwire/", env!("CARGO_PKG_VERSION")).to_owned(),
        ));
        #[cfg(feature = "gzip")]
        headers.push(("Accept-Encoding".to_owned(), "gzip".to_owned()));

        Self {
            pool: ClientPool::new(),
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            ssl_shutdown_timeout: DEFAULT_SSL_SHUTDOWN_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            headers,
            media_type: String::new(),
            charset: String::new(),
            tls: TlsConfig::default(),
            proxy: None,
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            post_to_get_on_redirect: true,
        }
    }

    pub fn set_connect_timeout(&mut self, seconds: u64) {
        if seconds > 0 {
            self.connect_timeout = Duration::from_secs(seconds);
        }
    }

    pub fn set_read_timeout(&mut self, seconds: u64) {
        if seconds > 0 {
            self.read_timeout = Duration::from_secs(seconds);
        }
    }

    pub fn set_write_timeout(&mut self, seconds: u64) {
        if seconds > 0 {
            self.write_timeout = Duration::from_secs(seconds);
        }
    }

    pub fn set_ssl_shutdown_timeout(&mut self, seconds: u64) {
        if seconds > 0 {
            self.ssl_shutdown_timeout = Duration::from_secs(seconds);
        }
    }

    pub fn set_buffer_size(&mut self, size: usize) {
        if size > 0 {
            self.buffer_size = size;
        }
    }

    /// A default header added to every request that does not set it.
    pub fn set_header(&mut self, key: &str, value: &str) {
        if let Some((_, v)) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            *v = value.to_owned();
        } else {
            self.headers.push((key.to_owned(), value.to_owned()));
        }
    }

    /// Content types to accept, as a default `Accept` header.
    pub fn set_accept(&mut self, content_types: &str) {
        self.set_header("Accept", content_types);
    }

    /// Advertise gzip response encoding (on by default with the `gzip`
    /// feature).
    #[cfg(feature = "gzip")]
    pub fn set_accept_gzip(&mut self, gzip: bool) {
        self.set_header("Accept-Encoding", if gzip { "gzip" } else { "identity" });
    }

    /// Default `Content-Type`, applied only when the request carries a body
    /// and no `Content-Type` of its own.
    pub fn set_content_type(&mut self, media_type: &str, charset: &str) {
        self.media_type = media_type.to_owned();
        self.charset = charset.to_owned();
    }

    pub fn set_ssl_verify(&mut self, verify: SslVerify) {
        self.tls.verify = verify;
    }

    pub fn set_ca_file(&mut self, path: &Path) {
        self.tls.ca_file = Some(path.to_owned());
    }

    /// Forward proxy URL. Plain-http requests go through it in absolute
    /// form; https requests use a CONNECT tunnel.
    pub fn set_proxy(&mut self, proxy_url: &str) -> Result<()> {
        self.proxy = Some(Url::parse(proxy_url)?);
        Ok(())
    }

    pub fn set_follow_redirects(&mut self, follow: bool) {
        self.follow_redirects = follow;
    }

    pub fn set_max_redirects(&mut self, max: usize) {
        self.max_redirects = max;
    }

    /// Whether a 301/302 answer to a POST rewrites the method to GET, the
    /// historical compatibility behavior.
    pub fn set_post_to_get_on_redirect(&mut self, rewrite: bool) {
        self.post_to_get_on_redirect = rewrite;
    }

    /// Number of pooled keep-alive connections.
    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Close every pooled connection.
    pub async fn clear(&self) {
        self.pool.clear(self.ssl_shutdown_timeout).await;
    }

    /// Send a request and read the full response into memory.
    pub async fn send(&self, request: Request) -> Result<Response> {
        self.do_send(request, false, None).await
    }

    /// Send a request, streaming the response body into a temp file. The
    /// response body is a [`FileBody`] that can be persisted with
    /// [`FileBody::move_to`].
    pub async fn send_streamed(&self, request: Request) -> Result<Response> {
        self.do_send(request, true, None).await
    }

    /// Send with a progress callback `(received, total)`.
    pub async fn send_with_progress(
        &self,
        request: Request,
        stream: bool,
        progress: ProgressCallback,
    ) -> Result<Response> {
        self.do_send(request, stream, Some(progress)).await
    }

    async fn do_send(
        &self,
        mut request: Request,
        stream: bool,
        progress: Option<ProgressCallback>,
    ) -> Result<Response> {
        self.apply_defaults(&mut request);

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(request.url().to_string());
        let mut hops = 0usize;

        loop {
            let response = self
                .send_once(&mut request, stream, progress.as_ref())
                .await?;

            if !self.follow_redirects || !is_redirect(response.status()) {
                return self.finish(response, stream);
            }
            let location = response.headers().get("Location").map(str::to_owned);
            let Some(location) = location else {
                return self.finish(response, stream);
            };

            hops += 1;
            if hops > self.max_redirects {
                return Err(Error::TooManyRedirects);
            }

            let next = request.url().join(&location)?;
            if !visited.insert(next.to_string()) {
                return Err(Error::RedirectLoop);
            }
            tracing::debug!(hops, to = %next, "following redirect");

            let status = response.status();
            let rewrite_to_get = status == StatusCode::SEE_OTHER
                || (self.post_to_get_on_redirect
                    && request.method() == Method::POST
                    && matches!(
                        status,
                        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND
                    ));
            if rewrite_to_get && request.method() != Method::GET {
                request.set_method(Method::GET);
                request.set_body(Body::Empty);
                request.headers_mut().remove("Content-Length");
                request.headers_mut().remove("Content-Type");
                request.headers_mut().remove("Content-Encoding");
            }

            request.headers_mut().set("Host", next.authority());
            request.set_url(next);
        }
    }

    /// One exchange, with a single retry on a fresh connection when a
    /// reused keep-alive connection fails at I/O.
    async fn send_once(
        &self,
        request: &mut Request,
        stream: bool,
        progress: Option<&ProgressCallback>,
    ) -> Result<Response> {
        let key = PoolKey::from_url(request.url());

        if let Some(mut conn) = self.pool.checkout(&key) {
            match self.exchange_on(&mut conn, request, stream, progress).await {
                Ok(response) => {
                    self.recycle(key, conn, request, &response);
                    return Ok(response);
                }
                Err(Error::Write) | Err(Error::Read) => {
                    tracing::debug!("reused connection failed, retrying on a fresh one");
                    conn.close(self.ssl_shutdown_timeout).await;
                }
                Err(e) => {
                    conn.close(self.ssl_shutdown_timeout).await;
                    return Err(e);
                }
            }
        }

        let mut conn = Conn::open(request.url(), &self.connect_options()).await?;
        match self.exchange_on(&mut conn, request, stream, progress).await {
            Ok(response) => {
                self.recycle(key, conn, request, &response);
                Ok(response)
            }
            Err(e) => {
                conn.close(self.ssl_shutdown_timeout).await;
                Err(e)
            }
        }
    }

    async fn exchange_on(
        &self,
        conn: &mut Conn,
        request: &mut Request,
        stream: bool,
        progress: Option<&ProgressCallback>,
    ) -> Result<Response> {
        let opts = ExchangeOptions {
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            buffer_size: self.buffer_size,
        };

        if stream && request.method() != Method::HEAD {
            let path = temp_download_path();
            let sink = FileSink::create(&path)?;
            let mut response = conn
                .exchange(request, &opts, Some(Box::new(sink)), progress)
                .await?;
            response.set_body(Body::File(FileBody::new(&path, false, self.buffer_size)?));
            Ok(response)
        } else {
            conn.exchange(request, &opts, None, progress).await
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: self.connect_timeout,
            tls: self.tls.clone(),
            proxy: self.proxy.clone(),
        }
    }

    fn recycle(&self, key: PoolKey, conn: Conn, request: &Request, response: &Response) {
        if request.keep_alive() && response.keep_alive() && conn.is_reusable() {
            self.pool.checkin(key, conn);
        } else {
            let shutdown_timeout = self.ssl_shutdown_timeout;
            tokio::spawn(conn.close(shutdown_timeout));
        }
    }

    fn apply_defaults(&self, request: &mut Request) {
        for (key, value) in &self.headers {
            if !request.headers().contains(key) {
                request.headers_mut().set(key.clone(), value.clone());
            }
        }
        if !self.media_type.is_empty()
            && !request.body().is_empty()
            && !request.headers().contains("Content-Type")
        {
            let value = if self.charset.is_empty() {
                self.media_type.clone()
            } else {
                format!("{}; charset={}", self.media_type, self.charset)
            };
            request.headers_mut().set("Content-Type", value);
        }
    }

    /// Final response fixups: transparent gzip decoding for accumulated
    /// bodies.
    fn finish(&self, mut response: Response, stream: bool) -> Result<Response> {
        #[cfg(feature = "gzip")]
        {
            if response.headers().value_is("Content-Encoding", "gzip") {
                if stream {
                    tracing::warn!("streamed response left gzip-encoded");
                } else if let Some(bytes) = response.body().as_bytes() {
                    let decoded = util::gzip::decompress(bytes).map_err(|_| {
                        Error::Parse(crate::base::ParseErrorKind::BadEncoding)
                    })?;
                    response.set_body(Body::String(crate::http::body::StringBody::new(
                        decoded, "", "",
                    )));
                    response.headers_mut().remove("Content-Encoding");
                }
            }
        }
        #[cfg(not(feature = "gzip"))]
        let _ = stream;

        Ok(response)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn temp_download_path() -> PathBuf {
    std::env::temp_dir().join(format!("webwire-{}.tmp", util::random_ascii_string(12)))
}

/// Streams response body bytes into a temp file.
struct FileSink {
    file: std::fs::File,
}

impl FileSink {
    fn create(path: &Path) -> Result<Self> {
        let file = std::fs::File::create(path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "cannot create download file");
            Error::FileIo
        })?;
        Ok(Self { file })
    }
}

impl BodySink for FileSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).map_err(|_| Error::FileIo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_statuses() {
        assert!(is_redirect(StatusCode::FOUND));
        assert!(is_redirect(StatusCode::PERMANENT_REDIRECT));
        assert!(!is_redirect(StatusCode::OK));
        assert!(!is_redirect(StatusCode::NOT_MODIFIED));
    }

    #[test]
    fn setters_ignore_zero_timeouts() {
        let mut session = Session::new();
        session.set_read_timeout(0);
        assert_eq!(session.read_timeout, DEFAULT_TIMEOUT);
        session.set_read_timeout(5);
        assert_eq!(session.read_timeout, Duration::from_secs(5));
    }

    #[test]
    fn default_headers_applied_without_clobbering() {
        let session = Session::new();
        let mut request = crate::http::RequestBuilder::get("http://h/")
            .header("User-Agent", "custom")
            .build()
            .unwrap();
        session.apply_defaults(&mut request);
        assert_eq!(request.headers().get("User-Agent"), Some("custom"));

        let mut plain = crate::http::RequestBuilder::get("http://h/").build().unwrap();
        session.apply_defaults(&mut plain);
        assert!(plain
            .headers()
            .get("User-Agent")
            .unwrap()
            .starts_with("webwire/"));
    }

    #[test]
    fn content_type_default_needs_body() {
        let mut session = Session::new();
        session.set_content_type("application/json", "utf-8");

        let mut bodyless = crate::http::RequestBuilder::get("http://h/").build().unwrap();
        session.apply_defaults(&mut bodyless);
        assert!(!bodyless.headers().contains("Content-Type"));

        let mut with_body = crate::http::RequestBuilder::post("http://h/")
            .body("{}")
            .build()
            .unwrap();
        with_body.headers_mut().remove("Content-Type");
        session.apply_defaults(&mut with_body);
        assert_eq!(
            with_body.headers().get("Content-Type"),
            Some("application/json; charset=utf-8")
        );
    }
}
