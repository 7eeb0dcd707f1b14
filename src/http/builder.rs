//! Fluent builders for requests and responses.
//!
//! A builder is single-use: `build()` consumes it, checks the message
//! invariants (a sized body gets `Content-Length`, multipart bodies get a
//! boundary, `Content-Type` is present whenever a body is) and returns the
//! finished message.
//!
//! Errors hit mid-chain (bad URL, unreadable file) are remembered and
//! surfaced by `build()`, keeping the chain fluent.

use crate::base::{Error, Result};
use crate::http::body::{Body, FileBody, FormBody, StringBody};
use crate::http::headers::Headers;
use crate::http::message::{Request, Response};
use crate::http::multipart::FormPart;
use crate::url::Url;
use crate::util;
use bytes::Bytes;
use http::{Method, StatusCode};
use std::path::Path;

enum BodyKind {
    None,
    Bytes(Bytes),
    File(FileBody),
}

/// Builds a [`Request`].
pub struct RequestBuilder {
    method: Method,
    url: Option<Url>,
    media_type: String,
    charset: String,
    headers: Vec<(String, String)>,
    body: BodyKind,
    form_parts: Vec<FormPart>,
    keep_alive: bool,
    #[cfg(feature = "gzip")]
    gzip: bool,
    error: Option<Error>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            url: None,
            media_type: String::new(),
            charset: String::new(),
            headers: Vec::new(),
            body: BodyKind::None,
            form_parts: Vec::new(),
            keep_alive: true,
            #[cfg(feature = "gzip")]
            gzip: false,
            error: None,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new().method(Method::GET).url(url)
    }

    pub fn head(url: &str) -> Self {
        Self::new().method(Method::HEAD).url(url)
    }

    pub fn post(url: &str) -> Self {
        Self::new().method(Method::POST).url(url)
    }

    pub fn put(url: &str) -> Self {
        Self::new().method(Method::PUT).url(url)
    }

    pub fn delete(url: &str) -> Self {
        Self::new().method(Method::DELETE).url(url)
    }

    pub fn patch(url: &str) -> Self {
        Self::new().method(Method::PATCH).url(url)
    }

    pub fn options(url: &str) -> Self {
        Self::new().method(Method::OPTIONS).url(url)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        match Url::parse(url) {
            Ok(url) => self.url = Some(url),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        match &mut self.url {
            Some(url) => url.set_port(port),
            None => self.error = Some(Error::InvalidUrl),
        }
        self
    }

    /// Append a piece to the URL path.
    pub fn path(mut self, piece: &str, encode: bool) -> Self {
        match &mut self.url {
            Some(url) => url.append_path(piece, encode),
            None => self.error = Some(Error::InvalidUrl),
        }
        self
    }

    /// Append a query parameter; `encode` requests URL-encoding at
    /// serialization.
    pub fn query(mut self, key: &str, value: &str, encode: bool) -> Self {
        match &mut self.url {
            Some(url) => url.append_query(key, value, encode),
            None => self.error = Some(Error::InvalidUrl),
        }
        self
    }

    /// Append a header; case preserved, no deduplication.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_owned(), value.to_owned()));
        self
    }

    pub fn media_type(mut self, media_type: &str) -> Self {
        self.media_type = media_type.to_owned();
        self
    }

    pub fn charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_owned();
        self
    }

    /// Media type `application/json`.
    pub fn json(self) -> Self {
        self.media_type("application/json")
    }

    /// Charset `utf-8`.
    pub fn utf8(self) -> Self {
        self.charset("utf-8")
    }

    /// Comma separated content types to accept.
    pub fn accept(self, content_types: &str) -> Self {
        self.header("Accept", content_types)
    }

    /// Advertise (or stop advertising) gzip response encoding.
    #[cfg(feature = "gzip")]
    pub fn accept_gzip(self, gzip: bool) -> Self {
        if gzip {
            self.header("Accept-Encoding", "gzip")
        } else {
            self.header("Accept-Encoding", "identity")
        }
    }

    /// An in-memory body.
    pub fn body(mut self, data: impl Into<Bytes>) -> Self {
        self.body = BodyKind::Bytes(data.into());
        self
    }

    /// Use a file's content as the body, streamed in `chunk_size` pieces.
    pub fn file(mut self, path: &Path, infer_media_type: bool, chunk_size: usize) -> Self {
        match FileBody::new(path, infer_media_type, chunk_size) {
            Ok(body) => self.body = BodyKind::File(body),
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Add a multipart form part; switches the body to multipart.
    pub fn form(mut self, part: FormPart) -> Self {
        self.form_parts.push(part);
        self
    }

    /// Add a file as a multipart form part.
    pub fn form_file(mut self, name: &str, path: &Path) -> Self {
        match FormPart::file(name, path) {
            Ok(part) => self.form_parts.push(part),
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Add in-memory data as a multipart form part.
    pub fn form_data(self, name: &str, data: impl Into<Bytes>, media_type: &str) -> Self {
        self.form(FormPart::new(name, data, media_type))
    }

    /// Set the `Authorization` header from a scheme and credential string.
    pub fn auth(self, auth_type: &str, credentials: &str) -> Self {
        let value = format!("{auth_type} {credentials}");
        self.header("Authorization", &value)
    }

    pub fn auth_token(self, token: &str) -> Self {
        self.auth("Token", token)
    }

    /// Add a `Date` header with the current GMT timestamp.
    pub fn date(self) -> Self {
        let date = util::http_date();
        self.header("Date", &date)
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Gzip the body before sending. Applies only to non-file bodies large
    /// enough to be worth it; most servers do not accept compressed
    /// requests, so this is off by default.
    #[cfg(feature = "gzip")]
    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    /// Finalize the request.
    pub fn build(self) -> Result<Request> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let url = self.url.ok_or(Error::InvalidUrl)?;

        let mut body = if !self.form_parts.is_empty() {
            Body::Form(FormBody::new(self.form_parts))
        } else {
            match self.body {
                BodyKind::None => Body::Empty,
                BodyKind::Bytes(data) => {
                    Body::String(StringBody::new(data, &self.media_type, &self.charset))
                }
                BodyKind::File(file) => Body::File(file),
            }
        };

        #[cfg(feature = "gzip")]
        let compressed = self.gzip && body.compress();
        #[cfg(not(feature = "gzip"))]
        let compressed = false;

        let mut headers = Headers::new();
        headers.set("Host", url.authority());
        for (name, value) in self.headers {
            headers.append(name, value);
        }

        if let Some(content_type) = body.content_type() {
            if !headers.contains("Content-Type") {
                headers.set("Content-Type", content_type);
            }
        }
        if compressed {
            headers.set("Content-Encoding", "gzip");
        }

        let sized_method = matches!(self.method, Method::POST | Method::PUT | Method::PATCH);
        if !body.is_empty() || sized_method {
            if let Some(size) = body.size() {
                headers.set("Content-Length", size.to_string());
            }
        }

        if !self.keep_alive {
            headers.set("Connection", "close");
        }

        Ok(Request::new(self.method, url, headers, body))
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a [`Response`], mostly for server views.
pub struct ResponseBuilder {
    status: StatusCode,
    reason: String,
    media_type: String,
    charset: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: String::new(),
            media_type: String::new(),
            charset: String::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_owned();
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_owned(), value.to_owned()));
        self
    }

    pub fn media_type(mut self, media_type: &str) -> Self {
        self.media_type = media_type.to_owned();
        self
    }

    pub fn charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_owned();
        self
    }

    pub fn json(self) -> Self {
        self.media_type("application/json")
    }

    pub fn utf8(self) -> Self {
        self.charset("utf-8")
    }

    pub fn body(mut self, data: impl Into<Bytes>) -> Self {
        self.body = Some(data.into());
        self
    }

    pub fn date(self) -> Self {
        let date = util::http_date();
        self.header("Date", &date)
    }

    /// Finalize the response. `Content-Length` is always set so the message
    /// frames cleanly on a keep-alive connection.
    pub fn build(self) -> Response {
        let body = match self.body {
            Some(data) => Body::String(StringBody::new(data, &self.media_type, &self.charset)),
            None => Body::Empty,
        };

        let mut headers = Headers::new();
        for (name, value) in self.headers {
            headers.append(name, value);
        }
        if let Some(content_type) = body.content_type() {
            if !headers.contains("Content-Type") {
                headers.set("Content-Type", content_type);
            }
        }
        headers.set(
            "Content-Length",
            body.size().unwrap_or_default().to_string(),
        );

        Response::new(self.status, self.reason, headers, body)
    }
}
