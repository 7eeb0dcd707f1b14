//! Request and response messages.
//!
//! Both sides share the same shape: a start line, an ordered header map and
//! a body. Serialization of the head happens here; bodies are streamed by
//! the connection drivers via [`Body::next_payload`].

use crate::base::{Error, ParseErrorKind, Result};
use crate::http::body::Body;
use crate::http::headers::Headers;
use crate::http::multipart::{self, FormPart};
use crate::url::Url;
use http::{Method, StatusCode};

/// An HTTP request.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Body,
}

impl Request {
    pub(crate) fn new(method: Method, url: Url, headers: Headers, body: Body) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    /// The authority used for the `Host` header and SNI.
    pub fn host(&self) -> &str {
        self.url.host()
    }

    pub fn port(&self) -> u16 {
        self.url.port()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub(crate) fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Body text, for handlers that expect UTF-8 content.
    pub fn text(&self) -> String {
        self.body
            .as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    /// Parse a `multipart/form-data` body into its parts.
    pub fn form_parts(&self) -> Result<Vec<FormPart>> {
        if let Body::Form(form) = &self.body {
            return Ok(form.parts().to_vec());
        }
        let content_type = self
            .headers
            .get("Content-Type")
            .ok_or(Error::Parse(ParseErrorKind::BadFormData))?;
        let boundary = multipart::boundary_from_content_type(content_type)
            .ok_or(Error::Parse(ParseErrorKind::BadFormData))?;
        let bytes = self
            .body
            .as_bytes()
            .ok_or(Error::Parse(ParseErrorKind::BadFormData))?;
        multipart::parse_form_data(bytes, &boundary)
    }

    /// Whether the connection may be reused after this exchange.
    pub fn keep_alive(&self) -> bool {
        !self.headers.value_is("Connection", "close")
    }

    /// Serialize the request line and headers.
    ///
    /// `absolute_form` selects the absolute-URI request target used when
    /// talking through a forward proxy.
    pub(crate) fn serialize_head(&self, absolute_form: bool) -> Vec<u8> {
        let target = if absolute_form {
            self.url.to_string()
        } else {
            self.url.request_target()
        };

        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, target);
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }
}

/// An HTTP response.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    reason: String,
    headers: Headers,
    body: Body,
}

impl Response {
    pub(crate) fn new(status: StatusCode, reason: String, headers: Headers, body: Body) -> Self {
        Self {
            status,
            reason,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase from the wire, falling back to the canonical one.
    pub fn reason(&self) -> &str {
        if self.reason.is_empty() {
            self.status.canonical_reason().unwrap_or("")
        } else {
            &self.reason
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub(crate) fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Body bytes, when held in memory.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.body.as_bytes()
    }

    /// Body as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        self.body
            .as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    pub fn keep_alive(&self) -> bool {
        !self.headers.value_is("Connection", "close")
    }

    /// Serialize the status line and headers.
    pub(crate) fn serialize_head(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), self.reason());
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }
}
