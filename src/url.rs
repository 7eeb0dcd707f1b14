//! URL model for requests.
//!
//! Absolute URLs are parsed with the `url` crate and then held in a form
//! that preserves query parameter order and per-parameter encoding flags,
//! which matter when the request is serialized back onto the wire.

use crate::base::{Error, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;

/// Everything outside the RFC 3986 unreserved set gets percent-encoded.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// One query parameter; `encode` requests percent-encoding of the key and
/// value at serialization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub key: String,
    pub value: String,
    pub encode: bool,
}

/// A parsed http/https URL with an order-preserving query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    query: Vec<QueryParam>,
}

impl Url {
    /// Parse an absolute URL. Only `http` and `https` are accepted.
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = url::Url::parse(input).map_err(|_| Error::InvalidUrl)?;

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(Error::InvalidUrl),
        };

        let host = parsed.host_str().ok_or(Error::InvalidUrl)?.to_owned();
        let port = parsed.port().unwrap_or_else(|| scheme.default_port());

        let mut url = Url {
            scheme,
            host,
            port,
            path: parsed.path().to_owned(),
            query: Vec::new(),
        };

        // Wire-form pairs are kept verbatim; they are already encoded.
        if let Some(raw) = parsed.query() {
            url.query = parse_raw_query(raw);
        }

        Ok(url)
    }

    /// Parse an origin-form request target (`/path?query`), as seen on the
    /// server side of a request line. Host and port are not part of the
    /// target; they default to empty and 80.
    pub fn parse_origin_form(target: &str) -> Result<Self> {
        if !target.starts_with('/') {
            return Err(Error::InvalidUrl);
        }

        let (path, raw_query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (target, None),
        };

        Ok(Url {
            scheme: Scheme::Http,
            host: String::new(),
            port: Scheme::Http.default_port(),
            path: path.to_owned(),
            query: raw_query.map(parse_raw_query).unwrap_or_default(),
        })
    }

    /// Resolve a `Location` header value against this URL.
    /// Accepts both absolute and relative forms.
    pub fn join(&self, location: &str) -> Result<Self> {
        let base = url::Url::parse(&self.to_string()).map_err(|_| Error::InvalidUrl)?;
        let joined = base.join(location).map_err(|_| Error::InvalidUrl)?;
        Url::parse(joined.as_str())
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &[QueryParam] {
        &self.query
    }

    /// Append a path piece, adding the separating `/` when needed.
    pub fn append_path(&mut self, piece: &str, encode: bool) {
        let piece = piece.trim_matches('/');
        let rendered = if encode {
            utf8_percent_encode(piece, QUERY_ENCODE_SET).to_string()
        } else {
            piece.to_owned()
        };
        if !self.path.ends_with('/') {
            self.path.push('/');
        }
        self.path.push_str(&rendered);
    }

    /// Append a query parameter, preserving order.
    pub fn append_query(&mut self, key: &str, value: &str, encode: bool) {
        self.query.push(QueryParam {
            key: key.to_owned(),
            value: value.to_owned(),
            encode,
        });
    }

    /// Look up the first query value for `key`, percent-decoded.
    pub fn query_value(&self, key: &str) -> Option<String> {
        self.query
            .iter()
            .find(|p| p.key == key)
            .map(|p| percent_decode_str(&p.value).decode_utf8_lossy().into_owned())
    }

    /// The authority used for the `Host` header and SNI: the port is only
    /// included when it differs from the scheme default.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The origin-form request target: path plus rendered query.
    pub fn request_target(&self) -> String {
        let mut target = if self.path.is_empty() {
            "/".to_owned()
        } else {
            self.path.clone()
        };
        if let Some(query) = self.render_query() {
            target.push('?');
            target.push_str(&query);
        }
        target
    }

    fn render_query(&self) -> Option<String> {
        if self.query.is_empty() {
            return None;
        }
        let rendered: Vec<String> = self
            .query
            .iter()
            .map(|p| {
                if p.encode {
                    format!(
                        "{}={}",
                        utf8_percent_encode(&p.key, QUERY_ENCODE_SET),
                        utf8_percent_encode(&p.value, QUERY_ENCODE_SET)
                    )
                } else {
                    format!("{}={}", p.key, p.value)
                }
            })
            .collect();
        Some(rendered.join("&"))
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())?;
        write!(f, "{}", self.request_target())
    }
}

/// Split a raw (already-encoded) query string into ordered pairs.
fn parse_raw_query(raw: &str) -> Vec<QueryParam> {
    raw.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            QueryParam {
                key: key.to_owned(),
                value: value.to_owned(),
                encode: false,
            }
        })
        .collect()
}
