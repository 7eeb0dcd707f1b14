use thiserror::Error;

/// Fine-grained classification of HTTP parse failures.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    #[error("malformed start line")]
    BadStartLine,
    #[error("malformed header")]
    BadHeader,
    #[error("invalid chunk framing")]
    BadChunk,
    #[error("invalid or duplicate Content-Length")]
    BadContentLength,
    #[error("header block too large")]
    HeadersTooLarge,
    #[error("body exceeds size limit")]
    BodyTooLarge,
    #[error("malformed multipart form data")]
    BadFormData,
    #[error("content decoding failed")]
    BadEncoding,
}

/// The single error type surfaced by the crate.
///
/// One variant per failure kind; connection drivers record the first error
/// hit during an exchange and surface it from the blocked send.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    #[error("host resolve error")]
    Resolve,
    #[error("socket connect error")]
    Connect,
    #[error("TLS handshake error")]
    Handshake,
    #[error("TLS shutdown error")]
    SslShutdown,
    #[error("socket write error")]
    Write,
    #[error("socket read error")]
    Read,
    #[error("operation timed out")]
    Timeout,
    #[error("parse error: {0}")]
    Parse(ParseErrorKind),
    #[error("redirect cycle detected")]
    RedirectLoop,
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("invalid URL")]
    InvalidUrl,
    #[error("operation cancelled")]
    Cancelled,
    #[error("file I/O error")]
    FileIo,
    #[error("internal error")]
    Internal,
}

impl From<ParseErrorKind> for Error {
    fn from(kind: ParseErrorKind) -> Self {
        Error::Parse(kind)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
