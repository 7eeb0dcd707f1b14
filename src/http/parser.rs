//! Incremental HTTP/1.1 message parser.
//!
//! The parser consumes an opaque byte stream fed to it by a connection
//! driver and exposes enough intermediate state for the driver to size its
//! reads: header completion, body chunk availability and body metadata.
//!
//! State machine: start line -> headers -> one of {fixed-length body,
//! chunked body, read-until-close body} -> done. By default body bytes are
//! accumulated in memory; installing a [`BodySink`] switches the parser to
//! streaming delivery.

use crate::base::{Error, ParseErrorKind, Result};
use crate::http::body::{Body, StringBody};
use crate::http::headers::Headers;
use crate::http::message::{Request, Response};
use crate::url::Url;
use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode};

/// Default cap on the header block (start line included).
pub const DEFAULT_MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Default cap on the body.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

const MAX_CHUNK_SIZE_LINE: usize = 1024;

/// What a call to [`Parser::feed`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// More input is needed before anything new can be reported.
    NeedMore,
    /// The start line and headers finished parsing during this feed.
    HeadersComplete,
    /// New body bytes are available via [`Parser::take_body_chunk`].
    BodyChunkReady,
    /// The message is complete.
    Finished,
}

/// Receives body bytes as they are parsed, instead of accumulation.
pub trait BodySink: Send {
    fn write(&mut self, chunk: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StartLine,
    Headers,
    BodyLength { remaining: usize },
    BodyChunked,
    BodyUntilClose,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    SizeLine,
    Data { remaining: usize },
    DataCrlf,
    Trailers,
}

/// Streaming HTTP/1.1 parser for one message.
pub struct Parser {
    mode: Mode,
    state: State,
    chunk_phase: ChunkPhase,
    buf: BytesMut,
    head_size: usize,

    method: Option<Method>,
    target: String,
    status: u16,
    reason: String,
    headers: Headers,
    headers_complete: bool,
    content_length: Option<usize>,
    chunked: bool,
    ignore_body: bool,
    keep_trailers: bool,
    trailers: Headers,

    body: BytesMut,
    taken: usize,
    body_len: usize,
    sink: Option<Box<dyn BodySink>>,

    max_headers_size: usize,
    max_body_size: usize,
}

impl Parser {
    /// A parser for incoming requests (server side).
    pub fn request() -> Self {
        Self::new(Mode::Request)
    }

    /// A parser for incoming responses (client side).
    pub fn response() -> Self {
        Self::new(Mode::Response)
    }

    fn new(mode: Mode) -> Self {
        Self {
            mode,
            state: State::StartLine,
            chunk_phase: ChunkPhase::SizeLine,
            buf: BytesMut::new(),
            head_size: 0,
            method: None,
            target: String::new(),
            status: 0,
            reason: String::new(),
            headers: Headers::new(),
            headers_complete: false,
            content_length: None,
            chunked: false,
            ignore_body: false,
            keep_trailers: false,
            trailers: Headers::new(),
            body: BytesMut::new(),
            taken: 0,
            body_len: 0,
            sink: None,
            max_headers_size: DEFAULT_MAX_HEADERS_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    pub fn set_max_headers_size(&mut self, size: usize) {
        self.max_headers_size = size;
    }

    pub fn set_max_body_size(&mut self, size: usize) {
        self.max_body_size = size;
    }

    /// Skip the body even if the headers declare one. Used for responses to
    /// HEAD, which may carry `Content-Length` without any body bytes.
    pub fn set_ignore_body(&mut self, ignore: bool) {
        self.ignore_body = ignore;
    }

    /// Keep trailer headers from chunked bodies instead of discarding them.
    pub fn set_keep_trailers(&mut self, keep: bool) {
        self.keep_trailers = keep;
    }

    /// Install a streaming sink. Body bytes already accumulated are flushed
    /// to the sink first; from then on nothing is kept in memory.
    pub fn set_sink(&mut self, mut sink: Box<dyn BodySink>) -> Result<()> {
        if !self.body.is_empty() {
            sink.write(&self.body)?;
            self.body.clear();
            self.taken = 0;
        }
        self.sink = Some(sink);
        Ok(())
    }

    pub fn headers_complete(&self) -> bool {
        self.headers_complete
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Done
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    /// Total body bytes seen so far.
    pub fn body_len(&self) -> usize {
        self.body_len
    }

    /// Unconsumed input past the end of the current message, e.g. a
    /// pipelined follow-up request. Feed it to the next parser.
    pub fn take_remaining(&mut self) -> Bytes {
        std::mem::take(&mut self.buf).freeze()
    }

    /// Append bytes and advance the state machine.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<ParseStatus> {
        self.buf.extend_from_slice(bytes);

        let mut headers_event = false;
        let mut chunk_event = false;

        loop {
            match self.state {
                State::StartLine => {
                    let Some(line) = self.split_head_line()? else {
                        break;
                    };
                    self.parse_start_line(&line)?;
                    self.state = State::Headers;
                }

                State::Headers => {
                    let Some(line) = self.split_head_line()? else {
                        break;
                    };
                    if line.is_empty() {
                        self.finish_headers()?;
                        headers_event = true;
                        continue;
                    }
                    let (name, value) = parse_header_line(&line)?;
                    self.headers.append(name, value);
                }

                State::BodyLength { remaining } => {
                    if self.buf.is_empty() && remaining > 0 {
                        break;
                    }
                    let take = remaining.min(self.buf.len());
                    if take > 0 {
                        let data = self.buf.split_to(take);
                        self.emit(&data)?;
                        chunk_event = true;
                    }
                    let left = remaining - take;
                    if left == 0 {
                        self.state = State::Done;
                    } else {
                        self.state = State::BodyLength { remaining: left };
                        break;
                    }
                }

                State::BodyChunked => {
                    if !self.step_chunked(&mut chunk_event)? {
                        break;
                    }
                }

                State::BodyUntilClose => {
                    if self.buf.is_empty() {
                        break;
                    }
                    let data = self.buf.split_to(self.buf.len());
                    self.emit(&data)?;
                    chunk_event = true;
                    break;
                }

                State::Done => break,
            }
        }

        if self.state == State::Done {
            Ok(ParseStatus::Finished)
        } else if headers_event {
            Ok(ParseStatus::HeadersComplete)
        } else if chunk_event {
            Ok(ParseStatus::BodyChunkReady)
        } else {
            Ok(ParseStatus::NeedMore)
        }
    }

    /// Body bytes parsed since the last call. Empty when a sink is
    /// installed or nothing new arrived.
    pub fn take_body_chunk(&mut self) -> Bytes {
        if self.taken >= self.body.len() {
            return Bytes::new();
        }
        let chunk = Bytes::copy_from_slice(&self.body[self.taken..]);
        self.taken = self.body.len();
        chunk
    }

    /// Tell the parser the peer closed the connection. Returns whether the
    /// message is complete: a read-until-close body ends here; anything
    /// else mid-message is a truncation.
    pub fn finish_on_eof(&mut self) -> bool {
        match self.state {
            State::Done => true,
            State::BodyUntilClose => {
                self.state = State::Done;
                true
            }
            _ => false,
        }
    }

    /// Take the finished request (server side).
    pub fn take_request(&mut self) -> Result<Request> {
        if self.state != State::Done {
            return Err(Error::Internal);
        }
        let method = self.method.take().ok_or(Error::Internal)?;
        let url = Url::parse_origin_form(&self.target)?;
        let headers = std::mem::take(&mut self.headers);
        Ok(Request::new(method, url, headers, self.take_body()))
    }

    /// Take the finished response (client side).
    pub fn take_response(&mut self) -> Result<Response> {
        if self.state != State::Done {
            return Err(Error::Internal);
        }
        let status = StatusCode::from_u16(self.status).map_err(|_| Error::Internal)?;
        let reason = std::mem::take(&mut self.reason);
        let headers = std::mem::take(&mut self.headers);
        Ok(Response::new(status, reason, headers, self.take_body()))
    }

    fn take_body(&mut self) -> Body {
        let data = std::mem::take(&mut self.body);
        self.taken = 0;
        if data.is_empty() {
            Body::Empty
        } else {
            Body::String(StringBody::new(data.freeze(), "", ""))
        }
    }

    /// Split the next CRLF-terminated head line off the buffer, enforcing
    /// the header block limit.
    fn split_head_line(&mut self) -> Result<Option<BytesMut>> {
        let Some(end) = find_crlf(&self.buf) else {
            if self.head_size + self.buf.len() > self.max_headers_size {
                return Err(Error::Parse(ParseErrorKind::HeadersTooLarge));
            }
            return Ok(None);
        };
        if self.head_size + end + 2 > self.max_headers_size {
            return Err(Error::Parse(ParseErrorKind::HeadersTooLarge));
        }
        self.head_size += end + 2;
        let line = self.buf.split_to(end);
        let _ = self.buf.split_to(2);
        Ok(Some(line))
    }

    fn parse_start_line(&mut self, line: &[u8]) -> Result<()> {
        let bad = || Error::Parse(ParseErrorKind::BadStartLine);
        let line = std::str::from_utf8(line).map_err(|_| bad())?;

        match self.mode {
            Mode::Request => {
                let mut parts = line.split_ascii_whitespace();
                let method = parts.next().ok_or_else(bad)?;
                let target = parts.next().ok_or_else(bad)?;
                let version = parts.next().ok_or_else(bad)?;
                if parts.next().is_some() || !is_supported_version(version) {
                    return Err(bad());
                }
                self.method = Some(Method::from_bytes(method.as_bytes()).map_err(|_| bad())?);
                self.target = target.to_owned();
            }
            Mode::Response => {
                let mut parts = line.splitn(3, ' ');
                let version = parts.next().ok_or_else(bad)?;
                let status = parts.next().ok_or_else(bad)?;
                let reason = parts.next().unwrap_or("");
                if !is_supported_version(version) {
                    return Err(bad());
                }
                let status: u16 = status.parse().map_err(|_| bad())?;
                if !(100..=599).contains(&status) {
                    return Err(bad());
                }
                self.status = status;
                self.reason = reason.trim().to_owned();
            }
        }
        Ok(())
    }

    /// Headers are in; pick the body framing.
    fn finish_headers(&mut self) -> Result<()> {
        self.headers_complete = true;

        // Chunked transfer-encoding overrides Content-Length.
        if let Some(te) = self.headers.get("Transfer-Encoding") {
            let last = te.split(',').map(str::trim).next_back().unwrap_or("");
            if !last.eq_ignore_ascii_case("chunked") {
                return Err(Error::Parse(ParseErrorKind::BadHeader));
            }
            self.chunked = true;
        }

        let mut lengths = self.headers.get_all("Content-Length");
        if let Some(first) = lengths.next() {
            if lengths.next().is_some() {
                return Err(Error::Parse(ParseErrorKind::BadContentLength));
            }
            let length: usize = first
                .trim()
                .parse()
                .map_err(|_| Error::Parse(ParseErrorKind::BadContentLength))?;
            self.content_length = Some(length);
        }

        let bodyless_status =
            self.status / 100 == 1 || self.status == 204 || self.status == 304;
        if self.ignore_body || (self.mode == Mode::Response && bodyless_status) {
            self.state = State::Done;
            return Ok(());
        }

        if self.chunked {
            self.state = State::BodyChunked;
            self.chunk_phase = ChunkPhase::SizeLine;
            return Ok(());
        }

        match self.content_length {
            Some(0) => self.state = State::Done,
            Some(length) => {
                if length > self.max_body_size {
                    return Err(Error::Parse(ParseErrorKind::BodyTooLarge));
                }
                self.state = State::BodyLength { remaining: length };
            }
            None => {
                self.state = match self.mode {
                    // A request without a length has no body.
                    Mode::Request => State::Done,
                    Mode::Response => State::BodyUntilClose,
                };
            }
        }
        Ok(())
    }

    /// One step of chunked decoding. Returns false when more input is
    /// needed.
    fn step_chunked(&mut self, chunk_event: &mut bool) -> Result<bool> {
        match self.chunk_phase {
            ChunkPhase::SizeLine => {
                let Some(line) = split_line_crlf(&mut self.buf, MAX_CHUNK_SIZE_LINE)? else {
                    return Ok(false);
                };
                let size = parse_chunk_size(&line)?;
                if size == 0 {
                    self.chunk_phase = ChunkPhase::Trailers;
                    return Ok(true);
                }
                if self.body_len.saturating_add(size) > self.max_body_size {
                    return Err(Error::Parse(ParseErrorKind::BodyTooLarge));
                }
                self.chunk_phase = ChunkPhase::Data { remaining: size };
                Ok(true)
            }

            ChunkPhase::Data { remaining } => {
                if self.buf.is_empty() {
                    return Ok(false);
                }
                let take = remaining.min(self.buf.len());
                let data = self.buf.split_to(take);
                self.emit(&data)?;
                *chunk_event = true;
                if take == remaining {
                    self.chunk_phase = ChunkPhase::DataCrlf;
                } else {
                    self.chunk_phase = ChunkPhase::Data {
                        remaining: remaining - take,
                    };
                }
                Ok(true)
            }

            ChunkPhase::DataCrlf => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }
                if &self.buf[..2] != b"\r\n" {
                    return Err(Error::Parse(ParseErrorKind::BadChunk));
                }
                let _ = self.buf.split_to(2);
                self.chunk_phase = ChunkPhase::SizeLine;
                Ok(true)
            }

            ChunkPhase::Trailers => {
                let Some(line) = split_line_crlf(&mut self.buf, self.max_headers_size)? else {
                    return Ok(false);
                };
                if line.is_empty() {
                    self.state = State::Done;
                    return Ok(true);
                }
                let (name, value) = parse_header_line(&line)?;
                if self.keep_trailers {
                    self.trailers.append(name, value);
                }
                Ok(true)
            }
        }
    }

    fn emit(&mut self, data: &[u8]) -> Result<()> {
        self.body_len += data.len();
        if self.body_len > self.max_body_size {
            return Err(Error::Parse(ParseErrorKind::BodyTooLarge));
        }
        match &mut self.sink {
            Some(sink) => sink.write(data),
            None => {
                self.body.extend_from_slice(data);
                Ok(())
            }
        }
    }
}

fn is_supported_version(version: &str) -> bool {
    version == "HTTP/1.1" || version == "HTTP/1.0"
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Split one CRLF line off `buf`, failing once the unterminated prefix
/// exceeds `max_len`.
fn split_line_crlf(buf: &mut BytesMut, max_len: usize) -> Result<Option<BytesMut>> {
    let Some(end) = find_crlf(buf) else {
        if buf.len() > max_len {
            return Err(Error::Parse(ParseErrorKind::BadChunk));
        }
        return Ok(None);
    };
    if end > max_len {
        return Err(Error::Parse(ParseErrorKind::BadChunk));
    }
    let line = buf.split_to(end);
    let _ = buf.split_to(2);
    Ok(Some(line))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let bad = || Error::Parse(ParseErrorKind::BadChunk);
    let line = std::str::from_utf8(line).map_err(|_| bad())?;
    // Chunk extensions after ';' are ignored.
    let size = line.split(';').next().unwrap_or("").trim();
    if size.is_empty() {
        return Err(bad());
    }
    usize::from_str_radix(size, 16).map_err(|_| bad())
}

/// Parse `Name: value`. Field names must be RFC 7230 tokens; leading
/// whitespace (line folding) is rejected; values are trimmed.
fn parse_header_line(line: &[u8]) -> Result<(String, String)> {
    let bad = || Error::Parse(ParseErrorKind::BadHeader);
    let line = std::str::from_utf8(line).map_err(|_| bad())?;

    let colon = line.find(':').ok_or_else(bad)?;
    let name = &line[..colon];
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(bad());
    }
    let value = line[colon + 1..].trim();
    Ok((name.to_owned(), value.to_owned()))
}

fn is_token_byte(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
            | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z'
    )
}
