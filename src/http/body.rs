//! Message bodies.
//!
//! A body is one of a small set of variants sharing the same capability
//! surface: a known size, sequential payload segments for writing, optional
//! in-place gzip compression, and a dump form for logging. String and form
//! bodies are restartable; file bodies restart by reopening the file.

use crate::base::{Error, Result};
use crate::http::multipart::FormPart;
use crate::util;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Bodies at or below this size are not worth compressing.
pub const GZIP_THRESHOLD: usize = 1400;

/// Default chunk size for streaming file bodies.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Cap on body bytes included in a dump/log line.
const MAX_DUMP_SIZE: usize = 2048;

/// An in-memory body with a declared media type and charset.
#[derive(Debug, Clone, Default)]
pub struct StringBody {
    data: Bytes,
    media_type: String,
    charset: String,
    compressed: bool,
    exhausted: bool,
}

impl StringBody {
    pub fn new(data: impl Into<Bytes>, media_type: &str, charset: &str) -> Self {
        Self {
            data: data.into(),
            media_type: media_type.to_owned(),
            charset: charset.to_owned(),
            compressed: false,
            exhausted: false,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }
}

/// A body streamed from disk in fixed-size chunks.
///
/// The size is recorded at construction; concurrent modification of the
/// file is not handled.
#[derive(Debug)]
pub struct FileBody {
    path: PathBuf,
    chunk_size: usize,
    size: u64,
    media_type: String,
    file: Option<tokio::fs::File>,
}

impl FileBody {
    pub fn new(path: &Path, infer_media_type: bool, chunk_size: usize) -> Result<Self> {
        let size = std::fs::metadata(path)
            .map_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "cannot stat file body");
                Error::FileIo
            })?
            .len();

        let media_type = if infer_media_type {
            path.extension()
                .and_then(|e| e.to_str())
                .map(util::media_type_from_extension)
                .unwrap_or("application/octet-stream")
                .to_owned()
        } else {
            String::new()
        };

        Ok(Self {
            path: path.to_owned(),
            chunk_size: if chunk_size > 0 {
                chunk_size
            } else {
                DEFAULT_CHUNK_SIZE
            },
            size,
            media_type,
            file: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Rename the underlying file, e.g. to persist a streamed download.
    pub fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.file = None;
        std::fs::rename(&self.path, new_path).map_err(|e| {
            tracing::warn!(from = %self.path.display(), to = %new_path.display(),
                error = %e, "file rename failed");
            Error::FileIo
        })?;
        self.path = new_path.to_owned();
        Ok(())
    }

    async fn next_chunk(&mut self) -> Result<Bytes> {
        if self.file.is_none() {
            let file = tokio::fs::File::open(&self.path)
                .await
                .map_err(|_| Error::FileIo)?;
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(Error::Internal);
        };

        let mut chunk = vec![0u8; self.chunk_size];
        let n = file.read(&mut chunk).await.map_err(|_| Error::FileIo)?;
        chunk.truncate(n);
        Ok(Bytes::from(chunk))
    }
}

/// An ordered sequence of multipart form parts.
#[derive(Debug)]
pub struct FormBody {
    parts: Vec<FormPart>,
    boundary: String,
    rendered: Option<Bytes>,
    compressed: bool,
    cursor: usize,
    terminated: bool,
}

impl FormBody {
    pub fn new(parts: Vec<FormPart>) -> Self {
        Self {
            parts,
            boundary: util::random_ascii_string(32),
            rendered: None,
            compressed: false,
            cursor: 0,
            terminated: false,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn size(&self) -> u64 {
        if let Some(rendered) = &self.rendered {
            return rendered.len() as u64;
        }
        let mut size = 0usize;
        for part in &self.parts {
            size += self.boundary.len() + 4; // --boundary CRLF
            size += part.serialized_size();
        }
        size += self.boundary.len() + 6; // --boundary-- CRLF
        size as u64
    }

    /// Serialize every part into one buffer.
    pub fn render(&self) -> Bytes {
        let mut output = Vec::with_capacity(self.size() as usize);
        for i in 0..self.parts.len() {
            output.extend_from_slice(&self.part_bytes(i));
        }
        output.extend_from_slice(self.terminator().as_bytes());
        Bytes::from(output)
    }

    fn part_bytes(&self, index: usize) -> Vec<u8> {
        let part = &self.parts[index];
        let mut output = Vec::with_capacity(part.serialized_size() + self.boundary.len() + 4);
        output.extend_from_slice(b"--");
        output.extend_from_slice(self.boundary.as_bytes());
        output.extend_from_slice(b"\r\n");
        output.extend_from_slice(part.format_headers().as_bytes());
        output.extend_from_slice(b"\r\n\r\n");
        output.extend_from_slice(part.data());
        output.extend_from_slice(b"\r\n");
        output
    }

    fn terminator(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }

    fn next_segment(&mut self) -> Bytes {
        if let Some(rendered) = &self.rendered {
            if self.terminated {
                return Bytes::new();
            }
            self.terminated = true;
            return rendered.clone();
        }

        if self.cursor < self.parts.len() {
            let mut segment = self.part_bytes(self.cursor);
            self.cursor += 1;
            if self.cursor == self.parts.len() {
                segment.extend_from_slice(self.terminator().as_bytes());
                self.terminated = true;
            }
            return Bytes::from(segment);
        }

        if !self.terminated {
            // No parts at all; still close the multipart framing.
            self.terminated = true;
            return Bytes::from(self.terminator().into_bytes());
        }
        Bytes::new()
    }
}

/// A request or response body.
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    String(StringBody),
    File(FileBody),
    Form(FormBody),
}

impl Body {
    /// Size in bytes, or `None` for a body whose length is only known once
    /// it has been fully streamed.
    pub fn size(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::String(body) => Some(body.data.len() as u64),
            Body::File(body) => Some(body.size),
            Body::Form(body) => Some(body.size()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == Some(0)
    }

    /// Rewind the payload cursor so the body can be written again.
    pub fn init_payload(&mut self) {
        match self {
            Body::Empty => {}
            Body::String(body) => body.exhausted = false,
            Body::File(body) => body.file = None,
            Body::Form(body) => {
                body.cursor = 0;
                body.terminated = false;
            }
        }
    }

    /// The next payload segment; empty once the body is exhausted.
    pub async fn next_payload(&mut self) -> Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::String(body) => {
                if body.exhausted {
                    Ok(Bytes::new())
                } else {
                    body.exhausted = true;
                    Ok(body.data.clone())
                }
            }
            Body::File(body) => body.next_chunk().await,
            Body::Form(body) => Ok(body.next_segment()),
        }
    }

    /// Gzip the body in place. Returns whether compression happened.
    ///
    /// File bodies and bodies at or below [`GZIP_THRESHOLD`] are left alone.
    #[cfg(feature = "gzip")]
    pub fn compress(&mut self) -> bool {
        match self {
            Body::Empty | Body::File(_) => false,
            Body::String(body) => {
                if body.compressed {
                    return true;
                }
                if body.data.len() <= GZIP_THRESHOLD {
                    return false;
                }
                match util::gzip::compress(&body.data) {
                    Ok(compressed) => {
                        body.data = Bytes::from(compressed);
                        body.compressed = true;
                        true
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to compress body");
                        false
                    }
                }
            }
            Body::Form(body) => {
                if body.compressed {
                    return true;
                }
                let rendered = body
                    .rendered
                    .clone()
                    .unwrap_or_else(|| body.render());
                if rendered.len() <= GZIP_THRESHOLD {
                    return false;
                }
                match util::gzip::compress(&rendered) {
                    Ok(compressed) => {
                        body.rendered = Some(Bytes::from(compressed));
                        body.compressed = true;
                        true
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to compress form body");
                        false
                    }
                }
            }
        }
    }

    pub fn is_compressed(&self) -> bool {
        match self {
            Body::String(body) => body.compressed,
            Body::Form(body) => body.compressed,
            _ => false,
        }
    }

    /// The `Content-Type` value this body implies, if any.
    pub fn content_type(&self) -> Option<String> {
        match self {
            Body::Empty => None,
            Body::String(body) => {
                if body.media_type.is_empty() {
                    None
                } else if body.charset.is_empty() {
                    Some(body.media_type.clone())
                } else {
                    Some(format!("{}; charset={}", body.media_type, body.charset))
                }
            }
            Body::File(body) => {
                (!body.media_type.is_empty()).then(|| body.media_type.clone())
            }
            Body::Form(body) => Some(format!(
                "multipart/form-data; boundary={}",
                body.boundary
            )),
        }
    }

    /// In-memory bytes, when the body holds them.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Empty => Some(&[]),
            Body::String(body) => Some(&body.data),
            _ => None,
        }
    }

    /// A short, truncated description for logging.
    pub fn dump(&self) -> String {
        match self {
            Body::Empty => String::new(),
            Body::String(body) => {
                if body.compressed {
                    format!("<{} compressed bytes>", body.data.len())
                } else {
                    let text = String::from_utf8_lossy(&body.data);
                    let mut out: String = text.chars().take(MAX_DUMP_SIZE).collect();
                    if text.len() > out.len() {
                        out.push_str("...");
                    }
                    out
                }
            }
            Body::File(body) => format!("<file: {}>", body.path.display()),
            Body::Form(body) => format!(
                "<multipart: {} parts, boundary={}>",
                body.parts.len(),
                body.boundary
            ),
        }
    }
}

impl From<StringBody> for Body {
    fn from(body: StringBody) -> Self {
        Body::String(body)
    }
}

impl From<FileBody> for Body {
    fn from(body: FileBody) -> Self {
        Body::File(body)
    }
}

impl From<FormBody> for Body {
    fn from(body: FormBody) -> Self {
        Body::Form(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn string_body_single_payload() {
        let mut body = Body::String(StringBody::new("hello", "text/plain", "utf-8"));
        assert_eq!(body.size(), Some(5));

        let first = body.next_payload().await.unwrap();
        assert_eq!(first.as_ref(), b"hello");
        assert!(body.next_payload().await.unwrap().is_empty());

        body.init_payload();
        assert_eq!(body.next_payload().await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn file_body_streams_in_chunks() {
        let path = std::env::temp_dir().join(format!(
            "webwire-test-{}.txt",
            util::random_ascii_string(8)
        ));
        std::fs::write(&path, b"0123456789").unwrap();

        let mut body = Body::File(FileBody::new(&path, true, 4).unwrap());
        assert_eq!(body.size(), Some(10));
        assert_eq!(body.content_type().as_deref(), Some("text/plain"));

        let mut collected = Vec::new();
        loop {
            let chunk = body.next_payload().await.unwrap();
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= 4);
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"0123456789");

        // Restart re-reads from the beginning.
        body.init_payload();
        assert_eq!(body.next_payload().await.unwrap().as_ref(), b"0123");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_body_missing_file() {
        let missing = Path::new("/definitely/not/here.bin");
        assert!(matches!(
            FileBody::new(missing, false, 1024),
            Err(Error::FileIo)
        ));
    }

    #[tokio::test]
    async fn form_body_size_matches_render() {
        let parts = vec![
            FormPart::new("json", "{}", "application/json"),
            FormPart::new("file", "abcd", "text/plain"),
        ];
        let form = FormBody::new(parts);
        assert_eq!(form.boundary().len(), 32);
        assert_eq!(form.size() as usize, form.render().len());

        let mut body = Body::Form(form);
        let mut streamed = Vec::new();
        loop {
            let segment = body.next_payload().await.unwrap();
            if segment.is_empty() {
                break;
            }
            streamed.extend_from_slice(&segment);
        }
        assert_eq!(body.size(), Some(streamed.len() as u64));
        assert!(streamed.ends_with(b"--\r\n"));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn compress_respects_threshold_and_kind() {
        let mut small = Body::String(StringBody::new("tiny", "text/plain", ""));
        assert!(!small.compress());

        let large = "x".repeat(GZIP_THRESHOLD + 1);
        let mut body = Body::String(StringBody::new(large.clone(), "text/plain", ""));
        assert!(body.compress());
        assert!(body.is_compressed());
        let compressed = body.as_bytes().unwrap().to_vec();
        assert!(compressed.len() < large.len());
        assert_eq!(
            util::gzip::decompress(&compressed).unwrap(),
            large.as_bytes()
        );

        // Compressing twice is a no-op that still reports success.
        assert!(body.compress());
    }

    #[test]
    fn content_type_variants() {
        let body = Body::String(StringBody::new("{}", "application/json", "utf-8"));
        assert_eq!(
            body.content_type().as_deref(),
            Some("application/json; charset=utf-8")
        );
        assert_eq!(Body::Empty.content_type(), None);

        let form = Body::Form(FormBody::new(vec![]));
        let ct = form.content_type().unwrap();
        assert!(ct.starts_with("multipart/form-data; boundary="));
    }
}
