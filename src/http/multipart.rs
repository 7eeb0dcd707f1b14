//! Multipart form data (RFC 7578) parts: rendering for requests and
//! parsing on the receiving side.

use crate::base::{Error, ParseErrorKind, Result};
use crate::util;
use bytes::Bytes;
use std::path::Path;

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    name: String,
    file_name: Option<String>,
    media_type: Option<String>,
    charset: Option<String>,
    data: Bytes,
}

impl FormPart {
    /// A part carrying in-memory data.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>, media_type: &str) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            media_type: (!media_type.is_empty()).then(|| media_type.to_owned()),
            charset: None,
            data: data.into(),
        }
    }

    /// A part whose content comes from a file. The file is read when the
    /// part is created; the media type is inferred from the extension.
    pub fn file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "cannot read form file");
            Error::FileIo
        })?;

        let media_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(util::media_type_from_extension)
            .map(str::to_owned);

        Ok(Self {
            name: name.into(),
            file_name: path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_owned),
            media_type,
            charset: None,
            data: Bytes::from(data),
        })
    }

    pub fn set_charset(&mut self, charset: impl Into<String>) {
        self.charset = Some(charset.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Part headers without the blank separator line.
    pub(crate) fn format_headers(&self) -> String {
        let mut headers = format!(
            "Content-Disposition: form-data; name=\"{}\"",
            escape_quotes(&self.name)
        );

        if let Some(file_name) = &self.file_name {
            headers.push_str(&format!("; filename=\"{}\"", escape_quotes(file_name)));
        }

        if let Some(media_type) = &self.media_type {
            headers.push_str(&format!("\r\nContent-Type: {media_type}"));
            if let Some(charset) = &self.charset {
                headers.push_str(&format!("; charset={charset}"));
            }
        }

        headers
    }

    /// Serialized size of this part, excluding the leading boundary line.
    pub(crate) fn serialized_size(&self) -> usize {
        self.format_headers().len() + 4 + self.data.len() + 2
    }
}

fn escape_quotes(s: &str) -> String {
    if s.contains('"') || s.contains('\\') {
        s.replace('\\', "\\\\").replace('"', "\\\"")
    } else {
        s.to_owned()
    }
}

/// Extract the boundary parameter from a `multipart/form-data` media type.
pub fn boundary_from_content_type(value: &str) -> Option<String> {
    let mut params = value.split(';');
    if !params
        .next()?
        .trim()
        .eq_ignore_ascii_case("multipart/form-data")
    {
        return None;
    }
    for param in params {
        if let Some((key, value)) = util::split_kv(param, '=') {
            if key.eq_ignore_ascii_case("boundary") {
                return Some(util::unquote(value).to_owned());
            }
        }
    }
    None
}

/// Parse a complete `multipart/form-data` body into parts.
pub fn parse_form_data(body: &[u8], boundary: &str) -> Result<Vec<FormPart>> {
    let delimiter = format!("--{boundary}");
    let bad = || Error::Parse(ParseErrorKind::BadFormData);

    let start = find(body, delimiter.as_bytes()).ok_or_else(bad)?;
    let mut pos = start + delimiter.len();

    let mut parts = Vec::new();
    loop {
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(bad());
        }
        pos += 2;

        let headers_end = find(&body[pos..], b"\r\n\r\n").ok_or_else(bad)? + pos;
        let header_block = std::str::from_utf8(&body[pos..headers_end]).map_err(|_| bad())?;

        let mut part = parse_part_headers(header_block)?;
        pos = headers_end + 4;

        // Data runs until the CRLF that precedes the next boundary line.
        let closer = format!("\r\n{delimiter}");
        let data_end = find(&body[pos..], closer.as_bytes()).ok_or_else(bad)? + pos;
        part.data = Bytes::copy_from_slice(&body[pos..data_end]);
        parts.push(part);

        pos = data_end + closer.len();
    }
}

fn parse_part_headers(block: &str) -> Result<FormPart> {
    let bad = || Error::Parse(ParseErrorKind::BadFormData);

    let mut name = None;
    let mut file_name = None;
    let mut media_type = None;
    let mut charset = None;

    for line in block.split("\r\n") {
        let (key, value) = util::split_kv(line, ':').ok_or_else(bad)?;
        if key.eq_ignore_ascii_case("Content-Disposition") {
            for param in value.split(';').skip(1) {
                if let Some((k, v)) = util::split_kv(param, '=') {
                    let v = util::unquote(v).to_owned();
                    if k.eq_ignore_ascii_case("name") {
                        name = Some(v);
                    } else if k.eq_ignore_ascii_case("filename") {
                        file_name = Some(v);
                    }
                }
            }
        } else if key.eq_ignore_ascii_case("Content-Type") {
            let mut pieces = value.split(';');
            media_type = pieces.next().map(|m| m.trim().to_owned());
            for param in pieces {
                if let Some((k, v)) = util::split_kv(param, '=') {
                    if k.eq_ignore_ascii_case("charset") {
                        charset = Some(v.to_owned());
                    }
                }
            }
        }
    }

    Ok(FormPart {
        name: name.ok_or_else(bad)?,
        file_name,
        media_type,
        charset,
        data: Bytes::new(),
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_extraction() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=abc123"),
            Some("abc123".to_owned())
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"quoted\""),
            Some("quoted".to_owned())
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
    }

    #[test]
    fn part_headers() {
        let mut part = FormPart::new("json", "{}", "application/json");
        part.set_charset("utf-8");
        assert_eq!(
            part.format_headers(),
            "Content-Disposition: form-data; name=\"json\"\r\n\
             Content-Type: application/json; charset=utf-8"
        );
    }

    #[test]
    fn parse_two_parts() {
        let body = b"--XYZ\r\n\
            Content-Disposition: form-data; name=\"json\"\r\n\
            Content-Type: application/json\r\n\
            \r\n\
            {}\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            abcd\r\n\
            --XYZ--\r\n";

        let parts = parse_form_data(body, "XYZ").unwrap();
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name(), "json");
        assert_eq!(parts[0].media_type(), Some("application/json"));
        assert_eq!(parts[0].data().as_ref(), b"{}");

        assert_eq!(parts[1].name(), "file");
        assert_eq!(parts[1].file_name(), Some("a.txt"));
        assert_eq!(parts[1].media_type(), Some("text/plain"));
        assert_eq!(parts[1].size(), 4);
    }

    #[test]
    fn parse_data_containing_crlf() {
        let body = b"--B\r\n\
            Content-Disposition: form-data; name=\"text\"\r\n\
            \r\n\
            line one\r\nline two\r\n\
            --B--\r\n";
        let parts = parse_form_data(body, "B").unwrap();
        assert_eq!(parts[0].data().as_ref(), b"line one\r\nline two");
    }

    #[test]
    fn parse_rejects_truncated_body() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\ndata";
        assert!(parse_form_data(body, "B").is_err());
    }

    #[test]
    fn round_trip_against_renderer() {
        use crate::http::body::FormBody;

        let parts = vec![
            FormPart::new("a", "first", "text/plain"),
            FormPart::new("b", "second", ""),
        ];
        let form = FormBody::new(parts);
        let boundary = form.boundary().to_owned();
        let rendered = form.render();

        let parsed = parse_form_data(&rendered, &boundary).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].data().as_ref(), b"first");
        assert_eq!(parsed[1].name(), "b");
        assert_eq!(parsed[1].media_type(), None);
    }
}
