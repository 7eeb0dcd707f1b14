//! Small helpers shared across the crate: HTTP dates, random strings and
//! media type lookup.

use rand::distributions::Alphanumeric;
use rand::Rng;
use time::macros::format_description;
use time::OffsetDateTime;

#[cfg(feature = "gzip")]
pub mod gzip;

/// Timestamp for the `Date` header field (IMF-fixdate).
///
/// E.g. `Wed, 21 Oct 2015 07:28:00 GMT`.
pub fn http_date() -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] \
         [hour]:[minute]:[second] GMT"
    );
    OffsetDateTime::now_utc().format(&format).unwrap_or_default()
}

/// Generate a random ASCII alphanumeric string of the given length.
///
/// Used for multipart boundaries and temp file names.
pub fn random_ascii_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Media type from a file extension (lowercase, without the dot).
/// Unknown extensions map to `application/octet-stream`.
pub fn media_type_from_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "txt" => "text/plain",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "xml" => "text/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// Split a `key<delim>value` string, trimming ASCII whitespace around both
/// halves. Returns `None` when the delimiter is absent or the key is empty.
pub fn split_kv(input: &str, delim: char) -> Option<(&str, &str)> {
    let (key, value) = input.split_once(delim)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

/// Strip surrounding double quotes, if any.
pub fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}
