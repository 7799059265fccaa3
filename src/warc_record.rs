//! Decompression and splitting of a single gzipped WARC record fetched from a Common Crawl archive.
//!
//! A response record looks like this once decompressed:
//!
//! ```text
//! WARC/1.0
//! WARC-Type: response
//! WARC-Target-URI: https://example.com/
//! Content-Length: 1234
//!
//! HTTP/1.1 200 OK
//! Content-Type: text/html
//!
//! <html>...</html>
//! ```
//!
//! The first blank line ends the WARC header block, the next one ends the embedded HTTP header block,
//! and everything after that is the page body.
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cdx::CaptureRecord;

/// Which header block of a record a parse error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Warc,
    Http,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Warc => f.write_str("WARC"),
            Section::Http => f.write_str("HTTP"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("decompressed record is empty")]
    Empty,

    #[error("no blank line terminates the WARC header block")]
    UnterminatedWarcHeader,

    #[error("{section} header block has no start line")]
    MissingStartLine { section: Section },

    #[error("{section} header line {line_no} has no colon: {line:?}")]
    MissingColon {
        section: Section,
        line_no: usize,
        line: String,
    },

    #[error("{section} header line {line_no} has an empty name")]
    EmptyName { section: Section, line_no: usize },

    #[error("{section} header line {line_no} continues a header that was never started")]
    OrphanContinuation { section: Section, line_no: usize },
}

/// Header fields of one block. Names keep the case they were sent with, lookups ignore it.
/// Repeated names are folded into one comma-separated value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field and returns the key it was stored under.
    pub fn insert(&mut self, name: &str, value: &str) -> String {
        let existing = self
            .0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned();
        match existing {
            Some(key) => {
                if let Some(current) = self.0.get_mut(&key) {
                    current.push_str(", ");
                    current.push_str(value);
                }
                key
            }
            None => {
                self.0.insert(name.to_string(), value.to_string());
                name.to_string()
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn continue_value(&mut self, key: &str, more: &str) {
        if let Some(value) = self.0.get_mut(key) {
            if !value.is_empty() {
                value.push(' ');
            }
            value.push_str(more);
        }
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k.as_ref(), v.as_ref());
        }
        headers
    }
}

/// A parsed WARC record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    /// e.g. `WARC/1.0`
    pub warc_version: String,
    pub warc_header: Headers,
    /// e.g. `HTTP/1.1 200 OK`
    pub http_status_line: String,
    pub http_header: Headers,
    pub body: Vec<u8>,
}

impl ArchiveRecord {
    /// The body as text, with invalid UTF-8 replaced.
    pub fn html(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Everything known about one capture: its index record plus the content loaded from the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageData {
    #[serde(flatten)]
    pub record: CaptureRecord,
    pub warc_header: Headers,
    pub http_status_line: String,
    pub http_header: Headers,
    pub html: String,
}

impl PageData {
    pub fn new(record: CaptureRecord, archive: ArchiveRecord) -> Self {
        let html = archive.html();
        PageData {
            record,
            warc_header: archive.warc_header,
            http_status_line: archive.http_status_line,
            http_header: archive.http_header,
            html,
        }
    }

    /// Redirect target announced by the captured HTTP response.
    pub fn location(&self) -> Option<&str> {
        self.http_header
            .get("Location")
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

/// Gunzips a fetched archive segment.
/// Empty, corrupt and truncated input all come back as an `io::Error`.
pub fn decompress_segment(segment: &[u8]) -> std::io::Result<Vec<u8>> {
    if segment.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "archive segment is empty",
        ));
    }
    let mut decoder = flate2::read::GzDecoder::new(segment);
    let mut buffer = Vec::new();
    decoder.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Splits a decompressed WARC record into its header blocks and body.
pub fn parse_archive_record(data: &[u8]) -> Result<ArchiveRecord, RecordError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(RecordError::Empty);
    }
    let (warc_end, rest_start) =
        find_blank_line(data).ok_or(RecordError::UnterminatedWarcHeader)?;
    let (warc_version, warc_header) = parse_header_block(&data[..warc_end], Section::Warc)?;

    let rest = &data[rest_start..];
    let declared = warc_header
        .get("Content-Length")
        .and_then(|v| v.trim().parse::<usize>().ok());
    let payload = match declared {
        Some(n) if n <= rest.len() => &rest[..n],
        _ => {
            tracing::debug!(
                "Content-Length {:?} does not fit the {} remaining bytes, trimming record terminator",
                declared,
                rest.len()
            );
            trim_trailing_newlines(rest)
        }
    };

    let (http_block, body) = match find_blank_line(payload) {
        Some((end, start)) => (&payload[..end], &payload[start..]),
        None => (payload, &payload[payload.len()..]),
    };
    let (http_status_line, http_header) = parse_header_block(http_block, Section::Http)?;

    Ok(ArchiveRecord {
        warc_version,
        warc_header,
        http_status_line,
        http_header,
        body: body.to_vec(),
    })
}

/// Parses a start line followed by `Name: value` lines.
/// Lines beginning with a space or tab continue the previous value.
pub fn parse_header_block(
    block: &[u8],
    section: Section,
) -> Result<(String, Headers), RecordError> {
    let text = String::from_utf8_lossy(block);
    let mut lines = text.lines();
    let start_line = lines
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or(RecordError::MissingStartLine { section })?
        .to_string();

    let mut headers = Headers::new();
    let mut last_key: Option<String> = None;
    for (i, line) in lines.enumerate() {
        let line_no = i + 2;
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(|c| c == ' ' || c == '\t') {
            let key = last_key
                .as_deref()
                .ok_or(RecordError::OrphanContinuation { section, line_no })?;
            headers.continue_value(key, line.trim());
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| RecordError::MissingColon {
            section,
            line_no,
            line: line.to_string(),
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RecordError::EmptyName { section, line_no });
        }
        last_key = Some(headers.insert(name, value.trim()));
    }
    Ok((start_line, headers))
}

/// Position of the first blank line: (end of the block before it, start of what follows).
/// Both `\r\n\r\n` and bare `\n\n` count; whichever comes first wins.
fn find_blank_line(data: &[u8]) -> Option<(usize, usize)> {
    let crlf = find(data, b"\r\n\r\n").map(|p| (p, p + 4));
    let lf = find(data, b"\n\n").map(|p| (p, p + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn trim_trailing_newlines(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|b| *b != b'\r' && *b != b'\n')
        .map_or(0, |p| p + 1);
    &data[..end]
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};

    use super::*;

    const HTML: &str = "<html><body>Hello</body></html>";

    fn record_text() -> String {
        let payload = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=UTF-8\r\nServer: nginx\r\n\r\n{HTML}"
        );
        format!(
            "WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: https://example.com/\r\nContent-Length: {}\r\n\r\n{payload}\r\n\r\n",
            payload.len()
        )
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn can_split_response_record() {
        let record = parse_archive_record(record_text().as_bytes()).unwrap();
        assert_eq!(record.warc_version, "WARC/1.0");
        assert_eq!(record.warc_header.get("warc-type"), Some("response"));
        assert_eq!(record.warc_header.len(), 3);
        assert_eq!(record.http_status_line, "HTTP/1.1 200 OK");
        assert_eq!(
            record.http_header,
            Headers::from_iter([
                ("Content-Type", "text/html; charset=UTF-8"),
                ("Server", "nginx"),
            ])
        );
        assert_eq!(record.html(), HTML);
    }

    #[test]
    fn decompresses_and_splits() {
        let data = decompress_segment(&gzip(record_text().as_bytes())).unwrap();
        assert_eq!(parse_archive_record(&data).unwrap().html(), HTML);
    }

    #[test]
    fn body_keeps_inner_blank_lines() {
        let body = "<p>one</p>\r\n\r\n<p>two</p>";
        let payload = format!("HTTP/1.1 200 OK\r\nServer: x\r\n\r\n{body}");
        let text = format!(
            "WARC/1.0\r\nContent-Length: {}\r\n\r\n{payload}\r\n\r\n",
            payload.len()
        );
        assert_eq!(parse_archive_record(text.as_bytes()).unwrap().html(), body);
    }

    #[test]
    fn trims_terminator_without_content_length() {
        let text = "WARC/1.0\nWARC-Type: response\n\nHTTP/1.1 200 OK\nServer: x\n\nbody\r\n\r\n";
        let record = parse_archive_record(text.as_bytes()).unwrap();
        assert_eq!(record.html(), "body");
        assert_eq!(record.http_header.get("server"), Some("x"));
    }

    #[test]
    fn revisit_record_has_empty_body() {
        let text = "WARC/1.0\r\nWARC-Type: revisit\r\n\r\nHTTP/1.1 304 Not Modified\r\nETag: abc\r\n\r\n";
        let record = parse_archive_record(text.as_bytes()).unwrap();
        assert_eq!(record.http_status_line, "HTTP/1.1 304 Not Modified");
        assert!(record.body.is_empty());
    }

    #[test]
    fn folds_repeated_and_continued_headers() {
        let block = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nset-cookie: b=2\r\nX-Long: first\r\n\tsecond\r\n";
        let (_, headers) = parse_header_block(block, Section::Http).unwrap();
        assert_eq!(headers.get("Set-Cookie"), Some("a=1, b=2"));
        assert_eq!(headers.get("x-long"), Some("first second"));
    }

    #[test]
    fn header_value_may_contain_colons() {
        let block = b"HTTP/1.1 301 Moved\r\nLocation: https://example.com:8443/x\r\n";
        let (_, headers) = parse_header_block(block, Section::Http).unwrap();
        assert_eq!(headers.get("location"), Some("https://example.com:8443/x"));
    }

    #[test]
    fn rejects_header_line_without_colon() {
        let text = "WARC/1.0\r\nWARC-Type response\r\n\r\nHTTP/1.1 200 OK\r\n\r\nbody";
        match parse_archive_record(text.as_bytes()).unwrap_err() {
            RecordError::MissingColon {
                section, line_no, ..
            } => {
                assert_eq!(section, Section::Warc);
                assert_eq!(line_no, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_orphan_continuation() {
        let err = parse_header_block(b"HTTP/1.1 200 OK\r\n  dangling\r\n", Section::Http).unwrap_err();
        assert!(matches!(err, RecordError::OrphanContinuation { line_no: 2, .. }));
    }

    #[test]
    fn rejects_record_without_blank_line() {
        assert!(matches!(
            parse_archive_record(b"WARC/1.0\r\nWARC-Type: response\r\n"),
            Err(RecordError::UnterminatedWarcHeader)
        ));
        assert!(matches!(parse_archive_record(b"\r\n"), Err(RecordError::Empty)));
    }

    #[test]
    fn truncated_gzip_fails_to_decompress() {
        let compressed = gzip(record_text().repeat(20).as_bytes());
        assert!(decompress_segment(&compressed[..compressed.len() / 2]).is_err());
        assert!(decompress_segment(&[]).is_err());
        assert!(decompress_segment(b"definitely not gzip").is_err());
    }
}
