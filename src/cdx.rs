//! This module contains the structs for de-serializing CDX index responses and the helpers
//! that turn index output into capture records, byte ranges and plain URLs.
use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_aux::prelude::deserialize_number_from_string;

use crate::error::{CrawlError, Result};

/// Timestamp layout used by the index, e.g. `20240722120756`.
pub const CDX_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Fields a JSON line must carry to become a [CaptureRecord].
pub const REQUIRED_FIELDS: [&str; 5] = ["timestamp", "status", "length", "offset", "filename"];

/// One archived snapshot of a URL, as answered by the index server.
/// The index sends numbers as strings, so they go through `deserialize_number_from_string`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptureRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urlkey: Option<String>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// `None` when the index has no numeric status for the capture, e.g. `"-"`.
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub length: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub offset: u64,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<String>,
    /// The index endpoint that answered with this record. Filled in by the client.
    #[serde(default)]
    pub index: String,
}

impl CaptureRecord {
    /// The span of the archive file holding this capture.
    pub fn byte_range(&self) -> Result<ByteRange> {
        ByteRange::new(self.offset, self.length)
    }

    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.timestamp, CDX_TIMESTAMP_FORMAT)
            .ok()
            .map(|t| t.and_utc())
    }

    /// 301, 302, 303, 307 or 308. Other 3xx captures carry nothing to follow.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, Some(301 | 302 | 303 | 307 | 308))
    }
}

/// Accepts a status as a JSON number or numeric string; anything else becomes `None`.
fn deserialize_lenient_status<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let status = match &value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    if status.is_none() && !value.is_null() {
        tracing::debug!("Capture status {} is not numeric", value);
    }
    Ok(status)
}

/// Inclusive byte span `[offset, offset + length - 1]` within an archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    offset: u64,
    length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Result<Self> {
        if length == 0 {
            return Err(CrawlError::invalid_input(format!(
                "zero-length byte range at offset {offset}"
            )));
        }
        if offset.checked_add(length - 1).is_none() {
            return Err(CrawlError::invalid_input(format!(
                "byte range at offset {offset} with length {length} overflows"
            )));
        }
        Ok(ByteRange { offset, length })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Last byte of the range, inclusive.
    pub fn end(&self) -> u64 {
        self.offset + self.length - 1
    }

    /// Value for the HTTP `Range` header.
    pub fn header_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.offset, self.end())
    }
}

/// A crawl collection listed in `collinfo.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CrawlIndex {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub timegate: Option<String>,
    #[serde(rename = "cdx-api")]
    pub cdx_api: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// How the index should interpret the url pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Prefix,
    Host,
    Domain,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Prefix => "prefix",
            MatchType::Host => "host",
            MatchType::Domain => "domain",
        }
    }
}

/// Optional query parameters for an index lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupOptions {
    pub match_type: Option<MatchType>,
    pub filters: Vec<String>,
    pub fields: Vec<String>,
    pub closest: Option<String>,
    pub limit: Option<usize>,
}

impl LookupOptions {
    pub fn match_type(mut self, match_type: MatchType) -> Self {
        self.match_type = Some(match_type);
        self
    }

    /// Adds a CDX filter such as `!status:404` or `mime:text/html`.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Prefer captures closest to `timestamp` (in [CDX_TIMESTAMP_FORMAT]).
    pub fn closest(mut self, timestamp: impl Into<String>) -> Self {
        self.closest = Some(timestamp.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query string pairs for `pattern`, in the order the index receives them.
    ///
    /// For `json` output a non-empty field list is completed with the [REQUIRED_FIELDS] it lacks,
    /// so every returned line still parses as a [CaptureRecord].
    pub fn query_pairs(&self, pattern: &str, output: &str) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("url", pattern.to_string())];
        if let Some(match_type) = self.match_type {
            pairs.push(("matchType", match_type.as_str().to_string()));
        }
        pairs.push(("output", output.to_string()));
        for filter in &self.filters {
            pairs.push(("filter", filter.clone()));
        }
        if !self.fields.is_empty() {
            let mut fields = self.fields.clone();
            if output == "json" {
                for required in REQUIRED_FIELDS {
                    if !fields.iter().any(|f| f == required) {
                        fields.push(required.to_string());
                    }
                }
            }
            pairs.push(("fl", fields.join(",")));
        }
        if let Some(closest) = &self.closest {
            pairs.push(("closest", closest.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// Formats `time` the way the index expects for `closest`.
pub fn cdx_timestamp(time: DateTime<Utc>) -> String {
    time.format(CDX_TIMESTAMP_FORMAT).to_string()
}

/// Deserializes a JSON-lines index response into [CaptureRecord]s, tagging each with `index`.
///
/// Blank lines are ignored. The first line that fails to parse aborts the whole
/// response with [CrawlError::Json] naming its 1-based line number.
pub fn parse_json_lines(body: &str, index: &str) -> Result<Vec<CaptureRecord>> {
    let mut records = Vec::new();
    for (n, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut record: CaptureRecord =
            serde_json::from_str(line).map_err(|source| CrawlError::Json {
                url: index.to_string(),
                line: n + 1,
                source,
            })?;
        record.index = index.to_string();
        records.push(record);
    }
    tracing::debug!("Parsed {} capture records from {}", records.len(), index);
    Ok(records)
}

/// Turns a SURT url key like `com,example)/path` back into `example.com/path`.
/// Returns `None` for keys without the `)/` separator.
pub fn urlkey_to_url(urlkey: &str) -> Option<String> {
    let (host, path) = urlkey.split_once(")/")?;
    let host = host.split(',').rev().collect::<Vec<_>>().join(".");
    if path.is_empty() {
        Some(host)
    } else {
        Some(format!("{host}/{path}"))
    }
}

/// Converts a text response of url keys into distinct, percent-decoded URLs in first-seen order.
pub fn parse_urlkey_lines(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for urlkey in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(url) = urlkey_to_url(urlkey) else {
            tracing::warn!("Skipping malformed url key {}", urlkey);
            continue;
        };
        let url = match urlencoding::decode(&url) {
            Ok(decoded) => decoded.trim().to_string(),
            Err(e) => {
                tracing::warn!("Skipping url key {} that does not decode to UTF-8: {}", urlkey, e);
                continue;
            }
        };
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }
    urls
}

/// Picks the first capture with status 200, else the first capture.
pub fn select_most_relevant(records: &[CaptureRecord]) -> Option<&CaptureRecord> {
    records
        .iter()
        .find(|r| r.status == Some(200))
        .or_else(|| records.first())
}
