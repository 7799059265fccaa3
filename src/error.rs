use reqwest::StatusCode;
use thiserror::Error;

use crate::cdx::ByteRange;
use crate::warc_record::RecordError;

/// Coarse classification of a [CrawlError], so callers can tell
/// "server unreachable" apart from "server returned garbage".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never produced a usable response.
    Transport,
    /// A response arrived but could not be understood.
    Malformed,
    /// Rejected before any request was made.
    InvalidInput,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid base url {url}: {source}")]
    InvalidBaseUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("{url} answered range {range} with HTTP {status} instead of 206")]
    RangeStatus {
        url: String,
        range: ByteRange,
        status: StatusCode,
    },

    #[error("malformed JSON on line {line} of {url}: {source}")]
    Json {
        url: String,
        line: usize,
        source: serde_json::Error,
    },

    #[error("failed to decompress {url} range {range}: {source}")]
    Decompress {
        url: String,
        range: ByteRange,
        source: std::io::Error,
    },

    #[error("malformed archive record in {url} range {range}: {source}")]
    Record {
        url: String,
        range: ByteRange,
        source: RecordError,
    },
}

impl CrawlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::InvalidInput(_)
            | CrawlError::InvalidBaseUrl { .. }
            | CrawlError::Client(_) => ErrorKind::InvalidInput,
            CrawlError::Request { .. }
            | CrawlError::Status { .. }
            | CrawlError::RangeStatus { .. } => ErrorKind::Transport,
            CrawlError::Json { .. } | CrawlError::Decompress { .. } | CrawlError::Record { .. } => {
                ErrorKind::Malformed
            }
        }
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    pub fn is_malformed(&self) -> bool {
        self.kind() == ErrorKind::Malformed
    }

    pub fn is_invalid_input(&self) -> bool {
        self.kind() == ErrorKind::InvalidInput
    }

    /// HTTP status of the failed response, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CrawlError::Status { status, .. } | CrawlError::RangeStatus { status, .. } => {
                Some(*status)
            }
            CrawlError::Request { source, .. } => source.status(),
            _ => None,
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        CrawlError::InvalidInput(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
