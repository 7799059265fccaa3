//! A small client for the Common Crawl index service.
//!
//! [CommonCrawlClient::lookup] lists the captures an index server knows for a domain or URL pattern,
//! and [CommonCrawlClient::load_page_data] fetches one capture's archived bytes and returns the page
//! body together with its WARC and HTTP headers.
//!
//! ```no_run
//! # async fn run() -> commoncrawl::Result<()> {
//! use commoncrawl::{ClientConfig, CommonCrawlClient};
//!
//! let client = CommonCrawlClient::new(ClientConfig::from_env()?)?;
//! let records = client.lookup("example.com").await?;
//! if let Some(record) = records.first() {
//!     let page = client.load_page_data(record).await?;
//!     println!("{} bytes of html", page.html.len());
//! }
//! # Ok(())
//! # }
//! ```
pub mod cdx;
pub mod commoncrawl;
pub mod config;
pub mod error;
pub mod tracing_and_metrics;
pub mod warc_record;

pub use cdx::{ByteRange, CaptureRecord, CrawlIndex, LookupOptions, MatchType};
pub use commoncrawl::CommonCrawlClient;
pub use config::{ClientConfig, DEFAULT_DATA_SERVER, DEFAULT_INDEX_SERVER};
pub use error::{CrawlError, ErrorKind, Result};
pub use warc_record::{ArchiveRecord, Headers, PageData, RecordError};
