//! This module contains the client that queries a Common Crawl index server and loads archived pages
//! from Common Crawl storage.
//!
//! Every call issues its own request(s) and awaits them; nothing is cached or retried.
use autometrics::autometrics;
use chrono::Utc;
use reqwest::{header::RANGE, StatusCode};
use url::Url;

use crate::cdx::{
    cdx_timestamp, parse_json_lines, parse_urlkey_lines, select_most_relevant, ByteRange,
    CaptureRecord, CrawlIndex, LookupOptions, MatchType,
};
use crate::config::ClientConfig;
use crate::error::{CrawlError, Result};
use crate::warc_record::{decompress_segment, parse_archive_record, PageData};

/// Body of the 404 an index server sends when a query matches nothing.
const NO_CAPTURES: &str = "No Captures found";

#[derive(Debug, Clone)]
pub struct CommonCrawlClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl CommonCrawlClient {
    /// Builds a client, rejecting base URLs that do not parse.
    pub fn new(config: ClientConfig) -> Result<Self> {
        for base in [&config.index_server, &config.data_server] {
            Url::parse(base).map_err(|source| CrawlError::InvalidBaseUrl {
                url: base.clone(),
                source,
            })?;
        }
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.as_str());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(CrawlError::Client)?;
        Ok(CommonCrawlClient { http, config })
    }

    /// A client for the public Common Crawl servers.
    pub fn public() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn search_endpoint(&self) -> String {
        format!("{}/search", self.config.index_server.trim_end_matches('/'))
    }

    /// Where an archive file is served from.
    pub fn archive_url(&self, filename: &str) -> String {
        format!(
            "{}/{}",
            self.config.data_server.trim_end_matches('/'),
            filename.trim_start_matches('/')
        )
    }

    /// Checks that `record` names a file and a usable byte range, without touching the network.
    pub fn archive_location(&self, record: &CaptureRecord) -> Result<(String, ByteRange)> {
        if record.filename.trim().is_empty() {
            return Err(CrawlError::invalid_input(format!(
                "capture {} at {} has no archive filename",
                record.url.as_deref().unwrap_or("<unknown url>"),
                record.timestamp
            )));
        }
        let range = record.byte_range()?;
        Ok((self.archive_url(&record.filename), range))
    }

    /// All captures the index server knows for `pattern`, in the order it returned them.
    ///
    /// A malformed line fails the whole lookup; see [parse_json_lines].
    #[tracing::instrument(skip(self))]
    #[autometrics]
    pub async fn lookup(&self, pattern: &str) -> Result<Vec<CaptureRecord>> {
        self.lookup_with(pattern, &LookupOptions::default()).await
    }

    #[tracing::instrument(skip(self))]
    #[autometrics]
    pub async fn lookup_with(
        &self,
        pattern: &str,
        options: &LookupOptions,
    ) -> Result<Vec<CaptureRecord>> {
        let endpoint = self.search_endpoint();
        let body = self.query_index(&endpoint, pattern, options, "json").await?;
        parse_json_lines(&body, &endpoint)
    }

    /// Like [Self::lookup_with], but against one collection's CDX endpoint from [Self::list_indexes].
    #[tracing::instrument(skip(self, index), fields(index = %index.id))]
    #[autometrics]
    pub async fn lookup_in_index(
        &self,
        index: &CrawlIndex,
        pattern: &str,
        options: &LookupOptions,
    ) -> Result<Vec<CaptureRecord>> {
        let body = self
            .query_index(&index.cdx_api, pattern, options, "json")
            .await?;
        parse_json_lines(&body, &index.cdx_api)
    }

    /// Crawl collections offered by the index server, most recent first.
    #[tracing::instrument(skip(self))]
    #[autometrics]
    pub async fn list_indexes(&self) -> Result<Vec<CrawlIndex>> {
        let url = format!(
            "{}/collinfo.json",
            self.config.index_server.trim_end_matches('/')
        );
        let body = self.get_text(&url).await?;
        let indexes: Vec<CrawlIndex> =
            serde_json::from_str(&body).map_err(|source| CrawlError::Json {
                url: url.clone(),
                line: source.line(),
                source,
            })?;
        tracing::info!("Index server lists {} collections", indexes.len());
        Ok(indexes)
    }

    /// The first `recent_indexes` collections from [Self::list_indexes], or all of them when it is 0.
    pub async fn recent_indexes(&self) -> Result<Vec<CrawlIndex>> {
        let mut indexes = self.list_indexes().await?;
        if self.config.recent_indexes > 0 {
            indexes.truncate(self.config.recent_indexes);
        }
        Ok(indexes)
    }

    /// The most relevant capture of `url` across the recent collections: closest to now,
    /// never a 404, a 200 when there is one. Collections are searched newest first.
    #[tracing::instrument(skip(self))]
    #[autometrics]
    pub async fn locate(&self, url: &str) -> Result<Option<CaptureRecord>> {
        if url.trim().is_empty() {
            return Err(CrawlError::invalid_input("url pattern is empty"));
        }
        let options = LookupOptions::default()
            .closest(cdx_timestamp(Utc::now()))
            .filter("!status:404");
        let mut records = Vec::new();
        for index in self.recent_indexes().await? {
            records.extend(self.lookup_in_index(&index, url, &options).await?);
        }
        Ok(select_most_relevant(&records).cloned())
    }

    /// Distinct HTML URLs the recent collections know under `domain`, in collection order.
    /// Only the first result page of each collection is read.
    #[tracing::instrument(skip(self))]
    #[autometrics]
    pub async fn domain_urls(&self, domain: &str) -> Result<Vec<String>> {
        if domain.trim().is_empty() {
            return Err(CrawlError::invalid_input("url pattern is empty"));
        }
        let options = LookupOptions::default()
            .match_type(MatchType::Domain)
            .filter("mime:text/html")
            .fields(["urlkey"]);
        let mut body = String::new();
        for index in self.recent_indexes().await? {
            body.push_str(
                &self
                    .query_index(&index.cdx_api, domain, &options, "text")
                    .await?,
            );
            body.push('\n');
        }
        let urls = parse_urlkey_lines(&body);
        tracing::info!("Found {} distinct urls for {}", urls.len(), domain);
        Ok(urls)
    }

    /// Fetches the capture's bytes from the archive and splits them into headers and body.
    #[tracing::instrument(skip(self, record), fields(filename = %record.filename, offset = record.offset, length = record.length))]
    #[autometrics]
    pub async fn load_page_data(&self, record: &CaptureRecord) -> Result<PageData> {
        let (url, range) = self.archive_location(record)?;
        let data = self.download_and_unzip(&url, range).await?;
        let archive = parse_archive_record(&data).map_err(|source| CrawlError::Record {
            url: url.clone(),
            range,
            source,
        })?;
        Ok(PageData::new(record.clone(), archive))
    }

    /// Locates `url` and loads its page data. Returns `Ok(None)` when the url has no captures.
    ///
    /// With `follow_redirect`, a redirect capture is followed for one hop; if the target has no
    /// capture the redirect itself is returned.
    #[tracing::instrument(skip(self))]
    #[autometrics]
    pub async fn load_page(&self, url: &str, follow_redirect: bool) -> Result<Option<PageData>> {
        let Some(record) = self.locate(url).await? else {
            return Ok(None);
        };
        let page = self.load_page_data(&record).await?;
        if !(follow_redirect && record.is_redirect()) {
            return Ok(Some(page));
        }
        let base = record.url.as_deref().unwrap_or(url);
        let Some(target) = page.location().and_then(|l| resolve_location(base, l)) else {
            tracing::warn!("Redirect capture of {} carries no usable Location", url);
            return Ok(Some(page));
        };
        tracing::info!("Following redirect from {} to {}", url, target);
        match self.locate(&target).await? {
            Some(target_record) => Ok(Some(self.load_page_data(&target_record).await?)),
            None => Ok(Some(page)),
        }
    }

    /// Downloads a byte range from `url` and gunzips it.
    pub async fn download_and_unzip(&self, url: &str, range: ByteRange) -> Result<Vec<u8>> {
        let segment = self.download_range(url, range).await?;
        decompress_segment(&segment).map_err(|source| CrawlError::Decompress {
            url: url.to_string(),
            range,
            source,
        })
    }

    /// Issues a ranged GET; anything but `206 Partial Content` is an error.
    pub async fn download_range(&self, url: &str, range: ByteRange) -> Result<Vec<u8>> {
        let res = self
            .http
            .get(url)
            .header(RANGE, range.header_value())
            .send()
            .await
            .map_err(|source| CrawlError::Request {
                url: url.to_string(),
                source,
            })?;
        match res.status() {
            StatusCode::PARTIAL_CONTENT => {
                let body = res.bytes().await.map_err(|source| CrawlError::Request {
                    url: url.to_string(),
                    source,
                })?;
                tracing::info!(
                    "Successfully fetched the URL {} from {} to {}",
                    url,
                    range.offset(),
                    range.end()
                );
                if body.len() as u64 != range.length() {
                    tracing::warn!(
                        "Expected {} bytes from {} but received {}",
                        range.length(),
                        url,
                        body.len()
                    );
                }
                Ok(body.to_vec())
            }
            status => Err(CrawlError::RangeStatus {
                url: url.to_string(),
                range,
                status,
            }),
        }
    }

    /// Runs one index query and returns the raw response body.
    /// A "no captures" 404 is answered with an empty body.
    async fn query_index(
        &self,
        endpoint: &str,
        pattern: &str,
        options: &LookupOptions,
        output: &str,
    ) -> Result<String> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(CrawlError::invalid_input("url pattern is empty"));
        }
        let url = Url::parse_with_params(endpoint, options.query_pairs(pattern, output)).map_err(
            |source| CrawlError::InvalidBaseUrl {
                url: endpoint.to_string(),
                source,
            },
        )?;
        let res = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| CrawlError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = res.status();
        let body = res.text().await.map_err(|source| CrawlError::Request {
            url: url.to_string(),
            source,
        })?;
        if status == StatusCode::NOT_FOUND && body.contains(NO_CAPTURES) {
            tracing::debug!("No captures for {} at {}", pattern, endpoint);
            return Ok(String::new());
        }
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(body)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| CrawlError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = res.status();
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status,
            });
        }
        res.text().await.map_err(|source| CrawlError::Request {
            url: url.to_string(),
            source,
        })
    }
}

/// Resolves a `Location` value against the URL of the capture that sent it.
/// Capture URLs without a scheme are treated as `http://`.
pub fn resolve_location(base: &str, location: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(location) {
        return Some(absolute.to_string());
    }
    let base = Url::parse(base)
        .or_else(|_| Url::parse(&format!("http://{base}")))
        .ok()?;
    base.join(location).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(filename: &str, offset: u64, length: u64) -> CaptureRecord {
        CaptureRecord {
            urlkey: None,
            timestamp: "20240722120756".to_string(),
            url: Some("https://example.com/".to_string()),
            mime: None,
            status: Some(200),
            digest: None,
            length,
            offset,
            filename: filename.to_string(),
            languages: None,
            index: String::new(),
        }
    }

    #[test]
    fn archive_url_uses_data_server() {
        let client = CommonCrawlClient::new(
            ClientConfig::default()
                .with_index_server("http://localhost:8080")
                .with_data_server("https://data.commoncrawl.org/"),
        )
        .unwrap();
        assert_eq!(
            client.archive_url("/crawl-data/a.warc.gz"),
            "https://data.commoncrawl.org/crawl-data/a.warc.gz"
        );
        assert_eq!(client.search_endpoint(), "http://localhost:8080/search");
    }

    #[test]
    fn archive_location_validates_record() {
        let client = CommonCrawlClient::public().unwrap();
        let (url, range) = client
            .archive_location(&record("crawl-data/a.warc.gz", 1000, 500))
            .unwrap();
        assert_eq!(url, "https://data.commoncrawl.org/crawl-data/a.warc.gz");
        assert_eq!(range.header_value(), "bytes=1000-1499");

        assert!(client
            .archive_location(&record("  ", 0, 10))
            .unwrap_err()
            .is_invalid_input());
        assert!(client
            .archive_location(&record("a.warc.gz", 10, 0))
            .unwrap_err()
            .is_invalid_input());
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = CommonCrawlClient::new(ClientConfig::default().with_index_server("not a url"))
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn resolves_relative_and_absolute_locations() {
        assert_eq!(
            resolve_location("https://example.com/a/b", "/c").as_deref(),
            Some("https://example.com/c")
        );
        assert_eq!(
            resolve_location("example.com/a", "https://other.org/x").as_deref(),
            Some("https://other.org/x")
        );
        assert_eq!(
            resolve_location("example.com/a/b", "c").as_deref(),
            Some("http://example.com/a/c")
        );
    }
}
