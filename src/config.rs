use std::time::Duration;

use crate::error::{CrawlError, Result};

/// Public Common Crawl index server.
pub const DEFAULT_INDEX_SERVER: &str = "https://index.commoncrawl.org";
/// Public Common Crawl storage. Archive files are always served from here, whichever index was queried.
pub const DEFAULT_DATA_SERVER: &str = "https://data.commoncrawl.org";

pub const INDEX_SERVER_ENV: &str = "COMMONCRAWL_INDEX_SERVER";
pub const DATA_SERVER_ENV: &str = "COMMONCRAWL_DATA_SERVER";
pub const TIMEOUT_SECS_ENV: &str = "COMMONCRAWL_TIMEOUT_SECS";
pub const RECENT_INDEXES_ENV: &str = "COMMONCRAWL_RECENT_INDEXES";

/// Collections searched by `locate` and `domain_urls` unless configured otherwise.
pub const DEFAULT_RECENT_INDEXES: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub index_server: String,
    pub data_server: String,
    /// Applied to every request. `None` waits as long as the transport does.
    pub timeout: Option<Duration>,
    pub user_agent: String,
    /// How many of the most recent collections to search when locating a URL or listing a
    /// domain. `0` searches every collection the index server lists.
    pub recent_indexes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            index_server: DEFAULT_INDEX_SERVER.to_string(),
            data_server: DEFAULT_DATA_SERVER.to_string(),
            timeout: None,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            recent_indexes: DEFAULT_RECENT_INDEXES,
        }
    }
}

impl ClientConfig {
    /// Reads `COMMONCRAWL_INDEX_SERVER`, `COMMONCRAWL_DATA_SERVER`, `COMMONCRAWL_TIMEOUT_SECS`
    /// and `COMMONCRAWL_RECENT_INDEXES`.
    /// Unset or empty variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = ClientConfig::default();
        if let Some(index_server) = get(INDEX_SERVER_ENV) {
            config.index_server = index_server;
        }
        if let Some(data_server) = get(DATA_SERVER_ENV) {
            config.data_server = data_server;
        }
        if let Some(timeout) = get(TIMEOUT_SECS_ENV) {
            let secs = timeout.trim().parse::<u64>().map_err(|e| {
                CrawlError::invalid_input(format!("{TIMEOUT_SECS_ENV}={timeout:?}: {e}"))
            })?;
            config.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(recent) = get(RECENT_INDEXES_ENV) {
            config.recent_indexes = recent.trim().parse::<usize>().map_err(|e| {
                CrawlError::invalid_input(format!("{RECENT_INDEXES_ENV}={recent:?}: {e}"))
            })?;
        }
        tracing::debug!(?config, "Loaded client configuration");
        Ok(config)
    }

    pub fn with_index_server(mut self, index_server: impl Into<String>) -> Self {
        self.index_server = index_server.into();
        self
    }

    pub fn with_data_server(mut self, data_server: impl Into<String>) -> Self {
        self.data_server = data_server.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_recent_indexes(mut self, recent_indexes: usize) -> Self {
        self.recent_indexes = recent_indexes;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
