#![allow(dead_code)]

use std::io::Write;

use commoncrawl::{ClientConfig, CommonCrawlClient};
use flate2::{write::GzEncoder, Compression};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const FILENAME: &str = "crawl-data/CC-MAIN-2024-30/segments/1720763518115.82/warc/CC-MAIN-20240723194208-20240723224208-00279.warc.gz";
pub const LATEST: &str = "CC-MAIN-2024-30";
pub const PREVIOUS: &str = "CC-MAIN-2024-26";
pub const HTML: &str = "<!doctype html>\n<html><head><title>Example</title></head>\r\n\r\n<body>Hello</body></html>";

/// A client that sends both index queries and archive fetches to `server`.
pub fn client_for(server: &MockServer) -> CommonCrawlClient {
    CommonCrawlClient::new(
        ClientConfig::default()
            .with_index_server(server.uri())
            .with_data_server(server.uri()),
    )
    .unwrap()
}

pub fn cdx_line(url: &str, status: u16, filename: &str, offset: u64, length: u64) -> String {
    json!({
        "urlkey": "com,example)/",
        "timestamp": "20240723213521",
        "url": url,
        "mime": "text/html",
        "status": status.to_string(),
        "digest": "5JOQMMSNM6N7UCLGGYXDSPSB3FYAQS2C",
        "length": length.to_string(),
        "offset": offset.to_string(),
        "filename": filename,
    })
    .to_string()
}

pub fn response_record(http_head: &str, body: &str) -> String {
    let payload = format!("{http_head}\r\n\r\n{body}");
    format!(
        "WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: https://example.com/\r\nWARC-Date: 2024-07-23T21:35:21Z\r\nContent-Type: application/http; msgtype=response\r\nContent-Length: {}\r\n\r\n{payload}\r\n\r\n",
        payload.len()
    )
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn cdx_api_path(id: &str) -> String {
    format!("/{id}-index")
}

/// Serves `collinfo.json` listing `ids` newest first, each with its CDX endpoint on `server`.
pub async fn mount_collinfo(server: &MockServer, ids: &[&str]) {
    let collections: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "name": format!("{id} Index"),
                "timegate": format!("{}/{id}/", server.uri()),
                "cdx-api": format!("{}{}", server.uri(), cdx_api_path(id)),
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/collinfo.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collections))
        .mount(server)
        .await;
}

/// Like [client_for], but searching the `recent` newest collections.
pub fn client_searching(server: &MockServer, recent: usize) -> CommonCrawlClient {
    CommonCrawlClient::new(
        ClientConfig::default()
            .with_index_server(server.uri())
            .with_data_server(server.uri())
            .with_recent_indexes(recent),
    )
    .unwrap()
}
