//! Azure Blob Storage over its REST API
//!
//! Requests are authorized with a container SAS token appended to every URL,
//! so no request signing is needed. Only block blobs are used.

use crate::error::handlers::{NetworkErrorHandler, StorageErrorHandler};
use crate::error::{Result, SyncError};
use crate::remote::{BlobEntry, ObjectStream, RemoteStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const API_VERSION: &str = "2020-10-02";

pub struct AzureBlobStore {
    client: Client,
    container_url: Url,
    sas_token: String,
}

impl AzureBlobStore {
    /// `endpoint` defaults to `https://{account}.blob.core.windows.net`.
    pub fn new(account: &str, container: &str, sas_token: &str, endpoint: Option<&str>) -> Result<Self> {
        let endpoint = match endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => format!("https://{account}.blob.core.windows.net"),
        };
        let mut container_url = Url::parse(&endpoint)
            .map_err(|e| SyncError::Config(format!("invalid storage endpoint '{endpoint}': {e}")))?;
        container_url
            .path_segments_mut()
            .map_err(|_| SyncError::Config(format!("storage endpoint '{endpoint}' cannot hold a path")))?
            .pop_if_empty()
            .push(container);

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .read_timeout(Duration::from_secs(300))
            .pool_idle_timeout(Duration::from_secs(300))
            .user_agent(concat!("docker-blob-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            container_url,
            sas_token: sas_token.trim_start_matches('?').to_string(),
        })
    }

    fn url(&self, key: Option<&str>, params: &[(&str, &str)]) -> Url {
        let mut url = self.container_url.clone();
        if let Some(key) = key {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.extend(key.split('/'));
            }
        }
        url.set_query((!self.sas_token.is_empty()).then_some(self.sas_token.as_str()));
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        url
    }

    async fn send(&self, request: reqwest::RequestBuilder, context: &str) -> Result<Response> {
        let response = request
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, context))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(StorageErrorHandler::handle_status(status, &body, context))
    }
}

#[async_trait]
impl RemoteStore for AzureBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut params = vec![("restype", "container"), ("comp", "list"), ("prefix", prefix)];
            if let Some(m) = marker.as_deref() {
                params.push(("marker", m));
            }
            let url = self.url(None, &params);
            let response = self
                .send(self.client.get(url), &format!("list {prefix}"))
                .await?;
            let body = response
                .text()
                .await
                .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "reading blob listing"))?;
            let page = parse_list_page(&body)?;
            debug!(prefix, blobs = page.entries.len(), "listed page");
            entries.extend(page.entries);

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(entries)
    }

    async fn get_object(&self, key: &str) -> Result<ObjectStream> {
        let url = self.url(Some(key), &[]);
        let response = self.send(self.client.get(url), key).await?;
        let context = key.to_string();
        Ok(Box::pin(response.bytes_stream().map_err(move |e| {
            NetworkErrorHandler::handle_network_error(&e, &format!("download {context}"))
        })))
    }

    async fn put_block(&self, key: &str, block_id: &str, data: Bytes) -> Result<()> {
        let url = self.url(Some(key), &[("comp", "block"), ("blockid", block_id)]);
        self.send(self.client.put(url).body(data), &format!("put block {block_id} of {key}"))
            .await?;
        Ok(())
    }

    async fn commit_block_list(&self, key: &str, block_ids: &[String]) -> Result<()> {
        let url = self.url(Some(key), &[("comp", "blocklist")]);
        let body = block_list_xml(block_ids);
        self.send(
            self.client
                .put(url)
                .header(reqwest::header::CONTENT_TYPE, "application/xml")
                .body(body),
            &format!("commit {key}"),
        )
        .await?;
        Ok(())
    }

    async fn put_single_object(&self, key: &str, data: Bytes) -> Result<()> {
        let url = self.url(Some(key), &[]);
        self.send(
            self.client
                .put(url)
                .header("x-ms-blob-type", "BlockBlob")
                .body(data),
            &format!("put {key}"),
        )
        .await?;
        Ok(())
    }
}

fn block_list_xml(block_ids: &[String]) -> String {
    let mut body = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in block_ids {
        body.push_str("<Latest>");
        body.push_str(id);
        body.push_str("</Latest>");
    }
    body.push_str("</BlockList>");
    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobList,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobItem {
    name: String,
    #[serde(default)]
    properties: Option<BlobProperties>,
}

#[derive(Debug, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
    #[serde(rename = "Content-Length", default)]
    content_length: Option<u64>,
}

struct ListPage {
    entries: Vec<BlobEntry>,
    next_marker: Option<String>,
}

fn parse_list_page(xml: &str) -> Result<ListPage> {
    let results: EnumerationResults = quick_xml::de::from_str(xml)
        .map_err(|e| SyncError::RemoteUnavailable(format!("unreadable blob listing: {e}")))?;

    let entries = results
        .blobs
        .items
        .into_iter()
        .map(|item| {
            let props = item.properties;
            BlobEntry {
                name: item.name,
                last_modified: props
                    .as_ref()
                    .and_then(|p| p.last_modified.as_deref())
                    .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
                size: props.and_then(|p| p.content_length).unwrap_or(0),
            }
        })
        .collect();

    Ok(ListPage {
        entries,
        next_marker: results.next_marker.filter(|m| !m.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_urls_with_sas_and_escaped_key() {
        let store = AzureBlobStore::new("acct", "images", "?sv=2020&sig=abc%3D", None).unwrap();
        let url = store.url(Some("refs/my repo/1.0"), &[("comp", "block"), ("blockid", "MTA=")]);
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/images/refs/my%20repo/1.0?sv=2020&sig=abc%3D&comp=block&blockid=MTA%3D"
        );
    }

    #[test]
    fn custom_endpoint_keeps_its_path() {
        let store = AzureBlobStore::new(
            "devstoreaccount1",
            "c",
            "",
            Some("http://127.0.0.1:10000/devstoreaccount1/"),
        )
        .unwrap();
        assert_eq!(
            store.url(Some("layers/a/json"), &[]).as_str(),
            "http://127.0.0.1:10000/devstoreaccount1/c/layers/a/json"
        );
    }

    #[test]
    fn parses_listing_with_marker() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="images">
  <Prefix>refs/</Prefix>
  <Blobs>
    <Blob>
      <Name>refs/app/1.0</Name>
      <Properties>
        <Last-Modified>Tue, 04 Jun 2019 10:00:00 GMT</Last-Modified>
        <Content-Length>64</Content-Length>
        <BlobType>BlockBlob</BlobType>
      </Properties>
    </Blob>
    <Blob>
      <Name>refs/app/latest</Name>
      <Properties>
        <Content-Length>64</Content-Length>
      </Properties>
    </Blob>
  </Blobs>
  <NextMarker>page2</NextMarker>
</EnumerationResults>"#;
        let page = parse_list_page(xml).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].name, "refs/app/1.0");
        assert_eq!(page.entries[0].size, 64);
        assert!(page.entries[0].last_modified.is_some());
        assert!(page.entries[1].last_modified.is_none());
        assert_eq!(page.next_marker.as_deref(), Some("page2"));
    }

    #[test]
    fn empty_listing_has_no_marker() {
        let xml = r#"<EnumerationResults><Blobs /><NextMarker /></EnumerationResults>"#;
        let page = parse_list_page(xml).unwrap();
        assert!(page.entries.is_empty());
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn block_list_body_keeps_order() {
        let xml = block_list_xml(&["MTA=".to_string(), "MTE=".to_string()]);
        assert!(xml.ends_with("<BlockList><Latest>MTA=</Latest><Latest>MTE=</Latest></BlockList>"));
    }
}
