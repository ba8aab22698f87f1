//! HTTP transport for the walrus store
//!
//! Walrus exposes two endpoint tiers: aggregators serve reads, publishers
//! accept writes. Objects live either in the bucketed namespace
//! (`/v1/store/{bucket}/{key}`, used by the mirror client) or in the flat
//! blob namespace (`/v1/blobs/{key}`, used by volume tiering). User
//! metadata travels as `x-walrus-meta-*` headers; writes carry an `epochs`
//! query parameter naming the durability horizon.
//!
//! Requests go to the first configured endpoint of each tier. The full
//! lists are kept so operators can rotate endpoints without a config-format
//! change.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use jiff::Timestamp;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use url::Url;

use coldtier_core::{Error, Result};

pub(crate) const META_HEADER_PREFIX: &str = "x-walrus-meta-";

/// Remote object attributes reported by a head call.
#[derive(Debug, Clone)]
pub(crate) struct ObjectAttrs {
    pub size: u64,
    pub etag: String,
    pub updated: Timestamp,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListedObject {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub etag: String,
    /// Epoch seconds of the last modification.
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub is_directory: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListPage {
    #[serde(default)]
    pub objects: Vec<ListedObject>,
    /// Token for the next page; absent or empty on the last page.
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListedBucket {
    pub name: String,
    /// Epoch seconds.
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug)]
pub(crate) struct WalrusApi {
    http: reqwest::Client,
    aggregators: Vec<Url>,
    publishers: Vec<Url>,
    epochs: u32,
}

impl WalrusApi {
    pub fn new(aggregator_urls: &[String], publisher_urls: &[String], epochs: u32) -> Result<Self> {
        let aggregators = parse_endpoints(aggregator_urls, "aggregator_urls")?;
        let publishers = parse_endpoints(publisher_urls, "publisher_urls")?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("walrus http client: {e}")))?;

        Ok(Self {
            http,
            aggregators,
            publishers,
            epochs,
        })
    }

    fn aggregator(&self) -> &Url {
        &self.aggregators[0]
    }

    fn publisher(&self) -> &Url {
        &self.publishers[0]
    }

    fn store_url(&self, write: bool, bucket: &str, key: &str) -> Result<Url> {
        let base = if write { self.publisher() } else { self.aggregator() };
        let head = ["v1", "store", bucket];
        let segments = head
            .into_iter()
            .chain(key.split('/').filter(|s| !s.is_empty()));
        url_with_segments(base, segments)
    }

    fn blob_url(&self, write: bool, key: &str) -> Result<Url> {
        let base = if write { self.publisher() } else { self.aggregator() };
        let head = ["v1", "blobs"];
        let segments = head
            .into_iter()
            .chain(key.split('/').filter(|s| !s.is_empty()));
        url_with_segments(base, segments)
    }

    fn bucket_url(&self, name: Option<&str>) -> Result<Url> {
        let segments = ["v1", "buckets"].into_iter().chain(name);
        url_with_segments(self.publisher(), segments)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        target: &str,
    ) -> Result<reqwest::Response> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Network(format!("{target}: request timeout: {e}"))
            } else if e.is_connect() {
                Error::Network(format!("{target}: connect error: {e}"))
            } else {
                Error::Network(format!("{target}: request error: {e}"))
            }
        })
    }

    async fn head(&self, url: Url, target: &str) -> Result<ObjectAttrs> {
        let response = self.send(self.http.head(url), target).await?;
        if let Some(err) = map_status(response.status(), "head", target) {
            return Err(err);
        }

        let headers = response.headers();
        let size = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let etag = headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .unwrap_or_default();
        let updated = headers
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(parse_http_date)
            .transpose()?
            .unwrap_or(Timestamp::UNIX_EPOCH);

        Ok(ObjectAttrs {
            size,
            etag,
            updated,
        })
    }

    async fn get_range(&self, url: Url, offset: u64, size: u64, target: &str) -> Result<Bytes> {
        let range = format!("bytes={}-{}", offset, offset + size - 1);
        let response = self
            .send(self.http.get(url).header(header::RANGE, range), target)
            .await?;
        if let Some(err) = map_status(response.status(), "get", target) {
            return Err(err);
        }
        response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("{target}: read body: {e}")))
    }

    async fn delete(&self, url: Url, target: &str) -> Result<()> {
        let response = self.send(self.http.delete(url), target).await?;
        match map_status(response.status(), "delete", target) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn put_store_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let target = format!("{bucket}/{key}");
        let mut url = self.store_url(true, bucket, key)?;
        url.query_pairs_mut()
            .append_pair("epochs", &self.epochs.to_string());

        let mut request = self.http.put(url).body(data);
        if let Some(ct) = content_type {
            request = request.header(header::CONTENT_TYPE, ct);
        }
        for (k, v) in metadata {
            request = request.header(
                format!("{META_HEADER_PREFIX}{}", k.to_ascii_lowercase()),
                v.as_str(),
            );
        }

        let response = self.send(request, &target).await?;
        match map_status(response.status(), "put", &target) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn get_store_range(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        size: u64,
    ) -> Result<Bytes> {
        let target = format!("{bucket}/{key}");
        let url = self.store_url(false, bucket, key)?;
        self.get_range(url, offset, size, &target).await
    }

    pub async fn head_store_object(&self, bucket: &str, key: &str) -> Result<ObjectAttrs> {
        let target = format!("{bucket}/{key}");
        let url = self.store_url(false, bucket, key)?;
        self.head(url, &target).await
    }

    pub async fn update_store_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let target = format!("{bucket}/{key}");
        let base = self.store_url(true, bucket, key)?;
        let url = url_with_segments(&base, ["metadata"])?;

        let response = self.send(self.http.put(url).json(metadata), &target).await?;
        match map_status(response.status(), "update metadata of", &target) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn delete_store_object(&self, bucket: &str, key: &str) -> Result<()> {
        let target = format!("{bucket}/{key}");
        let url = self.store_url(true, bucket, key)?;
        self.delete(url, &target).await
    }

    pub async fn list_store_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page: Option<&str>,
    ) -> Result<ListPage> {
        let mut url = url_with_segments(self.aggregator(), ["v1", "store", bucket])?;
        {
            let mut pairs = url.query_pairs_mut();
            if !prefix.is_empty() {
                pairs.append_pair("prefix", prefix);
            }
            if let Some(token) = page {
                pairs.append_pair("page", token);
            }
        }

        let response = self.send(self.http.get(url), bucket).await?;
        if let Some(err) = map_status(response.status(), "list", bucket) {
            return Err(err);
        }
        response
            .json::<ListPage>()
            .await
            .map_err(|e| Error::General(format!("list {bucket}: decode listing: {e}")))
    }

    pub async fn list_buckets(&self, project_id: &str) -> Result<Vec<ListedBucket>> {
        let mut url = self.bucket_url(None)?;
        url.query_pairs_mut().append_pair("project", project_id);

        let response = self.send(self.http.get(url), "buckets").await?;
        if let Some(err) = map_status(response.status(), "list", "buckets") {
            return Err(err);
        }
        response
            .json::<Vec<ListedBucket>>()
            .await
            .map_err(|e| Error::General(format!("list buckets: decode listing: {e}")))
    }

    pub async fn create_bucket(&self, name: &str, project_id: &str) -> Result<()> {
        let mut url = self.bucket_url(Some(name))?;
        url.query_pairs_mut().append_pair("project", project_id);

        let response = self.send(self.http.put(url), name).await?;
        match map_status(response.status(), "create bucket", name) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn delete_bucket(&self, name: &str, project_id: &str) -> Result<()> {
        let mut url = self.bucket_url(Some(name))?;
        url.query_pairs_mut().append_pair("project", project_id);
        self.delete(url, name).await
    }

    pub async fn put_blob_from_path(&self, key: &str, path: &Path) -> Result<()> {
        let mut url = self.blob_url(true, key)?;
        url.query_pairs_mut()
            .append_pair("epochs", &self.epochs.to_string());

        let file = tokio::fs::File::open(path).await?;
        let response = self.send(self.http.put(url).body(file), key).await?;
        match map_status(response.status(), "store blob", key) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn get_blob_range(&self, key: &str, offset: u64, size: u64) -> Result<Bytes> {
        let url = self.blob_url(false, key)?;
        self.get_range(url, offset, size, key).await
    }

    pub async fn head_blob(&self, key: &str) -> Result<ObjectAttrs> {
        let url = self.blob_url(false, key)?;
        self.head(url, key).await
    }

    pub async fn delete_blob(&self, key: &str) -> Result<()> {
        let url = self.blob_url(true, key)?;
        self.delete(url, key).await
    }

    pub async fn download_blob(&self, key: &str, dest: &Path) -> Result<u64> {
        let url = self.blob_url(false, key)?;
        let mut response = self.send(self.http.get(url), key).await?;
        if let Some(err) = map_status(response.status(), "read blob", key) {
            return Err(err);
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Network(format!("{key}: read body: {e}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

fn parse_endpoints(urls: &[String], what: &str) -> Result<Vec<Url>> {
    if urls.is_empty() {
        return Err(Error::Config(format!("walrus {what} is not set")));
    }
    urls.iter()
        .map(|u| {
            let parsed = Url::parse(u)
                .map_err(|e| Error::Config(format!("walrus {what} entry {u:?}: {e}")))?;
            if parsed.cannot_be_a_base() {
                return Err(Error::Config(format!(
                    "walrus {what} entry {u:?} is not a base URL"
                )));
            }
            Ok(parsed)
        })
        .collect()
}

fn url_with_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Config(format!("walrus endpoint {base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn map_status(status: StatusCode, what: &str, target: &str) -> Option<Error> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("{what} {target}")),
        StatusCode::RANGE_NOT_SATISFIABLE => Error::Range(format!(
            "{what} {target}: requested range not satisfiable"
        )),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Auth(format!("{what} {target}: {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => Error::Network(format!("{what} {target}: {status}")),
        s if s.is_server_error() => Error::Network(format!("{what} {target}: {status}")),
        s => Error::General(format!("{what} {target}: unexpected status {s}")),
    })
}

/// Parse the store's native `Last-Modified` format (RFC 2822).
pub(crate) fn parse_http_date(value: &str) -> Result<Timestamp> {
    jiff::fmt::rfc2822::DateTimeParser::new()
        .parse_timestamp(value)
        .map_err(|e| Error::General(format!("parse Last-Modified {value:?}: {e}")))
}
