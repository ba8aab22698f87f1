//! S3 remote storage client
//!
//! Wraps aws-sdk-s3 and implements the mirror contract from coldtier-core.
//! Works against any S3-compatible store.
//!
//! Delete policy: DeleteObject on S3 is idempotent, the service reports
//! success for a missing key, so deleting an absent object succeeds here
//! too.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use coldtier_core::{
    Bucket, Entry, Error, RemoteConf, RemoteEntry, RemoteStorageClient, RemoteStorageLocation,
    RemoteStorageMaker, Result, RetryConfig, S3RemoteConf, VisitFn, retry_with_backoff,
    to_remote_metadata,
};

/// Maker registered under the `s3` storage type.
#[derive(Debug)]
pub struct S3RemoteStorageMaker;

#[async_trait]
impl RemoteStorageMaker for S3RemoteStorageMaker {
    fn storage_type(&self) -> &'static str {
        "s3"
    }

    fn has_bucket(&self) -> bool {
        true
    }

    async fn make(&self, conf: &RemoteConf) -> Result<Arc<dyn RemoteStorageClient>> {
        let s3 = conf.s3.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "remote storage {} has no s3 configuration",
                conf.name
            ))
        })?;
        Ok(Arc::new(S3RemoteStorageClient::new(&conf.name, s3).await?))
    }
}

/// S3 client implementing the mirror contract.
#[derive(Debug)]
pub struct S3RemoteStorageClient {
    storage_name: String,
    inner: aws_sdk_s3::Client,
    retry: RetryConfig,
}

impl S3RemoteStorageClient {
    /// Create a new client from connection settings. Missing credentials
    /// fail construction with a configuration error.
    pub async fn new(storage_name: &str, conf: &S3RemoteConf) -> Result<Self> {
        let inner = build_sdk_client(conf).await?;
        Ok(Self {
            storage_name: storage_name.to_string(),
            inner,
            retry: RetryConfig::default(),
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    /// Read back the remote attributes after a write.
    async fn read_file_remote_entry(&self, loc: &RemoteStorageLocation) -> Result<RemoteEntry> {
        let key = loc.key();
        let response = retry_with_backoff(&self.retry, "s3 head_object", || async move {
            self.inner
                .head_object()
                .bucket(&loc.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("head {loc}")))
        })
        .await?;

        Ok(RemoteEntry {
            remote_mtime: response.last_modified().map(|t| t.secs()).unwrap_or_default(),
            remote_size: response.content_length().unwrap_or(0).max(0) as u64,
            remote_etag: response
                .e_tag()
                .map(|t| t.trim_matches('"').to_string())
                .unwrap_or_default(),
            storage_name: self.storage_name.clone(),
        })
    }
}

#[async_trait]
impl RemoteStorageClient for S3RemoteStorageClient {
    async fn traverse(&self, loc: &RemoteStorageLocation, visit: VisitFn<'_>) -> Result<()> {
        let prefix = loc.key();
        let mut continuation_token: Option<String> = None;

        loop {
            let token = continuation_token.clone();
            let response = retry_with_backoff(&self.retry, "s3 list_objects", || {
                let token = token.clone();
                async move {
                    let mut request = self
                        .inner
                        .list_objects_v2()
                        .bucket(&loc.bucket)
                        .max_keys(1000);
                    if !prefix.is_empty() {
                        request = request.prefix(prefix);
                    }
                    if let Some(t) = token {
                        request = request.continuation_token(t);
                    }
                    request
                        .send()
                        .await
                        .map_err(|e| map_sdk_error(e, &format!("list {loc}")))
                }
            })
            .await?;

            for object in response.contents() {
                let key = object.key().unwrap_or_default();
                let remote_entry = RemoteEntry {
                    remote_mtime: object.last_modified().map(|t| t.secs()).unwrap_or_default(),
                    remote_size: object.size().unwrap_or(0).max(0) as u64,
                    remote_etag: object
                        .e_tag()
                        .map(|t| t.trim_matches('"').to_string())
                        .unwrap_or_default(),
                    storage_name: self.storage_name.clone(),
                };
                let (dir, name, is_directory) = split_object_key(key);
                visit(&dir, name, is_directory, &remote_entry)?;
            }

            if response.is_truncated().unwrap_or(false) {
                continuation_token = response.next_continuation_token().map(|s| s.to_string());
            } else {
                return Ok(());
            }
        }
    }

    async fn read_file(
        &self,
        loc: &RemoteStorageLocation,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }

        let key = loc.key();
        let range = format!("bytes={}-{}", offset, offset + size - 1);
        let range = range.as_str();

        let data = retry_with_backoff(&self.retry, "s3 get_object", || async move {
            let response = self
                .inner
                .get_object()
                .bucket(&loc.bucket)
                .key(key)
                .range(range)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("get {loc}")))?;
            response
                .body
                .collect()
                .await
                .map_err(|e| Error::Network(format!("read body of {loc}: {e}")))
        })
        .await?;

        let mut data = data.into_bytes().to_vec();
        if (data.len() as u64) < size {
            return Err(Error::Range(format!(
                "read {offset}..{} of {loc}: object is shorter than requested",
                offset + size
            )));
        }
        data.truncate(size as usize);
        Ok(data)
    }

    async fn write_file(
        &self,
        loc: &RemoteStorageLocation,
        entry: &Entry,
        data: Bytes,
    ) -> Result<RemoteEntry> {
        let key = loc.key();
        let metadata = to_remote_metadata(&entry.extended);
        let content_type = entry.content_type.clone();

        retry_with_backoff(&self.retry, "s3 put_object", || {
            let body = aws_sdk_s3::primitives::ByteStream::from(data.clone());
            let metadata = metadata.clone();
            let content_type = content_type.clone();
            async move {
                let mut request = self
                    .inner
                    .put_object()
                    .bucket(&loc.bucket)
                    .key(key)
                    .body(body);
                if let Some(ct) = content_type {
                    request = request.content_type(ct);
                }
                if !metadata.is_empty() {
                    request = request.set_metadata(Some(metadata));
                }
                request
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, &format!("upload to s3 {loc}")))?;
                Ok(())
            }
        })
        .await?;

        // Read back the remote entry so the caller persists authoritative
        // remote-side metadata.
        self.read_file_remote_entry(loc).await
    }

    async fn update_file_metadata(
        &self,
        loc: &RemoteStorageLocation,
        old_entry: &Entry,
        new_entry: &Entry,
    ) -> Result<()> {
        if old_entry.extended == new_entry.extended {
            return Ok(());
        }
        let metadata = to_remote_metadata(&new_entry.extended);
        if metadata.is_empty() {
            // no way to delete remote metadata yet
            return Ok(());
        }

        let key = loc.key();
        let copy_source = format!("{}/{}", loc.bucket, key);
        let copy_source = copy_source.as_str();

        retry_with_backoff(&self.retry, "s3 update_metadata", || {
            let metadata = metadata.clone();
            async move {
                self.inner
                    .copy_object()
                    .copy_source(copy_source)
                    .bucket(&loc.bucket)
                    .key(key)
                    .metadata_directive(aws_sdk_s3::types::MetadataDirective::Replace)
                    .set_metadata(Some(metadata))
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, &format!("update metadata of {loc}")))?;
                Ok(())
            }
        })
        .await
    }

    async fn delete_file(&self, loc: &RemoteStorageLocation) -> Result<()> {
        let key = loc.key();
        retry_with_backoff(&self.retry, "s3 delete_object", || async move {
            self.inner
                .delete_object()
                .bucket(&loc.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("delete {loc}")))?;
            Ok(())
        })
        .await
    }

    async fn write_directory(&self, _loc: &RemoteStorageLocation, _entry: &Entry) -> Result<()> {
        // S3 has no native directory objects.
        Ok(())
    }

    async fn remove_directory(&self, _loc: &RemoteStorageLocation) -> Result<()> {
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let response = retry_with_backoff(&self.retry, "s3 list_buckets", || async move {
            self.inner
                .list_buckets()
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "list buckets"))
        })
        .await?;

        let buckets = response
            .buckets()
            .iter()
            .map(|b| Bucket {
                name: b.name().unwrap_or_default().to_string(),
                created_at: b
                    .creation_date()
                    .and_then(|t| jiff::Timestamp::from_second(t.secs()).ok()),
            })
            .collect();

        Ok(buckets)
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        retry_with_backoff(&self.retry, "s3 create_bucket", || async move {
            self.inner
                .create_bucket()
                .bucket(name)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("create bucket {name}")))?;
            Ok(())
        })
        .await
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        retry_with_backoff(&self.retry, "s3 delete_bucket", || async move {
            self.inner
                .delete_bucket()
                .bucket(name)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("delete bucket {name}")))?;
            Ok(())
        })
        .await
    }
}

/// Build the SDK client from connection settings. Missing credentials are a
/// configuration error so a half-configured client is never handed out.
pub(crate) async fn build_sdk_client(conf: &S3RemoteConf) -> Result<aws_sdk_s3::Client> {
    if conf.access_key.is_empty() {
        return Err(Error::Config("s3 access_key is not set".to_string()));
    }
    if conf.secret_key.is_empty() {
        return Err(Error::Config("s3 secret_key is not set".to_string()));
    }
    if conf.region.is_empty() {
        return Err(Error::Config("s3 region is not set".to_string()));
    }

    let credentials = aws_credential_types::Credentials::new(
        conf.access_key.clone(),
        conf.secret_key.clone(),
        None, // session token
        None, // expiry
        "coldtier-static-credentials",
    );

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .credentials_provider(credentials)
        .region(aws_config::Region::new(conf.region.clone()));
    if !conf.endpoint.is_empty() {
        loader = loader.endpoint_url(&conf.endpoint);
    }
    let config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .force_path_style(conf.force_path_style)
        .build();

    Ok(aws_sdk_s3::Client::from_conf(s3_config))
}

/// Map an AWS SDK error into the coldtier taxonomy.
pub(crate) fn map_sdk_error<E>(error: aws_sdk_s3::error::SdkError<E>, what: &str) -> Error
where
    E: std::fmt::Display,
{
    use aws_sdk_s3::error::SdkError;

    match &error {
        SdkError::TimeoutError(_) => Error::Network(format!("{what}: request timeout")),
        SdkError::DispatchFailure(err) => {
            Error::Network(format!("{what}: network dispatch error: {err:?}"))
        }
        SdkError::ResponseError(err) => Error::Network(format!("{what}: response error: {err:?}")),
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            let msg = format!("{what}: service error: {}", service_err.err());
            match status {
                404 => Error::NotFound(msg),
                401 | 403 => Error::Auth(msg),
                416 => Error::Range(msg),
                429 => Error::Network(msg),
                s if s >= 500 => Error::Network(msg),
                _ if msg.contains("NoSuchKey")
                    || msg.contains("NoSuchBucket")
                    || msg.contains("NotFound") =>
                {
                    Error::NotFound(msg)
                }
                _ => Error::General(msg),
            }
        }
        _ => Error::General(format!("{what}: {error}")),
    }
}

/// Split a full object key into directory, final name and directory flag.
/// Keys ending in `/` are directory markers.
fn split_object_key(key: &str) -> (String, &str, bool) {
    let (key, is_directory) = match key.strip_suffix('/') {
        Some(stripped) => (stripped, true),
        None => (key, false),
    };
    match key.rsplit_once('/') {
        Some((dir, name)) => (format!("/{dir}"), name, is_directory),
        None => ("/".to_string(), key, is_directory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_object_key() {
        assert_eq!(
            split_object_key("dir/sub/file.dat"),
            ("/dir/sub".to_string(), "file.dat", false)
        );
        assert_eq!(
            split_object_key("file.dat"),
            ("/".to_string(), "file.dat", false)
        );
        assert_eq!(
            split_object_key("dir/sub/"),
            ("/dir".to_string(), "sub", true)
        );
    }

    #[test]
    fn test_maker_capabilities() {
        let maker = S3RemoteStorageMaker;
        assert_eq!(maker.storage_type(), "s3");
        assert!(maker.has_bucket());
    }

    #[tokio::test]
    async fn test_make_requires_s3_section() {
        let maker = S3RemoteStorageMaker;
        let conf = RemoteConf {
            storage_type: "s3".to_string(),
            name: "cold1".to_string(),
            ..Default::default()
        };
        let err = maker.make(&conf).await.unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("cold1")));
    }

    #[tokio::test]
    async fn test_missing_credentials_is_config_error() {
        let conf = S3RemoteConf {
            region: "us-east-1".to_string(),
            ..Default::default()
        };
        let err = S3RemoteStorageClient::new("cold1", &conf).await.unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("access_key")));
    }

    #[tokio::test]
    async fn test_missing_region_is_config_error() {
        let conf = S3RemoteConf {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            ..Default::default()
        };
        let err = S3RemoteStorageClient::new("cold1", &conf).await.unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("region")));
    }
}
