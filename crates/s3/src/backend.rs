//! S3 tiering backend
//!
//! Moves whole volume data files into an S3 bucket. Keys are freshly
//! generated UUIDs, optionally rewritten through the configured key
//! template; uploads and downloads run under retry and are verified by a
//! head call before success is reported.
//!
//! Delete policy: DeleteObject on S3 reports success for a missing key, so
//! deleting an already-removed tiered file succeeds.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use jiff::Timestamp;
use tokio::io::AsyncWriteExt;

use coldtier_core::{
    BackendStorage, BackendStorageFactory, BackendStorageFile, CommonBackendConf, Error,
    ProgressFn, Result, RetryConfig, S3RemoteConf, StringProperties, VolumeTierInfo, format_key,
    new_blob_key, retry_with_backoff,
};

use crate::client::{build_sdk_client, map_sdk_error};

/// Factory registered under the `s3` storage type.
pub struct S3BackendFactory;

#[async_trait]
impl BackendStorageFactory for S3BackendFactory {
    fn storage_type(&self) -> &'static str {
        "s3"
    }

    async fn build_storage(
        &self,
        config: &dyn StringProperties,
        prefix: &str,
        id: &str,
    ) -> Result<Arc<dyn BackendStorage>> {
        Ok(Arc::new(S3BackendStorage::new(config, prefix, id).await?))
    }
}

/// Tiering backend instance bound to one bucket.
#[derive(Debug)]
pub struct S3BackendStorage {
    id: String,
    common: CommonBackendConf,
    bucket: String,
    storage_class: Option<String>,
    inner: aws_sdk_s3::Client,
    retry: RetryConfig,
}

impl S3BackendStorage {
    pub(crate) async fn new(
        config: &dyn StringProperties,
        prefix: &str,
        id: &str,
    ) -> Result<Self> {
        let common = CommonBackendConf::parse(config, prefix)?;
        let get = |key: &str| {
            config
                .get_string(&format!("{prefix}{key}"))
                .unwrap_or_default()
                .to_string()
        };

        let bucket = get("bucket");
        if bucket.is_empty() {
            return Err(Error::Config(format!(
                "{prefix}bucket is not set for s3 backend {id}"
            )));
        }

        let conn = S3RemoteConf {
            endpoint: get("endpoint"),
            region: get("region"),
            access_key: get("access_key"),
            secret_key: get("secret_key"),
            force_path_style: get("force_path_style") == "true",
        };
        let inner = build_sdk_client(&conn).await?;

        let storage_class = Some(get("storage_class")).filter(|s| !s.is_empty());

        Ok(Self {
            id: id.to_string(),
            common,
            bucket,
            storage_class,
            inner,
            retry: RetryConfig::default(),
        })
    }

    async fn stat(&self, key: &str) -> Result<(u64, Timestamp)> {
        let response = self
            .inner
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("head {key}")))?;

        let size = response.content_length().unwrap_or(0).max(0) as u64;
        let mtime = response
            .last_modified()
            .and_then(|t| Timestamp::from_second(t.secs()).ok())
            .unwrap_or(Timestamp::UNIX_EPOCH);
        Ok((size, mtime))
    }
}

#[async_trait]
impl BackendStorage for S3BackendStorage {
    fn to_properties(&self) -> HashMap<String, String> {
        let mut m = self.common.to_properties();
        m.insert("bucket".to_string(), self.bucket.clone());
        m
    }

    fn new_storage_file(
        self: Arc<Self>,
        key: &str,
        tier_info: &VolumeTierInfo,
    ) -> Box<dyn BackendStorageFile> {
        Box::new(S3BackendStorageFile {
            backend: self,
            key: key.to_string(),
            tier_info: tier_info.clone(),
        })
    }

    async fn copy_file(&self, path: &Path, progress: ProgressFn<'_>) -> Result<(String, u64)> {
        let raw_key = new_blob_key();
        let key = format_key(&raw_key, self.common.key_template.as_ref());
        tracing::debug!(
            file = %path.display(),
            backend = %self.id,
            key = %key,
            "copying volume file to remote s3"
        );

        let local_size = tokio::fs::metadata(path).await?.len();

        let key_ref = key.as_str();
        let size = retry_with_backoff(&self.retry, "upload via s3", || async move {
            let body = ByteStream::from_path(path)
                .await
                .map_err(|e| Error::General(format!("open {}: {e}", path.display())))?;
            let mut request = self
                .inner
                .put_object()
                .bucket(&self.bucket)
                .key(key_ref)
                .body(body);
            if let Some(sc) = &self.storage_class {
                request = request.storage_class(aws_sdk_s3::types::StorageClass::from(sc.as_str()));
            }
            request
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("upload {key_ref}")))?;

            // A write that cannot be verified is a failed write.
            let (remote_size, _) = self.stat(key_ref).await?;
            if remote_size != local_size {
                return Err(Error::VerificationMismatch {
                    expected: local_size,
                    actual: remote_size,
                });
            }
            Ok(remote_size)
        })
        .await?;

        progress(size, 100.0)?;
        Ok((key, size))
    }

    async fn download_file(
        &self,
        dest: &Path,
        key: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64> {
        tracing::debug!(
            file = %dest.display(),
            backend = %self.id,
            key = %key,
            "downloading volume file from remote s3"
        );

        let size = retry_with_backoff(&self.retry, "download via s3", || async move {
            let response = self
                .inner
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("download {key}")))?;

            let mut body = response.body.into_async_read();
            let mut file = tokio::fs::File::create(dest).await?;
            let written = tokio::io::copy(&mut body, &mut file).await?;
            file.flush().await?;

            let (remote_size, _) = self.stat(key).await?;
            if written != remote_size {
                return Err(Error::VerificationMismatch {
                    expected: remote_size,
                    actual: written,
                });
            }
            Ok(written)
        })
        .await?;

        progress(size, 100.0)?;
        Ok(size)
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        tracing::debug!(backend = %self.id, key = %key, "deleting volume file from remote s3");

        retry_with_backoff(&self.retry, "delete via s3", || async move {
            self.inner
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("delete {key}")))?;
            Ok(())
        })
        .await
    }
}

/// Handle for one tiered volume file in S3.
pub struct S3BackendStorageFile {
    backend: Arc<S3BackendStorage>,
    key: String,
    #[allow(dead_code)]
    tier_info: VolumeTierInfo,
}

#[async_trait]
impl BackendStorageFile for S3BackendStorageFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let wanted = buf.len() as u64;
        let range = format!("bytes={}-{}", offset, offset + wanted - 1);
        let range = range.as_str();

        let backend = &self.backend;
        let key = self.key.as_str();
        let data = retry_with_backoff(&backend.retry, "s3 read_at", || async move {
            let response = backend
                .inner
                .get_object()
                .bucket(&backend.bucket)
                .key(key)
                .range(range)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &format!("read {key}")))?;
            response
                .body
                .collect()
                .await
                .map_err(|e| Error::Network(format!("read body of {key}: {e}")))
        })
        .await?;

        let data = data.into_bytes();
        if (data.len() as u64) < wanted {
            return Err(Error::Range(format!(
                "read {offset}..{} of {key}: object is shorter than requested",
                offset + wanted
            )));
        }
        buf.copy_from_slice(&data[..buf.len()]);
        Ok(buf.len())
    }

    async fn write_at(&self, _buf: &[u8], _offset: u64) -> Result<usize> {
        Err(Error::unsupported("write_at on remote-tiered file"))
    }

    async fn truncate(&self, _size: u64) -> Result<()> {
        Err(Error::unsupported("truncate on remote-tiered file"))
    }

    async fn get_stat(&self) -> Result<(u64, Timestamp)> {
        let backend = &self.backend;
        let key = self.key.as_str();
        retry_with_backoff(&backend.retry, "s3 get_stat", || async move {
            backend.stat(key).await
        })
        .await
    }

    fn name(&self) -> &str {
        &self.key
    }
}
