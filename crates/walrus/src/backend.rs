//! Walrus tiering backend
//!
//! Moves whole volume data files into the walrus blob namespace. Keys are
//! freshly generated UUIDs, optionally rewritten through the configured key
//! template; uploads and downloads run under retry and are verified by a
//! head call before success is reported.
//!
//! Delete policy: deleting an already-removed blob succeeds so cleanup jobs
//! can re-run safely.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;

use coldtier_core::{
    BackendStorage, BackendStorageFactory, BackendStorageFile, CommonBackendConf, Error,
    ProgressFn, Result, RetryConfig, StringProperties, VolumeTierInfo, format_key, new_blob_key,
    retry_with_backoff,
};

use crate::api::WalrusApi;

const DEFAULT_EPOCHS: u32 = 5;

/// Factory registered under the `walrus` storage type.
pub struct WalrusBackendFactory;

#[async_trait]
impl BackendStorageFactory for WalrusBackendFactory {
    fn storage_type(&self) -> &'static str {
        "walrus"
    }

    async fn build_storage(
        &self,
        config: &dyn StringProperties,
        prefix: &str,
        id: &str,
    ) -> Result<Arc<dyn BackendStorage>> {
        Ok(Arc::new(WalrusBackendStorage::new(config, prefix, id)?))
    }
}

/// Tiering backend instance bound to one walrus store.
#[derive(Debug)]
pub struct WalrusBackendStorage {
    id: String,
    common: CommonBackendConf,
    api: WalrusApi,
    retry: RetryConfig,
}

impl WalrusBackendStorage {
    pub(crate) fn new(config: &dyn StringProperties, prefix: &str, id: &str) -> Result<Self> {
        let common = CommonBackendConf::parse(config, prefix)?;
        let get = |key: &str| {
            config
                .get_string(&format!("{prefix}{key}"))
                .unwrap_or_default()
                .to_string()
        };

        let aggregator_urls = split_csv(&get("aggregator_urls"));
        if aggregator_urls.is_empty() {
            return Err(Error::Config(format!(
                "{prefix}aggregator_urls is not set for walrus backend {id}"
            )));
        }
        let publisher_urls = split_csv(&get("publisher_urls"));
        if publisher_urls.is_empty() {
            return Err(Error::Config(format!(
                "{prefix}publisher_urls is not set for walrus backend {id}"
            )));
        }

        let epochs_text = get("epochs");
        let epochs = if epochs_text.is_empty() {
            DEFAULT_EPOCHS
        } else {
            epochs_text.parse().map_err(|e| {
                Error::Config(format!("{prefix}epochs {epochs_text:?} is not a number: {e}"))
            })?
        };

        let api = WalrusApi::new(&aggregator_urls, &publisher_urls, epochs)?;

        Ok(Self {
            id: id.to_string(),
            common,
            api,
            retry: RetryConfig::default(),
        })
    }
}

#[async_trait]
impl BackendStorage for WalrusBackendStorage {
    fn to_properties(&self) -> HashMap<String, String> {
        self.common.to_properties()
    }

    fn new_storage_file(
        self: Arc<Self>,
        key: &str,
        tier_info: &VolumeTierInfo,
    ) -> Box<dyn BackendStorageFile> {
        Box::new(WalrusBackendStorageFile {
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
            "copying volume file to remote walrus"
        );

        let local_size = tokio::fs::metadata(path).await?.len();

        let key_ref = key.as_str();
        let size = retry_with_backoff(&self.retry, "upload via walrus", || async move {
            self.api.put_blob_from_path(key_ref, path).await?;

            // A write that cannot be verified is a failed write.
            let attrs = self.api.head_blob(key_ref).await?;
            if attrs.size != local_size {
                return Err(Error::VerificationMismatch {
                    expected: local_size,
                    actual: attrs.size,
                });
            }
            Ok(attrs.size)
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
            "downloading volume file from remote walrus"
        );

        let size = retry_with_backoff(&self.retry, "download via walrus", || async move {
            let written = self.api.download_blob(key, dest).await?;

            let attrs = self.api.head_blob(key).await?;
            if written != attrs.size {
                return Err(Error::VerificationMismatch {
                    expected: attrs.size,
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
        tracing::debug!(backend = %self.id, key = %key, "deleting volume file from remote walrus");

        retry_with_backoff(&self.retry, "delete via walrus", || async move {
            match self.api.delete_blob(key).await {
                Err(Error::NotFound(_)) => Ok(()),
                other => other,
            }
        })
        .await
    }
}

/// Handle for one tiered volume file in the walrus blob namespace.
pub struct WalrusBackendStorageFile {
    backend: Arc<WalrusBackendStorage>,
    key: String,
    #[allow(dead_code)]
    tier_info: VolumeTierInfo,
}

#[async_trait]
impl BackendStorageFile for WalrusBackendStorageFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let wanted = buf.len() as u64;

        let backend = &self.backend;
        let key = self.key.as_str();
        let data = retry_with_backoff(&backend.retry, "walrus read_at", || async move {
            backend.api.get_blob_range(key, offset, wanted).await
        })
        .await?;

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
        let attrs = retry_with_backoff(&backend.retry, "walrus get_stat", || async move {
            backend.api.head_blob(key).await
        })
        .await?;
        Ok((attrs.size, attrs.updated))
    }

    fn name(&self) -> &str {
        &self.key
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
