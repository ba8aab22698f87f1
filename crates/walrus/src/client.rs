//! Walrus remote storage client
//!
//! Implements the mirror contract over the walrus HTTP surface: reads are
//! served by the aggregator tier, writes go to the publisher tier.
//!
//! Delete policy: deleting a missing object surfaces a not-found error
//! rather than succeeding; callers decide whether absence is acceptable.
//!
//! Bucket-level operations are scoped by project, so list/create/delete
//! bucket all require a configured `project_id` and fail fast with a
//! configuration error (zero network calls) when it is absent.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use jiff::Timestamp;

use coldtier_core::{
    Bucket, Entry, Error, RemoteConf, RemoteEntry, RemoteStorageClient, RemoteStorageLocation,
    RemoteStorageMaker, Result, RetryConfig, VisitFn, WalrusRemoteConf, retry_with_backoff,
    to_remote_metadata,
};

use crate::api::WalrusApi;

/// Maker registered under the `walrus` storage type.
#[derive(Debug)]
pub struct WalrusRemoteStorageMaker;

#[async_trait]
impl RemoteStorageMaker for WalrusRemoteStorageMaker {
    fn storage_type(&self) -> &'static str {
        "walrus"
    }

    fn has_bucket(&self) -> bool {
        true
    }

    async fn make(&self, conf: &RemoteConf) -> Result<Arc<dyn RemoteStorageClient>> {
        let walrus = conf.walrus.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "remote storage {} has no walrus configuration",
                conf.name
            ))
        })?;
        Ok(Arc::new(WalrusRemoteStorageClient::new(&conf.name, walrus)?))
    }
}

/// Walrus client implementing the mirror contract.
#[derive(Debug)]
pub struct WalrusRemoteStorageClient {
    storage_name: String,
    project_id: String,
    api: WalrusApi,
    retry: RetryConfig,
}

impl WalrusRemoteStorageClient {
    /// Create a new client. Endpoint lists are validated here so a
    /// half-configured client is never handed out; the project id is only
    /// required once a bucket-level operation is attempted.
    pub fn new(storage_name: &str, conf: &WalrusRemoteConf) -> Result<Self> {
        let api = WalrusApi::new(&conf.aggregator_urls, &conf.publisher_urls, conf.epochs)?;
        Ok(Self {
            storage_name: storage_name.to_string(),
            project_id: conf.project_id.clone(),
            api,
            retry: RetryConfig::default(),
        })
    }

    fn project_id(&self) -> Result<&str> {
        if self.project_id.is_empty() {
            return Err(Error::Config(format!(
                "walrus project_id is not set for remote storage {}",
                self.storage_name
            )));
        }
        Ok(&self.project_id)
    }

    /// Read back the remote attributes after a write.
    async fn read_file_remote_entry(&self, loc: &RemoteStorageLocation) -> Result<RemoteEntry> {
        let key = loc.key();
        let attrs = retry_with_backoff(&self.retry, "walrus head_object", || async move {
            self.api.head_store_object(&loc.bucket, key).await
        })
        .await?;

        Ok(RemoteEntry {
            remote_mtime: attrs.updated.as_second(),
            remote_size: attrs.size,
            remote_etag: attrs.etag,
            storage_name: self.storage_name.clone(),
        })
    }
}

#[async_trait]
impl RemoteStorageClient for WalrusRemoteStorageClient {
    async fn traverse(&self, loc: &RemoteStorageLocation, visit: VisitFn<'_>) -> Result<()> {
        let prefix = loc.key();
        let mut page: Option<String> = None;

        loop {
            let token = page.clone();
            let listing = retry_with_backoff(&self.retry, "walrus list_objects", || {
                let token = token.clone();
                async move {
                    self.api
                        .list_store_objects(&loc.bucket, prefix, token.as_deref())
                        .await
                }
            })
            .await?;

            for object in &listing.objects {
                let remote_entry = RemoteEntry {
                    remote_mtime: object.updated,
                    remote_size: object.size,
                    remote_etag: object.etag.clone(),
                    storage_name: self.storage_name.clone(),
                };
                let (dir, name, is_directory) = split_object_key(&object.key, object.is_directory);
                visit(&dir, name, is_directory, &remote_entry)?;
            }

            match listing.next {
                Some(next) if !next.is_empty() => page = Some(next),
                _ => return Ok(()),
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
        let data = retry_with_backoff(&self.retry, "walrus get_object", || async move {
            self.api.get_store_range(&loc.bucket, key, offset, size).await
        })
        .await?;

        if (data.len() as u64) < size {
            return Err(Error::Range(format!(
                "failed to download {loc}: object is shorter than requested range {offset}..{}",
                offset + size
            )));
        }
        Ok(data[..size as usize].to_vec())
    }

    async fn write_file(
        &self,
        loc: &RemoteStorageLocation,
        entry: &Entry,
        data: Bytes,
    ) -> Result<RemoteEntry> {
        let key = loc.key();
        let metadata = to_remote_metadata(&entry.extended);

        retry_with_backoff(&self.retry, "walrus put_object", || {
            let data = data.clone();
            let metadata = metadata.clone();
            async move {
                self.api
                    .put_store_object(
                        &loc.bucket,
                        key,
                        data,
                        entry.content_type.as_deref(),
                        &metadata,
                    )
                    .await
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
        retry_with_backoff(&self.retry, "walrus update_metadata", || {
            let metadata = metadata.clone();
            async move {
                self.api
                    .update_store_metadata(&loc.bucket, key, &metadata)
                    .await
            }
        })
        .await
    }

    async fn delete_file(&self, loc: &RemoteStorageLocation) -> Result<()> {
        let key = loc.key();
        retry_with_backoff(&self.retry, "walrus delete_object", || async move {
            self.api.delete_store_object(&loc.bucket, key).await
        })
        .await
    }

    async fn write_directory(&self, _loc: &RemoteStorageLocation, _entry: &Entry) -> Result<()> {
        // walrus has no native directory objects.
        Ok(())
    }

    async fn remove_directory(&self, _loc: &RemoteStorageLocation) -> Result<()> {
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let project = self.project_id()?;
        let listed = retry_with_backoff(&self.retry, "walrus list_buckets", || async move {
            self.api.list_buckets(project).await
        })
        .await?;

        Ok(listed
            .into_iter()
            .map(|b| Bucket {
                name: b.name,
                created_at: b.created_at.and_then(|s| Timestamp::from_second(s).ok()),
            })
            .collect())
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        let project = self.project_id()?;
        retry_with_backoff(&self.retry, "walrus create_bucket", || async move {
            self.api.create_bucket(name, project).await
        })
        .await
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let project = self.project_id()?;
        retry_with_backoff(&self.retry, "walrus delete_bucket", || async move {
            self.api.delete_bucket(name, project).await
        })
        .await
    }
}

/// Split a full object key into directory, final name and directory flag.
fn split_object_key(key: &str, directory_flag: bool) -> (String, &str, bool) {
    let (key, trailing) = match key.strip_suffix('/') {
        Some(stripped) => (stripped, true),
        None => (key, false),
    };
    let is_directory = directory_flag || trailing;
    match key.rsplit_once('/') {
        Some((dir, name)) => (format!("/{dir}"), name, is_directory),
        None => ("/".to_string(), key, is_directory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_conf() -> WalrusRemoteConf {
        WalrusRemoteConf {
            project_id: String::new(),
            aggregator_urls: vec!["http://127.0.0.1:1".to_string()],
            publisher_urls: vec!["http://127.0.0.1:1".to_string()],
            epochs: 5,
        }
    }

    #[test]
    fn test_maker_capabilities() {
        let maker = WalrusRemoteStorageMaker;
        assert_eq!(maker.storage_type(), "walrus");
        assert!(maker.has_bucket());
    }

    #[tokio::test]
    async fn test_make_requires_walrus_section() {
        let maker = WalrusRemoteStorageMaker;
        let conf = RemoteConf {
            storage_type: "walrus".to_string(),
            name: "cold1".to_string(),
            ..Default::default()
        };
        let err = maker.make(&conf).await.unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("cold1")));
    }

    #[test]
    fn test_missing_endpoints_fail_construction() {
        let conf = WalrusRemoteConf {
            aggregator_urls: vec![],
            ..test_conf()
        };
        assert!(matches!(
            WalrusRemoteStorageClient::new("cold1", &conf),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_bucket_ops_without_project_id_fail_fast() {
        // The endpoints are unroutable: if any of these calls reached the
        // network the error class would be Network, not Config.
        let client = WalrusRemoteStorageClient::new("cold1", &test_conf()).unwrap();

        let err = client.list_buckets().await.unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("project_id")));

        let err = client.create_bucket("b1").await.unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("project_id")));

        let err = client.delete_bucket("b1").await.unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("project_id")));
    }

    #[tokio::test]
    async fn test_update_metadata_no_op_when_unchanged() {
        let client = WalrusRemoteStorageClient::new("cold1", &test_conf()).unwrap();
        let loc = RemoteStorageLocation::new("cold1", "bucket", "/file");

        let mut extended = HashMap::new();
        extended.insert("owner".to_string(), b"alice".to_vec());
        let old_entry = Entry {
            extended: extended.clone(),
            ..Default::default()
        };
        let new_entry = Entry {
            extended,
            ..Default::default()
        };

        // Unchanged attributes: zero remote calls, so the unroutable
        // endpoint is never contacted.
        client
            .update_file_metadata(&loc, &old_entry, &new_entry)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_file_zero_size_is_empty() {
        let client = WalrusRemoteStorageClient::new("cold1", &test_conf()).unwrap();
        let loc = RemoteStorageLocation::new("cold1", "bucket", "/file");
        assert!(client.read_file(&loc, 0, 0).await.unwrap().is_empty());
    }

    #[test]
    fn test_split_object_key() {
        assert_eq!(
            split_object_key("dir/sub/file.dat", false),
            ("/dir/sub".to_string(), "file.dat", false)
        );
        assert_eq!(
            split_object_key("file.dat", false),
            ("/".to_string(), "file.dat", false)
        );
        assert_eq!(
            split_object_key("dir/sub/", false),
            ("/dir".to_string(), "sub", true)
        );
        assert_eq!(
            split_object_key("dir/sub", true),
            ("/dir".to_string(), "sub", true)
        );
    }
}
