//! Mirror-contract tests against an in-memory store.
//!
//! The memory store counts remote calls so tests can assert that
//! metadata reconciliation short-circuits without touching the store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use coldtier_core::{
    Bucket, Entry, Error, RemoteConf, RemoteEntry, RemoteStorageClient, RemoteStorageLocation,
    RemoteStorageMaker, RemoteStorageRegistry, Result, VisitFn, to_remote_metadata,
};

const FIXED_MTIME: i64 = 1_700_000_000;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Vec<u8>,
    metadata: HashMap<String, String>,
    mtime: i64,
    etag: String,
}

#[derive(Default, Debug)]
struct MemoryRemoteStorage {
    storage_name: String,
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    buckets: Mutex<Vec<String>>,
    remote_calls: AtomicUsize,
}

impl MemoryRemoteStorage {
    fn new(storage_name: &str) -> Self {
        Self {
            storage_name: storage_name.to_string(),
            ..Default::default()
        }
    }

    fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::SeqCst)
    }

    fn metadata_of(&self, loc: &RemoteStorageLocation) -> Option<HashMap<String, String>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(loc.bucket.clone(), loc.key().to_string()))
            .map(|o| o.metadata.clone())
    }
}

fn etag_of(data: &[u8]) -> String {
    let sum: u64 = data.iter().map(|b| *b as u64).sum();
    format!("{:x}-{:x}", data.len(), sum)
}

#[async_trait]
impl RemoteStorageClient for MemoryRemoteStorage {
    async fn traverse(&self, loc: &RemoteStorageLocation, visit: VisitFn<'_>) -> Result<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        let prefix = loc.key().to_string();

        let mut entries: Vec<(String, StoredObject)> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((bucket, key), _)| *bucket == loc.bucket && key.starts_with(&prefix))
            .map(|((_, key), object)| (key.clone(), object.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, object) in entries {
            let remote_entry = RemoteEntry {
                remote_mtime: object.mtime,
                remote_size: object.data.len() as u64,
                remote_etag: object.etag.clone(),
                storage_name: self.storage_name.clone(),
            };
            let (dir, name) = match key.rsplit_once('/') {
                Some((dir, name)) => (format!("/{dir}"), name.to_string()),
                None => ("/".to_string(), key.clone()),
            };
            visit(&dir, &name, false, &remote_entry)?;
        }
        Ok(())
    }

    async fn read_file(
        &self,
        loc: &RemoteStorageLocation,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(&(loc.bucket.clone(), loc.key().to_string()))
            .ok_or_else(|| Error::NotFound(loc.to_string()))?;

        let end = offset + size;
        if end > object.data.len() as u64 {
            return Err(Error::Range(format!(
                "read {offset}..{end} of {loc}: object is shorter than requested"
            )));
        }
        Ok(object.data[offset as usize..end as usize].to_vec())
    }

    async fn write_file(
        &self,
        loc: &RemoteStorageLocation,
        entry: &Entry,
        data: Bytes,
    ) -> Result<RemoteEntry> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        let stored = StoredObject {
            data: data.to_vec(),
            metadata: to_remote_metadata(&entry.extended),
            mtime: FIXED_MTIME,
            etag: etag_of(&data),
        };
        self.objects
            .lock()
            .unwrap()
            .insert((loc.bucket.clone(), loc.key().to_string()), stored.clone());

        // Read-back: the returned entry reflects the store's view.
        Ok(RemoteEntry {
            remote_mtime: stored.mtime,
            remote_size: stored.data.len() as u64,
            remote_etag: stored.etag,
            storage_name: self.storage_name.clone(),
        })
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

        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(&(loc.bucket.clone(), loc.key().to_string()))
            .ok_or_else(|| Error::NotFound(loc.to_string()))?;
        object.metadata = metadata;
        Ok(())
    }

    async fn delete_file(&self, loc: &RemoteStorageLocation) -> Result<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .remove(&(loc.bucket.clone(), loc.key().to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(loc.to_string()))
    }

    async fn write_directory(&self, _loc: &RemoteStorageLocation, _entry: &Entry) -> Result<()> {
        Ok(())
    }

    async fn remove_directory(&self, _loc: &RemoteStorageLocation) -> Result<()> {
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .buckets
            .lock()
            .unwrap()
            .iter()
            .map(|name| Bucket {
                name: name.clone(),
                created_at: None,
            })
            .collect())
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.buckets.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        let mut buckets = self.buckets.lock().unwrap();
        match buckets.iter().position(|b| b == name) {
            Some(idx) => {
                buckets.remove(idx);
                Ok(())
            }
            None => Err(Error::NotFound(format!("bucket {name}"))),
        }
    }
}

#[derive(Debug)]
struct MemoryMaker;

#[async_trait]
impl RemoteStorageMaker for MemoryMaker {
    fn storage_type(&self) -> &'static str {
        "memory"
    }

    fn has_bucket(&self) -> bool {
        false
    }

    async fn make(&self, conf: &RemoteConf) -> Result<Arc<dyn RemoteStorageClient>> {
        Ok(Arc::new(MemoryRemoteStorage::new(&conf.name)))
    }
}

fn loc(path: &str) -> RemoteStorageLocation {
    RemoteStorageLocation::new("mem1", "bucket", path)
}

fn entry_with(extended: &[(&str, &[u8])]) -> Entry {
    Entry {
        extended: extended
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn round_trip_write_then_read() {
    let store = MemoryRemoteStorage::new("mem1");
    let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let location = loc("/vol/data.dat");

    let remote_entry = store
        .write_file(&location, &Entry::default(), Bytes::from(data.clone()))
        .await
        .unwrap();
    assert_eq!(remote_entry.remote_size, data.len() as u64);
    assert_eq!(remote_entry.storage_name, "mem1");
    assert!(!remote_entry.remote_etag.is_empty());

    let read = store
        .read_file(&location, 0, data.len() as u64)
        .await
        .unwrap();
    assert_eq!(read, data);
}

#[tokio::test]
async fn partial_range_read() {
    let store = MemoryRemoteStorage::new("mem1");
    let location = loc("/f");
    store
        .write_file(&location, &Entry::default(), Bytes::from_static(b"0123456789"))
        .await
        .unwrap();

    let read = store.read_file(&location, 2, 5).await.unwrap();
    assert_eq!(read, b"23456");
}

#[tokio::test]
async fn read_past_length_is_range_error() {
    let store = MemoryRemoteStorage::new("mem1");
    let location = loc("/f");
    store
        .write_file(&location, &Entry::default(), Bytes::from_static(b"short"))
        .await
        .unwrap();

    let err = store.read_file(&location, 2, 100).await.unwrap_err();
    assert!(matches!(err, Error::Range(_)));
}

#[tokio::test]
async fn read_missing_object_is_not_found() {
    let store = MemoryRemoteStorage::new("mem1");
    let err = store.read_file(&loc("/ghost"), 0, 1).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn update_metadata_is_no_op_when_unchanged() {
    let store = MemoryRemoteStorage::new("mem1");
    let location = loc("/f");
    let entry = entry_with(&[("owner", b"alice".as_slice())]);
    store
        .write_file(&location, &entry, Bytes::from_static(b"data"))
        .await
        .unwrap();

    let calls_before = store.remote_calls();
    store
        .update_file_metadata(&location, &entry, &entry.clone())
        .await
        .unwrap();
    assert_eq!(store.remote_calls(), calls_before);
}

#[tokio::test]
async fn update_metadata_pushes_when_changed() {
    let store = MemoryRemoteStorage::new("mem1");
    let location = loc("/f");
    let old_entry = entry_with(&[("owner", b"alice".as_slice())]);
    store
        .write_file(&location, &old_entry, Bytes::from_static(b"data"))
        .await
        .unwrap();

    let new_entry = entry_with(&[("owner", b"bob".as_slice())]);
    store
        .update_file_metadata(&location, &old_entry, &new_entry)
        .await
        .unwrap();

    let metadata = store.metadata_of(&location).unwrap();
    assert_eq!(metadata.get("owner").map(String::as_str), Some("bob"));
}

#[tokio::test]
async fn write_file_filters_internal_attributes() {
    let store = MemoryRemoteStorage::new("mem1");
    let location = loc("/f");
    let entry = entry_with(&[("owner", b"alice".as_slice()), ("X-seen-by", b"sync-job".as_slice())]);
    store
        .write_file(&location, &entry, Bytes::from_static(b"data"))
        .await
        .unwrap();

    let metadata = store.metadata_of(&location).unwrap();
    assert!(metadata.contains_key("owner"));
    assert!(!metadata.contains_key("X-seen-by"));
}

#[tokio::test]
async fn traverse_visits_every_object_under_prefix() {
    let store = MemoryRemoteStorage::new("mem1");
    for path in ["/dir/a", "/dir/b", "/other/c"] {
        store
            .write_file(&loc(path), &Entry::default(), Bytes::from_static(b"x"))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut visit = |dir: &str, name: &str, _is_dir: bool, entry: &RemoteEntry| -> Result<()> {
        seen.push((dir.to_string(), name.to_string(), entry.remote_size));
        Ok(())
    };
    store.traverse(&loc("/dir"), &mut visit).await.unwrap();

    assert_eq!(
        seen,
        vec![
            ("/dir".to_string(), "a".to_string(), 1),
            ("/dir".to_string(), "b".to_string(), 1),
        ]
    );
}

#[tokio::test]
async fn traverse_stops_on_first_visitor_error() {
    let store = MemoryRemoteStorage::new("mem1");
    for path in ["/dir/a", "/dir/b", "/dir/c"] {
        store
            .write_file(&loc(path), &Entry::default(), Bytes::from_static(b"x"))
            .await
            .unwrap();
    }

    let mut visited = 0;
    let mut visit = |_dir: &str, _name: &str, _is_dir: bool, _entry: &RemoteEntry| -> Result<()> {
        visited += 1;
        Err(Error::General("stop".to_string()))
    };
    let err = store.traverse(&loc("/dir"), &mut visit).await.unwrap_err();

    assert!(matches!(&err, Error::General(msg) if msg == "stop"));
    assert_eq!(visited, 1);
}

#[tokio::test]
async fn delete_missing_object_policy_is_observable() {
    // The memory store opts for surfacing NotFound, like the walrus
    // adapter; callers that want idempotent deletes can branch on it.
    let store = MemoryRemoteStorage::new("mem1");
    let err = store.delete_file(&loc("/ghost")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    store
        .write_file(&loc("/f"), &Entry::default(), Bytes::from_static(b"x"))
        .await
        .unwrap();
    store.delete_file(&loc("/f")).await.unwrap();
    assert!(matches!(
        store.delete_file(&loc("/f")).await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn registry_resolves_and_constructs_clients() {
    let mut registry = RemoteStorageRegistry::new();
    registry.register(Arc::new(MemoryMaker));

    assert_eq!(registry.has_bucket("memory").unwrap(), false);
    assert!(registry.has_bucket("ghost").is_err());

    let conf = RemoteConf {
        storage_type: "memory".to_string(),
        name: "mem1".to_string(),
        ..Default::default()
    };
    let client = registry.make_client(&conf).await.unwrap();

    // The constructed client is usable through the trait object.
    let location = loc("/via-registry");
    let remote_entry = client
        .write_file(&location, &Entry::default(), Bytes::from_static(b"hello"))
        .await
        .unwrap();
    assert_eq!(remote_entry.remote_size, 5);
    assert_eq!(client.read_file(&location, 0, 5).await.unwrap(), b"hello");
}

#[tokio::test]
async fn bucket_lifecycle() {
    let store = MemoryRemoteStorage::new("mem1");
    store.create_bucket("b1").await.unwrap();
    let buckets = store.list_buckets().await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].name, "b1");

    store.delete_bucket("b1").await.unwrap();
    assert!(store.list_buckets().await.unwrap().is_empty());
    assert!(matches!(
        store.delete_bucket("b1").await.unwrap_err(),
        Error::NotFound(_)
    ));
}
