//! Remote mirror client contract
//!
//! The client syncs a logical filesystem tree into and out of an external
//! object store: prefix traversal, ranged reads, verified writes, metadata
//! reconciliation and bucket lifecycle. Adapters implement this trait per
//! store; callers obtain instances through the registry and treat all
//! backends uniformly.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::conf::RemoteConf;
use crate::entry::{Bucket, Entry, RemoteEntry};
use crate::error::Result;
use crate::location::RemoteStorageLocation;

/// Visitor invoked once per object or sub-directory found by
/// [`RemoteStorageClient::traverse`]: `(directory, name, is_directory,
/// remote_entry)`.
pub type VisitFn<'a> = &'a mut (dyn FnMut(&str, &str, bool, &RemoteEntry) -> Result<()> + Send);

#[async_trait]
pub trait RemoteStorageClient: Send + Sync + std::fmt::Debug {
    /// Walk every object under the location prefix, invoking `visit` once
    /// per object or sub-directory. The traversal is finite, fetches lazily
    /// underneath, and stops on the first visitor error, which is
    /// propagated to the caller.
    async fn traverse(&self, loc: &RemoteStorageLocation, visit: VisitFn<'_>) -> Result<()>;

    /// Fetch exactly `size` bytes starting at `offset`. A remote object
    /// shorter than requested is a range error, never a silent truncate;
    /// an absent object is a not-found error.
    async fn read_file(
        &self,
        loc: &RemoteStorageLocation,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>>;

    /// Upload `data` under the key derived from the location path, carrying
    /// the entry's extended attributes (minus internal keys) as object
    /// metadata. On success the remote attributes are read back and
    /// returned, so the caller can persist authoritative remote-side
    /// metadata. A write that cannot be verified is a failed write.
    async fn write_file(
        &self,
        loc: &RemoteStorageLocation,
        entry: &Entry,
        data: Bytes,
    ) -> Result<RemoteEntry>;

    /// Push the new entry's metadata to the remote object. A no-op (not a
    /// failure) when the extended-attribute maps are deeply equal: zero
    /// remote calls are made. Pushing an empty metadata map is also a
    /// no-op; there is no way to delete remote metadata yet, which is a
    /// documented contract gap.
    async fn update_file_metadata(
        &self,
        loc: &RemoteStorageLocation,
        old_entry: &Entry,
        new_entry: &Entry,
    ) -> Result<()>;

    /// Delete the object at the derived key. Whether deleting a missing
    /// object is an error is an adapter-level policy; each adapter
    /// documents its choice.
    async fn delete_file(&self, loc: &RemoteStorageLocation) -> Result<()>;

    /// Create a directory marker. Deliberate no-op on stores without
    /// native directory objects.
    async fn write_directory(&self, loc: &RemoteStorageLocation, entry: &Entry) -> Result<()>;

    /// Remove a directory marker. Deliberate no-op on stores without
    /// native directory objects.
    async fn remove_directory(&self, loc: &RemoteStorageLocation) -> Result<()>;

    async fn list_buckets(&self) -> Result<Vec<Bucket>>;

    async fn create_bucket(&self, name: &str) -> Result<()>;

    async fn delete_bucket(&self, name: &str) -> Result<()>;
}

/// Constructs remote mirror clients for one storage type.
#[async_trait]
pub trait RemoteStorageMaker: Send + Sync + std::fmt::Debug {
    /// Type name under which this maker registers, e.g. `s3`, `walrus`.
    fn storage_type(&self) -> &'static str;

    /// Whether this backend type supports bucket management at all.
    /// Available before any client is constructed, so callers can decide
    /// whether bucket commands apply to the type.
    fn has_bucket(&self) -> bool;

    /// Build a ready-to-use client from the configuration, or fail with a
    /// configuration error. A partially constructed client is never
    /// returned.
    async fn make(&self, conf: &RemoteConf) -> Result<Arc<dyn RemoteStorageClient>>;
}
