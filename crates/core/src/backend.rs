//! Volume tiering backend contract
//!
//! A tiering backend moves whole volume data files to and from an external
//! store. Uploads derive a fresh random key, run under retry and are
//! verified by a stat before success is reported; from the caller's
//! perspective a tiered file is either fully remote or still local; there
//! is no observable partially-uploaded state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;

use crate::conf::StringProperties;
use crate::entry::VolumeTierInfo;
use crate::error::Result;

/// Progress callback: `(bytes transferred, percentage)`. Invoked at least
/// once per transfer, with percentage 100 on completion. Returning an error
/// aborts the transfer.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, f32) -> Result<()> + Send + Sync);

#[async_trait]
pub trait BackendStorage: Send + Sync {
    /// Export the instance configuration for persistence alongside
    /// volume-tier metadata.
    fn to_properties(&self) -> HashMap<String, String>;

    /// Create a handle for a tiered volume file. Pure construction, no I/O;
    /// the handle's lifetime tracks the in-memory representation of the
    /// tiered volume, not the remote object.
    fn new_storage_file(
        self: Arc<Self>,
        key: &str,
        tier_info: &VolumeTierInfo,
    ) -> Box<dyn BackendStorageFile>;

    /// Upload the local file under a freshly derived key. The upload runs
    /// under retry and is verified against the local size by a stat call;
    /// a mismatch is a failed write. On success the progress callback is
    /// invoked with `(size, 100.0)` and the `(key, size)` pair is returned.
    async fn copy_file(&self, path: &Path, progress: ProgressFn<'_>) -> Result<(String, u64)>;

    /// Download the object at `key` into the local destination path,
    /// verified against the remote stat, then report progress at 100%.
    async fn download_file(&self, dest: &Path, key: &str, progress: ProgressFn<'_>)
    -> Result<u64>;

    /// Delete the object at `key` under retry. A store without delete
    /// capability returns an unsupported-operation error rather than
    /// silently succeeding.
    async fn delete_file(&self, key: &str) -> Result<()>;
}

/// One volume data file resident in a remote store.
#[async_trait]
pub trait BackendStorageFile: Send + Sync {
    /// Ranged read: fills `buf` from `offset`. A remote object shorter than
    /// the requested range is a range error.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Remote objects are immutable once written; mutating a tiered file in
    /// place is unsupported.
    async fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// See [`BackendStorageFile::write_at`].
    async fn truncate(&self, size: u64) -> Result<()>;

    /// Fetch remote size and modification time. The timestamp is parsed
    /// from the store's native time format.
    async fn get_stat(&self) -> Result<(u64, Timestamp)>;

    /// The blob key addressing this file.
    fn name(&self) -> &str;

    async fn sync(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Constructs tiering backends for one storage type.
#[async_trait]
pub trait BackendStorageFactory: Send + Sync {
    /// Type name under which this factory registers.
    fn storage_type(&self) -> &'static str;

    /// Build a ready-to-use backend from the property bag, consulting keys
    /// under `prefix` so multiple named instances of the same type can
    /// share one configuration namespace. Returns a configuration error on
    /// missing or malformed properties; a partially constructed backend is
    /// never returned.
    async fn build_storage(
        &self,
        config: &dyn StringProperties,
        prefix: &str,
        id: &str,
    ) -> Result<Arc<dyn BackendStorage>>;
}
