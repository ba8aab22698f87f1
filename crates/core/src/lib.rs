//! coldtier-core: Contracts and shared machinery for coldtier storage backends
//!
//! This crate provides the abstraction layer for tiering and mirroring cold
//! data into external object stores:
//! - The remote mirror client contract and the volume tiering backend contract
//! - Registries mapping storage type names to adapter constructors
//! - The retry policy with transient/permanent error classification
//! - Key templating and the shared error taxonomy
//!
//! This crate is independent of any concrete store SDK; adapters live in
//! sibling crates and are wired in through the registries at startup.

pub mod backend;
pub mod conf;
pub mod entry;
pub mod error;
pub mod key;
pub mod location;
pub mod registry;
pub mod remote;
pub mod retry;

pub use backend::{BackendStorage, BackendStorageFactory, BackendStorageFile, ProgressFn};
pub use conf::{
    CommonBackendConf, RemoteConf, RetryConfig, S3RemoteConf, StringProperties, WalrusRemoteConf,
};
pub use entry::{
    Bucket, Entry, INTERNAL_XATTR_PREFIX, RemoteEntry, VolumeTierInfo, to_remote_metadata,
};
pub use error::{Error, Result};
pub use key::{KeyTemplate, format_key, new_blob_key};
pub use location::{RemoteStorageLocation, parse_location};
pub use registry::{BackendStorageRegistry, RemoteStorageRegistry};
pub use remote::{RemoteStorageClient, RemoteStorageMaker, VisitFn};
pub use retry::{RetryBuilder, retry_with_backoff};
