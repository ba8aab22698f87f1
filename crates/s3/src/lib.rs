//! coldtier-s3: S3 adapter for coldtier storage backends
//!
//! Implements both the remote mirror client and the volume tiering backend
//! over aws-sdk-s3, usable against any S3-compatible store. Register the
//! adapter at startup:
//!
//! ```ignore
//! let mut remotes = RemoteStorageRegistry::new();
//! let mut backends = BackendStorageRegistry::new();
//! coldtier_s3::register(&mut remotes, &mut backends);
//! ```

mod backend;
mod client;

use std::sync::Arc;

use coldtier_core::{BackendStorageRegistry, RemoteStorageRegistry};

pub use backend::{S3BackendFactory, S3BackendStorage, S3BackendStorageFile};
pub use client::{S3RemoteStorageClient, S3RemoteStorageMaker};

/// Register the s3 adapter with both registries.
pub fn register(remotes: &mut RemoteStorageRegistry, backends: &mut BackendStorageRegistry) {
    remotes.register(Arc::new(S3RemoteStorageMaker));
    backends.register(Arc::new(S3BackendFactory));
}
