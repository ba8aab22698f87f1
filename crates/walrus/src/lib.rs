//! coldtier-walrus: Walrus adapter for coldtier storage backends
//!
//! Talks to a walrus store over its HTTP surface (aggregator endpoints
//! serve reads, publisher endpoints accept writes) and implements both the
//! remote mirror client and the volume tiering backend. Register the
//! adapter at startup:
//!
//! ```ignore
//! let mut remotes = RemoteStorageRegistry::new();
//! let mut backends = BackendStorageRegistry::new();
//! coldtier_walrus::register(&mut remotes, &mut backends);
//! ```

mod api;
mod backend;
mod client;

use std::sync::Arc;

use coldtier_core::{BackendStorageRegistry, RemoteStorageRegistry};

pub use backend::{WalrusBackendFactory, WalrusBackendStorage, WalrusBackendStorageFile};
pub use client::{WalrusRemoteStorageClient, WalrusRemoteStorageMaker};

/// Register the walrus adapter with both registries.
pub fn register(remotes: &mut RemoteStorageRegistry, backends: &mut BackendStorageRegistry) {
    remotes.register(Arc::new(WalrusRemoteStorageMaker));
    backends.register(Arc::new(WalrusBackendFactory));
}
