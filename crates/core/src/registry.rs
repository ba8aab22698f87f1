//! Backend registries
//!
//! Map storage type names to adapter constructors so callers can
//! instantiate configured clients without compile-time coupling to any
//! adapter crate. A registry is built once at process startup, populated by
//! each adapter's registration call, and handed by reference to whatever
//! needs backend lookup; registration is insert-only for the process
//! lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{BackendStorage, BackendStorageFactory};
use crate::conf::{RemoteConf, StringProperties};
use crate::error::{Error, Result};
use crate::remote::{RemoteStorageClient, RemoteStorageMaker};

/// Registry of remote mirror client makers, keyed by storage type.
#[derive(Default)]
pub struct RemoteStorageRegistry {
    makers: HashMap<&'static str, Arc<dyn RemoteStorageMaker>>,
}

impl RemoteStorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a maker under its own storage type name. A later
    /// registration for the same type replaces the earlier one.
    pub fn register(&mut self, maker: Arc<dyn RemoteStorageMaker>) {
        self.makers.insert(maker.storage_type(), maker);
    }

    pub fn lookup(&self, storage_type: &str) -> Result<&Arc<dyn RemoteStorageMaker>> {
        self.makers.get(storage_type).ok_or_else(|| {
            Error::Config(format!(
                "remote storage type {storage_type} is not registered"
            ))
        })
    }

    /// Maker-level capability flag, available before any client is
    /// constructed.
    pub fn has_bucket(&self, storage_type: &str) -> Result<bool> {
        Ok(self.lookup(storage_type)?.has_bucket())
    }

    /// Resolve the configuration's storage type and construct a client.
    pub async fn make_client(&self, conf: &RemoteConf) -> Result<Arc<dyn RemoteStorageClient>> {
        self.lookup(&conf.storage_type)?.make(conf).await
    }

    /// Registered type names, sorted for stable operator-facing output.
    pub fn storage_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.makers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

/// Registry of tiering backend factories, keyed by storage type.
#[derive(Default)]
pub struct BackendStorageRegistry {
    factories: HashMap<&'static str, Arc<dyn BackendStorageFactory>>,
}

impl BackendStorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn BackendStorageFactory>) {
        self.factories.insert(factory.storage_type(), factory);
    }

    pub fn lookup(&self, storage_type: &str) -> Result<&Arc<dyn BackendStorageFactory>> {
        self.factories.get(storage_type).ok_or_else(|| {
            Error::Config(format!(
                "backend storage type {storage_type} is not registered"
            ))
        })
    }

    /// Resolve the type name and build a configured backend instance.
    pub async fn build_storage(
        &self,
        storage_type: &str,
        config: &dyn StringProperties,
        prefix: &str,
        id: &str,
    ) -> Result<Arc<dyn BackendStorage>> {
        self.lookup(storage_type)?
            .build_storage(config, prefix, id)
            .await
    }

    /// Registered type names, sorted for stable operator-facing output.
    pub fn storage_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct StubMaker {
        has_bucket: bool,
    }

    #[async_trait]
    impl RemoteStorageMaker for StubMaker {
        fn storage_type(&self) -> &'static str {
            "stub"
        }

        fn has_bucket(&self) -> bool {
            self.has_bucket
        }

        async fn make(&self, conf: &RemoteConf) -> Result<Arc<dyn RemoteStorageClient>> {
            Err(Error::Config(format!(
                "remote storage {} has no stub configuration",
                conf.name
            )))
        }
    }

    #[test]
    fn test_lookup_unregistered_type_is_config_error() {
        let registry = RemoteStorageRegistry::new();
        let err = registry.lookup("nope").unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("not registered")));
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = RemoteStorageRegistry::new();
        registry.register(Arc::new(StubMaker { has_bucket: true }));

        assert!(registry.lookup("stub").is_ok());
        assert_eq!(registry.has_bucket("stub").unwrap(), true);
        assert_eq!(registry.storage_types(), vec!["stub"]);
    }

    #[test]
    fn test_has_bucket_before_construction() {
        let mut registry = RemoteStorageRegistry::new();
        registry.register(Arc::new(StubMaker { has_bucket: false }));

        // The capability flag is answered by the maker alone; no client is
        // ever constructed.
        assert_eq!(registry.has_bucket("stub").unwrap(), false);
    }

    #[tokio::test]
    async fn test_make_client_surfaces_maker_error() {
        let mut registry = RemoteStorageRegistry::new();
        registry.register(Arc::new(StubMaker { has_bucket: true }));

        let conf = RemoteConf {
            storage_type: "stub".to_string(),
            name: "cold1".to_string(),
            ..Default::default()
        };
        let err = registry.make_client(&conf).await.unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("cold1")));
    }

    #[tokio::test]
    async fn test_make_client_unknown_type() {
        let registry = RemoteStorageRegistry::new();
        let conf = RemoteConf {
            storage_type: "ghost".to_string(),
            name: "x".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            registry.make_client(&conf).await,
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_backend_registry_lookup_unregistered() {
        let registry = BackendStorageRegistry::new();
        assert!(matches!(registry.lookup("nope"), Err(Error::Config(_))));
    }
}
