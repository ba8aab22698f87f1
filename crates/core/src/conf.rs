//! Backend configuration types
//!
//! A [`RemoteConf`] names one configured remote store for the mirror
//! contract; tiering backends are configured from a flat string property bag
//! consulted with a per-instance key prefix, so multiple named backends of
//! the same type can share one configuration namespace.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::KeyTemplate;

/// Named external-store configuration for the mirror contract. Immutable
/// once constructed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConf {
    /// Backend type name resolved through the registry, e.g. `s3`, `walrus`.
    pub storage_type: String,
    /// Logical instance name, used for operator-facing log labels and as
    /// the `storage_name` recorded in remote entries.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3RemoteConf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub walrus: Option<WalrusRemoteConf>,
}

/// Connection settings for an S3-compatible store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3RemoteConf {
    /// Endpoint URL; empty for the AWS default resolution.
    #[serde(default)]
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Path-style addressing, required by most self-hosted stores.
    #[serde(default)]
    pub force_path_style: bool,
}

/// Connection settings for a walrus store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalrusRemoteConf {
    /// Project (tenant) identifier; required for bucket-level operations.
    #[serde(default)]
    pub project_id: String,
    /// Read-tier endpoints.
    pub aggregator_urls: Vec<String>,
    /// Write-tier endpoints.
    pub publisher_urls: Vec<String>,
    /// Write durability horizon, in store epochs.
    #[serde(default = "default_epochs")]
    pub epochs: u32,
}

impl Default for WalrusRemoteConf {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            aggregator_urls: Vec::new(),
            publisher_urls: Vec::new(),
            epochs: default_epochs(),
        }
    }
}

fn default_epochs() -> u32 {
    5
}

/// Retry configuration shared by all backend operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

/// Read-only string property bag used to configure tiering backends.
pub trait StringProperties: Send + Sync {
    fn get_string(&self, key: &str) -> Option<&str>;
}

impl StringProperties for HashMap<String, String> {
    fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

/// Properties common to every tiering backend instance, parsed from the
/// property bag under the instance's key prefix.
#[derive(Debug, Clone)]
pub struct CommonBackendConf {
    /// Operator-facing label for log messages.
    pub remote_name: String,
    pub key_template_text: String,
    /// Compiled template; `None` means raw keys are used verbatim.
    pub key_template: Option<KeyTemplate>,
    /// Decoded key material. Reserved: accepted and stored, not yet wired
    /// into any cipher.
    pub encryption_key: Vec<u8>,
    /// Cipher suite name, e.g. AES-256-GCM. Reserved.
    pub encryption_suite: String,
}

impl CommonBackendConf {
    /// Parse the common properties. Malformed values (bad base64 key
    /// material, broken key template) fail construction so a partially
    /// configured backend is never returned.
    pub fn parse(config: &dyn StringProperties, prefix: &str) -> Result<Self> {
        let get = |key: &str| {
            config
                .get_string(&format!("{prefix}{key}"))
                .unwrap_or_default()
                .to_string()
        };

        let remote_name = get("remote_name");
        let key_template_text = get("key_template");
        let key_template = if key_template_text.is_empty() {
            None
        } else {
            Some(KeyTemplate::compile(&key_template_text)?)
        };

        let encoded_key = get("encryption_key");
        let encryption_key = if encoded_key.is_empty() {
            Vec::new()
        } else {
            BASE64.decode(&encoded_key).map_err(|e| {
                Error::Config(format!("{prefix}encryption_key is not valid base64: {e}"))
            })?
        };
        let encryption_suite = get("encryption_suite");

        Ok(Self {
            remote_name,
            key_template_text,
            key_template,
            encryption_key,
            encryption_suite,
        })
    }

    /// Export the instance configuration for persistence in volume-tier
    /// metadata.
    pub fn to_properties(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("remote_name".to_string(), self.remote_name.clone());
        if !self.key_template_text.is_empty() {
            m.insert("key_template".to_string(), self.key_template_text.clone());
        }
        m
    }
}
