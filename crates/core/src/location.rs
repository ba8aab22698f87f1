//! Remote storage locations
//!
//! A location names one object inside a configured remote store as a
//! `(storage name, bucket, path)` triple. The path is slash-rooted; the
//! object key sent to the store is the path without its leading separator.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifies an object in a named remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStorageLocation {
    /// Logical name of the configured remote store instance.
    pub name: String,
    /// Bucket within the store.
    pub bucket: String,
    /// Slash-rooted object path, e.g. `/dir/file.dat`.
    pub path: String,
}

impl RemoteStorageLocation {
    /// Create a location, normalizing the path to be slash-rooted.
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            name: name.into(),
            bucket: bucket.into(),
            path,
        }
    }

    /// The object key for the store: the path stripped of its leading
    /// separator.
    pub fn key(&self) -> &str {
        self.path.strip_prefix('/').unwrap_or(&self.path)
    }
}

impl std::fmt::Display for RemoteStorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}{}", self.name, self.bucket, self.path)
    }
}

/// Parse an operator-facing `name/bucket/path` string into a location.
///
/// The path part is optional and defaults to the bucket root.
pub fn parse_location(s: &str) -> Result<RemoteStorageLocation> {
    let trimmed = s.trim_matches('/');
    let mut parts = trimmed.splitn(3, '/');
    let name = parts.next().unwrap_or("");
    let bucket = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    if name.is_empty() || bucket.is_empty() {
        return Err(Error::InvalidPath(format!(
            "remote location {s:?} must be name/bucket[/path]"
        )));
    }

    Ok(RemoteStorageLocation::new(name, bucket, format!("/{path}")))
}
