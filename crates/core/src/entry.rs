//! File entry metadata exchanged with remote stores
//!
//! An [`Entry`] describes the local side of a file; a [`RemoteEntry`] mirrors
//! what the remote store reported back after a write. The extended-attribute
//! map on the entry is the source of truth for user metadata synced to the
//! remote object.

use std::collections::HashMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Extended-attribute keys carrying this prefix are internal bookkeeping and
/// must never be pushed to a remote store.
pub const INTERNAL_XATTR_PREFIX: &str = "X-";

/// Local file or directory metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    pub is_directory: bool,
    pub file_size: u64,
    /// Local modification time, epoch seconds.
    pub mtime: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// User metadata, mirrored to the remote object's metadata on write.
    #[serde(default)]
    pub extended: HashMap<String, Vec<u8>>,
}

/// Remote-side mirror of an entry's observable state, produced by the
/// read-back that follows every successful write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Remote modification time, epoch seconds.
    pub remote_mtime: i64,
    pub remote_size: u64,
    /// Opaque content fingerprint reported by the store.
    pub remote_etag: String,
    /// Name of the storage instance that produced this entry.
    pub storage_name: String,
}

/// A bucket in a remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

/// Volume-tier metadata carried by a tiered-file handle. Opaque to the
/// storage contracts; persisted by the surrounding volume subsystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeTierInfo {
    pub volume_id: u32,
    pub collection: String,
    pub replication: String,
    pub file_size: u64,
    /// Epoch seconds of the last local modification before tiering.
    pub modified_at: i64,
}

/// Convert extended attributes into remote object metadata.
///
/// Keys with the [`INTERNAL_XATTR_PREFIX`] are dropped; values are carried
/// as UTF-8 text (lossy for non-UTF-8 bytes).
pub fn to_remote_metadata(extended: &HashMap<String, Vec<u8>>) -> HashMap<String, String> {
    extended
        .iter()
        .filter(|(k, _)| !k.starts_with(INTERNAL_XATTR_PREFIX))
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_keys_are_filtered() {
        let mut extended = HashMap::new();
        extended.insert("owner".to_string(), b"alice".to_vec());
        extended.insert("X-internal-flag".to_string(), b"1".to_vec());

        let metadata = to_remote_metadata(&extended);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get("owner").map(String::as_str), Some("alice"));
        assert!(!metadata.contains_key("X-internal-flag"));
    }

    #[test]
    fn test_non_utf8_values_are_lossy() {
        let mut extended = HashMap::new();
        extended.insert("raw".to_string(), vec![0xff, 0xfe]);

        let metadata = to_remote_metadata(&extended);
        assert_eq!(metadata.get("raw").map(String::as_str), Some("\u{fffd}\u{fffd}"));
    }

    #[test]
    fn test_extended_deep_equality() {
        let mut a = HashMap::new();
        a.insert("k".to_string(), b"v".to_vec());
        let mut b = HashMap::new();
        b.insert("k".to_string(), b"v".to_vec());
        assert_eq!(a, b);

        b.insert("k2".to_string(), b"v2".to_vec());
        assert_ne!(a, b);
    }

    #[test]
    fn test_remote_entry_serialization() {
        let entry = RemoteEntry {
            remote_mtime: 1_700_000_000,
            remote_size: 1024,
            remote_etag: "abc123".to_string(),
            storage_name: "cloud1".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"remote_size\":1024"));
        let back: RemoteEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
