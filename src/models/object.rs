//! Represents an object (backup artifact) as reported by a bucket listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single remote object within a bucket.
///
/// This is a snapshot of one listing entry. It is created by the gateway
/// while paging through a prefix and never mutated afterwards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Timestamp when the object was last modified.
    pub last_modified: DateTime<Utc>,

    /// ETag as emitted by the store, without the surrounding quotes.
    /// Either `<hex>` or `<hex>-<partCount>`.
    pub checksum_token: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Storage class (e.g., STANDARD, GLACIER).
    pub storage_class: String,
}

impl fmt::Display for StoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:>14} {} {}",
            self.last_modified.format("%Y-%m-%d %H:%M:%S"),
            self.storage_class,
            self.size_bytes,
            self.checksum_token,
            self.key
        )
    }
}

/// Sum of the sizes of every object in a listing.
pub fn total_size(objects: &[StoredObject]) -> u64 {
    objects.iter().map(|o| o.size_bytes).sum()
}
