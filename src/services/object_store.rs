//! src/services/object_store.rs
//!
//! Gateway to the object store holding remote backup copies. The backup
//! flow only needs existence checks, ETag lookups, paginated prefix
//! listings, whole-file transfers and deletes.

use crate::models::{object::StoredObject, progress::TransferProgress};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::{io, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object store request failed: {0}")]
    Sdk(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Operations the backup flow performs against an object store.
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    /// ETag of `key` without quotes, or `None` when the object is missing.
    async fn head_checksum_token(&self, bucket: &str, key: &str) -> GatewayResult<Option<String>>;

    async fn exists(&self, bucket: &str, key: &str) -> GatewayResult<bool> {
        Ok(self.head_checksum_token(bucket, key).await?.is_some())
    }

    /// Lazily page through every object whose key starts with `prefix`.
    /// The stream is finite and can be consumed once.
    fn list_prefix<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, GatewayResult<StoredObject>>;

    /// Upload the file at `local_path` to `key`, reporting into `progress`.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: &mut TransferProgress,
    ) -> GatewayResult<()>;

    /// Download `key` into `local_path`, reporting into `progress`.
    async fn download(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: &mut TransferProgress,
    ) -> GatewayResult<()>;

    async fn delete(&self, bucket: &str, key: &str) -> GatewayResult<()>;
}

/// Strip the quotes S3 wraps ETags in.
pub fn unquote_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquotes_etags() {
        assert_eq!(unquote_etag("\"abc-2\""), "abc-2");
        assert_eq!(unquote_etag("abc"), "abc");
    }
}
