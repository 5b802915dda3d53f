//! In-memory implementation of [`ObjectStoreGateway`] for testing.
//!
//! Objects get the same ETags S3 would assign: a plain MD5 for uploads up
//! to `part_size`, a multipart digest-of-digests above it.

use crate::{
    models::{object::StoredObject, progress::TransferProgress},
    services::object_store::{GatewayError, GatewayResult, ObjectStoreGateway},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{
    StreamExt, TryStreamExt, future,
    stream::{self, BoxStream},
};
use std::{
    collections::BTreeMap,
    ops::Bound,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::fs;

/// Simulated upload failures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UploadFault {
    #[default]
    None,
    /// Report success but never store the object.
    Drop,
    /// Store the object with one byte flipped.
    Corrupt,
}

#[derive(Clone, Debug)]
struct MemoryObject {
    data: Vec<u8>,
    etag: String,
    last_modified: DateTime<Utc>,
    storage_class: String,
}

type Objects = BTreeMap<(String, String), MemoryObject>;

enum Cursor {
    Start,
    After(String),
    Done,
}

#[derive(Clone)]
pub struct MemoryStore {
    objects: Arc<Mutex<Objects>>,
    part_size: usize,
    page_size: usize,
    fault: UploadFault,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::services::part_sizer::AWS_CLI_PART_SIZE as usize)
    }
}

impl MemoryStore {
    pub fn new(part_size: usize) -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            part_size: part_size.max(1),
            page_size: 1000,
            fault: UploadFault::None,
        }
    }

    /// Listing page size (S3 returns up to 1000 keys per page).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_fault(mut self, fault: UploadFault) -> Self {
        self.fault = fault;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ETag the store assigns to `data`.
    pub fn etag_for(&self, data: &[u8]) -> String {
        if data.len() <= self.part_size {
            return format!("{:x}", md5::compute(data));
        }
        let mut outer = md5::Context::new();
        let mut parts = 0;
        for chunk in data.chunks(self.part_size) {
            outer.consume(md5::compute(chunk).0);
            parts += 1;
        }
        format!("{:x}-{}", outer.compute(), parts)
    }

    /// Seed an object with an explicit modification time.
    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>, last_modified: DateTime<Utc>) {
        let etag = self.etag_for(&data);
        self.lock().insert(
            (bucket.to_string(), key.to_string()),
            MemoryObject {
                data,
                etag,
                last_modified,
                storage_class: "STANDARD".into(),
            },
        );
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.lock()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn object_count(&self) -> usize {
        self.lock().len()
    }

    pub fn data(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.data.clone())
    }

    /// Next listing page after `cursor`, keyed the way S3 pages are.
    fn next_page(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Cursor,
    ) -> GatewayResult<Option<(Vec<StoredObject>, Cursor)>> {
        let lower = match cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => Bound::Included((bucket.to_string(), prefix.to_string())),
            Cursor::After(key) => Bound::Excluded((bucket.to_string(), key)),
        };
        let objects = self.lock();
        let page: Vec<StoredObject> = objects
            .range((lower, Bound::Unbounded))
            .take_while(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .take(self.page_size)
            .map(|((_, key), object)| StoredObject {
                key: key.clone(),
                last_modified: object.last_modified,
                checksum_token: object.etag.clone(),
                size_bytes: object.data.len() as u64,
                storage_class: object.storage_class.clone(),
            })
            .collect();

        let next = match page.last() {
            Some(last) if page.len() == self.page_size => Cursor::After(last.key.clone()),
            _ => Cursor::Done,
        };
        Ok(Some((page, next)))
    }
}

#[async_trait]
impl ObjectStoreGateway for MemoryStore {
    async fn head_checksum_token(&self, bucket: &str, key: &str) -> GatewayResult<Option<String>> {
        Ok(self
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.etag.clone()))
    }

    fn list_prefix<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, GatewayResult<StoredObject>> {
        stream::try_unfold(Cursor::Start, move |cursor| {
            future::ready(self.next_page(bucket, prefix, cursor))
        })
        .map_ok(|objects| stream::iter(objects.into_iter().map(Ok::<_, GatewayError>)))
        .try_flatten()
        .boxed()
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: &mut TransferProgress,
    ) -> GatewayResult<()> {
        let mut data = fs::read(local_path).await?;
        progress.set_total(data.len() as u64);
        for chunk in data.chunks(self.part_size) {
            progress.record(chunk.len() as u64);
        }

        match self.fault {
            UploadFault::Drop => return Ok(()),
            UploadFault::Corrupt => {
                if let Some(first) = data.first_mut() {
                    *first ^= 0xff;
                }
            }
            UploadFault::None => {}
        }
        self.insert(bucket, key, data, Utc::now());
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: &mut TransferProgress,
    ) -> GatewayResult<()> {
        let data = self.data(bucket, key).ok_or_else(|| GatewayError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        progress.set_total(data.len() as u64);
        fs::write(local_path, &data).await?;
        progress.record(data.len() as u64);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> GatewayResult<()> {
        self.lock().remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
