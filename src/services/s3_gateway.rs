//! S3-compatible implementation of [`ObjectStoreGateway`].
//!
//! Credentials come from the ambient AWS provider chain. An explicit
//! endpoint switches to path-style addressing for MinIO and friends.

use crate::{
    config::StorageSettings,
    models::{object::StoredObject, progress::TransferProgress},
    services::{
        object_store::{GatewayError, GatewayResult, ObjectStoreGateway, unquote_etag},
        part_sizer::{AWS_CLI_PART_SIZE, MAX_PART_COUNT, part_count_for, upload_part_size},
    },
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::Region,
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::DateTime;
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Parts in flight during a multipart upload.
const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// One byte range of a multipart upload.
#[derive(Clone, Copy, Debug)]
struct PartSpan {
    number: i32,
    offset: u64,
    len: u64,
}

/// Split `file_size` bytes at `part_size`, refusing splits S3 would reject
/// part-way through the transfer.
fn part_spans(file_size: u64, part_size: u64) -> GatewayResult<Vec<PartSpan>> {
    let part_count = part_count_for(file_size, part_size);
    if part_count > MAX_PART_COUNT {
        return Err(GatewayError::Sdk(format!(
            "{} bytes at {} bytes per part needs {} parts, more than {}",
            file_size, part_size, part_count, MAX_PART_COUNT
        )));
    }
    (0..part_count)
        .map(|index| {
            let offset = index * part_size;
            let number = i32::try_from(index + 1).map_err(|_| {
                GatewayError::Sdk(format!("part number {} out of range", index + 1))
            })?;
            Ok(PartSpan {
                number,
                offset,
                len: part_size.min(file_size - offset),
            })
        })
        .collect()
}

/// Listing cursor.
enum Page {
    First,
    Next(String),
    Done,
}

#[derive(Clone)]
pub struct S3Gateway {
    client: Client,
    /// Preferred part size for multipart uploads. Defaults to the AWS CLI
    /// size so that the resulting ETag is always reconcilable.
    part_size: u64,
    max_concurrency: usize,
}

impl S3Gateway {
    pub async fn new(settings: &StorageSettings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            part_size: AWS_CLI_PART_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    async fn next_page(
        &self,
        bucket: &str,
        prefix: &str,
        page: Page,
    ) -> GatewayResult<Option<(Vec<StoredObject>, Page)>> {
        let token = match page {
            Page::Done => return Ok(None),
            Page::First => None,
            Page::Next(token) => Some(token),
        };

        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|err| {
                GatewayError::Sdk(format!(
                    "failed to list s3://{}/{}: {}",
                    bucket,
                    prefix,
                    DisplayErrorContext(&err)
                ))
            })?;

        let objects: Vec<StoredObject> = response
            .contents()
            .iter()
            .map(|obj| StoredObject {
                key: obj.key().unwrap_or_default().to_string(),
                last_modified: obj
                    .last_modified()
                    .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
                    .unwrap_or_default(),
                checksum_token: obj.e_tag().map(unquote_etag).unwrap_or_default(),
                size_bytes: obj.size().unwrap_or(0).max(0) as u64,
                storage_class: obj
                    .storage_class()
                    .map(|class| class.as_str().to_string())
                    .unwrap_or_else(|| "STANDARD".into()),
            })
            .collect();
        debug!(bucket, prefix, count = objects.len(), "listed page");

        let next = match response.next_continuation_token() {
            Some(token) if response.is_truncated().unwrap_or(false) => {
                Page::Next(token.to_string())
            }
            _ => Page::Done,
        };
        Ok(Some((objects, next)))
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: &mut TransferProgress,
    ) -> GatewayResult<()> {
        let body = Bytes::from(fs::read(local_path).await?);
        let len = body.len() as u64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_md5(content_md5(&body))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                GatewayError::Sdk(format!(
                    "failed to upload s3://{}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&err)
                ))
            })?;
        progress.record(len);
        Ok(())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        local_path: &Path,
        span: PartSpan,
    ) -> GatewayResult<(CompletedPart, u64)> {
        let part_number = span.number;
        let mut file = File::open(local_path).await?;
        file.seek(SeekFrom::Start(span.offset)).await?;
        let mut data = vec![0u8; span.len as usize];
        file.read_exact(&mut data).await?;
        let data = Bytes::from(data);

        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_md5(content_md5(&data))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| {
                GatewayError::Sdk(format!(
                    "failed to upload part {} of s3://{}/{}: {}",
                    part_number,
                    bucket,
                    key,
                    DisplayErrorContext(&err)
                ))
            })?;

        let part = CompletedPart::builder()
            .part_number(part_number)
            .set_e_tag(output.e_tag().map(str::to_string))
            .build();
        Ok((part, span.len))
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        local_path: &Path,
        spans: Vec<PartSpan>,
        progress: &mut TransferProgress,
    ) -> GatewayResult<Vec<CompletedPart>> {
        let mut parts = Vec::with_capacity(spans.len());
        let mut uploads = stream::iter(spans)
            .map(|span| self.upload_part(bucket, key, upload_id, local_path, span))
            .buffered(self.max_concurrency);

        while let Some(result) = uploads.next().await {
            let (part, len) = result?;
            progress.record(len);
            parts.push(part);
        }
        Ok(parts)
    }

    async fn upload_multipart(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        part_size: u64,
        file_size: u64,
        progress: &mut TransferProgress,
    ) -> GatewayResult<()> {
        let spans = part_spans(file_size, part_size)?;
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                GatewayError::Sdk(format!(
                    "failed to start multipart upload of s3://{}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&err)
                ))
            })?;
        let upload_id = created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Sdk("multipart upload returned no upload id".into()))?;

        let parts = match self
            .upload_parts(bucket, key, &upload_id, local_path, spans, progress)
            .await
        {
            Ok(parts) => parts,
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        "failed to abort multipart upload {}: {}",
                        upload_id,
                        DisplayErrorContext(&abort_err)
                    );
                }
                return Err(err);
            }
        };

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| {
                GatewayError::Sdk(format!(
                    "failed to complete multipart upload of s3://{}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStoreGateway for S3Gateway {
    async fn head_checksum_token(&self, bucket: &str, key: &str) -> GatewayResult<Option<String>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(head) => Ok(Some(head.e_tag().map(unquote_etag).unwrap_or_default())),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(GatewayError::Sdk(format!(
                "failed to head s3://{}/{}: {}",
                bucket,
                key,
                DisplayErrorContext(&err)
            ))),
        }
    }

    fn list_prefix<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, GatewayResult<StoredObject>> {
        stream::try_unfold(Page::First, move |page| self.next_page(bucket, prefix, page))
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
        let file_size = fs::metadata(local_path).await?.len();
        progress.set_total(file_size);

        if file_size <= self.part_size {
            self.put_single(bucket, key, local_path, progress).await
        } else {
            let part_size = upload_part_size(file_size, self.part_size);
            info!(
                bucket,
                key,
                part_size,
                parts = part_count_for(file_size, part_size),
                "starting multipart upload"
            );
            self.upload_multipart(bucket, key, local_path, part_size, file_size, progress)
                .await
        }
    }

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: &mut TransferProgress,
    ) -> GatewayResult<()> {
        let mut response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(GatewayError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            Err(err) => {
                return Err(GatewayError::Sdk(format!(
                    "failed to download s3://{}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&err)
                )));
            }
        };
        progress.set_total(response.content_length().unwrap_or(0).max(0) as u64);

        let tmp_path = temp_sibling(local_path);
        let mut file = File::create(&tmp_path).await?;
        loop {
            let chunk = match response.body.try_next().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(GatewayError::Sdk(format!(
                        "failed to read body of s3://{}/{}: {}",
                        bucket, key, err
                    )));
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(GatewayError::Io(err));
            }
            progress.record(chunk.len() as u64);
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(GatewayError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, local_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(GatewayError::Io(err));
        }
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> GatewayResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                GatewayError::Sdk(format!(
                    "failed to delete s3://{}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }
}

/// Base64 MD5 for the `Content-MD5` header.
fn content_md5(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(md5::compute(data).0)
}

/// `.tmp-<uuid>` file next to `path`, renamed into place once complete.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parent.join(format!(".tmp-{}", Uuid::new_v4()))
}
