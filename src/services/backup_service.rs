//! src/services/backup_service.rs
//!
//! BackupService: the `create`, `list` and `get` flows. It wires the dump
//! tool, the object store gateway, checksum reconciliation, retention and
//! webhook reporting together. Every failure surfaces as a `BackupError`
//! carrying the process exit code.

use crate::{
    config::BackupSet,
    errors::BackupError,
    models::{object::StoredObject, policy::RetentionPolicy, progress::TransferProgress},
    services::{
        dump::{DumpRequest, DumpTool, backup_file_name},
        notifier::Notifier,
        object_store::ObjectStoreGateway,
        reconciler::ChecksumReconciler,
        retention,
    },
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tokio::fs;
use tracing::{debug, error, info, warn};

const MIB: f64 = 1024.0 * 1024.0;

/// A configured host/namespace pair.
#[derive(Clone, Copy, Debug)]
pub struct BackupTarget<'a> {
    pub host: &'a str,
    pub namespace: &'a str,
    pub set: &'a BackupSet,
}

impl BackupTarget<'_> {
    /// Prefix under which every backup of this namespace lives.
    pub fn remote_prefix(&self) -> String {
        format!("{}/{}", self.set.s3_path, self.namespace)
    }

    fn remote_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.set.s3_path, file_name)
    }

    fn label(&self) -> String {
        format!("{}:{}", self.host, self.namespace)
    }
}

/// Result of comparing a remote object with its local source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    /// The object exists but none of the regenerated tokens matches.
    Mismatch { remote: String },
    /// Nothing stored under the key.
    NotFound,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Keys selected by the retention policy.
    pub expired: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct CreateReport {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub size_bytes: u64,
    pub prune: PruneReport,
}

#[derive(Clone)]
pub struct BackupService {
    gateway: Arc<dyn ObjectStoreGateway>,
    notifier: Arc<dyn Notifier>,
    dump: Arc<dyn DumpTool>,
    reconciler: ChecksumReconciler,
    always_report: bool,
}

impl BackupService {
    pub fn new(
        gateway: Arc<dyn ObjectStoreGateway>,
        notifier: Arc<dyn Notifier>,
        dump: Arc<dyn DumpTool>,
        always_report: bool,
    ) -> Self {
        Self {
            gateway,
            notifier,
            dump,
            reconciler: ChecksumReconciler::default(),
            always_report,
        }
    }

    pub fn with_reconciler(mut self, reconciler: ChecksumReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Log `msg` as an error, post it to the webhook and hand back `err`.
    async fn fail(&self, msg: String, err: BackupError) -> BackupError {
        error!("{}", msg);
        self.notifier.report(&msg).await;
        err
    }

    /// Dump, upload, verify, report and prune.
    ///
    /// `now` names the artifact and anchors the retention window. With
    /// `dry_run` expired remote copies are only logged.
    pub async fn create(
        &self,
        target: BackupTarget<'_>,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<CreateReport, BackupError> {
        let started = Instant::now();
        let set = target.set;
        fs::create_dir_all(&set.local_path)
            .await
            .map_err(|err| permission_or_io(err, &set.local_path))?;

        let file_name = backup_file_name(target.namespace, now);
        let local_path = set.local_path.join(&file_name);

        info!("Executing dump tool...");
        let request = DumpRequest::new(target.host, target.namespace, set, local_path.clone());
        if let Err(source) = self.dump.dump(&request).await {
            let msg = format!("[ERR] Can not create asbackup file. ({})", target.label());
            return Err(self
                .fail(
                    msg,
                    BackupError::DumpFailed {
                        host: target.host.to_string(),
                        namespace: target.namespace.to_string(),
                        source,
                    },
                )
                .await);
        }

        let size_bytes = fs::metadata(&local_path)
            .await
            .map_err(|err| permission_or_io(err, &local_path))?
            .len();
        if let Err(err) = check_size(size_bytes, set) {
            let msg = format!("[ERR] Estimated file size is not OK! ({})", target.label());
            return Err(self.fail(msg, err).await);
        }

        let remote_key = target.remote_key(&file_name);
        info!(
            "Uploading {} to s3://{}/{}...",
            local_path.display(),
            set.s3_bucket,
            remote_key
        );
        let upload_started = Instant::now();
        let mut progress = TransferProgress::new("File uploaded for", size_bytes);
        self.gateway
            .upload(&set.s3_bucket, &remote_key, &local_path, &mut progress)
            .await?;
        info!(
            "File successfully uploaded in {:4.2} minutes!",
            upload_started.elapsed().as_secs_f64() / 60.0
        );

        match self
            .verify_upload(&set.s3_bucket, &remote_key, &local_path)
            .await?
        {
            VerifyOutcome::Verified => info!("s3 md5sum equals local md5sum."),
            VerifyOutcome::NotFound => {
                let msg = format!(
                    "[ERR] File does not exist on S3. Upload error! ({})",
                    target.label()
                );
                let err = BackupError::NotUploaded {
                    bucket: set.s3_bucket.clone(),
                    key: remote_key,
                };
                return Err(self.fail(msg, err).await);
            }
            VerifyOutcome::Mismatch { remote } => {
                let msg = format!("[ERR] local md5 != remote md5 ({})", target.label());
                let err = BackupError::ChecksumMismatch {
                    key: remote_key,
                    remote,
                };
                return Err(self.fail(msg, err).await);
            }
        }

        if set.remove_local {
            info!("Removing file {}...", local_path.display());
            fs::remove_file(&local_path)
                .await
                .map_err(|err| permission_or_io(err, &local_path))?;
        }

        let msg = format!(
            "Namespace {} successfully backed up from host {} in {:.2} minutes. Backup size - {:4.2} Mbytes.",
            target.namespace,
            target.host,
            started.elapsed().as_secs_f64() / 60.0,
            size_bytes as f64 / MIB
        );
        info!("{}", msg);
        if self.always_report {
            match self.notifier.post(&msg).await {
                Ok(200) => {}
                Ok(status) => {
                    error!("Wrong HTTP code {}. Slack messaging error!", status);
                    return Err(BackupError::ReportFailed(format!("HTTP {}", status)));
                }
                Err(err) => {
                    error!("Slack messaging error: {}", err);
                    return Err(BackupError::ReportFailed(err.to_string()));
                }
            }
        }
        info!("Done!");

        let prune = self
            .prune(
                &set.s3_bucket,
                &target.remote_prefix(),
                &set.retention_policy(),
                now,
                dry_run,
            )
            .await?;

        Ok(CreateReport {
            local_path,
            remote_key,
            size_bytes,
            prune,
        })
    }

    /// Compare the stored object's ETag with tokens regenerated from
    /// `local_path`. A missing object is reported apart from a mismatch.
    pub async fn verify_upload(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<VerifyOutcome, BackupError> {
        let Some(remote) = self.gateway.head_checksum_token(bucket, key).await? else {
            return Ok(VerifyOutcome::NotFound);
        };
        info!("s3 file does exist - OK!");
        debug!("s3 etag: {}", remote);

        let reconciler = self.reconciler.clone();
        let path = local_path.to_path_buf();
        let token = remote.clone();
        let verified = tokio::task::spawn_blocking(move || reconciler.verify(&token, &path))
            .await
            .map_err(|err| BackupError::Io(io::Error::other(err)))??;

        Ok(if verified {
            VerifyOutcome::Verified
        } else {
            VerifyOutcome::Mismatch { remote }
        })
    }

    /// Every object under the namespace prefix, sorted by key.
    pub async fn list(&self, target: BackupTarget<'_>) -> Result<Vec<StoredObject>, BackupError> {
        let prefix = target.remote_prefix();
        let mut objects: Vec<StoredObject> = self
            .gateway
            .list_prefix(&target.set.s3_bucket, &prefix)
            .try_collect()
            .await?;
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    /// Download `key` from the target bucket into `destination`.
    pub async fn get(
        &self,
        target: BackupTarget<'_>,
        key: &str,
        destination: &Path,
    ) -> Result<(), BackupError> {
        info!("Downloading {} from s3://{}", key, target.set.s3_bucket);
        let started = Instant::now();
        let mut progress = TransferProgress::new("File downloaded for", 0);
        self.gateway
            .download(&target.set.s3_bucket, key, destination, &mut progress)
            .await?;
        info!(
            "File successfully downloaded in {:4.2} minutes!",
            started.elapsed().as_secs_f64() / 60.0
        );
        Ok(())
    }

    /// Walk the listing under `prefix` and remove what `policy` expires.
    /// Individual delete failures are logged and collected, not fatal.
    pub async fn prune(
        &self,
        bucket: &str,
        prefix: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<PruneReport, BackupError> {
        info!("Removing old s3 files...");
        let objects: Vec<StoredObject> = self
            .gateway
            .list_prefix(bucket, prefix)
            .try_collect()
            .await?;

        let mut report = PruneReport {
            dry_run,
            ..PruneReport::default()
        };
        for object in retention::expired(&objects, now, policy) {
            report.expired.push(object.key.clone());
            if dry_run {
                info!("Would remove s3 file {} (dry run)", object.key);
                continue;
            }
            info!("Removing s3 file {}...", object.key);
            match self.gateway.delete(bucket, &object.key).await {
                Ok(()) => report.deleted.push(object.key.clone()),
                Err(err) => {
                    warn!("Client error: {}", err);
                    report.failed.push(object.key.clone());
                }
            }
        }
        Ok(report)
    }
}

/// Reject artifacts whose size falls outside the configured estimate.
pub fn check_size(size_bytes: u64, set: &BackupSet) -> Result<(), BackupError> {
    debug!("File size: {}", size_bytes);
    debug!("Estimated MIN size: {}", set.estimated_min_size);
    debug!("Estimated MAX size: {}", set.estimated_max_size);
    if size_bytes <= set.estimated_min_size {
        return Err(BackupError::TooSmall {
            size: size_bytes,
            min: set.estimated_min_size,
        });
    }
    if size_bytes > set.estimated_max_size {
        return Err(BackupError::TooLarge {
            size: size_bytes,
            max: set.estimated_max_size,
        });
    }
    Ok(())
}

/// Total listing size in MBytes.
pub fn total_megabytes(objects: &[StoredObject]) -> f64 {
    crate::models::object::total_size(objects) as f64 / MIB
}

fn permission_or_io(err: io::Error, path: &Path) -> BackupError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        BackupError::PermissionDenied(format!("{}: {}", path.display(), err))
    } else {
        BackupError::Io(err)
    }
}
