use crate::services::{digest::DigestError, dump::DumpError, object_store::GatewayError};
use std::io;
use thiserror::Error;

/// Everything that can end a backup run early, with its process exit code.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("bad arguments: {0}")]
    BadArgs(String),

    #[error("host ({host}) or namespace ({namespace}) is not present in configuration")]
    UnknownTarget { host: String, namespace: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("can not create backup file ({host}:{namespace}): {source}")]
    DumpFailed {
        host: String,
        namespace: String,
        #[source]
        source: DumpError,
    },

    #[error("backup size {size} is not above the estimated minimum {min}")]
    TooSmall { size: u64, min: u64 },

    #[error("backup size {size} exceeds the estimated maximum {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("object `{key}` does not exist in bucket `{bucket}` after upload")]
    NotUploaded { bucket: String, key: String },

    #[error("local md5 != remote md5 for `{key}` (remote etag {remote})")]
    ChecksumMismatch { key: String, remote: String },

    #[error("webhook report failed: {0}")]
    ReportFailed(String),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BackupError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        if self.is_permission_denied() {
            return 3;
        }
        match self {
            Self::BadArgs(_) => 1,
            Self::UnknownTarget { .. } => 2,
            Self::PermissionDenied(_) => 3,
            Self::DumpFailed { .. } => 4,
            Self::TooSmall { .. } => 5,
            Self::TooLarge { .. } => 6,
            Self::NotUploaded { .. } => 7,
            Self::ChecksumMismatch { .. } | Self::ReportFailed(_) => 8,
            Self::Digest(_) | Self::Gateway(_) | Self::Io(_) => 1,
        }
    }

    fn is_permission_denied(&self) -> bool {
        let kind = match self {
            Self::PermissionDenied(_) => return true,
            Self::Io(err) => Some(err.kind()),
            Self::Gateway(GatewayError::Io(err)) => Some(err.kind()),
            Self::Digest(err) => err.io_kind(),
            _ => None,
        };
        kind == Some(io::ErrorKind::PermissionDenied)
    }
}
