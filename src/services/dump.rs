//! Runs the database dump tool and compresses its output into a single
//! backup artifact.

use crate::config::BackupSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::{Compression, write::GzEncoder};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("dump tool exited with {0}")]
    Failed(ExitStatus),
    #[error("failed to write dump output: {0}")]
    Io(#[from] io::Error),
}

/// One dump to produce.
#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub host: String,
    pub namespace: String,
    pub nice: Option<u32>,
    pub command: String,
    pub output: PathBuf,
}

impl DumpRequest {
    pub fn new(host: &str, namespace: &str, set: &BackupSet, output: PathBuf) -> Self {
        Self {
            host: host.to_string(),
            namespace: namespace.to_string(),
            nice: set.nice,
            command: set.dump_command.clone(),
            output,
        }
    }
}

/// Produces the backup artifact at `request.output`.
#[async_trait]
pub trait DumpTool: Send + Sync {
    async fn dump(&self, request: &DumpRequest) -> Result<(), DumpError>;
}

/// `<namespace>_<YYYYmmdd-HHMMSS>.asbackup.gz`
pub fn backup_file_name(namespace: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}.asbackup.gz", namespace, now.format("%Y%m%d-%H%M%S"))
}

/// Aerospike `asbackup` streaming to stdout, gzip level 1 on our side.
#[derive(Clone, Debug, Default)]
pub struct Asbackup;

impl Asbackup {
    /// `asbackup -h <host> [--nice N] -n <namespace> -r -o -`
    pub fn command(request: &DumpRequest) -> Command {
        let mut cmd = Command::new(&request.command);
        cmd.arg("-h").arg(&request.host);
        if let Some(nice) = request.nice {
            cmd.arg("--nice").arg(nice.to_string());
        }
        cmd.arg("-n")
            .arg(&request.namespace)
            .arg("-r")
            .arg("-o")
            .arg("-");
        cmd
    }

    fn run(request: &DumpRequest) -> Result<(), DumpError> {
        let mut cmd = Self::command(request);
        debug!("{:?} | gzip -1 > {}", cmd, request.output.display());

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| DumpError::Spawn {
                command: request.command.clone(),
                source,
            })?;

        let copied = match child.stdout.take() {
            Some(mut stdout) => compress_into(&mut stdout, &request.output),
            None => Err(io::Error::other("dump tool stdout was not captured")),
        };
        let status = child.wait()?;
        if !status.success() {
            let _ = std::fs::remove_file(&request.output);
            return Err(DumpError::Failed(status));
        }
        if let Err(err) = copied {
            let _ = std::fs::remove_file(&request.output);
            return Err(DumpError::Io(err));
        }
        Ok(())
    }
}

/// Gzip (fast level) everything from `reader` into a new file at `output`.
pub fn compress_into(reader: &mut impl io::Read, output: &Path) -> io::Result<u64> {
    let file = File::create(output)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
    let copied = io::copy(reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(copied)
}

#[async_trait]
impl DumpTool for Asbackup {
    async fn dump(&self, request: &DumpRequest) -> Result<(), DumpError> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || Self::run(&request))
            .await
            .map_err(|err| DumpError::Io(io::Error::other(err)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn request(nice: Option<u32>) -> DumpRequest {
        DumpRequest {
            host: "172.31.31.11".into(),
            namespace: "userdata".into(),
            nice,
            command: "asbackup".into(),
            output: PathBuf::from("/tmp/out.gz"),
        }
    }

    #[test]
    fn file_name_carries_namespace_and_timestamp() {
        let now = Utc.with_ymd_and_hms(2012, 12, 12, 10, 10, 10).unwrap();
        assert_eq!(
            backup_file_name("userdata", now),
            "userdata_20121212-101010.asbackup.gz"
        );
    }

    #[test]
    fn command_line_with_nice() {
        let cmd = Asbackup::command(&request(Some(30)));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.get_program(), "asbackup");
        assert_eq!(
            args,
            ["-h", "172.31.31.11", "--nice", "30", "-n", "userdata", "-r", "-o", "-"]
        );
    }

    #[test]
    fn command_line_without_nice() {
        let cmd = Asbackup::command(&request(None));
        assert!(!cmd.get_args().any(|a| a == "--nice"));
    }

    #[test]
    fn compressed_output_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dump.gz");
        let payload = b"namespace records ".repeat(100);

        let copied = compress_into(&mut payload.as_slice(), &out).unwrap();
        assert_eq!(copied, payload.len() as u64);

        let mut decoded = Vec::new();
        GzDecoder::new(File::open(&out).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(None);
        req.command = "/nonexistent/asbackup-binary".into();
        req.output = dir.path().join("dump.gz");

        let err = Asbackup.dump(&req).await.unwrap_err();
        assert!(matches!(err, DumpError::Spawn { .. }));
    }
}
