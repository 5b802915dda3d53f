use crate::{errors::BackupError, models::policy::RetentionPolicy};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "backup.toml";
pub const DEFAULT_DUMP_COMMAND: &str = "asbackup";

/// Centralized run configuration.
/// Combines CLI arguments with environment fallbacks.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub namespace: String,
    pub action: Action,
    pub s3_key: Option<String>,
    pub filename: Option<PathBuf>,
    pub config_path: PathBuf,
    /// Log expired remote copies instead of deleting them.
    pub dry_run: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Dump, upload, verify and prune
    Create,
    /// List remote backups of the namespace
    List,
    /// Download a remote backup
    Get,
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Dump a database namespace and keep verified copies in S3",
    after_help = "Example: asbackup-s3 172.31.31.11 userdata get us/userdata_20121212-101010.asbackup.gz ./us_latest.asbackup.gz"
)]
pub struct Args {
    /// Database host to dump
    pub host: String,

    /// Namespace to dump
    pub namespace: String,

    #[arg(value_enum)]
    pub action: Action,

    /// Remote key to download (get only)
    pub s3_key: Option<String>,

    /// Local destination file (get only)
    pub filename: Option<PathBuf>,

    /// Configuration file (overrides BACKUP_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Actually delete expired remote backups instead of only listing them
    #[arg(long)]
    pub delete_expired: bool,
}

impl AppConfig {
    /// Merge parsed CLI args with environment fallbacks.
    pub fn from_env_and_args(args: Args) -> Self {
        Self {
            host: args.host,
            namespace: args.namespace,
            action: args.action,
            s3_key: args.s3_key,
            filename: args.filename,
            config_path: args.config.unwrap_or_else(config_path_from_env),
            dry_run: !args.delete_expired,
        }
    }
}

/// Configuration file location from `BACKUP_CONFIG`, or the default.
pub fn config_path_from_env() -> PathBuf {
    env::var_os("BACKUP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub slack: SlackSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    /// host -> namespace -> settings
    #[serde(default)]
    pub servers: BTreeMap<String, BTreeMap<String, BackupSet>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackSettings {
    pub url: String,
    pub username: String,
    pub channel: String,
    #[serde(default)]
    pub always_report: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSettings {
    /// Custom S3 endpoint (overridden by BACKUP_S3_ENDPOINT)
    pub endpoint: Option<String>,
    /// Region (overridden by BACKUP_S3_REGION)
    pub region: Option<String>,
    /// Parts uploaded concurrently
    pub max_concurrency: Option<usize>,
}

/// Settings for one host/namespace pair.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupSet {
    pub nice: Option<u32>,
    pub local_path: PathBuf,
    pub s3_bucket: String,
    pub s3_path: String,
    #[serde(default)]
    pub remove_local: bool,
    pub estimated_min_size: u64,
    pub estimated_max_size: u64,
    pub s3_store_months: u32,
    #[serde(default)]
    pub s3_store_days: BTreeSet<u32>,
    #[serde(default = "default_dump_command")]
    pub dump_command: String,
}

fn default_dump_command() -> String {
    DEFAULT_DUMP_COMMAND.to_string()
}

impl BackupSet {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.s3_store_months, self.s3_store_days.iter().copied())
    }
}

impl ConfigFile {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut cfg: ConfigFile = toml::from_str(raw).context("parsing configuration")?;

        // --- Environment overrides ---
        if let Ok(endpoint) = env::var("BACKUP_S3_ENDPOINT") {
            cfg.storage.endpoint = Some(endpoint);
        }
        if let Ok(region) = env::var("BACKUP_S3_REGION") {
            cfg.storage.region = Some(region);
        }
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading configuration `{}`", path.display()))?;
        Self::parse(&raw)
    }

    pub fn backup_set(&self, host: &str, namespace: &str) -> Result<&BackupSet, BackupError> {
        self.servers
            .get(host)
            .and_then(|namespaces| namespaces.get(namespace))
            .ok_or_else(|| BackupError::UnknownTarget {
                host: host.to_string(),
                namespace: namespace.to_string(),
            })
    }
}
