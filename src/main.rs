use anyhow::Result;
use asbackup_s3::{
    config::{Action, AppConfig, Args, ConfigFile, config_path_from_env},
    errors::BackupError,
    services::{
        backup_service::{BackupService, BackupTarget, total_megabytes},
        dump::Asbackup,
        notifier::{Notifier, SlackNotifier},
        s3_gateway::S3Gateway,
    },
};
use chrono::Utc;
use clap::{Parser, error::ErrorKind};
use std::{process::ExitCode, sync::Arc};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse args ---
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            report_wrong_args().await;
            return ExitCode::from(1);
        }
    };
    let cfg = AppConfig::from_env_and_args(args);

    match run(&cfg).await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            tracing::error!("{}", err);
            ExitCode::from(err.exit_code())
        }
        Err(err) => {
            tracing::error!("Fatal error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

/// Post the raw command line to the webhook when it cannot be parsed.
async fn report_wrong_args() {
    let argv: Vec<String> = std::env::args().collect();
    let Ok(file) = ConfigFile::load(&config_path_from_env()) else {
        return;
    };
    if let Ok(notifier) = SlackNotifier::new(file.slack) {
        notifier.report(&format!("wrong args {:?}", argv)).await;
    }
}

/// Outer error: setup failed. Inner error: the backup flow failed with a
/// known exit code.
async fn run(cfg: &AppConfig) -> Result<Result<(), BackupError>> {
    let file = ConfigFile::load(&cfg.config_path)?;
    tracing::debug!("Loaded configuration from {}", cfg.config_path.display());

    let set = match file.backup_set(&cfg.host, &cfg.namespace) {
        Ok(set) => set,
        Err(err) => return Ok(Err(err)),
    };
    let target = BackupTarget {
        host: &cfg.host,
        namespace: &cfg.namespace,
        set,
    };

    // --- Initialize collaborators ---
    let mut gateway = S3Gateway::new(&file.storage).await;
    if let Some(max_concurrency) = file.storage.max_concurrency {
        gateway = gateway.with_max_concurrency(max_concurrency);
    }
    let notifier = SlackNotifier::new(file.slack.clone())?;
    let service = BackupService::new(
        Arc::new(gateway),
        Arc::new(notifier),
        Arc::new(Asbackup),
        file.slack.always_report,
    );

    Ok(dispatch(&service, cfg, target).await)
}

async fn dispatch(
    service: &BackupService,
    cfg: &AppConfig,
    target: BackupTarget<'_>,
) -> Result<(), BackupError> {
    match cfg.action {
        Action::Create => {
            let report = service.create(target, Utc::now(), cfg.dry_run).await?;
            tracing::info!(
                "Backup {} verified ({} bytes); {} expired, {} deleted, {} failed{}",
                report.remote_key,
                report.size_bytes,
                report.prune.expired.len(),
                report.prune.deleted.len(),
                report.prune.failed.len(),
                if report.prune.dry_run { " (dry run)" } else { "" }
            );
        }
        Action::List => {
            let objects = service.list(target).await?;
            for object in &objects {
                println!("{}", object);
            }
            println!("----------");
            println!("Total S3 usage: {:4.4} MBytes", total_megabytes(&objects));
        }
        Action::Get => {
            let (Some(key), Some(filename)) = (&cfg.s3_key, &cfg.filename) else {
                return Err(BackupError::BadArgs(
                    "get requires <s3_key> and <filename>".into(),
                ));
            };
            service.get(target, key, filename).await?;
        }
    }
    Ok(())
}
