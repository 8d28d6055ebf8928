//! Scheduled PostgreSQL backups
//!
//! Dumps every database listed in a secret with `pg_dump | gzip` and uploads
//! each artifact to S3 under `{name}/{timestamp}.sql.gz`.

// pgbackup/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use aws_config::BehaviorVersion;
use backup::{DumpPipeline, LocalDirStore, ObjectStore, S3ObjectStore};
use config::{
    FileSecretSource, SecretLocation, SecretSource, SecretsManagerSource, Settings, StoreLocation,
};
use errors::{BackupError, Result};
use std::process::ExitCode;
use tokio::sync::OnceCell;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Main entry point for one scheduled invocation
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run_app().await {
        Ok(payload) => {
            println!("{}", payload);
            info!("Backup run completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            match &e {
                BackupError::Batch { failed, .. } => {
                    error!(failed, "Backup run finished with failures")
                }
                _ => error!(error = %e, "Backup run aborted"),
            }
            ExitCode::FAILURE
        }
    }
}

/// Wires settings to the real secret source, object store and dump tools,
/// then translates the batch result into the invocation signal.
async fn run_app() -> Result<serde_json::Value> {
    let settings = Settings::from_env()?;
    info!(
        bucket = %settings.bucket,
        scratch_dir = %settings.scratch_dir.display(),
        "Starting backup run"
    );

    // Only loaded when Secrets Manager or S3 is actually in use.
    let sdk_config = OnceCell::new();
    let load_sdk = || aws_config::defaults(BehaviorVersion::latest()).load();

    let secrets: Box<dyn SecretSource> = match &settings.secret {
        SecretLocation::File { path } => Box::new(FileSecretSource::new(path)),
        SecretLocation::SecretsManager { .. } => {
            Box::new(SecretsManagerSource::new(sdk_config.get_or_init(load_sdk).await))
        }
    };

    let store: Box<dyn ObjectStore> = match &settings.store {
        StoreLocation::LocalDir { root } => Box::new(LocalDirStore::new(root)),
        StoreLocation::S3 { endpoint_url } => Box::new(S3ObjectStore::new(
            sdk_config.get_or_init(load_sdk).await,
            endpoint_url.as_deref(),
        )),
    };

    let pipeline = DumpPipeline::locate(&settings)?;

    let batch =
        backup::run_backup_flow(&settings, secrets.as_ref(), store.as_ref(), &pipeline).await?;
    let payload = batch.invocation_payload();
    batch.into_result()?;
    Ok(payload)
}
