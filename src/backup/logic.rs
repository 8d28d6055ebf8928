// pgbackup/src/backup/logic.rs
use chrono::Utc;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{error, info, warn};

use super::db_dump::{DumpPipeline, artifact_path};
use super::s3_upload::{ObjectStore, publish_artifact};
use crate::config::secrets::resolve_database_configs;
use crate::config::{DatabaseConfig, SecretSource, Settings};
use crate::errors::{BackupError, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Result of backing up one database. Created once, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status")]
pub enum Outcome {
    #[serde(rename = "success")]
    Success {
        name: String,
        #[serde(rename = "path")]
        remote_path: String,
    },
    #[serde(rename = "error")]
    Failure { name: String, message: String },
}

impl Outcome {
    pub fn name(&self) -> &str {
        match self {
            Outcome::Success { name, .. } | Outcome::Failure { name, .. } => name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Every outcome of one run, in the order the databases were configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub outcomes: Vec<Outcome>,
    pub succeeded_count: usize,
    pub failed_count: usize,
}

impl BatchResult {
    pub fn from_outcomes(outcomes: Vec<Outcome>) -> Self {
        let succeeded_count = outcomes.iter().filter(|o| o.is_success()).count();
        let failed_count = outcomes.len() - succeeded_count;
        Self {
            outcomes,
            succeeded_count,
            failed_count,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_count == 0
    }

    pub fn failures(&self) -> Vec<&Outcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    /// Payload reported to the host on success.
    pub fn invocation_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "statusCode": 200,
            "results": self.outcomes,
        })
    }

    /// Turns a batch with any failure into an error listing every failed database.
    ///
    /// Completed uploads are not affected; this is only the signal to the host.
    pub fn into_result(self) -> Result<BatchResult> {
        if self.is_success() {
            return Ok(self);
        }
        let failures = self.failures();
        let listing =
            serde_json::to_string(&failures).unwrap_or_else(|_| format!("{:?}", failures));
        Err(BackupError::Batch {
            failed: self.failed_count,
            message: format!("{} backup(s) failed: {}", self.failed_count, listing),
        })
    }
}

/// Timestamp shared by every artifact of one run, e.g. `2024-05-01_03-00-00`.
pub fn batch_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Backs up every configured database once, stamped with the current UTC time.
pub async fn run_backup_flow(
    settings: &Settings,
    secrets: &dyn SecretSource,
    store: &dyn ObjectStore,
    pipeline: &DumpPipeline,
) -> Result<BatchResult> {
    perform_backup_orchestration(settings, secrets, store, pipeline, &batch_timestamp()).await
}

/// Resolves the database list, then dumps and publishes each database in order.
///
/// Only configuration problems return `Err`. Per-database failures become
/// [`Outcome::Failure`] entries and never stop the remaining databases.
pub async fn perform_backup_orchestration(
    settings: &Settings,
    secrets: &dyn SecretSource,
    store: &dyn ObjectStore,
    pipeline: &DumpPipeline,
    timestamp: &str,
) -> Result<BatchResult> {
    let databases = resolve_database_configs(secrets, &settings.secret.secret_id()).await?;

    let mut outcomes = Vec::with_capacity(databases.len());
    for db in &databases {
        let outcome = backup_database(db, settings, store, pipeline, timestamp).await;
        outcomes.push(outcome);
    }

    let batch = BatchResult::from_outcomes(outcomes);
    info!(
        "Backup complete: {} succeeded, {} failed out of {} databases",
        batch.succeeded_count,
        batch.failed_count,
        batch.outcomes.len()
    );
    if !batch.is_success() {
        let failed: Vec<&str> = batch.failures().iter().map(|o| o.name()).collect();
        warn!(?failed, "Some databases were not backed up");
    }
    Ok(batch)
}

/// Runs one database through dump and publish, converting any error into a failure outcome.
async fn backup_database(
    db: &DatabaseConfig,
    settings: &Settings,
    store: &dyn ObjectStore,
    pipeline: &DumpPipeline,
    timestamp: &str,
) -> Outcome {
    info!(database = %db.name, "Starting backup");

    let result = async {
        let artifact = pipeline.run(db, &settings.scratch_dir, timestamp).await?;
        publish_artifact(store, &artifact, &settings.bucket).await
    }
    .await;

    match result {
        Ok(remote_path) => {
            info!(database = %db.name, path = %remote_path, "SUCCESS");
            Outcome::Success {
                name: db.name.clone(),
                remote_path,
            }
        }
        Err(e) => {
            if !e.retains_local_file() {
                let partial = artifact_path(&settings.scratch_dir, &db.name, timestamp);
                remove_partial_artifact(&partial).await;
            }
            error!(database = %db.name, stage = e.stage_label(), error = %e, "ERROR");
            Outcome::Failure {
                name: db.name.clone(),
                message: failure_message(&e),
            }
        }
    }
}

/// `"{stage}: {error}"`, e.g. `dump: dump failed (exit 1): ...`.
fn failure_message(e: &BackupError) -> String {
    format!("{}: {}", e.stage_label(), e)
}

async fn remove_partial_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "Removed partial artifact"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial artifact"),
    }
}
