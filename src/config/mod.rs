// pgbackup/src/config/mod.rs
pub mod secrets;

use std::path::PathBuf;

use crate::errors::{BackupError, Result};

pub use secrets::{DatabaseConfig, FileSecretSource, SecretSource, SecretsManagerSource};

/// Where the database list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretLocation {
    SecretsManager { secret_id: String },
    File { path: PathBuf },
}

impl SecretLocation {
    /// Identifier passed to the secret source and shown in logs.
    pub fn secret_id(&self) -> String {
        match self {
            SecretLocation::SecretsManager { secret_id } => secret_id.clone(),
            SecretLocation::File { path } => path.display().to_string(),
        }
    }
}

/// Where finished artifacts are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// `endpoint_url` points the client at an S3-compatible service.
    S3 { endpoint_url: Option<String> },
    LocalDir { root: PathBuf },
}

/// Environment-level configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bucket: String,
    pub secret: SecretLocation,
    pub store: StoreLocation,
    pub scratch_dir: PathBuf,
    pub pg_dump_bin: Option<PathBuf>,
    pub gzip_bin: Option<PathBuf>,
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bucket = get("S3_BUCKET")
            .ok_or_else(|| BackupError::Config("S3_BUCKET must be set".to_string()))?;

        let secret = match (get("SECRET_FILE"), get("SECRET_NAME")) {
            (Some(path), _) => SecretLocation::File {
                path: PathBuf::from(path),
            },
            (None, Some(secret_id)) => SecretLocation::SecretsManager { secret_id },
            (None, None) => {
                let message = "SECRET_NAME must be set (or SECRET_FILE for a local database list)";
                return Err(BackupError::Config(message.to_string()));
            }
        };

        let store = match get("LOCAL_BACKUP_DIR") {
            Some(root) => StoreLocation::LocalDir { root: PathBuf::from(root) },
            None => StoreLocation::S3 {
                endpoint_url: get("S3_ENDPOINT_URL"),
            },
        };

        let scratch_dir = get("SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Ok(Settings {
            bucket,
            secret,
            store,
            scratch_dir,
            pg_dump_bin: get("PG_DUMP_BIN").map(PathBuf::from),
            gzip_bin: get("GZIP_BIN").map(PathBuf::from),
        })
    }
}
