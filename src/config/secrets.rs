// pgbackup/src/config/secrets.rs
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use aws_sdk_secretsmanager as secretsmanager;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::errors::{BackupError, Result};

/// One database to back up, as listed in the secret.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Used as the object key prefix, the scratch file prefix and the log key.
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseSecret {
    databases: Vec<DatabaseConfig>,
}

/// Source of the opaque secret blob that lists the databases.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch_secret(&self, secret_id: &str) -> anyhow::Result<String>;
}

/// Reads the secret from AWS Secrets Manager.
pub struct SecretsManagerSource {
    client: secretsmanager::Client,
}

impl SecretsManagerSource {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: secretsmanager::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl SecretSource for SecretsManagerSource {
    async fn fetch_secret(&self, secret_id: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .with_context(|| format!("Failed to fetch secret {}", secret_id))?;

        response
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Secret {} has no SecretString value", secret_id))
    }
}

/// Reads the secret document from a local JSON file. The secret id is ignored.
pub struct FileSecretSource {
    path: PathBuf,
}

impl FileSecretSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SecretSource for FileSecretSource {
    async fn fetch_secret(&self, _secret_id: &str) -> anyhow::Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read secret file {}", self.path.display()))
    }
}

/// Fetches the secret once and extracts the ordered list of databases.
///
/// Any problem here is fatal for the whole run; there is no partial config.
pub async fn resolve_database_configs(
    source: &dyn SecretSource,
    secret_id: &str,
) -> Result<Vec<DatabaseConfig>> {
    info!(secret_id, "Resolving database configuration");
    let raw = source
        .fetch_secret(secret_id)
        .await
        .map_err(|e| BackupError::Config(format!("{:#}", e)))?;

    let databases = parse_database_secret(&raw)?;
    if databases.is_empty() {
        warn!(secret_id, "Secret lists no databases; nothing to back up");
    } else {
        info!(count = databases.len(), "Resolved databases to back up");
    }
    Ok(databases)
}

/// Parses `{"databases": [{"name": ..., "url": ...}, ...]}`.
pub fn parse_database_secret(raw: &str) -> Result<Vec<DatabaseConfig>> {
    let secret: DatabaseSecret = serde_json::from_str(raw)
        .map_err(|e| BackupError::Config(format!("Secret is not a valid database list: {}", e)))?;

    let mut seen = HashSet::new();
    for db in &secret.databases {
        validate_database_name(&db.name)?;
        if !seen.insert(db.name.as_str()) {
            return Err(BackupError::Config(format!(
                "Duplicate database name in secret: {}",
                db.name
            )));
        }
    }
    Ok(secret.databases)
}

// Names become file names and key prefixes, so they must stay a single path segment.
fn validate_database_name(name: &str) -> Result<()> {
    let valid = !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(BackupError::Config(format!(
            "Invalid database name in secret: {:?}. \
             Names must not be empty, '.', '..' or contain '/', '\\' or NUL",
            name
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Serves a fixed secret string, or fails like a missing secret.
    pub(crate) struct StaticSecretSource(pub Option<String>);

    #[async_trait]
    impl SecretSource for StaticSecretSource {
        async fn fetch_secret(&self, secret_id: &str) -> anyhow::Result<String> {
            self.0
                .clone()
                .ok_or_else(|| anyhow!("ResourceNotFoundException: secret {} not found", secret_id))
        }
    }

    #[test]
    fn parses_databases_in_order() {
        let raw = json!({
            "databases": [
                {"name": "billing", "url": "postgresql://u:p@h1/billing"},
                {"name": "auth", "url": "postgresql://u:p@h2/auth"},
                {"name": "analytics", "url": "postgresql://u:p@h3/analytics"}
            ]
        })
        .to_string();
        let dbs = parse_database_secret(&raw).unwrap();
        let names: Vec<_> = dbs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["billing", "auth", "analytics"]);
        assert_eq!(dbs[1].url, "postgresql://u:p@h2/auth");
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = parse_database_secret("{\"databases\": [").unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn missing_databases_key_is_config_error() {
        let err = parse_database_secret(&json!({"dbs": []}).to_string()).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn entry_without_url_is_config_error() {
        let raw = json!({"databases": [{"name": "billing"}]}).to_string();
        assert!(matches!(parse_database_secret(&raw), Err(BackupError::Config(_))));
    }

    #[test]
    fn rejects_duplicate_and_path_like_names() {
        let dup = json!({"databases": [
            {"name": "a", "url": "postgresql://h/a"},
            {"name": "a", "url": "postgresql://h/b"}
        ]})
        .to_string();
        assert!(matches!(parse_database_secret(&dup), Err(BackupError::Config(_))));

        for bad in ["", " ", ".", "..", "../etc", "with/slash", "back\\slash", "nul\0byte"] {
            let raw = json!({"databases": [{"name": bad, "url": "postgresql://h/a"}]}).to_string();
            assert!(
                matches!(parse_database_secret(&raw), Err(BackupError::Config(_))),
                "name {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn accepts_labels_that_stay_one_path_segment() {
        let raw = json!({"databases": [
            {"name": "billing", "url": "postgresql://h/billing"},
            {"name": "customer db", "url": "postgresql://h/customers"},
            {"name": "données", "url": "postgresql://h/donnees"},
            {"name": "team+ops@eu", "url": "postgresql://h/ops"}
        ]})
        .to_string();
        let dbs = parse_database_secret(&raw).unwrap();
        let names: Vec<_> = dbs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["billing", "customer db", "données", "team+ops@eu"]);
    }

    #[test]
    fn empty_list_is_allowed() {
        let dbs = parse_database_secret(&json!({"databases": []}).to_string()).unwrap();
        assert!(dbs.is_empty());
    }

    #[tokio::test]
    async fn missing_secret_is_config_error() {
        let source = StaticSecretSource(None);
        let err = resolve_database_configs(&source, "prod/backups").await.unwrap_err();
        match err {
            BackupError::Config(msg) => assert!(msg.contains("prod/backups")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_source_reads_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        std::fs::write(
            &path,
            json!({"databases": [{"name": "local", "url": "postgresql://localhost/app"}]})
                .to_string(),
        )
        .unwrap();

        let source = FileSecretSource::new(&path);
        let dbs = resolve_database_configs(&source, "ignored").await.unwrap();
        assert_eq!(dbs.len(), 1);
        assert_eq!(dbs[0].name, "local");
    }
}
