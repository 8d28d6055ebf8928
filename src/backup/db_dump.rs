// pgbackup/src/backup/db_dump.rs
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

use crate::config::{DatabaseConfig, Settings};
use crate::errors::{BackupError, DumpStage, Result};
use crate::utils::connection::ConnectionSpec;
use crate::utils::find_executable;

/// Longest tail of a tool's stderr kept in an error message.
const STDERR_EXCERPT_BYTES: usize = 4096;

/// A compressed dump sitting in local scratch storage, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub name: String,
    pub timestamp: String,
    pub local_path: PathBuf,
    pub remote_key: String,
    pub size_bytes: u64,
}

/// Object key for a database's dump: `{name}/{timestamp}.sql.gz`.
pub fn remote_key(name: &str, timestamp: &str) -> String {
    format!("{}/{}.sql.gz", name, timestamp)
}

/// Scratch file for a database's dump, unique per name and run.
pub fn artifact_path(destination_dir: &Path, name: &str, timestamp: &str) -> PathBuf {
    destination_dir.join(format!("{}_{}.sql.gz", name, timestamp))
}

/// An external program plus any leading arguments.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Runs `pg_dump` piped straight into `gzip`, writing the result to scratch storage.
#[derive(Debug, Clone)]
pub struct DumpPipeline {
    dump: ToolCommand,
    compress: ToolCommand,
}

impl DumpPipeline {
    pub fn new(dump: ToolCommand, compress: ToolCommand) -> Self {
        Self { dump, compress }
    }

    /// Finds `pg_dump` and `gzip`, honouring the configured overrides.
    pub fn locate(settings: &Settings) -> Result<Self> {
        let pg_dump = find_executable("pg_dump", settings.pg_dump_bin.as_deref())?;
        let gzip = find_executable("gzip", settings.gzip_bin.as_deref())?;
        info!(pg_dump = %pg_dump.display(), gzip = %gzip.display(), "Located dump tools");
        Ok(Self::new(ToolCommand::new(pg_dump), ToolCommand::new(gzip)))
    }

    /// Dumps one database into `{destination_dir}/{name}_{timestamp}.sql.gz`.
    ///
    /// On error a partially written file may remain at [`artifact_path`];
    /// removing it is the caller's job.
    pub async fn run(
        &self,
        db: &DatabaseConfig,
        destination_dir: &Path,
        timestamp: &str,
    ) -> Result<BackupArtifact> {
        let spec = ConnectionSpec::parse(&db.url)?;
        let local_path = artifact_path(destination_dir, &db.name, timestamp);

        tokio::fs::create_dir_all(destination_dir).await.map_err(|e| {
            BackupError::Scratch(format!(
                "Failed to create scratch directory {}: {}",
                destination_dir.display(),
                e
            ))
        })?;
        let output_file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|e| {
                BackupError::Scratch(format!("Failed to create {}: {}", local_path.display(), e))
            })?
            .into_std()
            .await;

        debug!(
            database = %db.name,
            host = %spec.host,
            port = %spec.port,
            dbname = %spec.dbname,
            path = %local_path.display(),
            "Starting pg_dump | gzip"
        );

        let mut dump_cmd = self.dump.command();
        dump_cmd
            .args(dump_args(&spec))
            .envs(dump_env(&spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut dump_child = dump_cmd
            .spawn()
            .map_err(|e| spawn_error(DumpStage::Dump, &self.dump, e))?;

        let dump_stdout = match dump_child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let reason = "pg_dump stdout was not captured".to_string();
                return Err(abort_dump(dump_child, DumpStage::Dump, reason).await);
            }
        };

        let compress_child = match self.spawn_compressor(dump_stdout, output_file) {
            Ok(child) => child,
            Err(e) => return Err(abort_dump(dump_child, DumpStage::Compress, e).await),
        };

        // Both sides run concurrently; stderr of each is drained while waiting.
        let (dump_result, compress_result) =
            tokio::join!(dump_child.wait_with_output(), compress_child.wait_with_output());
        let dump_output = dump_result.map_err(|e| wait_error(DumpStage::Dump, e))?;
        let compress_output = compress_result.map_err(|e| wait_error(DumpStage::Compress, e))?;

        if !dump_output.status.success() {
            return Err(BackupError::Dump {
                stage: DumpStage::Dump,
                exit_code: dump_output.status.code(),
                stderr: failure_text(dump_output.status, &dump_output.stderr),
            });
        }
        if !compress_output.status.success() {
            return Err(BackupError::Dump {
                stage: DumpStage::Compress,
                exit_code: compress_output.status.code(),
                stderr: failure_text(compress_output.status, &compress_output.stderr),
            });
        }

        let size_bytes = tokio::fs::metadata(&local_path)
            .await
            .map_err(|e| {
                BackupError::Scratch(format!("Failed to stat {}: {}", local_path.display(), e))
            })?
            .len();

        info!(database = %db.name, size_bytes, "Dump complete");
        Ok(BackupArtifact {
            name: db.name.clone(),
            timestamp: timestamp.to_string(),
            local_path,
            remote_key: remote_key(&db.name, timestamp),
            size_bytes,
        })
    }

    /// Starts the compressor reading from the dump's stdout pipe.
    ///
    /// The command (and with it this process's handle on the pipe) is dropped
    /// before returning, so the compressor is the pipe's only reader.
    fn spawn_compressor(
        &self,
        dump_stdout: ChildStdout,
        output_file: std::fs::File,
    ) -> std::result::Result<Child, String> {
        let stdin = TryInto::<Stdio>::try_into(dump_stdout)
            .map_err(|e| format!("Failed to hand pg_dump output to the compressor: {}", e))?;

        let mut compress_cmd = self.compress.command();
        compress_cmd
            .stdin(stdin)
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        compress_cmd.spawn().map_err(|e| {
            format!("Failed to start {}: {}", self.compress.program.display(), e)
        })
    }
}

/// Arguments for `pg_dump`. Credentials never appear here.
pub fn dump_args(spec: &ConnectionSpec) -> Vec<String> {
    let mut args = vec![
        "-h".to_string(),
        spec.host.clone(),
        "-p".to_string(),
        spec.port.clone(),
    ];
    if !spec.user.is_empty() {
        args.push("-U".to_string());
        args.push(spec.user.clone());
    }
    args.extend([
        "-d".to_string(),
        spec.dbname.clone(),
        "--no-owner".to_string(),
        "--no-privileges".to_string(),
    ]);
    args
}

/// Environment for the `pg_dump` child only.
pub fn dump_env(spec: &ConnectionSpec) -> Vec<(&'static str, String)> {
    let mut env = Vec::new();
    if let Some(password) = spec.password.as_ref().filter(|p| !p.is_empty()) {
        env.push(("PGPASSWORD", password.clone()));
    }
    if let Some(sslmode) = spec.sslmode.as_ref().filter(|m| !m.is_empty()) {
        env.push(("PGSSLMODE", sslmode.clone()));
    }
    env
}

// Kills the running dump after the compressor side could not be set up.
async fn abort_dump(mut dump_child: Child, stage: DumpStage, reason: String) -> BackupError {
    let _ = dump_child.kill().await;
    BackupError::Dump {
        stage,
        exit_code: None,
        stderr: reason,
    }
}

fn spawn_error(stage: DumpStage, tool: &ToolCommand, e: std::io::Error) -> BackupError {
    BackupError::Dump {
        stage,
        exit_code: None,
        stderr: format!("Failed to start {}: {}", tool.program.display(), e),
    }
}

fn wait_error(stage: DumpStage, e: std::io::Error) -> BackupError {
    BackupError::Dump {
        stage,
        exit_code: None,
        stderr: format!("Failed to wait for process: {}", e),
    }
}

fn failure_text(status: ExitStatus, stderr: &[u8]) -> String {
    let excerpt = stderr_excerpt(stderr);
    if excerpt.is_empty() {
        // e.g. "signal: 13 (SIGPIPE)"
        status.to_string()
    } else {
        excerpt
    }
}

/// Trimmed tail of a tool's stderr, cut at a char boundary.
pub fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_EXCERPT_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_EXCERPT_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
