// pgbackup/src/errors.rs
use std::fmt;
use thiserror::Error;

/// Which half of the `pg_dump | gzip` pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStage {
    Dump,
    Compress,
}

impl fmt::Display for DumpStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpStage::Dump => write!(f, "dump"),
            DumpStage::Compress => write!(f, "compress"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    /// Fatal: raised before any database is attempted.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid connection URL ({url_hint}): {reason}")]
    Parse { url_hint: String, reason: String },

    #[error("{stage} failed{}: {stderr}", exit_code_suffix(.exit_code))]
    Dump {
        stage: DumpStage,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Upload failed: {0}")]
    Upload(String),

    /// Local scratch file could not be created or inspected.
    #[error("Scratch file error: {0}")]
    Scratch(String),

    #[error("{message}")]
    Batch { failed: usize, message: String },
}

impl BackupError {
    /// Short label used as the prefix of a per-database failure message.
    pub fn stage_label(&self) -> &'static str {
        match self {
            BackupError::Config(_) => "config",
            BackupError::Parse { .. } => "parse",
            BackupError::Dump { stage: DumpStage::Dump, .. } => "dump",
            BackupError::Dump { stage: DumpStage::Compress, .. } => "compress",
            BackupError::Upload(_) => "upload",
            BackupError::Scratch(_) => "scratch",
            BackupError::Batch { .. } => "batch",
        }
    }

    /// True when the local artifact must be kept for diagnosis.
    pub fn retains_local_file(&self) -> bool {
        matches!(self, BackupError::Upload(_))
    }
}

fn exit_code_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(" (exit {})", code),
        None => " (no exit code)".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
