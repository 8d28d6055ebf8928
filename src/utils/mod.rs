pub mod connection;

use std::path::{Path, PathBuf};
use which::which;

use crate::errors::{BackupError, Result};

/// Resolves an external tool: an explicit override wins, otherwise search PATH.
pub fn find_executable(name: &str, override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }
    which(name).map_err(|_| {
        BackupError::Config(format!(
            "{} executable not found in PATH. Please ensure it is installed and in your PATH.",
            name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_is_used_verbatim() {
        let path = find_executable("pg_dump", Some(Path::new("/opt/pg/bin/pg_dump"))).unwrap();
        assert_eq!(path, PathBuf::from("/opt/pg/bin/pg_dump"));
    }

    #[test]
    fn unknown_tool_is_config_error() {
        let err = find_executable("definitely-not-a-real-tool-7f3a", None).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }
}
