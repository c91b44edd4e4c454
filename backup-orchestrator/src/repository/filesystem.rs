//! Local filesystem repositories.

use crate::utils::errors::{OrchestratorError, Result};
use std::path::Path;

/// `{base_dir}/{repo}`. The base directory is created if missing.
pub fn format(base_dir: &Path, repo_name: &str) -> Result<String> {
    if base_dir.as_os_str().is_empty() {
        return Err(OrchestratorError::invalid_endpoint("", "filesystem base directory is empty"));
    }
    std::fs::create_dir_all(base_dir)?;
    Ok(base_dir.join(repo_name).display().to_string())
}
