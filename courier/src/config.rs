//! Configuration discovery and loading.

use std::path::{Path, PathBuf};

use courier_api::ApiConfig;
use courier_dispatch::DispatchConfig;
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Everything a `courier.config.ron` can hold.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Courier {
    /// Reads and parses a RON configuration file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or is not valid configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;
        ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }
}

/// The standard locations, in order of precedence after the environment.
#[must_use]
pub fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./courier.config.ron"),
        PathBuf::from("/etc/courier/courier.config.ron"),
    ]
}

/// Finds the configuration file.
///
/// `from_env` is the value of [`CONFIG_ENV`], if set; it must point at an
/// existing file. Otherwise the first of `candidates` that exists wins, and
/// `Ok(None)` means none did.
///
/// # Errors
///
/// When `from_env` names a file that does not exist.
pub fn locate(from_env: Option<&str>, candidates: &[PathBuf]) -> anyhow::Result<Option<PathBuf>> {
    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    Ok(candidates.iter().find(|path| path.exists()).cloned())
}

/// Like [`locate`], but a missing file is an error listing every place tried.
///
/// # Errors
///
/// When no configuration file can be found.
pub fn require(from_env: Option<&str>, candidates: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = locate(from_env, candidates)? {
        return Ok(path);
    }

    let paths_tried = candidates
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
