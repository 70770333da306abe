//! CLI configuration — read/write `~/.otapkg/config.toml`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Persisted CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory holding installed suites.
    pub storage_root: PathBuf,
    /// Total storage budget in bytes.
    pub capacity_bytes: u64,
    /// Directory of trusted PEM/DER certificates.
    pub trust_dir: PathBuf,
    /// File holding queued provider notifications.
    pub notify_queue: PathBuf,
    /// Retry budget for queued notifications.
    pub notify_retries: u32,
}

fn otapkg_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home).join(".otapkg")
}

/// Return the default path for the CLI config file (`~/.otapkg/config.toml`).
#[must_use]
pub fn default_config_path() -> PathBuf {
    otapkg_home().join("config.toml")
}

impl Default for CliConfig {
    fn default() -> Self {
        let home = otapkg_home();
        Self {
            storage_root: home.join("suites"),
            capacity_bytes: 256 * 1024 * 1024,
            trust_dir: home.join("trust"),
            notify_queue: home.join("notify-queue.json"),
            notify_retries: 3,
        }
    }
}

/// Write `cfg` to `path`, creating parent directories if necessary.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file cannot
/// be written.
pub fn save_config(cfg: &CliConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string(cfg)?)?;
    Ok(())
}

/// Load a [`CliConfig`] from `path`, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Returns an error if an existing file cannot be read or deserialized.
pub fn load_config(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}
