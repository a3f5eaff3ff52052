use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of files transferred at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// Default copy chunk size for the local release store (256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Global configuration loaded from `~/.config/relup/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelupConfig {
    /// Maximum number of file transfers running at the same time.
    pub max_concurrent: usize,
    /// Root directory of the release store. None = `~/.local/share/relup/store`.
    #[serde(default)]
    pub store_root: Option<PathBuf>,
    /// Bytes copied per chunk; progress is reported after each chunk.
    pub chunk_size: usize,
    /// Optional per-file deadline in seconds (None = wait indefinitely).
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    /// Minimum interval between progress lines printed by the CLI.
    pub progress_interval_ms: u64,
}

impl Default for RelupConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            store_root: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            task_timeout_secs: None,
            progress_interval_ms: 250,
        }
    }
}

impl RelupConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Configured store root, or the XDG data default.
    pub fn resolved_store_root(&self) -> Result<PathBuf> {
        match &self.store_root {
            Some(root) => Ok(root.clone()),
            None => default_store_root(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("relup")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

pub fn default_store_root() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("relup")?;
    Ok(xdg_dirs.create_data_directory("store")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RelupConfig> {
    load_or_init_at(&config_path()?)
}

/// Same as [`load_or_init`] with an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<RelupConfig> {
    if !path.exists() {
        let default_cfg = RelupConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: RelupConfig = toml::from_str(&data)?;
    if cfg.max_concurrent == 0 {
        anyhow::bail!("max_concurrent must be at least 1 in {}", path.display());
    }
    if cfg.chunk_size == 0 {
        anyhow::bail!("chunk_size must be at least 1 in {}", path.display());
    }
    Ok(cfg)
}
