use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub followups: FollowupsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: String, // "sqlite" | "memory"
    /// Relative paths resolve against the data directory.
    pub db_path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub enabled: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FollowupsConfig {
    /// Due date offset used when a followup is created without one.
    pub default_due_days: u32,
}

impl Default for FollowupsConfig {
    fn default() -> Self {
        Self { default_due_days: 30 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl Config {
    pub fn default_for_dir() -> Self {
        Self {
            storage: StorageConfig {
                backend: "sqlite".to_string(),
                db_path: "conform.db".to_string(),
            },
            notifications: NotificationsConfig::default(),
            followups: FollowupsConfig::default(),
        }
    }

    pub fn in_memory() -> Self {
        let mut cfg = Self::default_for_dir();
        cfg.storage.backend = "memory".to_string();
        cfg
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse conform.toml")?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn backend(&self) -> StorageBackend {
        match self.storage.backend.as_str() {
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::Sqlite,
        }
    }

    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&self.storage.db_path).to_string());
        if expanded.is_absolute() {
            expanded
        } else {
            data_dir.join(expanded)
        }
    }

    pub fn config_path(data_dir: &Path) -> PathBuf {
        data_dir.join("conform.toml")
    }
}
