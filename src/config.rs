//! # Configuration
//!
//! A `toml`+`serde` loaded [`AppConfig`]: validated defaults so a missing or
//! partial file is still usable, an explicit `validate()` pass, and a plain
//! `anyhow::Result` return since this only ever runs at bootstrap, on the
//! thread calling [`crate::application::Application::new`].

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

fn default_autosave_secs() -> u64 {
    1800
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("corebus.sled")
}

fn default_queue_warn_threshold() -> usize {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Seconds between automatic full saves; `0` disables autosave entirely.
    #[serde(default = "default_autosave_secs")]
    pub autosave_secs: u64,

    /// Path handed to [`crate::storage::sled_backend::SledStorage::open`]
    /// when no storage backend has been set explicitly.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Unscheduled-queue depth above which the dispatch loop logs a warning,
    /// so a runaway publisher is visible before it becomes an OOM.
    #[serde(default = "default_queue_warn_threshold")]
    pub queue_warn_threshold: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            autosave_secs: default_autosave_secs(),
            storage_path: default_storage_path(),
            queue_warn_threshold: default_queue_warn_threshold(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file '{}'", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_warn_threshold == 0 {
            anyhow::bail!("queue_warn_threshold must be at least 1");
        }
        Ok(())
    }

    pub fn autosave_duration(&self) -> Duration {
        Duration::from_secs(self.autosave_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_a_blank_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corebus.toml");
        std::fs::write(&path, "").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_the_fields_it_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corebus.toml");
        std::fs::write(&path, "autosave_secs = 60\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.autosave_secs, 60);
        assert_eq!(config.queue_warn_threshold, default_queue_warn_threshold());
    }

    #[test]
    fn zero_queue_warn_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corebus.toml");
        std::fs::write(&path, "queue_warn_threshold = 0\n").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
