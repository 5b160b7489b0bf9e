use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::core::date::DEFAULT_CACHE_CAPACITY;
use crate::core::order::{SortDirection, SortMode, TimeFlags};
use crate::sync::{Session, SyncSettings};

/// Environment variable that points at an alternative config file.
pub const CONFIG_ENV: &str = "TALLY_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("tally")
        .join("config.json")
}

fn default_debounce_ms() -> u64 {
    5000
}

fn default_status_reset_ms() -> u64 {
    3000
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_status_reset_ms")]
    pub status_reset_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            status_reset_ms: default_status_reset_ms(),
        }
    }
}

/// How the task list is presented by default.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ViewConfig {
    pub mode: SortMode,
    pub direction: SortDirection,
    pub surface_overdue: bool,
    pub undated_last: bool,
    pub show_hidden: bool,
}

impl ViewConfig {
    pub fn time_flags(&self) -> TimeFlags {
        TimeFlags {
            surface_overdue: self.surface_overdue,
            undated_last: self.undated_last,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TallyConfig {
    pub remote_url: Option<String>,
    pub api_key: Option<String>,
    pub user_id: Option<Uuid>,
    pub debug_logging: bool,
    pub sync: SyncConfig,
    #[serde(default = "default_cache_capacity")]
    pub date_cache_capacity: usize,
    pub view: ViewConfig,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            api_key: None,
            user_id: None,
            debug_logging: false,
            sync: SyncConfig::default(),
            date_cache_capacity: default_cache_capacity(),
            view: ViewConfig::default(),
        }
    }
}

impl TallyConfig {
    /// `$TALLY_CONFIG`, or `config.json` in the user config directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path)
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::default_path())
    }

    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(io_err)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            debounce: Duration::from_millis(self.sync.debounce_ms),
            status_reset: Duration::from_millis(self.sync.status_reset_ms),
        }
    }

    pub fn session(&self) -> Session {
        Session {
            user_id: self.user_id,
        }
    }

    /// Both an endpoint and a key are configured.
    pub fn has_remote(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.remote_url) && set(&self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("tally-test-{}", Uuid::new_v4()))
            .join("config.json")
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = TallyConfig::load(&temp_path()).unwrap();
        assert_eq!(config, TallyConfig::default());
        assert_eq!(config.sync_settings(), SyncSettings::default());
        assert_eq!(config.date_cache_capacity, 1000);
        assert!(!config.has_remote());
        assert!(!config.session().is_signed_in());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"remote_url": "https://db.example.com", "api_key": "k",
                "sync": {"debounce_ms": 1000},
                "view": {"mode": "time", "direction": "ascending", "undated_last": true}}"#,
        )
        .unwrap();
        let config = TallyConfig::load(&path).unwrap();
        assert!(config.has_remote());
        assert_eq!(config.sync.debounce_ms, 1000);
        assert_eq!(config.sync.status_reset_ms, 3000);
        assert_eq!(config.view.mode, SortMode::Time);
        assert_eq!(config.view.direction, SortDirection::Ascending);
        assert!(config.view.time_flags().undated_last);
        assert!(!config.view.time_flags().surface_overdue);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn save_then_load() {
        let path = temp_path();
        let config = TallyConfig {
            user_id: Some(Uuid::new_v4()),
            debug_logging: true,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(TallyConfig::load(&path).unwrap(), config);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(TallyConfig::load(&path), Err(ConfigError::Parse { .. })));
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
