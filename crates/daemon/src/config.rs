// Local configuration for the daemon.
//
// Config file: `~/.shelf/config.toml`
// Database:    `~/.shelf/shelf.db` unless `[storage] db_path` overrides it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runner::RunnerConfig;
use crate::security::{ensure_owner_only_dir, ensure_owner_only_file};
use crate::sync::{SyncOptions, DEFAULT_MAX_SOFT_FAILURES};

/// Root directory for shelf state: `~/.shelf/`.
pub fn shelf_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".shelf"))
}

/// Path to the config file: `~/.shelf/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    shelf_dir().map(|d| d.join("config.toml"))
}

/// Daemon configuration at `~/.shelf/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ShelfConfig {
    pub server: ServerConfig,
    pub runner: RunnerSettings,
    pub sync: SyncSettings,
    pub storage: StorageConfig,
}

impl ShelfConfig {
    /// Load from `~/.shelf/config.toml`. Returns defaults if the file
    /// doesn't exist; a file that exists but doesn't parse is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from `path` when given (defaults if it does not exist yet),
    /// otherwise from `~/.shelf/config.toml`.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if path.exists() => Self::load_from(path),
            Some(_) => Ok(Self::default()),
            None => Self::load(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to `~/.shelf/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
            ensure_owner_only_dir(parent)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io).and_then(|_| {
            ensure_owner_only_file(path)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))
        })
    }

    /// Validate and set `[server] url`. Only http(s) URLs are accepted.
    pub fn set_server_url(&mut self, url: &str) -> Result<(), ConfigError> {
        let url = url.trim();
        let parsed = url::Url::parse(url)
            .map_err(|e| ConfigError::Invalid(format!("invalid server url `{url}`: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "server url must be http or https, got `{}`",
                parsed.scheme()
            )));
        }
        self.server.url = Some(url.to_string());
        Ok(())
    }

    /// Database location: the configured override, else `~/.shelf/shelf.db`.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.storage.db_path.clone().or_else(|| shelf_dir().map(|d| d.join("shelf.db")))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig { idle_timeout: Duration::from_millis(self.runner.idle_timeout_ms) }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions { max_soft_failures: self.sync.max_soft_failures }
    }

    /// `None` when periodic sync is disabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync.interval_sec > 0).then(|| Duration::from_secs(self.sync.interval_sec))
    }
}

/// Remote server settings. The access token lives in the OS keychain, never
/// in this file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Base URL of the wallabag-compatible server (e.g. `https://app.wallabag.it`).
    pub url: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { url: None, timeout_sec: 30 }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerSettings {
    /// How long an idle worker waits for the next job before stopping.
    pub idle_timeout_ms: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self { idle_timeout_ms: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between automatic sync runs (0 = disabled).
    pub interval_sec: u64,
    /// Soft failures after which a queued change is set aside as dead.
    pub max_soft_failures: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { interval_sec: 0, max_soft_failures: DEFAULT_MAX_SOFT_FAILURES }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let cfg = ShelfConfig::default();
        assert!(cfg.server.url.is_none());
        assert_eq!(cfg.server.timeout_sec, 30);
        assert_eq!(cfg.runner.idle_timeout_ms, 1000);
        assert_eq!(cfg.sync.interval_sec, 0);
        assert_eq!(cfg.sync.max_soft_failures, 8);
        assert!(cfg.sync_interval().is_none());
    }

    #[test]
    fn roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let cfg = ShelfConfig {
            server: ServerConfig {
                url: Some("https://wallabag.example.com".into()),
                timeout_sec: 10,
            },
            runner: RunnerSettings { idle_timeout_ms: 250 },
            sync: SyncSettings { interval_sec: 600, max_soft_failures: 3 },
            storage: StorageConfig { db_path: Some(dir.path().join("custom.db")) },
        };
        cfg.save_to(&path).unwrap();
        let loaded = ShelfConfig::load_from(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let cfg: ShelfConfig = toml::from_str(
            r#"
[server]
url = "https://wallabag.example.com"

[sync]
interval_sec = 300
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.url.as_deref(), Some("https://wallabag.example.com"));
        assert_eq!(cfg.server.timeout_sec, 30);
        assert_eq!(cfg.sync.max_soft_failures, 8);
        assert_eq!(cfg.sync_interval(), Some(Duration::from_secs(300)));
        assert_eq!(cfg.runner_config().idle_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn rejects_plaintext_token() {
        let error = toml::from_str::<ShelfConfig>(
            r#"
[server]
access_token = "tok"
"#,
        )
        .expect_err("parse should fail");
        assert!(error.to_string().contains("unknown field `access_token`"));
    }

    #[test]
    fn db_path_override_wins() {
        let mut cfg = ShelfConfig::default();
        cfg.storage.db_path = Some(PathBuf::from("/tmp/elsewhere.db"));
        assert_eq!(cfg.db_path(), Some(PathBuf::from("/tmp/elsewhere.db")));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ShelfConfig::load_from(&dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("nested").join("config.toml");
        ShelfConfig::default().save_to(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn server_url_is_validated_before_it_is_set() {
        let mut cfg = ShelfConfig::default();
        cfg.set_server_url(" https://wallabag.example.com/app ").unwrap();
        assert_eq!(cfg.server.url.as_deref(), Some("https://wallabag.example.com/app"));

        for bad in ["not a url", "ftp://files.example.com"] {
            assert!(matches!(cfg.set_server_url(bad), Err(ConfigError::Invalid(_))));
        }
        assert_eq!(cfg.server.url.as_deref(), Some("https://wallabag.example.com/app"));
    }

    #[test]
    fn load_or_default_tolerates_a_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(ShelfConfig::load_or_default(Some(&path)).unwrap(), ShelfConfig::default());

        let mut cfg = ShelfConfig::default();
        cfg.sync.interval_sec = 60;
        cfg.save_to(&path).unwrap();
        assert_eq!(ShelfConfig::load_or_default(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn shelf_dir_is_under_home() {
        let dir = shelf_dir().unwrap();
        assert!(dir.ends_with(".shelf"));
    }
}
