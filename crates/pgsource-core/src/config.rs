//! pgsource.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `database.url`.
pub const DATABASE_URL_ENV: &str = "PGSOURCE_DATABASE_URL";

pub const DEFAULT_DATA_DIR: &str = "/var/lib/pgsource";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PgSourceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_resync")]
    pub resync_interval_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReceiverConfig {
    /// Container image of the receive adapter.
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_max_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_statement_timeout() -> u64 {
    30
}
fn default_workers() -> usize {
    4
}
fn default_resync() -> u64 {
    300
}
fn default_backoff_base() -> u64 {
    500
}
fn default_backoff_max() -> u64 {
    300
}
fn default_port() -> u16 {
    8480
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            statement_timeout_secs: default_statement_timeout(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resync_interval_secs: default_resync(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

impl ControllerConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

impl PgSourceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: PgSourceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pool or the controller cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = [
            ("database.max_connections", u64::from(self.database.max_connections)),
            ("database.connect_timeout_secs", self.database.connect_timeout_secs),
            ("database.statement_timeout_secs", self.database.statement_timeout_secs),
            ("controller.workers", self.controller.workers as u64),
            ("controller.resync_interval_secs", self.controller.resync_interval_secs),
            ("controller.backoff_base_ms", self.controller.backoff_base_ms),
            ("controller.backoff_max_secs", self.controller.backoff_max_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                anyhow::bail!("{field} must be greater than zero");
            }
        }
        if self.controller.backoff_base() > self.controller.backoff_max() {
            anyhow::bail!("controller.backoff_base_ms exceeds controller.backoff_max_secs");
        }
        Ok(())
    }

    /// `data_dir`, or [`DEFAULT_DATA_DIR`] when unset.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    /// Apply environment overrides (currently only the database URL).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.is_empty() {
                self.database.url = Some(url);
            }
        }
        self
    }
}
