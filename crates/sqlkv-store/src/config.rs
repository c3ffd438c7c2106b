//! Store configuration.
//!
//! A [`StoreConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! path = "data/kv.db"
//! table = "sessions"
//! sweep_interval_ms = 60000
//! busy_timeout_ms = 5000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{DEFAULT_BUSY_TIMEOUT, IN_MEMORY};
use crate::error::{KvError, KvResult};
use crate::schema::TableName;

/// Settings for opening a [`KvStore`](crate::KvStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file, or `":memory:"`.
    pub path: PathBuf,
    /// Table holding this store's keys.
    pub table: String,
    /// Sweep period in milliseconds. `None` or `0` disables the sweeper.
    pub sweep_interval_ms: Option<u64>,
    /// How long a statement waits on a locked database.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(IN_MEMORY),
            table: "kv".into(),
            sweep_interval_ms: None,
            busy_timeout_ms: millis(DEFAULT_BUSY_TIMEOUT),
        }
    }
}

impl StoreConfig {
    /// Config for `table` in the database at `path`, sweeper disabled.
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
            ..Self::default()
        }
    }

    /// Enable the sweeper with the given period.
    ///
    /// The period is stored in whole milliseconds, rounded up, so a non-zero
    /// interval never turns into a disabled sweeper. A zero interval stores
    /// `0`, which disables it.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        let ms = u64::try_from(interval.as_micros().div_ceil(1_000)).unwrap_or(u64::MAX);
        self.sweep_interval_ms = Some(ms);
        self
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> KvResult<Self> {
        toml::from_str(content).map_err(|e| KvError::Config(format!("failed to parse TOML config: {e}")))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            KvError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), table = %config.table, "store configuration loaded");
        Ok(config)
    }

    /// Validated table name.
    pub fn table_name(&self) -> KvResult<TableName> {
        TableName::new(self.table.as_str()).map_err(KvError::Config)
    }

    /// Sweep period, if the sweeper is enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Whether `path` selects an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY
    }

    /// Check every field that can be checked without touching the database.
    ///
    /// The sweep interval is not checked here: a bad interval only costs the
    /// store its sweeper, see [`KvStore::start_sweeper`](crate::KvStore::start_sweeper).
    pub fn validate(&self) -> KvResult<()> {
        self.table_name()?;
        if self.path.as_os_str().is_empty() {
            return Err(KvError::Config("database path cannot be empty".into()));
        }
        Ok(())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert!(config.is_in_memory());
        assert_eq!(config.table, "kv");
        assert_eq!(config.sweep_interval(), None);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        config.validate().unwrap();
    }

    #[test]
    fn parses_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            path = "data/kv.db"
            table = "sessions"
            sweep_interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.path, PathBuf::from("data/kv.db"));
        assert_eq!(config.table, "sessions");
        assert_eq!(config.sweep_interval(), Some(Duration::from_millis(250)));
        assert_eq!(config.busy_timeout_ms, 5_000);
    }

    #[test]
    fn zero_interval_disables_sweeper() {
        let config = StoreConfig::from_toml_str("sweep_interval_ms = 0").unwrap();
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn sub_millisecond_interval_rounds_up() {
        let config = StoreConfig::default().with_sweep_interval(Duration::from_micros(500));
        assert_eq!(config.sweep_interval_ms, Some(1));
        assert_eq!(config.sweep_interval(), Some(Duration::from_millis(1)));
        config.validate().unwrap();

        let config = StoreConfig::default().with_sweep_interval(Duration::from_micros(1_500));
        assert_eq!(config.sweep_interval(), Some(Duration::from_millis(2)));
    }

    #[test]
    fn oversized_interval_saturates_and_is_rejected() {
        let config = StoreConfig::default().with_sweep_interval(Duration::MAX);
        assert_eq!(config.sweep_interval_ms, Some(u64::MAX));
        let interval = config.sweep_interval().unwrap();
        assert!(crate::sweeper::validate_interval(interval).is_err());
    }

    #[test]
    fn rejects_bad_toml() {
        let err = StoreConfig::from_toml_str("table = [").unwrap_err();
        assert!(matches!(err, KvError::Config(_)));
    }

    #[test]
    fn rejects_bad_table() {
        let err = StoreConfig::new(IN_MEMORY, "").validate().unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = StoreConfig::new(IN_MEMORY, "x\"; DROP TABLE y")
            .validate()
            .unwrap_err();
        assert!(matches!(err, KvError::Config(_)));
    }

    #[test]
    fn from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        let config = StoreConfig::new(dir.path().join("kv.db"), "cache")
            .with_sweep_interval(Duration::from_secs(30));
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        assert_eq!(StoreConfig::from_file(&path).unwrap(), config);
        assert!(StoreConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
