//! TOML configuration for stagewatch.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) yields a working setup pointed at a local webhook executor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::executor::DEFAULT_WEBHOOK_URL;

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "STAGEWATCH_CONFIG";
/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "stagewatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagewatchConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StagewatchConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. An explicit `path` (errors are fatal).
    /// 2. The file named by `STAGEWATCH_CONFIG`.
    /// 3. `./stagewatch.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "STAGEWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.timeout_secs == 0 {
            anyhow::bail!("executor.timeout_secs must be greater than zero");
        }
        let offsets = &self.timeline.advance_offsets_ms;
        if offsets.windows(2).any(|w| w[1] < w[0]) {
            anyhow::bail!(
                "timeline.advance_offsets_ms must be non-decreasing, got {:?}",
                offsets
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Webhook that triggers the whole pipeline.
    pub url: String,
    /// Upper bound on how long the trigger call may take.
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WEBHOOK_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// What a trigger does while another run is still in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Refuse the new trigger with `AlreadyRunning`.
    #[default]
    Reject,
    /// Cancel the in-flight run's pending advances and start fresh.
    Supersede,
}

/// Display cadence of the stage timeline after the executor acknowledges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Offsets of the four scheduled advances, relative to the acknowledgement.
    pub advance_offsets_ms: [u64; 4],
    pub overlap: OverlapPolicy,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            advance_offsets_ms: [0, 1500, 3000, 4500],
            overlap: OverlapPolicy::Reject,
        }
    }
}

impl TimelineConfig {
    pub fn offsets(&self) -> [Duration; 4] {
        self.advance_offsets_ms.map(Duration::from_millis)
    }

    /// Advance everything at once; handy for tests and non-interactive runs.
    pub fn immediate(overlap: OverlapPolicy) -> Self {
        Self {
            advance_offsets_ms: [0; 4],
            overlap,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding the history snapshot.
    pub db_path: PathBuf,
    /// Keep history in memory only; nothing survives a restart.
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/stagewatch.db"),
            in_memory: false,
        }
    }
}

impl StorageConfig {
    /// The database path, unless history is kept in memory.
    pub fn db_path(&self) -> Option<&Path> {
        (!self.in_memory).then_some(self.db_path.as_path())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = StagewatchConfig::default();
        assert_eq!(cfg.executor.url, DEFAULT_WEBHOOK_URL);
        assert_eq!(cfg.executor.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.timeline.advance_offsets_ms, [0, 1500, 3000, 4500]);
        assert_eq!(cfg.timeline.overlap, OverlapPolicy::Reject);
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        assert_eq!(cfg.storage.db_path(), Some(Path::new("data/stagewatch.db")));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg = StagewatchConfig::from_toml("").unwrap();
        assert_eq!(cfg.timeline.offsets()[3], Duration::from_millis(4500));
    }

    #[test]
    fn test_partial_toml_overrides() {
        let cfg = StagewatchConfig::from_toml(
            r#"
            [executor]
            url = "http://executor.internal/webhook/collect-data"

            [timeline]
            advance_offsets_ms = [0, 100, 200, 300]
            overlap = "supersede"

            [storage]
            in_memory = true

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.executor.url, "http://executor.internal/webhook/collect-data");
        assert_eq!(cfg.executor.timeout_secs, 30);
        assert_eq!(cfg.timeline.overlap, OverlapPolicy::Supersede);
        assert_eq!(cfg.timeline.offsets()[1], Duration::from_millis(100));
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.storage.db_path(), None);
    }

    #[test]
    fn test_rejects_decreasing_offsets() {
        let err = StagewatchConfig::from_toml("[timeline]\nadvance_offsets_ms = [0, 3000, 1500, 4500]\n")
            .unwrap_err();
        assert!(err.to_string().contains("non-decreasing"));
    }

    #[test]
    fn test_rejects_wrong_offset_count() {
        assert!(StagewatchConfig::from_toml("[timeline]\nadvance_offsets_ms = [0, 1500]\n").is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        assert!(StagewatchConfig::from_toml("[executor]\ntimeout_secs = 0\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stagewatch.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1:9000\"\n").unwrap();
        let cfg = StagewatchConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
    }
}
