use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::bucket::TimeBucket;
use crate::error::EngineError;
use crate::writer::WriteShape;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SaverConfig {
    /// Root directory all files are written under.
    pub disk_path: PathBuf,

    /// Usage (whole GiB) at which a warning is logged. 0 disables.
    #[serde(default)]
    pub warning_size_gb: u64,

    /// Usage (whole GiB) above which old files are deleted. 0 disables.
    #[serde(default)]
    pub max_size_gb: u64,

    /// Flush period, seconds.
    #[serde(default = "default_flush_period_secs")]
    pub flush_period_secs: u64,

    /// Quota sweep period, seconds.
    #[serde(default = "default_sweep_period_secs")]
    pub sweep_period_secs: u64,

    /// What payloads are and how they are ingested.
    #[serde(default)]
    pub mode: SaverMode,

    /// One file per batch or one file per payload.
    #[serde(default)]
    pub write_shape: WriteShape,

    /// Time-bucketed batching granularity.
    #[serde(default)]
    pub batching: Batching,

    /// How many times a batch that failed to write is re-queued before being dropped.
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Line-oriented TCP producer. No source is started when absent.
    #[serde(default)]
    pub source: Option<SourceConfig>,
}

fn default_flush_period_secs() -> u64 {
    3
}

fn default_sweep_period_secs() -> u64 {
    90 * 60
}

fn default_write_retries() -> u32 {
    3
}

/// Ingestion mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaverMode {
    /// Raw bytes, buffered and flushed periodically.
    #[default]
    Raw,
    /// Raw bytes, each written to its own file inside `process`.
    Immediate,
    /// JSON orderbook records, formatted and partitioned by asset pair and side.
    Orderbook,
}

/// Time-bucketed batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Batching {
    #[default]
    None,
    Daily,
    Hourly,
}

impl Batching {
    pub fn bucket(self) -> Option<TimeBucket> {
        match self {
            Batching::None => None,
            Batching::Daily => Some(TimeBucket::Daily),
            Batching::Hourly => Some(TimeBucket::Hourly),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum line length in bytes (0 = unlimited).
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_line_length: default_max_line_length(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7070".to_string()
}

fn default_max_line_length() -> usize {
    1024 * 1024
}

impl SaverConfig {
    /// Minimal config rooted at `disk_path`, everything else at defaults.
    pub fn with_path(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
            warning_size_gb: 0,
            max_size_gb: 0,
            flush_period_secs: default_flush_period_secs(),
            sweep_period_secs: default_sweep_period_secs(),
            mode: SaverMode::default(),
            write_shape: WriteShape::default(),
            batching: Batching::default(),
            write_retries: default_write_retries(),
            source: None,
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.disk_path.as_os_str().is_empty() {
            return Err(EngineError::Config("disk_path must not be empty".into()));
        }
        if self.flush_period_secs == 0 {
            return Err(EngineError::Config("flush_period_secs must be > 0".into()));
        }
        if self.sweep_period_secs == 0 {
            return Err(EngineError::Config("sweep_period_secs must be > 0".into()));
        }
        if self.warning_size_gb > 0 && self.max_size_gb > 0 && self.warning_size_gb > self.max_size_gb {
            return Err(EngineError::Config(format!(
                "warning_size_gb ({}) must not exceed max_size_gb ({})",
                self.warning_size_gb, self.max_size_gb
            )));
        }
        Ok(())
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.flush_period_secs)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_secs)
    }
}
