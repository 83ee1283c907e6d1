use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TandemConfig {
    #[serde(default = "defaults::shm_file_path")]
    pub shm_file_path: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub writer: WriterConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Sleep between polls of a busy sequence counter; 0 spins.
    #[serde(default = "defaults::poll_interval_us")]
    pub poll_interval_us: u64,
    /// How often the monitor logs the current record.
    #[serde(default = "defaults::report_interval_ms")]
    pub report_interval_ms: u64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct WriterConfig {
    #[serde(default)]
    pub mode: WriteModeConfig,
    /// Period of the writer's control loop.
    #[serde(default = "defaults::period_us")]
    pub period_us: u64,
    /// mlock the region after creating it.
    #[serde(default = "defaults::lock_memory")]
    pub lock_memory: bool,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteModeConfig {
    #[default]
    InPlace,
    DoubleBuffered,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn shm_file_path() -> String {
        "/tmp/tandem_region".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn poll_interval_us() -> u64 {
        10_000 // 10 ms
    }

    pub fn report_interval_ms() -> u64 {
        5_000
    }

    pub fn period_us() -> u64 {
        1_000
    }

    pub fn lock_memory() -> bool {
        true
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: defaults::poll_interval_us(),
            report_interval_ms: defaults::report_interval_ms(),
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            mode: WriteModeConfig::default(),
            period_us: defaults::period_us(),
            lock_memory: defaults::lock_memory(),
        }
    }
}

impl Default for TandemConfig {
    fn default() -> Self {
        Self {
            shm_file_path: defaults::shm_file_path(),
            log_level: defaults::log_level(),
            reader: ReaderConfig::default(),
            writer: WriterConfig::default(),
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

impl WriterConfig {
    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_us)
    }
}

impl TandemConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let tandem_config: TandemConfig = toml::from_str(toml_str)?;
        Ok(tandem_config)
    }

    /// Loads `path` if given, otherwise falls back to the defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
