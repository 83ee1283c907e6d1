mod config;

pub use config::{ConfigError, ReaderConfig, TandemConfig, WriteModeConfig, WriterConfig};
