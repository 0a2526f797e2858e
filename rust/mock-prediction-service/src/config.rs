use std::time::Duration;

use thiserror::Error;

use tracing::level_filters::LevelFilter;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_BACKLOG: u32 = 5;
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_VERBOSITY: u8 = 1;
pub const DEFAULT_SEED: u64 = 1;
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_RETRIES: usize = 5;
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("backlog must be at least 1")]
    InvalidBacklog,

    #[error("buffer size must be at least 1")]
    InvalidBufferSize,

    #[error("wait interval must be greater than zero")]
    InvalidWaitInterval,

    #[error("max request bytes must be at least 1")]
    InvalidMaxRequestBytes,
}

/// How the end of a request is detected on the inbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FramingMode {
    /// One JSON document terminated by `\n` (or by the sender closing).
    #[default]
    Line,

    /// Wait for the sender to go quiet, then try to parse what arrived.
    Quiescence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FramingConfig {
    pub mode: FramingMode,
    pub buffer_size: usize,
    pub max_request_bytes: usize,
    pub wait_interval: Duration,
    pub max_retries: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            mode: FramingMode::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            wait_interval: DEFAULT_WAIT_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Process wide settings, fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub backlog: u32,
    pub verbosity: u8,
    pub seed: u64,
    pub framing: FramingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            verbosity: DEFAULT_VERBOSITY,
            seed: DEFAULT_SEED,
            framing: FramingConfig::default(),
        }
    }
}

impl Config {
    /// Check the numeric invariants.
    ///
    /// # Errors
    /// * The first setting found out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 {
            return Err(ConfigError::InvalidBacklog);
        }
        if self.framing.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }
        if self.framing.max_request_bytes == 0 {
            return Err(ConfigError::InvalidMaxRequestBytes);
        }
        if self.framing.mode == FramingMode::Quiescence && self.framing.wait_interval.is_zero() {
            return Err(ConfigError::InvalidWaitInterval);
        }
        Ok(())
    }

    #[must_use]
    pub fn level_filter(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}
