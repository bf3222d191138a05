//! Detector configuration
//!
//! Defaults match the behavior described in the crate docs. A TOML file can
//! override any subset:
//!
//! ```toml
//! cache_ttl_secs = 30
//! probe_timeout_ms = 5000
//! read_limit = 100
//!
//! [entropy]
//! offset = 16
//! len = 32
//! threshold = 20
//! ```

use crate::detector::header::{EntropyWindow, MAX_READ_LIMIT, SQLITE_HEADER_LEN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{key} = {value} is out of range (at most {max} bytes)")]
    OutOfRange {
        key: &'static str,
        value: usize,
        max: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    /// How long a classification stays valid; also the sweep period
    pub cache_ttl: Duration,
    /// Upper bound on one open-probe
    pub probe_timeout: Duration,
    /// Bytes read from the start of each file
    pub read_limit: usize,
    pub entropy: EntropyWindow,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            read_limit: SQLITE_HEADER_LEN,
            entropy: EntropyWindow::default(),
        }
    }
}

impl DetectorConfig {
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_read_limit(mut self, limit: usize) -> Self {
        self.read_limit = limit;
        self
    }

    pub fn with_entropy(mut self, entropy: EntropyWindow) -> Self {
        self.entropy = entropy;
        self
    }

    /// Bytes to read; never less than what the entropy window needs,
    /// never more than [`MAX_READ_LIMIT`].
    pub fn read_limit(&self) -> usize {
        self.read_limit.max(self.entropy.end()).min(MAX_READ_LIMIT)
    }

    /// Reject sizes that would make every detection read an unbounded prefix.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_limit > MAX_READ_LIMIT {
            return Err(ConfigError::OutOfRange {
                key: "read_limit",
                value: self.read_limit,
                max: MAX_READ_LIMIT,
            });
        }

        match self.entropy.offset.checked_add(self.entropy.len) {
            Some(end) if end <= MAX_READ_LIMIT => Ok(()),
            end => Err(ConfigError::OutOfRange {
                key: "entropy.offset + entropy.len",
                value: end.unwrap_or(usize::MAX),
                max: MAX_READ_LIMIT,
            }),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(contents)?;
        let config = DetectorConfig::from(file);
        config.validate()?;
        Ok(config)
    }
}

/// On-disk shape; durations are plain integers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
struct FileConfig {
    cache_ttl_secs: u64,
    probe_timeout_ms: u64,
    read_limit: usize,
    entropy: EntropyWindow,
}

impl Default for FileConfig {
    fn default() -> Self {
        let defaults = DetectorConfig::default();
        Self {
            cache_ttl_secs: defaults.cache_ttl.as_secs(),
            probe_timeout_ms: defaults.probe_timeout.as_millis() as u64,
            read_limit: defaults.read_limit,
            entropy: defaults.entropy,
        }
    }
}

impl From<FileConfig> for DetectorConfig {
    fn from(file: FileConfig) -> Self {
        Self {
            cache_ttl: Duration::from_secs(file.cache_ttl_secs),
            probe_timeout: Duration::from_millis(file.probe_timeout_ms),
            read_limit: file.read_limit,
            entropy: file.entropy,
        }
    }
}
