use std::{env, fs, path::Path};

use serde::Deserialize;
use thiserror::Error;

use crate::PROTOCOL_VERSION;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "BINDRPC_CONFIG";

const DEFAULT_MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024;
const DEFAULT_MAX_DEPTH: usize = 64;
const DEFAULT_STREAM_CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STREAM_WINDOW: usize = 1024 * 1024;

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunables shared by codec, dispatcher and transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Version written into outgoing archives.
    pub protocol_version: u64,
    /// Largest frame payload accepted or produced.
    pub max_frame_size: u32,
    /// Maximum nesting of objects inside one archive.
    pub max_depth: usize,
    /// Size of stream chunk frames.
    pub stream_chunk_size: usize,
    /// Bytes a sender may have in flight per stream before the receiver
    /// grants more credit.
    pub stream_window: usize,
    /// Client-side deadline for one call.
    pub call_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
            stream_chunk_size: DEFAULT_STREAM_CHUNK_SIZE,
            stream_window: DEFAULT_STREAM_WINDOW,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl RpcConfig {
    /// Parses and validates a JSON document; missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: RpcConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Loads the file named by `BINDRPC_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol_version == 0 {
            return Err(ConfigError::Invalid {
                field: "protocol_version",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.stream_chunk_size == 0 || self.stream_chunk_size > self.max_frame_size as usize {
            return Err(ConfigError::Invalid {
                field: "stream_chunk_size",
                reason: format!("must be within 1..={}", self.max_frame_size),
            });
        }
        if self.stream_window < self.stream_chunk_size || self.stream_window > u32::MAX as usize {
            return Err(ConfigError::Invalid {
                field: "stream_window",
                reason: format!("must be within {}..={}", self.stream_chunk_size, u32::MAX),
            });
        }
        Ok(())
    }
}
