//! Configuration for an address space and the subsystems hanging off it.
//!
//! Every section has sensible defaults; callers typically start from
//! `SpaceConfig::default()` or load a JSON document.

use crate::error::{Result, VspaceError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Master configuration for an address space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    /// Analysis scheduler configuration.
    pub analysis: AnalysisConfig,
    /// Background search configuration.
    pub search: SearchConfig,
    /// Linear cursor rendering configuration.
    pub linear: LinearConfig,
    /// Entropy computation configuration.
    pub entropy: EntropyConfig,
    /// Tracing subscriber settings, used by `logging::init_from_config`.
    pub logging: LoggingConfig,
}

/// Analysis scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Adding a function or entry point arms the scheduler (default: true).
    pub auto_schedule: bool,
    /// Functions whose discovered extent exceeds this are skipped (default: 0x10000).
    pub max_function_size: u64,
    /// Upper bound on basic blocks discovered per function (default: 4096).
    pub max_blocks_per_function: usize,
    /// Worker threads for parallel disassembly; 0 uses the rayon default.
    pub worker_threads: usize,
    /// Shortest string reported by extended analysis (default: 4).
    pub min_string_length: usize,
    /// Longest string reported by extended analysis (default: 1024).
    pub max_string_length: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            auto_schedule: true,
            max_function_size: 0x10000,
            max_blocks_per_function: 4096,
            worker_threads: 0,
            min_string_length: 4,
            max_string_length: 1024,
        }
    }
}

/// Background search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Bytes read per scan step (default: 65536).
    pub chunk_size: usize,
    /// Progress callback fires at most once per this many bytes (default: 65536).
    pub progress_granularity: usize,
    /// Wall-clock bound for a single scan in seconds; 0 disables it.
    pub timeout_seconds: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            progress_granularity: 64 * 1024,
            timeout_seconds: 0,
        }
    }
}

/// Linear cursor rendering configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
    /// Bytes per hex row (default: 16).
    pub bytes_per_row: usize,
    /// Emit header lines at function starts (default: true).
    pub show_function_headers: bool,
    /// Step output cap; a single step never yields more lines than this (default: 64).
    pub max_lines_per_step: usize,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            bytes_per_row: 16,
            show_function_headers: true,
            max_lines_per_step: 64,
        }
    }
}

/// Entropy computation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// Block size used when the caller passes 0 (default: 4096).
    pub default_block_size: usize,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            default_block_size: 4096,
        }
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset (default: "info").
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl SpaceConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: SpaceConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings that would make scans or rendering loop forever.
    pub fn validate(&self) -> Result<()> {
        if self.linear.bytes_per_row == 0 {
            return Err(VspaceError::InvalidArgument(
                "linear.bytes_per_row must be non-zero".into(),
            ));
        }
        if self.linear.max_lines_per_step == 0 {
            return Err(VspaceError::InvalidArgument(
                "linear.max_lines_per_step must be non-zero".into(),
            ));
        }
        if self.search.chunk_size == 0 {
            return Err(VspaceError::InvalidArgument(
                "search.chunk_size must be non-zero".into(),
            ));
        }
        if self.entropy.default_block_size == 0 {
            return Err(VspaceError::InvalidArgument(
                "entropy.default_block_size must be non-zero".into(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(VspaceError::InvalidArgument(
                "logging.level must not be empty".into(),
            ));
        }
        if self.analysis.min_string_length > self.analysis.max_string_length {
            return Err(VspaceError::InvalidArgument(
                "analysis.min_string_length exceeds max_string_length".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SpaceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.analysis.auto_schedule);
        assert_eq!(config.linear.bytes_per_row, 16);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = SpaceConfig::from_json_str(r#"{"linear": {"bytes_per_row": 8}}"#).unwrap();
        assert_eq!(config.linear.bytes_per_row, 8);
        assert!(config.linear.show_function_headers);
        assert_eq!(config.search.chunk_size, 64 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let err = SpaceConfig::from_json_str(r#"{"search": {"chunk_size": 0}}"#).unwrap_err();
        assert!(matches!(err, VspaceError::InvalidArgument(_)));
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space.json");
        let mut config = SpaceConfig::default();
        config.analysis.auto_schedule = false;
        std::fs::write(&path, config.to_json_string().unwrap()).unwrap();
        let loaded = SpaceConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
