//! Configuration loading from TOML and environment variables.
//!
//! The SDK reads its configuration from:
//! 1. A TOML config file
//! 2. Environment variables (override TOML values)
//!
//! Environment variable prefix: ZBOX_

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zbox_commit::CommitTimeouts;

/// Top-level SDK configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub erasure: ErasureConfig,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub consensus: ConsensusSettings,
    #[serde(default)]
    pub list: ListConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upload chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Bytes per shard in one chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Buffered shard messages per blobber channel.
    #[serde(default = "default_shard_channel_depth")]
    pub shard_channel_depth: usize,
}

/// Commit queues and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Commits that may wait in one blobber's queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_reference_path_timeout")]
    pub reference_path_timeout_secs: u64,
    #[serde(default = "default_commit_timeout")]
    pub commit_timeout_secs: u64,
}

/// Agreement required across blobbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSettings {
    /// Percentage of the allocation's blobbers that must agree.
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: f64,
}

/// Listing fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    #[serde(default = "default_list_timeout")]
    pub timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "zbox_commit=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output JSON-formatted logs.
    #[serde(default)]
    pub json_format: bool,
}

// -- Defaults --

fn default_chunk_size() -> usize {
    zbox_protocol::CHUNK_SIZE
}
fn default_shard_channel_depth() -> usize {
    zbox_protocol::SHARD_CHANNEL_DEPTH
}
fn default_queue_depth() -> usize {
    zbox_protocol::COMMIT_QUEUE_DEPTH
}
fn default_reference_path_timeout() -> u64 {
    zbox_protocol::REFERENCE_PATH_TIMEOUT_SECS
}
fn default_commit_timeout() -> u64 {
    zbox_protocol::COMMIT_TIMEOUT_SECS
}
fn default_threshold_percent() -> f64 {
    zbox_protocol::DEFAULT_CONSENSUS_THRESHOLD
}
fn default_list_timeout() -> u64 {
    zbox_protocol::LIST_TIMEOUT_SECS
}
fn default_log_level() -> String {
    "info".to_string()
}

// -- Trait impls --

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            shard_channel_depth: default_shard_channel_depth(),
        }
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            reference_path_timeout_secs: default_reference_path_timeout(),
            commit_timeout_secs: default_commit_timeout(),
        }
    }
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            threshold_percent: default_threshold_percent(),
        }
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_list_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl SdkConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: SdkConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, with environment variable overrides.
    ///
    /// A missing file falls back to defaults. For example:
    /// `ZBOX_CONSENSUS_THRESHOLD=75`
    pub fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut config = if let Some(path) = path {
            if path.exists() {
                Self::from_file(path)?
            } else {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not found, using defaults"
                );
                Self::default()
            }
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Apply overrides looked up by `ZBOX_*` variable name.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("ZBOX_CHUNK_SIZE") {
            if let Ok(n) = val.parse() {
                self.erasure.chunk_size = n;
            }
        }
        if let Some(val) = lookup("ZBOX_COMMIT_QUEUE_DEPTH") {
            if let Ok(n) = val.parse() {
                self.commit.queue_depth = n;
            }
        }
        if let Some(val) = lookup("ZBOX_REFERENCE_PATH_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.commit.reference_path_timeout_secs = secs;
            }
        }
        if let Some(val) = lookup("ZBOX_COMMIT_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.commit.commit_timeout_secs = secs;
            }
        }
        if let Some(val) = lookup("ZBOX_CONSENSUS_THRESHOLD") {
            if let Ok(pct) = val.parse() {
                self.consensus.threshold_percent = pct;
            }
        }
        if let Some(val) = lookup("ZBOX_LIST_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.list.timeout_secs = secs;
            }
        }
        if let Some(val) = lookup("ZBOX_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("ZBOX_LOG_JSON") {
            self.logging.json_format = val == "true" || val == "1";
        }
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(self.erasure.chunk_size > 0, "erasure.chunk_size must be positive");
        anyhow::ensure!(
            self.erasure.shard_channel_depth > 0,
            "erasure.shard_channel_depth must be positive"
        );
        anyhow::ensure!(self.commit.queue_depth > 0, "commit.queue_depth must be positive");
        let pct = self.consensus.threshold_percent;
        anyhow::ensure!(
            pct > 0.0 && pct <= 100.0,
            "consensus.threshold_percent must be within (0, 100], got {}",
            pct
        );
        Ok(())
    }

    pub fn commit_timeouts(&self) -> CommitTimeouts {
        CommitTimeouts {
            reference_path: Duration::from_secs(self.commit.reference_path_timeout_secs),
            commit: Duration::from_secs(self.commit.commit_timeout_secs),
        }
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list.timeout_secs)
    }
}
