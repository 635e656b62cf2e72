//! zbox sdk - allocation-level client
//!
//! Ties the lower crates together for one allocation:
//! - `config`: TOML configuration with `ZBOX_*` environment overrides
//! - `telemetry`: `tracing` subscriber setup
//! - `allocation`: upload sessions, per-blobber commits and consensus listings

pub mod allocation;
pub mod config;
pub mod telemetry;

pub use allocation::{
    AllocationContext, BlobberCommit, CommitSummary, FileMeta, ShardReceivers, ThumbnailMeta,
};
pub use config::SdkConfig;

use thiserror::Error;
use zbox_erasure::{ErasureError, StreamKind, UploadError};

/// Errors surfaced by the allocation-level client.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Erasure error: {0}")]
    Erasure(#[from] ErasureError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shard index {0} is outside the allocation")]
    InvalidShardIndex(usize),

    #[error("The {0} upload has not completed")]
    IncompleteUpload(StreamKind),
}
