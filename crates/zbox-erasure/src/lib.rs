//! zbox erasure - shard codec and upload dispatch
//!
//! - `codec`: splits a buffer into `data + parity` Reed-Solomon shards and
//!   reconstructs it from any `data` of them
//! - `dispatcher`: streams a source through the codec chunk by chunk and
//!   routes shard `i` to blobber `i` for every active blobber

pub mod codec;
pub mod dispatcher;

pub use codec::ErasureCodec;
pub use dispatcher::{ShardMessage, StreamKind, UploadSession};

use thiserror::Error;

/// Errors originating from the shard codec.
#[derive(Error, Debug)]
pub enum ErasureError {
    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Reconstruction failed: {0}")]
    Reconstruction(String),
}

/// Errors that abort an upload session.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Erasure(#[from] ErasureError),

    #[error("Source read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("Shard channel for blobber index {0} is closed")]
    ChannelClosed(usize),

    #[error("Invalid upload target: {0}")]
    InvalidTarget(String),
}
