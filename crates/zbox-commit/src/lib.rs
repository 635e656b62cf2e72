//! zbox commit - write-marker chain and commit workers
//!
//! Every blobber keeps a chain of signed write markers, each linking to the
//! previous one through its allocation root. This crate:
//! - applies a batch of allocation changes to the blobber's reference tree
//! - verifies the blobber's latest marker before extending the chain
//! - signs and submits the next marker
//! - serializes commits per blobber through one queue and one worker each

pub mod chain;
pub mod changes;
pub mod worker;

pub use chain::{CommitBatch, CommitTimeouts, MarkerChain};
pub use changes::{AllocationChange, ChangeError, DeleteFileChange, NewFileChange, UpdateFileChange};
pub use worker::{CommitHandle, CommitOutcome, CommitPool, CommitRequest, CommitResult};

use thiserror::Error;
use zbox_protocol::TransportError;

/// Errors that abort a commit on one blobber.
///
/// A failed commit leaves the blobber's chain untouched.
#[derive(Error, Debug)]
pub enum CommitError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid response from blobber {blobber}: {reason}")]
    InvalidResponse { blobber: String, reason: String },

    #[error("Latest write marker signature invalid: {0}")]
    Signature(String),

    #[error("Allocation root from latest write marker mismatch: expected {expected}, got {got}")]
    ChainMismatch { expected: String, got: String },

    #[error("Change to {path} failed: {source}")]
    Mutation {
        path: String,
        #[source]
        source: ChangeError,
    },

    #[error("Signing write marker failed: {0}")]
    Signing(String),

    #[error("Commit rejected by blobber {blobber} (status {status}): {body}")]
    CommitRejected {
        blobber: String,
        status: u16,
        body: String,
    },

    #[error("Commit batch has no affected path")]
    EmptyBatch,

    #[error("No commit queue registered for blobber {0}")]
    UnknownBlobber(String),

    #[error("Commit queue for blobber {0} is closed")]
    QueueClosed(String),
}
