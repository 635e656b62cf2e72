//! zbox consensus - quorum-based merging of blobber listings
//!
//! Every blobber answers a listing independently and their answers can
//! diverge. This crate:
//! - queries every blobber concurrently, one task per blobber
//! - merges the responses by content identity
//! - promotes an entry once enough blobbers agree on it

pub mod list;
pub mod threshold;

pub use list::{merge_listings, BlobberListing, ListOutcome, ListRequest, ListResult, NodeFailure};
pub use threshold::{Consensus, ConsensusConfig};

use thiserror::Error;
use zbox_protocol::TransportError;

/// Errors originating from the consensus layer.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Only {responded} of {expected} blobbers responded")]
    PartialQuorum { responded: usize, expected: usize },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid list response from blobber {blobber}: {reason}")]
    InvalidResponse { blobber: String, reason: String },

    #[error("Invalid consensus threshold: {0}")]
    InvalidThreshold(String),
}
