use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Failure of a single request to a single blobber.
///
/// Never retried by the client core; retry policy belongs to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("Connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("Unexpected status {status} from {url}: {body}")]
    Status { url: String, status: u16, body: String },
}
