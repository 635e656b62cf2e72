//! Write markers: the signed, hash-linked records of a blobber's storage root.
//!
//! Every commit on a blobber produces a new marker whose
//! `previous_allocation_root` is the `allocation_root` of the marker before
//! it, so the markers of one blobber form a singly linked hash chain. The
//! allocation root binds the reference-tree hash to the commit timestamp:
//!
//! ```text
//! allocation_root = Hash(root_reference_hash + ":" + timestamp)
//! ```

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::{Identity, ProtocolError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMarker {
    pub allocation_root: String,
    pub previous_allocation_root: String,
    pub allocation_id: String,
    pub blobber_id: String,
    pub client_id: String,
    /// Signed byte delta applied by this commit.
    pub size: i64,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub signature: String,
}

impl WriteMarker {
    /// `Hash(root_hash + ":" + timestamp)`.
    pub fn compute_allocation_root(root_hash: &str, timestamp: i64) -> String {
        crypto::hash(format!("{}:{}", root_hash, timestamp).as_bytes())
    }

    /// The colon-joined fields covered by the signature.
    pub fn hash_data(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.allocation_root,
            self.previous_allocation_root,
            self.allocation_id,
            self.blobber_id,
            self.client_id,
            self.size,
            self.timestamp
        )
    }

    /// Hash of [`hash_data`](Self::hash_data); this is what gets signed.
    pub fn signing_hash(&self) -> String {
        crypto::hash(self.hash_data().as_bytes())
    }

    pub fn sign(&mut self, identity: &dyn Identity) -> Result<(), ProtocolError> {
        self.signature = identity.sign(self.signing_hash().as_bytes())?;
        Ok(())
    }

    pub fn verify_signature(&self, public_key_hex: &str) -> Result<(), ProtocolError> {
        crypto::verify_signature(
            public_key_hex,
            self.signing_hash().as_bytes(),
            &self.signature,
        )
    }

    /// Check that `root_hash` is the tree this marker was issued for.
    pub fn matches_root(&self, root_hash: &str) -> bool {
        Self::compute_allocation_root(root_hash, self.timestamp) == self.allocation_root
    }

    /// Canonical wire encoding (JSON object).
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Current time in Unix seconds, as stamped into new markers.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
