use serde::{Deserialize, Serialize};

use crate::{ProtocolError, MAX_TOTAL_SHARDS};

/// A storage node ("blobber") participating in an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blobber {
    /// Stable node identifier.
    pub id: String,
    /// Base URL requests to this node are built from.
    pub base_url: String,
}

impl Blobber {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
        }
    }
}

impl std::fmt::Display for Blobber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.base_url)
    }
}

/// A storage contract spanning a fixed set of blobbers.
///
/// Shard `i` of every chunk is always stored on `blobbers[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    pub data_shards: usize,
    pub parity_shards: usize,
    pub blobbers: Vec<Blobber>,
}

impl Allocation {
    /// Build an allocation, checking the shard counts against the node set.
    pub fn new(
        id: impl Into<String>,
        data_shards: usize,
        parity_shards: usize,
        blobbers: Vec<Blobber>,
    ) -> Result<Self, ProtocolError> {
        let allocation = Self {
            id: id.into(),
            data_shards,
            parity_shards,
            blobbers,
        };
        allocation.validate()?;
        Ok(allocation)
    }

    /// Check the shard counts against the node set. Deserialized
    /// allocations skip `new` and must be validated before use.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.data_shards == 0 {
            return Err(ProtocolError::InvalidAllocation(
                "data_shards must be at least 1".into(),
            ));
        }
        let total = self.data_shards + self.parity_shards;
        if total > MAX_TOTAL_SHARDS {
            return Err(ProtocolError::InvalidAllocation(format!(
                "total shards ({}) cannot exceed {}",
                total, MAX_TOTAL_SHARDS
            )));
        }
        if self.blobbers.len() < total {
            return Err(ProtocolError::InvalidAllocation(format!(
                "{} blobbers cannot hold {} shards",
                self.blobbers.len(),
                total
            )));
        }
        Ok(())
    }

    /// Total shards per chunk (data + parity).
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// The blobber that stores shard `index`.
    pub fn blobber_for_shard(&self, index: usize) -> Option<&Blobber> {
        if index < self.total_shards() {
            self.blobbers.get(index)
        } else {
            None
        }
    }
}
