//! Reed-Solomon shard codec.
//!
//! Wraps `reed-solomon-erasure` over GF(2^8). A buffer of `len` bytes is
//! zero-padded to `data_shards * shard_len` where
//! `shard_len = max(1, ceil(len / data_shards))`, split into `data_shards`
//! equal shards, and extended with `parity_shards` parity shards.
//! Encoding is deterministic: identical input always yields identical shards.

use reed_solomon_erasure::galois_8::ReedSolomon;
use zbox_protocol::MAX_TOTAL_SHARDS;

use crate::ErasureError;

pub struct ErasureCodec {
    data_shards: usize,
    parity_shards: usize,
    /// `None` when there are no parity shards to compute.
    rs: Option<ReedSolomon>,
}

impl ErasureCodec {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self, ErasureError> {
        if data_shards == 0 {
            return Err(ErasureError::Encoding(
                "data_shards must be greater than 0".into(),
            ));
        }
        if data_shards + parity_shards > MAX_TOTAL_SHARDS {
            return Err(ErasureError::Encoding(format!(
                "total shards ({}) cannot exceed {}",
                data_shards + parity_shards,
                MAX_TOTAL_SHARDS
            )));
        }
        let rs = if parity_shards > 0 {
            Some(
                ReedSolomon::new(data_shards, parity_shards)
                    .map_err(|e| ErasureError::Encoding(format!("{:?}", e)))?,
            )
        } else {
            None
        };
        Ok(Self {
            data_shards,
            parity_shards,
            rs,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Length of each shard produced for an input of `data_len` bytes.
    pub fn shard_len(&self, data_len: usize) -> usize {
        data_len.div_ceil(self.data_shards).max(1)
    }

    /// Split `data` into `data_shards + parity_shards` shards.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, ErasureError> {
        let shard_len = self.shard_len(data.len());

        let mut padded = data.to_vec();
        padded.resize(shard_len * self.data_shards, 0);

        let mut shards: Vec<Vec<u8>> = padded.chunks(shard_len).map(|c| c.to_vec()).collect();
        shards.resize(self.total_shards(), vec![0u8; shard_len]);

        if let Some(rs) = &self.rs {
            rs.encode(&mut shards)
                .map_err(|e| ErasureError::Encoding(format!("{:?}", e)))?;
        }
        Ok(shards)
    }

    /// Rebuild the padded data from any `data_shards` of the shards.
    ///
    /// Missing shards are `None`; on success every slot is filled in.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<Vec<u8>, ErasureError> {
        if shards.len() != self.total_shards() {
            return Err(ErasureError::Reconstruction(format!(
                "expected {} shard slots, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards {
            return Err(ErasureError::Reconstruction(format!(
                "need {} shards, have {}",
                self.data_shards, available
            )));
        }

        let mut lengths = shards.iter().flatten().map(|s| s.len());
        let first = lengths.next().unwrap_or(0);
        if lengths.any(|len| len != first) {
            return Err(ErasureError::Reconstruction(
                "shard lengths disagree".into(),
            ));
        }

        if let Some(rs) = &self.rs {
            rs.reconstruct(shards)
                .map_err(|e| ErasureError::Reconstruction(format!("{:?}", e)))?;
        }

        let mut data = Vec::with_capacity(first * self.data_shards);
        for shard in shards.iter().take(self.data_shards) {
            match shard {
                Some(bytes) => data.extend_from_slice(bytes),
                None => {
                    return Err(ErasureError::Reconstruction(
                        "data shard missing after reconstruction".into(),
                    ))
                }
            }
        }
        Ok(data)
    }

    /// Rebuild the data and trim the encoder's padding.
    pub fn decode(
        &self,
        mut shards: Vec<Option<Vec<u8>>>,
        original_len: usize,
    ) -> Result<Vec<u8>, ErasureError> {
        let mut data = self.reconstruct(&mut shards)?;
        if original_len > data.len() {
            return Err(ErasureError::Reconstruction(format!(
                "original length {} exceeds reconstructed {}",
                original_len,
                data.len()
            )));
        }
        data.truncate(original_len);
        Ok(data)
    }
}

impl std::fmt::Debug for ErasureCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasureCodec")
            .field("data_shards", &self.data_shards)
            .field("parity_shards", &self.parity_shards)
            .finish()
    }
}

/// Encode `data` into `d + p` shards.
pub fn encode(data: &[u8], d: usize, p: usize) -> Result<Vec<Vec<u8>>, ErasureError> {
    ErasureCodec::new(d, p)?.encode(data)
}

/// Decode `original_len` bytes from any `d` of the `d + p` shards.
pub fn decode(
    shards: Vec<Option<Vec<u8>>>,
    d: usize,
    p: usize,
    original_len: usize,
) -> Result<Vec<u8>, ErasureError> {
    ErasureCodec::new(d, p)
        .map_err(|e| ErasureError::Reconstruction(e.to_string()))?
        .decode(shards, original_len)
}
