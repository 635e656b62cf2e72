//! Shard dispatch for one upload stream.
//!
//! An `UploadSession` reads its source in chunks of `chunk_size * data_shards`
//! bytes, erasure-codes every chunk and sends shard `i` on the channel of
//! blobber `i` for each active blobber, lowest index first. The session keeps
//! a running SHA-256 over the real (unpadded) content and a budget of bytes
//! still expected from the source.
//!
//! A fresh upload targets every blobber and, once the last chunk is out,
//! publishes the content hash and sends `ShardMessage::Done` to each of them.
//! A repair targets only the blobbers that lost their shards; the content hash
//! was fixed by the original upload, so repair neither hashes nor signals
//! completion.
//!
//! If the dispatch fails part-way, every active blobber that has not yet
//! received `Done` gets `ShardMessage::Aborted`, so no consumer waits for a
//! `Done` that will never come and none sees both.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::{ErasureCodec, UploadError};

/// A message on a blobber's shard channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardMessage {
    /// The blobber's shard of the next chunk.
    Shard(Vec<u8>),
    /// All shards of the stream have been sent.
    Done,
    /// The stream was abandoned; no further shards will follow.
    Aborted(String),
}

/// Which part of a file a session carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Content,
    Thumbnail,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Content => f.write_str("content"),
            StreamKind::Thumbnail => f.write_str("thumbnail"),
        }
    }
}

pub struct UploadSession {
    kind: StreamKind,
    codec: ErasureCodec,
    /// Bytes per shard in one chunk.
    chunk_size: usize,
    /// Active blobber index -> that blobber's shard channel, in ascending order.
    targets: BTreeMap<usize, mpsc::Sender<ShardMessage>>,
    total_size: u64,
    remaining: u64,
    hasher: Sha256,
    content_hash: Option<String>,
    is_repair: bool,
    chunks_sent: u64,
    /// Blobbers already sent `Done`.
    finished: BTreeSet<usize>,
}

impl UploadSession {
    /// Session for a fresh upload of `total_size` bytes.
    pub fn new(
        kind: StreamKind,
        codec: ErasureCodec,
        chunk_size: usize,
        total_size: u64,
        targets: BTreeMap<usize, mpsc::Sender<ShardMessage>>,
    ) -> Result<Self, UploadError> {
        if chunk_size == 0 {
            return Err(UploadError::InvalidTarget(
                "chunk_size must be greater than 0".into(),
            ));
        }
        if targets.is_empty() {
            return Err(UploadError::InvalidTarget("no active blobbers".into()));
        }
        if let Some(&idx) = targets.keys().find(|&&idx| idx >= codec.total_shards()) {
            return Err(UploadError::InvalidTarget(format!(
                "blobber index {} outside {} shards",
                idx,
                codec.total_shards()
            )));
        }
        Ok(Self {
            kind,
            codec,
            chunk_size,
            targets,
            total_size,
            remaining: total_size,
            hasher: Sha256::new(),
            content_hash: None,
            is_repair: false,
            chunks_sent: 0,
            finished: BTreeSet::new(),
        })
    }

    /// Session re-sending the shards of an existing upload to `targets` only.
    pub fn repair(
        kind: StreamKind,
        codec: ErasureCodec,
        chunk_size: usize,
        total_size: u64,
        targets: BTreeMap<usize, mpsc::Sender<ShardMessage>>,
    ) -> Result<Self, UploadError> {
        let mut session = Self::new(kind, codec, chunk_size, total_size, targets)?;
        session.is_repair = true;
        Ok(session)
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn is_repair(&self) -> bool {
        self.is_repair
    }

    /// Active blobber indices, ascending.
    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.targets.keys().copied()
    }

    /// Source bytes still expected.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Hex SHA-256 of the content, available once a fresh upload completes.
    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Encode one chunk and send each active blobber its shard.
    ///
    /// Only the first `remaining` bytes count toward the content hash, so the
    /// zero padding of the final chunk never enters the digest.
    pub async fn push_chunk(&mut self, data: &[u8]) -> Result<(), UploadError> {
        let counted = self.remaining.min(data.len() as u64);
        if !self.is_repair {
            self.hasher.update(&data[..counted as usize]);
        }
        self.remaining -= counted;

        let mut shards = self.codec.encode(data)?;
        for (&idx, tx) in &self.targets {
            let shard = std::mem::take(&mut shards[idx]);
            tx.send(ShardMessage::Shard(shard))
                .await
                .map_err(|_| UploadError::ChannelClosed(idx))?;
        }
        self.chunks_sent += 1;

        tracing::trace!(
            stream = %self.kind,
            chunk = self.chunks_sent,
            bytes = data.len(),
            remaining = self.remaining,
            "Pushed chunk"
        );
        Ok(())
    }

    /// Finish a fresh upload: publish the content hash and signal `Done`.
    ///
    /// No-op for repairs.
    pub async fn complete(&mut self) -> Result<(), UploadError> {
        if self.is_repair {
            return Ok(());
        }
        for (&idx, tx) in &self.targets {
            if self.finished.contains(&idx) {
                continue;
            }
            tx.send(ShardMessage::Done)
                .await
                .map_err(|_| UploadError::ChannelClosed(idx))?;
            self.finished.insert(idx);
        }
        let digest = std::mem::take(&mut self.hasher).finalize();
        self.content_hash = Some(hex::encode(digest));

        tracing::debug!(
            stream = %self.kind,
            chunks = self.chunks_sent,
            hash = ?self.content_hash,
            "Upload stream complete"
        );
        Ok(())
    }

    /// Tell every active blobber still waiting for `Done` that the stream
    /// was abandoned.
    pub async fn abort(&self, reason: &str) {
        tracing::warn!(stream = %self.kind, reason, "Aborting upload stream");
        for (idx, tx) in &self.targets {
            if self.finished.contains(idx) {
                continue;
            }
            // A consumer that already went away needs no notice.
            let _ = tx.send(ShardMessage::Aborted(reason.to_string())).await;
        }
    }

    /// Stream the whole source through the codec.
    ///
    /// Any failure aborts the session and notifies every active blobber.
    pub async fn dispatch<R: AsyncRead + Unpin>(&mut self, reader: R) -> Result<(), UploadError> {
        let result = match self.dispatch_chunks(reader).await {
            Ok(()) => self.complete().await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.abort(&e.to_string()).await;
        }
        result
    }

    async fn dispatch_chunks<R: AsyncRead + Unpin>(
        &mut self,
        mut reader: R,
    ) -> Result<(), UploadError> {
        let data_shards = self.codec.data_shards() as u64;
        let chunk_size = self.chunk_size as u64;
        let per_shard = self.total_size.div_ceil(data_shards);
        let chunks = per_shard.div_ceil(chunk_size);
        let mut unread = self.total_size;

        tracing::debug!(
            stream = %self.kind,
            size = self.total_size,
            per_shard,
            chunks,
            repair = self.is_repair,
            "Dispatching upload stream"
        );

        for ctr in 0..chunks {
            let shard_bytes = (per_shard - ctr * chunk_size).min(chunk_size);
            let mut buf = vec![0u8; (shard_bytes * data_shards) as usize];
            let to_read = unread.min(buf.len() as u64) as usize;
            reader.read_exact(&mut buf[..to_read]).await?;
            unread -= to_read as u64;
            self.push_chunk(&buf).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Targets = BTreeMap<usize, mpsc::Sender<ShardMessage>>;

    fn targets(indices: &[usize]) -> (Targets, Vec<mpsc::Receiver<ShardMessage>>) {
        let mut map = BTreeMap::new();
        let mut rxs = Vec::new();
        for &idx in indices {
            let (tx, rx) = mpsc::channel(64);
            map.insert(idx, tx);
            rxs.push(rx);
        }
        (map, rxs)
    }

    #[test]
    fn test_rejects_index_outside_shards() {
        let (map, _rxs) = targets(&[0, 3]);
        let codec = ErasureCodec::new(2, 1).unwrap();
        assert!(matches!(
            UploadSession::new(StreamKind::Content, codec, 4, 8, map),
            Err(UploadError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_rejects_empty_targets() {
        let codec = ErasureCodec::new(2, 1).unwrap();
        assert!(UploadSession::new(StreamKind::Content, codec, 4, 8, BTreeMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_budget_clamps_hash_to_real_bytes() {
        let (map, _rxs) = targets(&[0, 1, 2]);
        let codec = ErasureCodec::new(2, 1).unwrap();
        let mut session = UploadSession::new(StreamKind::Content, codec, 4, 3, map).unwrap();
        session.push_chunk(b"abc\0\0\0\0\0").await.unwrap();
        assert_eq!(session.remaining(), 0);
        session.complete().await.unwrap();
        let expected = hex::encode(Sha256::digest(b"abc"));
        assert_eq!(session.content_hash(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_closed_channel_is_reported() {
        let (map, rxs) = targets(&[0, 1]);
        drop(rxs);
        let codec = ErasureCodec::new(1, 1).unwrap();
        let mut session = UploadSession::new(StreamKind::Content, codec, 4, 4, map).unwrap();
        assert!(matches!(
            session.push_chunk(b"abcd").await,
            Err(UploadError::ChannelClosed(0))
        ));
    }
}
