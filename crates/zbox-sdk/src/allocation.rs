//! Allocation context: everything the client needs to work on one allocation.
//!
//! `AllocationContext` owns the allocation's commit pool and wires the
//! shared transport and identity into uploads, commits and listings. The
//! pool's queues live from `open()` until `close()`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use zbox_commit::{
    AllocationChange, CommitBatch, CommitOutcome, CommitPool, CommitResult, DeleteFileChange,
    MarkerChain, NewFileChange, UpdateFileChange,
};
use zbox_consensus::{Consensus, ConsensusConfig, ListOutcome, ListRequest};
use zbox_erasure::{ErasureCodec, ShardMessage, StreamKind, UploadSession};
use zbox_protocol::{Allocation, Blobber, Identity, Ref, Transport};

use crate::config::SdkConfig;
use crate::SdkError;

/// Receiving ends of an upload session's shard channels, by blobber index.
pub type ShardReceivers = BTreeMap<usize, mpsc::Receiver<ShardMessage>>;

/// Metadata of an uploaded file, as recorded in the reference tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub path: String,
    pub size: i64,
    /// Hash of the original content.
    pub actual_hash: String,
    pub mimetype: String,
    /// Chunks each blobber stores.
    pub num_blocks: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<ThumbnailMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailMeta {
    pub size: i64,
    pub actual_hash: String,
}

impl FileMeta {
    /// Metadata of a completed content session.
    ///
    /// Fails if the session was a repair or has not completed.
    pub fn from_session(
        path: &str,
        mimetype: &str,
        size: u64,
        session: &UploadSession,
    ) -> Result<Self, SdkError> {
        let actual_hash = completed_hash(session)?;
        Ok(Self {
            path: path.to_string(),
            size: size as i64,
            actual_hash,
            mimetype: mimetype.to_string(),
            num_blocks: session.chunks_sent() as i64,
            thumbnail: None,
        })
    }

    /// Attach the thumbnail uploaded by a completed thumbnail session.
    pub fn with_thumbnail(mut self, size: u64, session: &UploadSession) -> Result<Self, SdkError> {
        self.thumbnail = Some(ThumbnailMeta {
            size: size as i64,
            actual_hash: completed_hash(session)?,
        });
        Ok(self)
    }

    /// The file's entry in a reference tree.
    pub fn to_ref(&self) -> Ref {
        let mut file = Ref::file(&self.path, self.size, &self.actual_hash);
        file.num_blocks = self.num_blocks;
        file.mimetype = self.mimetype.clone();
        if let Some(thumbnail) = &self.thumbnail {
            file.actual_thumbnail_size = thumbnail.size;
            file.actual_thumbnail_hash = thumbnail.actual_hash.clone();
        }
        file
    }
}

fn completed_hash(session: &UploadSession) -> Result<String, SdkError> {
    session
        .content_hash()
        .map(str::to_string)
        .ok_or(SdkError::IncompleteUpload(session.kind()))
}

/// The outcome of a commit on one blobber.
#[derive(Debug)]
pub struct BlobberCommit {
    pub index: usize,
    pub blobber_id: String,
    pub outcome: CommitOutcome,
}

/// Outcomes of one connection's commit across the allocation.
#[derive(Debug)]
pub struct CommitSummary {
    pub connection_id: String,
    pub commits: Vec<BlobberCommit>,
    /// Count of successful commits, judged against the allocation's threshold.
    pub consensus: Consensus,
}

impl CommitSummary {
    pub fn succeeded(&self) -> usize {
        self.consensus.count
    }

    /// Enough blobbers committed for the change to be trusted.
    pub fn is_consensus_ok(&self) -> bool {
        self.consensus.is_min_reached()
    }

    /// Serializable result per blobber ID.
    pub fn results(&self) -> BTreeMap<String, CommitResult> {
        self.commits
            .iter()
            .map(|c| (c.blobber_id.clone(), CommitResult::from(&c.outcome)))
            .collect()
    }
}

/// Client state for one allocation.
pub struct AllocationContext {
    allocation: Allocation,
    transport: Arc<dyn Transport>,
    pool: CommitPool,
    config: SdkConfig,
}

impl AllocationContext {
    pub fn new(
        allocation: Allocation,
        transport: Arc<dyn Transport>,
        identity: Arc<dyn Identity>,
        config: SdkConfig,
    ) -> Result<Self, SdkError> {
        config
            .validate()
            .map_err(|e| SdkError::Config(e.to_string()))?;
        allocation
            .validate()
            .map_err(|e| SdkError::Config(e.to_string()))?;
        let chain = MarkerChain::new(
            Arc::clone(&transport),
            identity,
            config.commit_timeouts(),
        );
        let pool = CommitPool::new(chain, config.commit.queue_depth);
        Ok(Self {
            allocation,
            transport,
            pool,
            config,
        })
    }

    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// The blobbers holding shards, in shard order.
    pub fn blobbers(&self) -> &[Blobber] {
        let blobbers = &self.allocation.blobbers;
        blobbers
            .get(..self.allocation.total_shards())
            .unwrap_or(blobbers)
    }

    /// Start a commit queue for every blobber. Returns the number started.
    pub async fn open(&self) -> usize {
        let started = self.pool.open(self.blobbers()).await;
        tracing::info!(
            allocation = %self.allocation.id,
            started,
            "Opened allocation"
        );
        started
    }

    /// Close every commit queue after its pending work.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!(allocation = %self.allocation.id, "Closed allocation");
    }

    pub fn pool(&self) -> &CommitPool {
        &self.pool
    }

    /// Fresh identifier tying an upload to its commit.
    pub fn new_connection_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            threshold_percent: self.config.consensus.threshold_percent,
            full_consensus: self.allocation.total_shards(),
        }
    }

    pub fn codec(&self) -> Result<ErasureCodec, SdkError> {
        Ok(ErasureCodec::new(
            self.allocation.data_shards,
            self.allocation.parity_shards,
        )?)
    }

    /// Upload session for `total_size` bytes, targeting every blobber.
    pub fn upload_session(
        &self,
        kind: StreamKind,
        total_size: u64,
    ) -> Result<(UploadSession, ShardReceivers), SdkError> {
        let indices: Vec<usize> = (0..self.allocation.total_shards()).collect();
        let (targets, receivers) = self.shard_channels(&indices)?;
        let session = UploadSession::new(
            kind,
            self.codec()?,
            self.config.erasure.chunk_size,
            total_size,
            targets,
        )?;
        Ok((session, receivers))
    }

    /// Repair session re-sending shards to the blobbers at `indices` only.
    pub fn repair_session(
        &self,
        kind: StreamKind,
        total_size: u64,
        indices: &[usize],
    ) -> Result<(UploadSession, ShardReceivers), SdkError> {
        let (targets, receivers) = self.shard_channels(indices)?;
        let session = UploadSession::repair(
            kind,
            self.codec()?,
            self.config.erasure.chunk_size,
            total_size,
            targets,
        )?;
        Ok((session, receivers))
    }

    fn shard_channels(
        &self,
        indices: &[usize],
    ) -> Result<(BTreeMap<usize, mpsc::Sender<ShardMessage>>, ShardReceivers), SdkError> {
        let mut targets = BTreeMap::new();
        let mut receivers = BTreeMap::new();
        for &idx in indices {
            if idx >= self.allocation.total_shards() {
                return Err(SdkError::InvalidShardIndex(idx));
            }
            let (tx, rx) = mpsc::channel(self.config.erasure.shard_channel_depth);
            targets.insert(idx, tx);
            receivers.insert(idx, rx);
        }
        Ok((targets, receivers))
    }

    /// Commit a batch per blobber index and wait for every outcome.
    ///
    /// Batches are queued on all blobbers before any is awaited, so the
    /// blobbers commit concurrently.
    pub async fn commit(
        &self,
        connection_id: &str,
        batches: BTreeMap<usize, Vec<Box<dyn AllocationChange>>>,
    ) -> Result<CommitSummary, SdkError> {
        let mut pending = Vec::with_capacity(batches.len());
        for (idx, changes) in batches {
            let blobber = self
                .allocation
                .blobber_for_shard(idx)
                .ok_or(SdkError::InvalidShardIndex(idx))?
                .clone();
            let blobber_id = blobber.id.clone();
            let batch =
                CommitBatch::new(blobber, &self.allocation.id, connection_id, changes);
            let queued = self.pool.enqueue(batch).await;
            pending.push((idx, blobber_id, queued));
        }

        let waits = pending.into_iter().map(|(index, blobber_id, queued)| async move {
            let outcome = match queued {
                Ok(handle) => handle.wait().await,
                Err(e) => Err(e),
            };
            BlobberCommit {
                index,
                blobber_id,
                outcome,
            }
        });
        let commits = futures::future::join_all(waits).await;

        let mut consensus = Consensus::new(&self.consensus_config());
        for commit in commits.iter().filter(|c| c.outcome.is_ok()) {
            tracing::debug!(blobber = %commit.blobber_id, "Commit succeeded");
            consensus.increment();
        }

        tracing::info!(
            allocation = %self.allocation.id,
            connection = %connection_id,
            succeeded = consensus.count,
            required = consensus.min_agreement(),
            "Commit complete"
        );
        Ok(CommitSummary {
            connection_id: connection_id.to_string(),
            commits,
            consensus,
        })
    }

    /// Commit the same changes on every blobber.
    async fn commit_everywhere<F>(
        &self,
        connection_id: &str,
        changes: F,
    ) -> Result<CommitSummary, SdkError>
    where
        F: Fn() -> Vec<Box<dyn AllocationChange>>,
    {
        let batches = (0..self.allocation.total_shards())
            .map(|idx| (idx, changes()))
            .collect();
        self.commit(connection_id, batches).await
    }

    /// Commit a newly uploaded file on every blobber.
    pub async fn commit_new_file(
        &self,
        connection_id: &str,
        meta: &FileMeta,
    ) -> Result<CommitSummary, SdkError> {
        let file = meta.to_ref();
        self.commit_everywhere(connection_id, || {
            vec![Box::new(NewFileChange::new(file.clone())) as Box<dyn AllocationChange>]
        })
        .await
    }

    /// Commit new content for an existing file on every blobber.
    pub async fn commit_update(
        &self,
        connection_id: &str,
        meta: &FileMeta,
    ) -> Result<CommitSummary, SdkError> {
        let file = meta.to_ref();
        self.commit_everywhere(connection_id, || {
            vec![Box::new(UpdateFileChange::new(file.clone())) as Box<dyn AllocationChange>]
        })
        .await
    }

    /// Commit the removal of `path` on every blobber.
    pub async fn commit_delete(
        &self,
        connection_id: &str,
        path: &str,
    ) -> Result<CommitSummary, SdkError> {
        self.commit_everywhere(connection_id, || {
            vec![Box::new(DeleteFileChange::new(path)) as Box<dyn AllocationChange>]
        })
        .await
    }

    /// List `path` across every blobber and merge by consensus.
    pub async fn list(&self, path: &str) -> ListOutcome {
        ListRequest::new(
            Arc::clone(&self.transport),
            &self.allocation.id,
            self.blobbers().to_vec(),
            path,
            self.consensus_config(),
        )
        .with_timeout(self.config.list_timeout())
        .get_list_from_blobbers()
        .await
    }
}
