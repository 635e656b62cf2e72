//! The write-marker chain: one commit attempt against one blobber.
//!
//! A commit runs through five steps, any of which can end it:
//! 1. Fetch the reference path of the affected path and the latest marker
//! 2. Verify the latest marker's signature and that it commits to the fetched tree
//! 3. Apply the batch's changes to the tree, summing their size deltas
//! 4. Build the next marker on top of the latest one and sign it
//! 5. Submit the marker with the upload's connection id
//!
//! Nothing is written to the blobber before step 5, so every earlier failure
//! leaves the blobber's chain exactly as it was.

use std::sync::Arc;
use std::time::Duration;

use zbox_protocol::{
    now_timestamp, send_with_timeout, Blobber, Identity, NodeRequest, Ref,
    ReferencePathResult, RequestKind, Transport, WriteMarker, COMMIT_TIMEOUT_SECS,
    CONNECTION_ID_FIELD, REFERENCE_PATH_TIMEOUT_SECS, WRITE_MARKER_FIELD,
};

use crate::{AllocationChange, CommitError};

/// Per-call timeouts of the commit protocol.
#[derive(Debug, Clone, Copy)]
pub struct CommitTimeouts {
    pub reference_path: Duration,
    pub commit: Duration,
}

impl Default for CommitTimeouts {
    fn default() -> Self {
        Self {
            reference_path: Duration::from_secs(REFERENCE_PATH_TIMEOUT_SECS),
            commit: Duration::from_secs(COMMIT_TIMEOUT_SECS),
        }
    }
}

/// The changes to commit on one blobber for one upload connection.
#[derive(Debug)]
pub struct CommitBatch {
    pub changes: Vec<Box<dyn AllocationChange>>,
    pub blobber: Blobber,
    pub allocation_id: String,
    pub connection_id: String,
}

impl CommitBatch {
    pub fn new(
        blobber: Blobber,
        allocation_id: impl Into<String>,
        connection_id: impl Into<String>,
        changes: Vec<Box<dyn AllocationChange>>,
    ) -> Self {
        Self {
            changes,
            blobber,
            allocation_id: allocation_id.into(),
            connection_id: connection_id.into(),
        }
    }

    /// The reference path to fetch: the path of the last change.
    pub fn affected_path(&self) -> Option<&str> {
        self.changes
            .last()
            .map(|c| c.affected_path())
            .filter(|p| !p.is_empty())
    }
}

/// Drives commits through the write-marker chain.
#[derive(Clone)]
pub struct MarkerChain {
    transport: Arc<dyn Transport>,
    identity: Arc<dyn Identity>,
    timeouts: CommitTimeouts,
}

impl MarkerChain {
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: Arc<dyn Identity>,
        timeouts: CommitTimeouts,
    ) -> Self {
        Self {
            transport,
            identity,
            timeouts,
        }
    }

    /// Run one full commit attempt, returning the marker the blobber accepted.
    pub async fn commit(&self, batch: &CommitBatch) -> Result<WriteMarker, CommitError> {
        tracing::info!(
            blobber = %batch.blobber.id,
            connection = %batch.connection_id,
            changes = batch.changes.len(),
            "Processing commit"
        );

        let path = batch.affected_path().ok_or(CommitError::EmptyBatch)?;
        let ReferencePathResult {
            reference_path: mut root,
            latest_write_marker: latest,
        } = self
            .fetch_reference_path(&batch.blobber, &batch.allocation_id, path)
            .await?;

        if let Some(latest) = &latest {
            self.verify_latest_marker(&mut root, latest)?;
        }

        let size = apply_changes(&mut root, &batch.changes)?;
        let root_hash = root.calculate_hash();
        let marker = self.build_marker(
            &root_hash,
            latest.as_ref(),
            &batch.allocation_id,
            &batch.blobber.id,
            size,
            now_timestamp(),
        )?;

        self.submit(batch, &marker).await?;

        tracing::info!(
            blobber = %batch.blobber.id,
            connection = %batch.connection_id,
            allocation_root = %marker.allocation_root,
            size = marker.size,
            "Committed"
        );
        Ok(marker)
    }

    /// Step 1: fetch the reference path and latest write marker.
    pub async fn fetch_reference_path(
        &self,
        blobber: &Blobber,
        allocation_id: &str,
        path: &str,
    ) -> Result<ReferencePathResult, CommitError> {
        let request =
            NodeRequest::new(RequestKind::ReferencePath, blobber, allocation_id).with_path(path);
        let response =
            send_with_timeout(self.transport.as_ref(), request, self.timeouts.reference_path)
                .await?;

        if !response.is_success() {
            tracing::error!(
                blobber = %blobber.id,
                status = response.status,
                "Reference path request failed"
            );
            return Err(zbox_protocol::TransportError::Status {
                url: blobber.base_url.clone(),
                status: response.status,
                body: response.body_text(),
            }
            .into());
        }

        serde_json::from_slice(&response.body).map_err(|e| {
            tracing::error!(blobber = %blobber.id, error = %e, "Reference path decode error");
            CommitError::InvalidResponse {
                blobber: blobber.id.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Step 2: check `latest` was signed by this client and commits to `root`.
    pub fn verify_latest_marker(
        &self,
        root: &mut Ref,
        latest: &WriteMarker,
    ) -> Result<(), CommitError> {
        latest
            .verify_signature(&self.identity.public_key())
            .map_err(|e| CommitError::Signature(e.to_string()))?;

        let tree_hash = root.calculate_hash();
        let expected = WriteMarker::compute_allocation_root(&tree_hash, latest.timestamp);
        if expected != latest.allocation_root {
            tracing::error!(
                blobber = %latest.blobber_id,
                expected = %expected,
                got = %latest.allocation_root,
                "Allocation root from latest write marker mismatch"
            );
            return Err(CommitError::ChainMismatch {
                expected,
                got: latest.allocation_root.clone(),
            });
        }
        Ok(())
    }

    /// Step 4: build and sign the marker that follows `previous`.
    pub fn build_marker(
        &self,
        root_hash: &str,
        previous: Option<&WriteMarker>,
        allocation_id: &str,
        blobber_id: &str,
        size: i64,
        timestamp: i64,
    ) -> Result<WriteMarker, CommitError> {
        let mut marker = WriteMarker {
            allocation_root: WriteMarker::compute_allocation_root(root_hash, timestamp),
            previous_allocation_root: previous
                .map(|wm| wm.allocation_root.clone())
                .unwrap_or_default(),
            allocation_id: allocation_id.to_string(),
            blobber_id: blobber_id.to_string(),
            client_id: self.identity.client_id(),
            size,
            timestamp,
            signature: String::new(),
        };
        marker.sign(self.identity.as_ref()).map_err(|e| {
            tracing::error!(error = %e, "Signing writemarker failed");
            CommitError::Signing(e.to_string())
        })?;
        Ok(marker)
    }

    /// Step 5: submit the signed marker as a `connection_id`/`write_marker` form.
    async fn submit(&self, batch: &CommitBatch, marker: &WriteMarker) -> Result<(), CommitError> {
        let encoded = marker
            .encode()
            .map_err(|e| CommitError::Signing(e.to_string()))?;
        let request = NodeRequest::new(RequestKind::Commit, &batch.blobber, &batch.allocation_id)
            .with_field(CONNECTION_ID_FIELD, batch.connection_id.as_str())
            .with_field(WRITE_MARKER_FIELD, encoded);

        let response =
            send_with_timeout(self.transport.as_ref(), request, self.timeouts.commit).await?;
        if !response.is_success() {
            let body = response.body_text();
            tracing::error!(
                blobber = %batch.blobber.id,
                status = response.status,
                body = %body,
                "Commit response"
            );
            return Err(CommitError::CommitRejected {
                blobber: batch.blobber.id.clone(),
                status: response.status,
                body,
            });
        }
        Ok(())
    }
}

/// Step 3: apply `changes` in order, stopping at the first failure.
pub fn apply_changes(
    root: &mut Ref,
    changes: &[Box<dyn AllocationChange>],
) -> Result<i64, CommitError> {
    let mut size = 0;
    for change in changes {
        size += change
            .process_change(root)
            .map_err(|source| CommitError::Mutation {
                path: change.affected_path().to_string(),
                source,
            })?;
    }
    Ok(size)
}
