//! Listing a remote path across every blobber of an allocation.
//!
//! The request is fanned out with one task per blobber. Each task returns
//! its own `Result`, so a slow or failing blobber only costs its own entry.
//!
//! Merging keys every child by content identity:
//! - directories by `Hash(path)`
//! - files by `Hash(path + ":" + actual_file_hash)`
//!
//! Two versions of a file at the same path therefore never merge. Each
//! key's record counts the blobbers that reported it and is promoted into
//! the result the first time the count reaches the agreement threshold.
//! A path is promoted at most once.
//!
//! The root entry's name, path and type are copied from the last blobber
//! that responded, without any agreement requirement.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zbox_protocol::{
    crypto, send_with_timeout, Blobber, NodeRequest, Ref, RefType, RequestKind, Transport,
    TransportError, LIST_TIMEOUT_SECS,
};

use crate::{Consensus, ConsensusConfig, ConsensusError};

/// Merged view of one listed path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub name: String,
    pub path: String,
    /// `None` until at least one blobber has responded.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ref_type: Option<RefType>,
    /// `-1` for a listed directory.
    pub size: i64,
    pub hash: String,
    pub mimetype: String,
    pub num_blocks: i64,
    #[serde(default)]
    pub thumbnail_size: i64,
    #[serde(default)]
    pub thumbnail_hash: String,
    #[serde(rename = "list", default)]
    pub children: Vec<ListResult>,
    #[serde(skip)]
    pub consensus: Consensus,
    /// Set when agreeing blobbers reported different sizes or block counts.
    #[serde(default)]
    pub mismatch: bool,
}

impl ListResult {
    pub fn is_dir(&self) -> bool {
        self.ref_type == Some(RefType::Directory)
    }

    pub fn child(&self, path: &str) -> Option<&ListResult> {
        self.children.iter().find(|c| c.path == path)
    }
}

/// One blobber's answer, tagged with its position in the allocation.
#[derive(Debug)]
pub struct BlobberListing {
    pub index: usize,
    pub blobber_id: String,
    pub result: Result<Ref, ConsensusError>,
}

/// A blobber that did not contribute to the merge.
#[derive(Debug)]
pub struct NodeFailure {
    pub index: usize,
    pub blobber_id: String,
    pub error: ConsensusError,
}

/// Merged listing plus the blobbers that failed to answer.
#[derive(Debug)]
pub struct ListOutcome {
    pub result: ListResult,
    pub failures: Vec<NodeFailure>,
    pub responded: usize,
    pub expected: usize,
}

impl ListOutcome {
    /// Fewer blobbers answered than full consensus expects.
    ///
    /// The merge still stands; this only reports the shortfall.
    pub fn partial_quorum(&self) -> Option<ConsensusError> {
        (self.responded < self.expected).then_some(ConsensusError::PartialQuorum {
            responded: self.responded,
            expected: self.expected,
        })
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

/// A listing of `remote_path` across `blobbers`.
pub struct ListRequest {
    transport: Arc<dyn Transport>,
    allocation_id: String,
    blobbers: Vec<Blobber>,
    remote_path: String,
    consensus: ConsensusConfig,
    timeout: Duration,
}

impl ListRequest {
    pub fn new(
        transport: Arc<dyn Transport>,
        allocation_id: impl Into<String>,
        blobbers: Vec<Blobber>,
        remote_path: impl Into<String>,
        consensus: ConsensusConfig,
    ) -> Self {
        Self {
            transport,
            allocation_id: allocation_id.into(),
            blobbers,
            remote_path: remote_path.into(),
            consensus,
            timeout: Duration::from_secs(LIST_TIMEOUT_SECS),
        }
    }

    /// Per-blobber timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query every blobber and merge the answers.
    pub async fn get_list_from_blobbers(&self) -> ListOutcome {
        tracing::debug!(
            allocation = %self.allocation_id,
            path = %self.remote_path,
            blobbers = self.blobbers.len(),
            "Listing path"
        );
        let listings = self.fetch_all().await;
        let outcome = merge_listings(&self.consensus, listings);

        tracing::info!(
            path = %self.remote_path,
            responded = outcome.responded,
            failed = outcome.failures.len(),
            promoted = outcome.result.children.len(),
            "List complete"
        );
        outcome
    }

    /// One task per blobber; yields exactly one listing per blobber, in order.
    async fn fetch_all(&self) -> Vec<BlobberListing> {
        let handles: Vec<_> = self
            .blobbers
            .iter()
            .map(|blobber| {
                tokio::spawn(list_from_blobber(
                    Arc::clone(&self.transport),
                    blobber.clone(),
                    self.allocation_id.clone(),
                    self.remote_path.clone(),
                    self.timeout,
                ))
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(&self.blobbers)
            .enumerate()
            .map(|(index, (joined, blobber))| BlobberListing {
                index,
                blobber_id: blobber.id.clone(),
                result: joined.unwrap_or_else(|e| {
                    Err(ConsensusError::InvalidResponse {
                        blobber: blobber.id.clone(),
                        reason: format!("list task failed: {}", e),
                    })
                }),
            })
            .collect()
    }
}

async fn list_from_blobber(
    transport: Arc<dyn Transport>,
    blobber: Blobber,
    allocation_id: String,
    path: String,
    timeout: Duration,
) -> Result<Ref, ConsensusError> {
    let request = NodeRequest::new(RequestKind::List, &blobber, &allocation_id).with_path(&path);
    let response = send_with_timeout(transport.as_ref(), request, timeout)
        .await
        .inspect_err(|e| tracing::warn!(blobber = %blobber.id, error = %e, "List request failed"))?;

    if !response.is_success() {
        tracing::warn!(
            blobber = %blobber.id,
            status = response.status,
            "Error from server list response"
        );
        return Err(TransportError::Status {
            url: blobber.base_url.clone(),
            status: response.status,
            body: response.body_text(),
        }
        .into());
    }

    serde_json::from_slice(&response.body).map_err(|e| {
        tracing::warn!(blobber = %blobber.id, error = %e, "List response parse error");
        ConsensusError::InvalidResponse {
            blobber: blobber.id.clone(),
            reason: e.to_string(),
        }
    })
}

/// Identity key of a listed entry.
fn identity_key(entry: &Ref) -> String {
    match entry.ref_type {
        RefType::Directory => crypto::hash(entry.path.as_bytes()),
        RefType::File => {
            crypto::hash(format!("{}:{}", entry.path, entry.actual_file_hash).as_bytes())
        }
    }
}

/// Merge blobber listings in index order.
pub fn merge_listings(config: &ConsensusConfig, listings: Vec<BlobberListing>) -> ListOutcome {
    let mut root = ListResult::default();
    let mut failures = Vec::new();
    let mut responded = 0;

    let mut records: Vec<ListResult> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut selected: HashSet<String> = HashSet::new();
    let mut promoted: Vec<usize> = Vec::new();

    for listing in listings {
        let tree = match listing.result {
            Ok(tree) => tree,
            Err(error) => {
                failures.push(NodeFailure {
                    index: listing.index,
                    blobber_id: listing.blobber_id,
                    error,
                });
                continue;
            }
        };
        responded += 1;

        root.name = tree.name.clone();
        root.path = tree.path.clone();
        root.ref_type = Some(tree.ref_type);
        root.size = if tree.is_dir() { -1 } else { tree.size };

        for child in &tree.children {
            let idx = *by_key.entry(identity_key(child)).or_insert_with(|| {
                records.push(ListResult {
                    name: child.name.clone(),
                    path: child.path.clone(),
                    ref_type: Some(child.ref_type),
                    size: child.size,
                    num_blocks: child.num_blocks,
                    consensus: Consensus::new(config),
                    ..ListResult::default()
                });
                records.len() - 1
            });

            let record = &mut records[idx];
            if record.consensus.count > 0
                && (record.size != child.size || record.num_blocks != child.num_blocks)
            {
                tracing::warn!(
                    blobber = %listing.blobber_id,
                    path = %child.path,
                    size = child.size,
                    recorded = record.size,
                    "Agreeing blobbers disagree on entry size"
                );
                record.mismatch = true;
            }
            record.consensus.increment();
            if child.ref_type == RefType::File {
                record.hash = child.actual_file_hash.clone();
                record.mimetype = child.mimetype.clone();
                record.thumbnail_size = child.actual_thumbnail_size;
                record.thumbnail_hash = child.actual_thumbnail_hash.clone();
            }

            if record.consensus.is_min_reached() && selected.insert(child.path.clone()) {
                tracing::debug!(
                    path = %child.path,
                    agreement = record.consensus.count,
                    "Promoted list entry"
                );
                promoted.push(idx);
            }
        }
    }

    root.children = promoted.into_iter().map(|idx| records[idx].clone()).collect();
    root.num_blocks = root.children.iter().map(|c| c.num_blocks).sum();
    root.consensus = Consensus {
        count: responded,
        ..Consensus::new(config)
    };

    ListOutcome {
        result: root,
        failures,
        responded,
        expected: config.full_consensus,
    }
}
