//! End-to-end tests for the allocation context.
//!
//! Verifies:
//! - An upload's shards reassemble from any `data_shards` blobbers
//! - Committing a file extends every blobber's marker chain
//! - A listing after commit shows the file agreed by all blobbers
//! - One unreachable blobber costs only its own commit and listing entry
//! - Repairs and thumbnails use their own sessions

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use zbox_commit::CommitError;
use zbox_erasure::{ShardMessage, StreamKind};
use zbox_protocol::{
    crypto, Allocation, Blobber, Ed25519Identity, NodeRequest, NodeResponse, Ref,
    ReferencePathResult, RequestKind, Transport, TransportError, WriteMarker, CONNECTION_ID_FIELD,
    WRITE_MARKER_FIELD,
};
use zbox_sdk::{AllocationContext, FileMeta, SdkConfig, SdkError, ShardReceivers};

// ═══════════════════════════════════════════════════════════════
// In-memory blobbers
// ═══════════════════════════════════════════════════════════════

enum Staged {
    Put(Ref),
    Delete(String),
}

struct BlobberState {
    tree: Ref,
    markers: Vec<WriteMarker>,
    staged: HashMap<String, Vec<Staged>>,
    down: bool,
}

struct FakeNetwork {
    blobbers: Mutex<HashMap<String, BlobberState>>,
}

impl FakeNetwork {
    fn new(ids: &[String]) -> Arc<Self> {
        let blobbers = ids
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    BlobberState {
                        tree: Ref::directory("/"),
                        markers: Vec::new(),
                        staged: HashMap::new(),
                        down: false,
                    },
                )
            })
            .collect();
        Arc::new(Self {
            blobbers: Mutex::new(blobbers),
        })
    }

    fn with_state<T>(&self, id: &str, f: impl FnOnce(&mut BlobberState) -> T) -> T {
        let mut blobbers = self.blobbers.lock().unwrap();
        f(blobbers.get_mut(id).expect("unknown blobber"))
    }

    /// What each blobber's upload endpoint would record for `connection_id`.
    fn stage_everywhere(&self, connection_id: &str, op: impl Fn() -> Staged) {
        let mut blobbers = self.blobbers.lock().unwrap();
        for state in blobbers.values_mut() {
            state
                .staged
                .entry(connection_id.to_string())
                .or_default()
                .push(op());
        }
    }

    fn markers(&self, id: &str) -> Vec<WriteMarker> {
        self.with_state(id, |s| s.markers.clone())
    }

    fn handle(&self, request: &NodeRequest) -> NodeResponse {
        self.with_state(&request.blobber.id, |s| match request.kind {
            RequestKind::ReferencePath => {
                let result = ReferencePathResult {
                    reference_path: s.tree.clone(),
                    latest_write_marker: s.markers.last().cloned(),
                };
                NodeResponse::ok(serde_json::to_vec(&result).unwrap())
            }
            RequestKind::List => match s.tree.find(&request.path) {
                Some(entry) => NodeResponse::ok(serde_json::to_vec(entry).unwrap()),
                None => NodeResponse {
                    status: 404,
                    body: b"path not found".to_vec(),
                },
            },
            RequestKind::Commit => {
                let connection_id = request.field(CONNECTION_ID_FIELD).unwrap_or_default();
                let marker: WriteMarker =
                    serde_json::from_str(request.field(WRITE_MARKER_FIELD).unwrap_or_default())
                        .unwrap();
                let mut tree = s.tree.clone();
                for op in s.staged.remove(connection_id).unwrap_or_default() {
                    match op {
                        Staged::Put(file) => match tree.find_mut(&file.path) {
                            Some(existing) => *existing = file,
                            None => tree.insert(file).unwrap(),
                        },
                        Staged::Delete(path) => {
                            tree.remove(&path).unwrap();
                        }
                    }
                }
                if !marker.matches_root(&tree.calculate_hash()) {
                    return NodeResponse {
                        status: 400,
                        body: b"allocation root mismatch".to_vec(),
                    };
                }
                s.tree = tree;
                s.markers.push(marker);
                NodeResponse::ok(b"{}".to_vec())
            }
        })
    }
}

#[async_trait]
impl Transport for FakeNetwork {
    async fn do_request(
        &self,
        request: NodeRequest,
        _timeout: Duration,
    ) -> Result<NodeResponse, TransportError> {
        if self.with_state(&request.blobber.id, |s| s.down) {
            return Err(TransportError::Connection {
                url: request.blobber.base_url.clone(),
                reason: "connection refused".into(),
            });
        }
        Ok(self.handle(&request))
    }
}

// ═══════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════

fn setup(data_shards: usize, parity_shards: usize) -> (AllocationContext, Arc<FakeNetwork>) {
    let blobbers: Vec<Blobber> = (0..data_shards + parity_shards)
        .map(|i| Blobber::new(format!("b{}", i), format!("http://b{}.test", i)))
        .collect();
    let ids: Vec<String> = blobbers.iter().map(|b| b.id.clone()).collect();
    let network = FakeNetwork::new(&ids);

    let allocation = Allocation::new("alloc-1", data_shards, parity_shards, blobbers).unwrap();
    let mut config = SdkConfig::default();
    config.erasure.chunk_size = 256;
    config.list.timeout_secs = 5;

    let ctx = AllocationContext::new(
        allocation,
        network.clone(),
        Arc::new(Ed25519Identity::generate()),
        config,
    )
    .unwrap();
    (ctx, network)
}

fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

type Received = BTreeMap<usize, (Vec<Vec<u8>>, Option<ShardMessage>)>;

/// Drain every receiver until its stream ends, collecting shard payloads.
async fn collect(receivers: ShardReceivers) -> Received {
    let tasks: Vec<_> = receivers
        .into_iter()
        .map(|(idx, mut rx)| {
            tokio::spawn(async move {
                let mut shards = Vec::new();
                let mut last = None;
                while let Some(msg) = rx.recv().await {
                    match msg {
                        ShardMessage::Shard(bytes) => shards.push(bytes),
                        other => {
                            last = Some(other);
                            break;
                        }
                    }
                }
                (idx, (shards, last))
            })
        })
        .collect();

    let mut out = BTreeMap::new();
    for task in tasks {
        let (idx, collected) = task.await.unwrap();
        out.insert(idx, collected);
    }
    out
}

async fn upload(ctx: &AllocationContext, path: &str, data: &[u8]) -> FileMeta {
    let (mut session, receivers) = ctx
        .upload_session(StreamKind::Content, data.len() as u64)
        .unwrap();
    let consumers = tokio::spawn(collect(receivers));
    session.dispatch(data).await.unwrap();
    consumers.await.unwrap();
    FileMeta::from_session(path, "application/octet-stream", data.len() as u64, &session).unwrap()
}

// ═══════════════════════════════════════════════════════════════
// Upload
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn uploaded_shards_reassemble_without_one_blobber() {
    let (ctx, _network) = setup(2, 1);
    let data = sample_data(5000);

    let (mut session, receivers) = ctx
        .upload_session(StreamKind::Content, data.len() as u64)
        .unwrap();
    let consumers = tokio::spawn(collect(receivers));
    session.dispatch(&data[..]).await.unwrap();
    let received = consumers.await.unwrap();

    for (_, last) in received.values() {
        assert_eq!(last, &Some(ShardMessage::Done));
    }
    // 2500 bytes per shard in chunks of 256.
    assert_eq!(session.chunks_sent(), 10);

    let codec = ctx.codec().unwrap();
    let mut rebuilt = Vec::new();
    for chunk in 0..session.chunks_sent() as usize {
        let mut shards = vec![
            Some(received[&0].0[chunk].clone()),
            None,
            Some(received[&2].0[chunk].clone()),
        ];
        rebuilt.extend(codec.reconstruct(&mut shards).unwrap());
    }
    rebuilt.truncate(data.len());
    assert_eq!(rebuilt, data);

    let meta =
        FileMeta::from_session("/docs/a.bin", "application/octet-stream", 5000, &session).unwrap();
    assert_eq!(meta.actual_hash, crypto::hash(&data));
    assert_eq!(meta.num_blocks, 10);
}

#[tokio::test]
async fn repair_targets_only_requested_blobbers() {
    let (ctx, _network) = setup(2, 2);
    let data = sample_data(1000);

    let (mut full, receivers) = ctx
        .upload_session(StreamKind::Content, data.len() as u64)
        .unwrap();
    let consumers = tokio::spawn(collect(receivers));
    full.dispatch(&data[..]).await.unwrap();
    let original = consumers.await.unwrap();

    let (mut repair, receivers) = ctx
        .repair_session(StreamKind::Content, data.len() as u64, &[1, 3])
        .unwrap();
    assert_eq!(receivers.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    let consumers = tokio::spawn(collect(receivers));
    repair.dispatch(&data[..]).await.unwrap();
    drop(repair);
    let repaired = consumers.await.unwrap();

    for idx in [1, 3] {
        assert_eq!(repaired[&idx].0, original[&idx].0);
        // No Done: the channel simply closes.
        assert_eq!(repaired[&idx].1, None);
    }
}

#[tokio::test]
async fn repair_session_has_no_file_meta() {
    let (ctx, _network) = setup(2, 1);
    let (mut repair, receivers) = ctx.repair_session(StreamKind::Content, 10, &[0]).unwrap();
    let consumers = tokio::spawn(collect(receivers));
    repair.dispatch(&sample_data(10)[..]).await.unwrap();

    assert!(matches!(
        FileMeta::from_session("/x", "", 10, &repair),
        Err(SdkError::IncompleteUpload(StreamKind::Content))
    ));
    drop(repair);
    consumers.await.unwrap();
}

#[tokio::test]
async fn shard_index_outside_allocation_rejected() {
    let (ctx, _network) = setup(2, 1);
    assert!(matches!(
        ctx.repair_session(StreamKind::Content, 10, &[0, 3]),
        Err(SdkError::InvalidShardIndex(3))
    ));
}

#[tokio::test]
async fn thumbnail_is_hashed_separately() {
    let (ctx, _network) = setup(2, 1);
    let content = sample_data(3000);
    let thumbnail = vec![7u8; 120];

    let meta = upload(&ctx, "/photos/cat.jpg", &content).await;

    let (mut thumb, receivers) = ctx
        .upload_session(StreamKind::Thumbnail, thumbnail.len() as u64)
        .unwrap();
    let consumers = tokio::spawn(collect(receivers));
    thumb.dispatch(&thumbnail[..]).await.unwrap();
    consumers.await.unwrap();

    let meta = meta.with_thumbnail(thumbnail.len() as u64, &thumb).unwrap();
    let thumb_meta = meta.thumbnail.as_ref().unwrap();
    assert_eq!(thumb_meta.actual_hash, crypto::hash(&thumbnail));
    assert_eq!(thumb_meta.size, 120);
    assert_eq!(meta.actual_hash, crypto::hash(&content));
}

#[tokio::test]
async fn thumbnail_is_committed_and_listed() {
    let (ctx, network) = setup(2, 1);
    ctx.open().await;

    let thumbnail = vec![7u8; 120];
    let meta = upload(&ctx, "/photos/cat.jpg", &sample_data(3000)).await;
    let (mut thumb, receivers) = ctx
        .upload_session(StreamKind::Thumbnail, thumbnail.len() as u64)
        .unwrap();
    let consumers = tokio::spawn(collect(receivers));
    thumb.dispatch(&thumbnail[..]).await.unwrap();
    consumers.await.unwrap();
    let meta = meta.with_thumbnail(thumbnail.len() as u64, &thumb).unwrap();

    let file = meta.to_ref();
    assert_eq!(file.actual_thumbnail_size, 120);
    assert_eq!(file.actual_thumbnail_hash, crypto::hash(&thumbnail));

    let conn = AllocationContext::new_connection_id();
    network.stage_everywhere(&conn, || Staged::Put(file.clone()));
    let summary = ctx.commit_new_file(&conn, &meta).await.unwrap();
    assert_eq!(summary.succeeded(), 3);

    let listing = ctx.list("/photos").await;
    let entry = listing.result.child("/photos/cat.jpg").unwrap();
    assert_eq!(entry.thumbnail_size, 120);
    assert_eq!(entry.thumbnail_hash, crypto::hash(&thumbnail));
    assert_eq!(entry.hash, meta.actual_hash);

    ctx.close().await;
}

// ═══════════════════════════════════════════════════════════════
// Commit and list
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn commit_then_list_round() {
    let (ctx, network) = setup(2, 1);
    assert_eq!(ctx.open().await, 3);

    let data = sample_data(5000);
    let meta = upload(&ctx, "/docs/report.bin", &data).await;
    let conn = AllocationContext::new_connection_id();
    let file = meta.to_ref();
    network.stage_everywhere(&conn, || Staged::Put(file.clone()));

    let summary = ctx.commit_new_file(&conn, &meta).await.unwrap();
    assert_eq!(summary.succeeded(), 3);
    assert!(summary.is_consensus_ok());
    assert!(summary.results().values().all(|r| r.success));

    for id in ["b0", "b1", "b2"] {
        let markers = network.markers(id);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].size, 5000);
        assert_eq!(markers[0].blobber_id, id);
    }

    let listing = ctx.list("/docs").await;
    assert!(listing.failures.is_empty());
    let entry = listing.result.child("/docs/report.bin").unwrap();
    assert_eq!(entry.hash, meta.actual_hash);
    assert_eq!(entry.consensus.count, 3);
    assert_eq!(entry.num_blocks, 10);
    assert_eq!(listing.result.num_blocks, 10);

    ctx.close().await;
    assert!(ctx.pool().registered().await.is_empty());
}

#[tokio::test]
async fn update_and_delete_extend_the_chain() {
    let (ctx, network) = setup(1, 1);
    ctx.open().await;

    let v1 = upload(&ctx, "/a.txt", &sample_data(100)).await;
    let conn = AllocationContext::new_connection_id();
    let file = v1.to_ref();
    network.stage_everywhere(&conn, || Staged::Put(file.clone()));
    ctx.commit_new_file(&conn, &v1).await.unwrap();

    let v2 = upload(&ctx, "/a.txt", &sample_data(40)).await;
    let conn = AllocationContext::new_connection_id();
    let file = v2.to_ref();
    network.stage_everywhere(&conn, || Staged::Put(file.clone()));
    let summary = ctx.commit_update(&conn, &v2).await.unwrap();
    assert_eq!(summary.succeeded(), 2);

    let conn = AllocationContext::new_connection_id();
    network.stage_everywhere(&conn, || Staged::Delete("/a.txt".into()));
    let summary = ctx.commit_delete(&conn, "/a.txt").await.unwrap();
    assert_eq!(summary.succeeded(), 2);

    let markers = network.markers("b1");
    let sizes: Vec<i64> = markers.iter().map(|m| m.size).collect();
    assert_eq!(sizes, vec![100, -60, -40]);
    for pair in markers.windows(2) {
        assert_eq!(pair[1].previous_allocation_root, pair[0].allocation_root);
    }

    let listing = ctx.list("/").await;
    assert!(listing.result.children.is_empty());
}

#[tokio::test]
async fn unreachable_blobber_only_fails_itself() {
    let (ctx, network) = setup(2, 1);
    ctx.open().await;
    network.with_state("b1", |s| s.down = true);

    let meta = upload(&ctx, "/docs/a.bin", &sample_data(600)).await;
    let conn = AllocationContext::new_connection_id();
    let file = meta.to_ref();
    network.stage_everywhere(&conn, || Staged::Put(file.clone()));

    let summary = ctx.commit_new_file(&conn, &meta).await.unwrap();
    assert_eq!(summary.succeeded(), 2);
    // Two of three meets the default 50% threshold.
    assert!(summary.is_consensus_ok());

    let failed = summary.commits.iter().find(|c| c.index == 1).unwrap();
    assert!(matches!(
        failed.outcome,
        Err(CommitError::Transport(TransportError::Connection { .. }))
    ));
    let results = summary.results();
    assert!(!results["b1"].success);
    assert!(results["b1"].error_message.is_some());

    let listing = ctx.list("/docs").await;
    assert_eq!(listing.failed_indices(), vec![1]);
    assert!(listing.partial_quorum().is_some());
    assert_eq!(listing.result.child("/docs/a.bin").unwrap().consensus.count, 2);
}

#[tokio::test]
async fn commit_before_open_reports_unknown_blobbers() {
    let (ctx, _network) = setup(2, 1);
    let meta = FileMeta {
        path: "/a".into(),
        size: 1,
        actual_hash: "h".into(),
        mimetype: String::new(),
        num_blocks: 1,
        thumbnail: None,
    };

    let summary = ctx.commit_new_file("conn", &meta).await.unwrap();
    assert_eq!(summary.succeeded(), 0);
    assert!(!summary.is_consensus_ok());
    assert!(summary
        .commits
        .iter()
        .all(|c| matches!(c.outcome, Err(CommitError::UnknownBlobber(_)))));
}

// ═══════════════════════════════════════════════════════════════
// Construction
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn short_deserialized_allocation_is_rejected() {
    let allocation: Allocation = serde_json::from_str(
        r#"{"id":"alloc-1","data_shards":2,"parity_shards":1,
            "blobbers":[{"id":"b0","base_url":"http://b0.test"}]}"#,
    )
    .unwrap();
    let network = FakeNetwork::new(&["b0".to_string()]);

    let result = AllocationContext::new(
        allocation,
        network,
        Arc::new(Ed25519Identity::generate()),
        SdkConfig::default(),
    );
    assert!(matches!(result, Err(SdkError::Config(ref msg)) if msg.contains("blobbers")));
}
