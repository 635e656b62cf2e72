//! Tests for the shared data model.
//!
//! Verifies:
//! - Reference-tree hashing is deterministic and tamper-evident
//! - Write markers chain through their allocation roots
//! - Reference-path responses decode from blobber JSON

use zbox_protocol::crypto::hash;
use zbox_protocol::{
    Ed25519Identity, Identity, Ref, ReferencePathResult, WriteMarker,
};

fn tree_with(files: &[(&str, i64, &str)]) -> Ref {
    let mut root = Ref::directory("/");
    for (path, size, content) in files {
        root.insert(Ref::file(path, *size, content)).unwrap();
    }
    root
}

// ═══════════════════════════════════════════════════════════════
// Reference Tree Hashing
// ═══════════════════════════════════════════════════════════════

#[test]
fn empty_root_hash_is_hash_of_empty_string() {
    let mut root = Ref::directory("/");
    assert_eq!(root.calculate_hash(), hash(b""));
}

#[test]
fn nested_change_propagates_to_root_hash() {
    let mut before = tree_with(&[("/a/b/c.txt", 5, "h1")]);
    let mut after = tree_with(&[("/a/b/c.txt", 6, "h1")]);
    assert_ne!(before.calculate_hash(), after.calculate_hash());
}

#[test]
fn identical_trees_hash_identically() {
    let mut t1 = tree_with(&[("/x", 1, "a"), ("/dir/y", 2, "b")]);
    let mut t2 = tree_with(&[("/dir/y", 2, "b"), ("/x", 1, "a")]);
    assert_eq!(t1.calculate_hash(), t2.calculate_hash());
}

// ═══════════════════════════════════════════════════════════════
// Write-Marker Chain Links
// ═══════════════════════════════════════════════════════════════

#[test]
fn markers_link_through_allocation_roots() {
    let identity = Ed25519Identity::generate();
    let mut tree = tree_with(&[("/one", 1, "h1")]);
    let root1 = tree.calculate_hash();

    let mut m1 = WriteMarker {
        allocation_root: WriteMarker::compute_allocation_root(&root1, 10),
        previous_allocation_root: String::new(),
        allocation_id: "alloc".into(),
        blobber_id: "b0".into(),
        client_id: identity.client_id(),
        size: 1,
        timestamp: 10,
        signature: String::new(),
    };
    m1.sign(&identity).unwrap();

    tree.insert(Ref::file("/two", 2, "h2")).unwrap();
    let root2 = tree.calculate_hash();
    let mut m2 = WriteMarker {
        allocation_root: WriteMarker::compute_allocation_root(&root2, 11),
        previous_allocation_root: m1.allocation_root.clone(),
        timestamp: 11,
        size: 2,
        ..m1.clone()
    };
    m2.sign(&identity).unwrap();

    assert_eq!(m2.previous_allocation_root, m1.allocation_root);
    assert!(m1.matches_root(&root1));
    assert!(!m1.matches_root(&root2));
    assert!(m2.verify_signature(&identity.public_key()).is_ok());
}

#[test]
fn marker_signed_by_other_client_is_rejected() {
    let alice = Ed25519Identity::generate();
    let mallory = Ed25519Identity::generate();
    let mut wm = WriteMarker {
        allocation_root: "root".into(),
        previous_allocation_root: String::new(),
        allocation_id: "alloc".into(),
        blobber_id: "b0".into(),
        client_id: alice.client_id(),
        size: 0,
        timestamp: 1,
        signature: String::new(),
    };
    wm.sign(&mallory).unwrap();
    assert!(wm.verify_signature(&alice.public_key()).is_err());
}

// ═══════════════════════════════════════════════════════════════
// Wire Decoding
// ═══════════════════════════════════════════════════════════════

#[test]
fn reference_path_without_marker_decodes() {
    let body = r#"{
        "reference_path": {
            "type": "d", "name": "/", "path": "/",
            "children": [
                {"type": "f", "name": "a", "path": "/a", "size": 3, "actual_file_hash": "h"}
            ]
        }
    }"#;
    let parsed: ReferencePathResult = serde_json::from_str(body).unwrap();
    assert!(parsed.latest_write_marker.is_none());
    assert_eq!(parsed.reference_path.find("/a").unwrap().size, 3);
}
