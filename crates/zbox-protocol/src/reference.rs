//! Reference trees: a blobber's snapshot of the directory hierarchy.
//!
//! The root hash of a reference tree is computed bottom-up:
//! - a file hashes its own metadata fields joined with `:`
//! - a directory hashes its children's hashes, ordered by name and joined with `:`
//!
//! Directory size and block count are the sums over their children.
//!
//! A reference path only expands the directories along the requested path.
//! A directory reported with a hash but no children is a collapsed subtree:
//! its reported hash, size and block count are taken as-is.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::{ProtocolError, WriteMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefType {
    #[serde(rename = "f")]
    File,
    #[serde(rename = "d")]
    Directory,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::File => crate::FILE_TYPE,
            RefType::Directory => crate::DIRECTORY_TYPE,
        }
    }
}

impl std::fmt::Display for RefType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a reference tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    #[serde(rename = "type")]
    pub ref_type: RefType,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub num_blocks: i64,
    /// Hash of this blobber's shard content (files only).
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub merkle_root: String,
    #[serde(default)]
    pub actual_file_size: i64,
    /// Hash of the original, pre-encoding file content (files only).
    #[serde(default)]
    pub actual_file_hash: String,
    #[serde(default)]
    pub mimetype: String,
    /// Size of the original thumbnail; `0` when the file has none.
    #[serde(default)]
    pub actual_thumbnail_size: i64,
    /// Not part of the file hash.
    #[serde(default)]
    pub actual_thumbnail_hash: String,
    #[serde(default)]
    pub children: Vec<Ref>,
}

impl Ref {
    /// Empty directory at `path`.
    pub fn directory(path: &str) -> Self {
        Self {
            ref_type: RefType::Directory,
            name: file_name(path).to_string(),
            path: path.to_string(),
            size: 0,
            hash: String::new(),
            num_blocks: 0,
            content_hash: String::new(),
            merkle_root: String::new(),
            actual_file_size: 0,
            actual_file_hash: String::new(),
            mimetype: String::new(),
            actual_thumbnail_size: 0,
            actual_thumbnail_hash: String::new(),
            children: Vec::new(),
        }
    }

    /// File reference at `path`; remaining metadata is filled in by the caller.
    pub fn file(path: &str, size: i64, actual_file_hash: &str) -> Self {
        Self {
            ref_type: RefType::File,
            size,
            actual_file_size: size,
            actual_file_hash: actual_file_hash.to_string(),
            ..Self::directory(path)
        }
    }

    pub fn is_dir(&self) -> bool {
        self.ref_type == RefType::Directory
    }

    /// Recompute `hash`, `size` and `num_blocks` for this subtree and
    /// return the new hash.
    pub fn calculate_hash(&mut self) -> String {
        match self.ref_type {
            RefType::File => {
                self.hash = crypto::hash(self.file_hash_data().as_bytes());
            }
            RefType::Directory if self.children.is_empty() && !self.hash.is_empty() => {}
            RefType::Directory => {
                self.children.sort_by(|a, b| a.name.cmp(&b.name));
                let mut child_hashes = Vec::with_capacity(self.children.len());
                let mut size = 0;
                let mut num_blocks = 0;
                for child in &mut self.children {
                    child_hashes.push(child.calculate_hash());
                    size += child.size;
                    num_blocks += child.num_blocks;
                }
                self.size = size;
                self.num_blocks = num_blocks;
                self.hash = crypto::hash(child_hashes.join(":").as_bytes());
            }
        }
        self.hash.clone()
    }

    fn file_hash_data(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            self.ref_type,
            self.name,
            self.path,
            self.size,
            self.content_hash,
            self.merkle_root,
            self.actual_file_size,
            self.actual_file_hash
        )
    }

    /// Find the reference at an absolute `path` within this subtree.
    pub fn find(&self, path: &str) -> Option<&Ref> {
        if self.path == path {
            return Some(self);
        }
        self.children
            .iter()
            .filter(|c| is_within(path, &c.path))
            .find_map(|c| c.find(path))
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut Ref> {
        if self.path == path {
            return Some(self);
        }
        self.children
            .iter_mut()
            .filter(|c| is_within(path, &c.path))
            .find_map(|c| c.find_mut(path))
    }

    /// Insert `child` at its path, creating missing parent directories.
    ///
    /// Fails if an entry already exists at that path or a parent is a file.
    pub fn insert(&mut self, child: Ref) -> Result<(), ProtocolError> {
        let parent_path = parent_path(&child.path)
            .ok_or_else(|| ProtocolError::InvalidPath(child.path.clone()))?;
        let parent = self.ensure_directory(&parent_path)?;
        if parent.children.iter().any(|c| c.path == child.path) {
            return Err(ProtocolError::InvalidPath(format!(
                "{} already exists",
                child.path
            )));
        }
        parent.children.push(child);
        Ok(())
    }

    /// Remove and return the entry at `path`.
    pub fn remove(&mut self, path: &str) -> Option<Ref> {
        let parent = self.find_mut(&parent_path(path)?)?;
        let idx = parent.children.iter().position(|c| c.path == path)?;
        // Force a recompute even if the parent ends up empty.
        parent.hash.clear();
        Some(parent.children.remove(idx))
    }

    fn ensure_directory(&mut self, path: &str) -> Result<&mut Ref, ProtocolError> {
        if !self.is_dir() {
            return Err(ProtocolError::InvalidPath(format!("{} is a file", self.path)));
        }
        if self.path == path {
            return Ok(self);
        }
        if !is_within(path, &self.path) {
            return Err(ProtocolError::InvalidPath(format!(
                "{} is outside {}",
                path, self.path
            )));
        }

        let next = next_component(&self.path, path);
        let idx = match self.children.iter().position(|c| c.path == next) {
            Some(idx) => idx,
            None => {
                self.children.push(Ref::directory(&next));
                self.children.len() - 1
            }
        };
        self.children[idx].ensure_directory(path)
    }
}

/// A blobber's answer to a reference-path lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencePathResult {
    /// Tree rooted at the allocation root, expanded along the requested path.
    pub reference_path: Ref,
    #[serde(default)]
    pub latest_write_marker: Option<WriteMarker>,
}

/// Parent of an absolute path; `None` for the root.
pub fn parent_path(path: &str) -> Option<String> {
    if path == "/" || path.is_empty() {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => None,
    }
}

/// Last component of an absolute path; `"/"` for the root.
pub fn file_name(path: &str) -> &str {
    if path == "/" {
        return "/";
    }
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Whether `path` is `dir` or lies beneath it.
fn is_within(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return path.starts_with('/');
    }
    path == dir || path.starts_with(&format!("{}/", dir))
}

/// The child of `dir` on the way to `path`.
fn next_component(dir: &str, path: &str) -> String {
    let rest = path[dir.len()..].trim_start_matches('/');
    let component = rest.split('/').next().unwrap_or(rest);
    if dir == "/" {
        format!("/{}", component)
    } else {
        format!("{}/{}", dir, component)
    }
}
