//! Allocation changes applied to a reference tree before committing.
//!
//! Each change targets one path and reports the signed size delta it caused.
//! Changes are applied to an in-memory copy of the tree; nothing reaches the
//! blobber until the resulting write marker is submitted.

use thiserror::Error;
use zbox_protocol::{ProtocolError, Ref};

#[derive(Error, Debug)]
pub enum ChangeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} is not a file")]
    NotAFile(String),

    #[error(transparent)]
    Tree(#[from] ProtocolError),
}

pub trait AllocationChange: Send + Sync + std::fmt::Debug {
    /// Path whose reference path must be fetched to apply this change.
    fn affected_path(&self) -> &str;

    /// Apply the change to `root`, returning the size delta in bytes.
    fn process_change(&self, root: &mut Ref) -> Result<i64, ChangeError>;
}

/// A newly uploaded file.
#[derive(Debug, Clone)]
pub struct NewFileChange {
    pub file: Ref,
}

impl NewFileChange {
    pub fn new(file: Ref) -> Self {
        Self { file }
    }
}

impl AllocationChange for NewFileChange {
    fn affected_path(&self) -> &str {
        &self.file.path
    }

    fn process_change(&self, root: &mut Ref) -> Result<i64, ChangeError> {
        if root.find(&self.file.path).is_some() {
            return Err(ChangeError::AlreadyExists(self.file.path.clone()));
        }
        root.insert(self.file.clone())?;
        Ok(self.file.size)
    }
}

/// New content for an existing file.
#[derive(Debug, Clone)]
pub struct UpdateFileChange {
    pub file: Ref,
}

impl UpdateFileChange {
    pub fn new(file: Ref) -> Self {
        Self { file }
    }
}

impl AllocationChange for UpdateFileChange {
    fn affected_path(&self) -> &str {
        &self.file.path
    }

    fn process_change(&self, root: &mut Ref) -> Result<i64, ChangeError> {
        let existing = root
            .find_mut(&self.file.path)
            .ok_or_else(|| ChangeError::NotFound(self.file.path.clone()))?;
        if existing.is_dir() {
            return Err(ChangeError::NotAFile(self.file.path.clone()));
        }
        let delta = self.file.size - existing.size;
        *existing = self.file.clone();
        Ok(delta)
    }
}

/// Removal of a file or directory.
#[derive(Debug, Clone)]
pub struct DeleteFileChange {
    pub path: String,
}

impl DeleteFileChange {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl AllocationChange for DeleteFileChange {
    fn affected_path(&self) -> &str {
        &self.path
    }

    fn process_change(&self, root: &mut Ref) -> Result<i64, ChangeError> {
        let removed = root
            .remove(&self.path)
            .ok_or_else(|| ChangeError::NotFound(self.path.clone()))?;
        Ok(-removed.size)
    }
}
