//! Transport contract between the client core and blobbers.
//!
//! Request construction and HTTP plumbing live outside the core. The core
//! only describes *what* it wants from a blobber (`NodeRequest`) and reads
//! back a status code plus raw body (`NodeResponse`).

use std::time::Duration;

use async_trait::async_trait;

use crate::{Blobber, TransportError};

/// The kind of call being made to a blobber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Fetch the reference path and latest write marker for a path.
    ReferencePath,
    /// List the entries under a path.
    List,
    /// Submit a signed write marker for a connection.
    Commit,
}

#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub kind: RequestKind,
    pub blobber: Blobber,
    pub allocation_id: String,
    /// Remote path the request refers to (empty for commits).
    pub path: String,
    /// Form fields, in submission order.
    pub form: Vec<(String, String)>,
}

impl NodeRequest {
    pub fn new(kind: RequestKind, blobber: &Blobber, allocation_id: &str) -> Self {
        Self {
            kind,
            blobber: blobber.clone(),
            allocation_id: allocation_id.to_string(),
            path: String::new(),
            form: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.form.push((name.to_string(), value.into()));
        self
    }

    /// Look up a form field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl NodeResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Something that can deliver a request to a blobber.
///
/// Implementations should honour `timeout`; callers also enforce it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn do_request(
        &self,
        request: NodeRequest,
        timeout: Duration,
    ) -> Result<NodeResponse, TransportError>;
}

/// Issue `request` with `timeout` enforced on top of the transport's own handling.
pub async fn send_with_timeout(
    transport: &dyn Transport,
    request: NodeRequest,
    timeout: Duration,
) -> Result<NodeResponse, TransportError> {
    let url = request.blobber.base_url.clone();
    match tokio::time::timeout(timeout, transport.do_request(request, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            url,
            secs: timeout.as_secs(),
        }),
    }
}
