//! zbox protocol - core types shared by every client component
//!
//! Defines the allocation data model, the reference tree a blobber reports,
//! the hash-chained write marker, SHA-256 hashing, Ed25519 client identity
//! and the transport contract the client uses to talk to blobbers.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod marker;
pub mod reference;
pub mod transport;
pub mod types;

pub use constants::*;
pub use error::*;
pub use identity::*;
pub use marker::{now_timestamp, WriteMarker};
pub use reference::{Ref, RefType, ReferencePathResult};
pub use transport::{send_with_timeout, NodeRequest, NodeResponse, RequestKind, Transport};
pub use types::*;
