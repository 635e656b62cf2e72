/// Bytes per shard in one erasure-coded chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound on `data_shards + parity_shards` for GF(2^8) Reed-Solomon.
pub const MAX_TOTAL_SHARDS: usize = 256;

/// Timeout for reference-path lookups issued before a commit.
pub const REFERENCE_PATH_TIMEOUT_SECS: u64 = 30;

/// Timeout for submitting a signed write marker.
pub const COMMIT_TIMEOUT_SECS: u64 = 60;

/// Timeout for a single blobber's directory listing.
pub const LIST_TIMEOUT_SECS: u64 = 30;

/// Depth of each blobber's commit queue.
pub const COMMIT_QUEUE_DEPTH: usize = 1;

/// Buffered shard messages per blobber channel during upload.
pub const SHARD_CHANNEL_DEPTH: usize = 16;

/// Default percentage of blobbers that must agree before a listing entry is trusted.
pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 50.0;

/// Reference type tag for files.
pub const FILE_TYPE: &str = "f";

/// Reference type tag for directories.
pub const DIRECTORY_TYPE: &str = "d";

/// Form field carrying the upload connection id on commit.
pub const CONNECTION_ID_FIELD: &str = "connection_id";

/// Form field carrying the JSON-encoded write marker on commit.
pub const WRITE_MARKER_FIELD: &str = "write_marker";
