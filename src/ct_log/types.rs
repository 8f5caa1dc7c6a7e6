// src/ct_log/types.rs
use serde::{Deserialize, Serialize};

/// Response from a CT log's `get-sth` endpoint (RFC 6962 §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub timestamp: u64,
    pub sha256_root_hash: String,
    #[serde(default)]
    pub tree_head_signature: String,
}

/// Single entry from a CT log's `get-entries` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub leaf_input: String,
    pub extra_data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetEntriesResponse {
    pub entries: Vec<LogEntry>,
}

/// Inclusive `[start, end]` index range to fetch in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    pub start: u64,
    pub end: u64,
}
