// src/ct_log/mod.rs
pub mod client;
pub mod types;

pub use client::{calculate_range, CtLogClient};
pub use types::{FetchRange, GetEntriesResponse, LogEntry, SignedTreeHead};
