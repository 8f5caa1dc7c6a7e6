// src/database/mod.rs
use anyhow::Result;
use async_trait::async_trait;

use crate::types::{MatchInsert, MonitorConfig, MonitorState};
pub use crate::types::Keyword;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of attempting to claim the run slot for this cycle.
#[derive(Debug)]
pub enum LockOutcome {
    /// The caller now owns the `running` state; it must eventually call
    /// `set_state_idle` or `set_state_error`.
    Acquired(MonitorState),
    /// Another runner holds the slot, or a prior run is stuck in `error`.
    NotIdle(MonitorState),
}

/// Counts for a completed run, handed to `update_run_success`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub entries_fetched: u64,
    pub certificates_processed: u64,
    pub parse_error_count: u64,
    pub matches_found: u64,
}

/// Storage contract for the ingestion pipeline (§4.4).
///
/// `begin_tx`/`lock_state`/`set_state_running`/`commit` from the
/// behavioral spec are collapsed into `try_acquire_run_lock`: a
/// `sqlx::Transaction<'_, Postgres>` cannot be named in a `dyn Store`
/// object's return type without tying the trait to one lifetime per
/// call, so the lock-check-transition-commit handshake happens entirely
/// inside the implementation and is exposed as one atomic step. The
/// semantics — row lock held for the duration of the check-and-set, then
/// released — are unchanged.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_config(&self) -> Result<MonitorConfig>;
    async fn get_active_keywords(&self) -> Result<Vec<Keyword>>;

    /// Atomically locks the singleton state row, and if it is `idle`,
    /// transitions it to `running` (clearing `last_error_code`/
    /// `last_error`) and commits before returning.
    async fn try_acquire_run_lock(&self) -> Result<LockOutcome>;

    async fn create_run(&self, start_index: u64, end_index: u64) -> Result<i64>;
    async fn update_run_success(&self, run_id: i64, counts: RunCounts) -> Result<()>;
    async fn update_run_error(&self, run_id: i64, code: &str, message: &str) -> Result<()>;

    /// Inserts, or on conflict of `(certificate_sha256, keyword_id,
    /// matched_field)` refreshes `last_seen_at`/`monitor_run_id` and
    /// clears `is_new`.
    async fn upsert_match(&self, m: &MatchInsert) -> Result<()>;

    async fn set_state_idle(&self, tree_size: u64, processed_index: i64) -> Result<()>;
    async fn set_state_error(&self, code: &str, message: &str) -> Result<()>;

    /// Non-transactional read, for diagnostics and tests.
    async fn get_state(&self) -> Result<MonitorState>;
}
