// src/database/memory.rs
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;

use super::{LockOutcome, RunCounts, Store};
use crate::types::{Keyword, MatchInsert, MonitorConfig, MonitorState, MonitorStateKind};

struct Inner {
    config: MonitorConfig,
    keywords: Vec<Keyword>,
    state: MonitorState,
    run_count: i64,
}

/// In-memory `Store` double for scheduler tests — no Postgres required.
/// Mirrors `PgStore`'s semantics for the run lock; `upsert_match` is a
/// no-op since no test here asserts on persisted match rows.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(config: MonitorConfig, keywords: Vec<Keyword>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                keywords,
                state: MonitorState::fresh(),
                run_count: 0,
            }),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_config(&self) -> Result<MonitorConfig> {
        Ok(self.inner.lock().unwrap().config.clone())
    }

    async fn get_active_keywords(&self) -> Result<Vec<Keyword>> {
        Ok(self.inner.lock().unwrap().keywords.clone())
    }

    async fn try_acquire_run_lock(&self) -> Result<LockOutcome> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.state != MonitorStateKind::Idle {
            return Ok(LockOutcome::NotIdle(inner.state.clone()));
        }
        inner.state.state = MonitorStateKind::Running;
        inner.state.last_run_at = Some(Utc::now());
        inner.state.last_error_code = None;
        inner.state.last_error = None;
        Ok(LockOutcome::Acquired(inner.state.clone()))
    }

    async fn create_run(&self, _start_index: u64, _end_index: u64) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.run_count += 1;
        Ok(inner.run_count)
    }

    async fn update_run_success(&self, _run_id: i64, _counts: RunCounts) -> Result<()> {
        Ok(())
    }

    async fn update_run_error(&self, _run_id: i64, _code: &str, _message: &str) -> Result<()> {
        Ok(())
    }

    async fn upsert_match(&self, _m: &MatchInsert) -> Result<()> {
        Ok(())
    }

    async fn set_state_idle(&self, tree_size: u64, processed_index: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.state.state = MonitorStateKind::Idle;
        inner.state.last_tree_size = tree_size;
        inner.state.last_processed_index = processed_index;
        inner.state.last_success_at = Some(Utc::now());
        Ok(())
    }

    async fn set_state_error(&self, code: &str, message: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.state.state = MonitorStateKind::Error;
        inner.state.last_error_code = Some(code.to_string());
        inner.state.last_error = Some(message.to_string());
        Ok(())
    }

    async fn get_state(&self) -> Result<MonitorState> {
        Ok(self.inner.lock().unwrap().state.clone())
    }
}
