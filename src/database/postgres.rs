// src/database/postgres.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::{LockOutcome, RunCounts, Store};
use crate::matcher::MatchedField;
use crate::types::{
    Keyword, KeywordStatus, MatchInsert, MonitorConfig, MonitorState, MonitorStateKind,
};

/// PostgreSQL-backed store for the ingestion pipeline.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("connecting to PostgreSQL database");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to PostgreSQL database")?;

        info!("connected to PostgreSQL successfully");

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keywords (
                id BIGSERIAL PRIMARY KEY,
                value TEXT NOT NULL,
                normalized_value TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create keywords table")?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_keywords_normalized_value
            ON keywords(normalized_value) WHERE NOT is_deleted
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create unique index on keywords")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_config (
                id INT PRIMARY KEY DEFAULT 1,
                ct_log_base_url TEXT NOT NULL,
                poll_interval_secs BIGINT NOT NULL DEFAULT 30,
                batch_size BIGINT NOT NULL DEFAULT 256,
                connect_timeout_ms BIGINT NOT NULL DEFAULT 5000,
                read_timeout_ms BIGINT NOT NULL DEFAULT 10000,
                CHECK (id = 1)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create monitor_config table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_state (
                id INT PRIMARY KEY DEFAULT 1,
                state TEXT NOT NULL DEFAULT 'idle',
                last_tree_size BIGINT NOT NULL DEFAULT 0,
                last_processed_index BIGINT NOT NULL DEFAULT -1,
                last_run_at TIMESTAMPTZ,
                last_success_at TIMESTAMPTZ,
                last_error_code TEXT,
                last_error TEXT,
                CHECK (id = 1)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create monitor_state table")?;

        sqlx::query(
            r#"
            INSERT INTO monitor_state (id) VALUES (1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to seed monitor_state row")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_run (
                id BIGSERIAL PRIMARY KEY,
                start_index BIGINT NOT NULL,
                end_index BIGINT NOT NULL,
                state TEXT NOT NULL DEFAULT 'running',
                entries_fetched BIGINT NOT NULL DEFAULT 0,
                certificates_processed BIGINT NOT NULL DEFAULT 0,
                parse_error_count BIGINT NOT NULL DEFAULT 0,
                matches_found BIGINT NOT NULL DEFAULT 0,
                error_code TEXT,
                error_message TEXT,
                started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                ended_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create monitor_run table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matched_certificates (
                id BIGSERIAL PRIMARY KEY,
                keyword_id BIGINT NOT NULL REFERENCES keywords(id),
                monitor_run_id BIGINT NOT NULL REFERENCES monitor_run(id),
                certificate_sha256 TEXT NOT NULL,
                matched_field TEXT NOT NULL,
                matched_value TEXT NOT NULL,
                domain_name TEXT NOT NULL,
                subject_cn TEXT,
                subject_org TEXT,
                issuer_cn TEXT,
                issuer_org TEXT,
                sans TEXT[] NOT NULL DEFAULT '{}',
                not_before BIGINT,
                not_after BIGINT,
                ct_log_index BIGINT NOT NULL,
                ct_log_url TEXT NOT NULL,
                first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                is_new BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create matched_certificates table")?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_matched_certificates_dedup
            ON matched_certificates(certificate_sha256, keyword_id, matched_field)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create unique index on matched_certificates")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exports (
                id BIGSERIAL PRIMARY KEY,
                requested_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                filter_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create exports table")?;

        info!("database migrations completed successfully");

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_state(row: &sqlx::postgres::PgRow) -> MonitorState {
        let state_str: String = row.get("state");
        MonitorState {
            state: match state_str.as_str() {
                "running" => MonitorStateKind::Running,
                "error" => MonitorStateKind::Error,
                _ => MonitorStateKind::Idle,
            },
            last_tree_size: row.get::<i64, _>("last_tree_size") as u64,
            last_processed_index: row.get("last_processed_index"),
            last_run_at: row.get("last_run_at"),
            last_success_at: row.get("last_success_at"),
            last_error_code: row.get("last_error_code"),
            last_error: row.get("last_error"),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_config(&self) -> Result<MonitorConfig> {
        let row = sqlx::query("SELECT * FROM monitor_config WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("failed to read monitor config")?;

        Ok(MonitorConfig {
            ct_log_base_url: row.get("ct_log_base_url"),
            poll_interval_secs: row.get::<i64, _>("poll_interval_secs") as u64,
            batch_size: row.get::<i64, _>("batch_size") as u64,
            connect_timeout_ms: row.get::<i64, _>("connect_timeout_ms") as u64,
            read_timeout_ms: row.get::<i64, _>("read_timeout_ms") as u64,
        })
    }

    async fn get_active_keywords(&self) -> Result<Vec<Keyword>> {
        let rows = sqlx::query(
            "SELECT id, value, normalized_value, status, is_deleted FROM keywords \
             WHERE NOT is_deleted AND status = 'active' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to read active keywords")?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let status: String = row.get("status");
                Keyword {
                    id: row.get("id"),
                    value: row.get("value"),
                    normalized_value: row.get("normalized_value"),
                    status: if status == "active" {
                        KeywordStatus::Active
                    } else {
                        KeywordStatus::Inactive
                    },
                    is_deleted: row.get("is_deleted"),
                }
            })
            .collect())
    }

    async fn try_acquire_run_lock(&self) -> Result<LockOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open transaction for run lock")?;

        let row = sqlx::query("SELECT * FROM monitor_state WHERE id = 1 FOR UPDATE")
            .fetch_one(&mut *tx)
            .await
            .context("failed to lock monitor state row")?;

        let current = Self::row_to_state(&row);

        if current.state != MonitorStateKind::Idle {
            tx.rollback().await.ok();
            return Ok(LockOutcome::NotIdle(current));
        }

        sqlx::query(
            r#"
            UPDATE monitor_state
            SET state = 'running', last_run_at = NOW(), last_error_code = NULL, last_error = NULL
            WHERE id = 1
            "#,
        )
        .execute(&mut *tx)
        .await
        .context("failed to transition monitor state to running")?;

        tx.commit().await.context("failed to commit run lock")?;

        Ok(LockOutcome::Acquired(MonitorState {
            state: MonitorStateKind::Running,
            last_run_at: Some(Utc::now()),
            last_error_code: None,
            last_error: None,
            ..current
        }))
    }

    async fn create_run(&self, start_index: u64, end_index: u64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO monitor_run (start_index, end_index, state)
            VALUES ($1, $2, 'running')
            RETURNING id
            "#,
        )
        .bind(start_index as i64)
        .bind(end_index as i64)
        .fetch_one(&self.pool)
        .await
        .context("failed to create monitor run")?;

        Ok(row.get("id"))
    }

    async fn update_run_success(&self, run_id: i64, counts: RunCounts) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE monitor_run
            SET state = 'completed', ended_at = NOW(),
                entries_fetched = $2, certificates_processed = $3,
                parse_error_count = $4, matches_found = $5
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(counts.entries_fetched as i64)
        .bind(counts.certificates_processed as i64)
        .bind(counts.parse_error_count as i64)
        .bind(counts.matches_found as i64)
        .execute(&self.pool)
        .await
        .context("failed to finalize successful run")?;

        Ok(())
    }

    async fn update_run_error(&self, run_id: i64, code: &str, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE monitor_run
            SET state = 'failed', ended_at = NOW(), error_code = $2, error_message = $3
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(code)
        .bind(message)
        .execute(&self.pool)
        .await
        .context("failed to finalize failed run")?;

        Ok(())
    }

    async fn upsert_match(&self, m: &MatchInsert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO matched_certificates (
                keyword_id, monitor_run_id, certificate_sha256, matched_field,
                matched_value, domain_name, subject_cn, subject_org, issuer_cn,
                issuer_org, sans, not_before, not_after, ct_log_index, ct_log_url
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            ON CONFLICT (certificate_sha256, keyword_id, matched_field)
            DO UPDATE SET
                last_seen_at = NOW(),
                is_new = FALSE,
                monitor_run_id = EXCLUDED.monitor_run_id
            "#,
        )
        .bind(m.keyword_id)
        .bind(m.monitor_run_id)
        .bind(&m.certificate_sha256)
        .bind(match_field_str(m.matched_field))
        .bind(&m.matched_value)
        .bind(&m.domain_name)
        .bind(&m.subject_cn)
        .bind(&m.subject_org)
        .bind(&m.issuer_cn)
        .bind(&m.issuer_org)
        .bind(&m.sans)
        .bind(m.not_before)
        .bind(m.not_after)
        .bind(m.ct_log_index as i64)
        .bind(&m.ct_log_url)
        .execute(&self.pool)
        .await
        .context("failed to upsert match")?;

        debug!(
            "upserted match: fingerprint={} keyword_id={} field={:?}",
            m.certificate_sha256, m.keyword_id, m.matched_field
        );

        Ok(())
    }

    async fn set_state_idle(&self, tree_size: u64, processed_index: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE monitor_state
            SET state = 'idle', last_tree_size = $1, last_processed_index = $2,
                last_success_at = NOW()
            WHERE id = 1
            "#,
        )
        .bind(tree_size as i64)
        .bind(processed_index)
        .execute(&self.pool)
        .await
        .context("failed to set monitor state idle")?;

        Ok(())
    }

    async fn set_state_error(&self, code: &str, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE monitor_state
            SET state = 'error', last_error_code = $1, last_error = $2
            WHERE id = 1
            "#,
        )
        .bind(code)
        .bind(message)
        .execute(&self.pool)
        .await
        .context("failed to set monitor state error")?;

        Ok(())
    }

    async fn get_state(&self) -> Result<MonitorState> {
        let row = sqlx::query("SELECT * FROM monitor_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("failed to read monitor state")?;

        Ok(Self::row_to_state(&row))
    }
}

fn match_field_str(field: MatchedField) -> &'static str {
    field.as_str()
}
