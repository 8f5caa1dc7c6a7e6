// src/types.rs
use chrono::{DateTime, Utc};

/// A brand term read from the active-keyword snapshot. Lifecycle
/// (creation, soft-delete, uniqueness of `normalized_value`) belongs to
/// the external keyword API; this crate only reads active rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub id: i64,
    pub value: String,
    pub normalized_value: String,
    pub status: KeywordStatus,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordStatus {
    Active,
    Inactive,
}

/// Single-row (id = 1) configuration, provisioned externally and
/// read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub ct_log_base_url: String,
    pub poll_interval_secs: u64,
    pub batch_size: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

/// The state machine's persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStateKind {
    Idle,
    Running,
    Error,
}

impl MonitorStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStateKind::Idle => "idle",
            MonitorStateKind::Running => "running",
            MonitorStateKind::Error => "error",
        }
    }
}

/// Single-row (id = 1) record embodying the ingestion state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorState {
    pub state: MonitorStateKind,
    pub last_tree_size: u64,
    /// -1 when nothing has yet been processed.
    pub last_processed_index: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_code: Option<String>,
    pub last_error: Option<String>,
}

impl MonitorState {
    pub fn fresh() -> Self {
        Self {
            state: MonitorStateKind::Idle,
            last_tree_size: 0,
            last_processed_index: -1,
            last_run_at: None,
            last_success_at: None,
            last_error_code: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

/// One row per cycle attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRun {
    pub id: i64,
    pub start_index: u64,
    pub end_index: u64,
    pub state: RunState,
    /// Raw fetch count, before parsing — recovered from original_source;
    /// lets an operator tell "the CT log gave us nothing" apart from
    /// "the parser broke on everything it got".
    pub entries_fetched: u64,
    pub certificates_processed: u64,
    pub parse_error_count: u64,
    pub matches_found: u64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// One row to be upserted per (fingerprint, keyword, matched_field)
/// triple produced by a single matcher hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInsert {
    pub keyword_id: i64,
    pub monitor_run_id: i64,
    pub certificate_sha256: String,
    pub matched_field: crate::matcher::MatchedField,
    pub matched_value: String,
    pub domain_name: String,
    pub subject_cn: Option<String>,
    pub subject_org: Option<String>,
    pub issuer_cn: Option<String>,
    pub issuer_org: Option<String>,
    pub sans: Vec<String>,
    pub not_before: Option<i64>,
    pub not_after: Option<i64>,
    pub ct_log_index: u64,
    pub ct_log_url: String,
}

fn empty_to_none(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl MatchInsert {
    /// Builds an insert from a matcher hit, a parsed certificate, and the
    /// run/log context — filling subject/issuer fields only when
    /// non-empty, per §4.5 step 7.
    pub fn from_match(
        m: &crate::matcher::Match,
        cert: &crate::cert_parser::ParsedCertificate,
        monitor_run_id: i64,
        ct_log_index: u64,
        ct_log_url: &str,
    ) -> Self {
        Self {
            keyword_id: m.keyword_id,
            monitor_run_id,
            certificate_sha256: cert.fingerprint.clone(),
            matched_field: m.matched_field,
            matched_value: m.matched_value.clone(),
            domain_name: m.domain_name.clone(),
            subject_cn: empty_to_none(cert.subject_cn.clone()),
            subject_org: empty_to_none(cert.subject_org.clone()),
            issuer_cn: empty_to_none(cert.issuer_cn.clone()),
            issuer_org: empty_to_none(cert.issuer_org.clone()),
            sans: cert.sans.clone(),
            not_before: Some(cert.not_before),
            not_after: Some(cert.not_after),
            ct_log_index,
            ct_log_url: ct_log_url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_parser::ParsedCertificate;
    use crate::matcher::{Match, MatchedField};

    fn sample_cert() -> ParsedCertificate {
        ParsedCertificate {
            fingerprint: "abc123".into(),
            subject_cn: "acme.example".into(),
            issuer_cn: "Some CA".into(),
            subject_org: String::new(),
            issuer_org: "Some CA Inc".into(),
            sans: vec!["www.acme.example".into()],
            not_before: 1_600_000_000,
            not_after: 1_700_000_000,
            is_precert: false,
        }
    }

    #[test]
    fn match_insert_omits_empty_optional_fields() {
        let m = Match {
            keyword_id: 1,
            matched_field: MatchedField::Both,
            matched_value: "acme.example".into(),
            domain_name: "acme.example".into(),
        };
        let insert = MatchInsert::from_match(&m, &sample_cert(), 42, 99, "https://ct.example/log");

        assert_eq!(insert.subject_org, None);
        assert_eq!(insert.issuer_org.as_deref(), Some("Some CA Inc"));
        assert_eq!(insert.ct_log_index, 99);
        assert_eq!(insert.monitor_run_id, 42);
    }

    #[test]
    fn fresh_monitor_state_has_no_progress() {
        let state = MonitorState::fresh();
        assert_eq!(state.last_processed_index, -1);
        assert_eq!(state.state, MonitorStateKind::Idle);
    }
}
