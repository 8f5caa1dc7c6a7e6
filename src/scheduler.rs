// src/scheduler.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cert_parser::{parse_entry, ParseOutcome};
use crate::ct_log::{calculate_range, CtLogClient};
use crate::database::{LockOutcome, RunCounts, Store};
use crate::matcher::{match_certificate, Keyword as MatcherKeyword};
use crate::types::MatchInsert;

/// Entries fetched per HTTP request, independent of the cycle's overall
/// batch size — keeps individual responses small (§4.5 step 6).
const FETCH_CHUNK_SIZE: u64 = 100;

/// Outcome of one `run_cycle` invocation, for tests and logging.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another runner held the slot; this cycle did nothing.
    SlotHeldElsewhere,
    /// Nothing to fetch (empty tree, or already caught up).
    NoWork,
    /// A run was created and processed, with these counts.
    Processed(RunCounts),
    /// The cycle failed with this error code before or during the run.
    Failed(&'static str),
}

/// The ingestion control plane. Owns no connections itself — everything
/// flows through the injected `Store`.
pub struct Scheduler {
    store: Arc<dyn Store>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            running: AtomicBool::new(false),
        }
    }

    /// Starts the periodic loop on a background task. Calling `start`
    /// twice is a no-op — mirrors the single in-process `running` guard.
    /// Returns a stop handle whose drop (or explicit `send(true)`) is
    /// not itself the cancellation mechanism; call `stop` instead.
    pub fn start(self: &Arc<Self>) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);

        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running, start() is a no-op");
            let handle = tokio::spawn(async {});
            return (handle, stop_tx);
        }

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            scheduler.run_loop(stop_rx).await;
            scheduler.running.store(false, Ordering::SeqCst);
        });

        (handle, stop_tx)
    }

    async fn run_loop(&self, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                info!("scheduler stop signal observed before cycle start");
                return;
            }

            let outcome = self.run_cycle().await;
            info!(?outcome, "cycle finished");

            let poll_interval = match self.store.get_config().await {
                Ok(cfg) => Duration::from_secs(cfg.poll_interval_secs),
                Err(e) => {
                    error!("failed to read poll interval, defaulting to 30s: {}", e);
                    Duration::from_secs(30)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = stop_rx.changed() => {
                    info!("scheduler stop signal observed during sleep");
                    return;
                }
            }
        }
    }

    /// Runs one cycle of the state machine (§4.5).
    pub async fn run_cycle(&self) -> CycleOutcome {
        // Step 1: acquire exclusive run right.
        let _state = match self.store.try_acquire_run_lock().await {
            Ok(LockOutcome::Acquired(state)) => state,
            Ok(LockOutcome::NotIdle(_)) => return CycleOutcome::SlotHeldElsewhere,
            Err(e) => {
                error!("failed to acquire run lock: {}", e);
                return CycleOutcome::Failed("DB_ERROR");
            }
        };

        // Step 2: load working set.
        let config = match self.store.get_config().await {
            Ok(c) => c,
            Err(e) => {
                error!("failed to load monitor config: {}", e);
                self.fail_no_run("CONFIG_ERROR", &e.to_string()).await;
                return CycleOutcome::Failed("CONFIG_ERROR");
            }
        };

        let keywords = match self.store.get_active_keywords().await {
            Ok(k) => k,
            Err(e) => {
                error!("failed to load active keywords: {}", e);
                self.fail_no_run("CONFIG_ERROR", &e.to_string()).await;
                return CycleOutcome::Failed("CONFIG_ERROR");
            }
        };
        let matcher_keywords: Vec<MatcherKeyword> = keywords
            .iter()
            .map(|k| MatcherKeyword {
                id: k.id,
                normalized_value: k.normalized_value.clone(),
            })
            .collect();

        // Step 3: talk to the CT log.
        let client = match CtLogClient::new(
            config.ct_log_base_url.clone(),
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.read_timeout_ms),
        ) {
            Ok(c) => c,
            Err(e) => {
                error!("failed to build CT client: {}", e);
                self.fail_no_run("CT_CONNECTION_ERROR", &e.to_string()).await;
                return CycleOutcome::Failed("CT_CONNECTION_ERROR");
            }
        };

        let sth = match client.get_sth().await {
            Ok(sth) => sth,
            Err(e) => {
                warn!("get_sth failed: {}", e);
                self.fail_no_run(e.code(), &e.to_string()).await;
                return CycleOutcome::Failed(e.code());
            }
        };

        // Step 4: compute range.
        let current_state = match self.store.get_state().await {
            Ok(s) => s,
            Err(e) => {
                error!("failed to read monitor state after acquiring lock: {}", e);
                self.fail_no_run("DB_ERROR", &e.to_string()).await;
                return CycleOutcome::Failed("DB_ERROR");
            }
        };

        let range = calculate_range(
            sth.tree_size,
            config.batch_size,
            current_state.last_processed_index,
        );

        // `calculate_range` always returns start <= end; the degenerate
        // "nothing left to fetch" case instead shows up as the returned
        // start having already been processed (§4.1).
        let no_work = sth.tree_size == 0
            || (current_state.last_processed_index >= 0
                && range.start <= current_state.last_processed_index as u64);
        if no_work {
            if let Err(e) = self
                .store
                .set_state_idle(sth.tree_size, current_state.last_processed_index)
                .await
            {
                error!("failed to return to idle after no-op cycle: {}", e);
            }
            return CycleOutcome::NoWork;
        }

        // Step 5: create run record.
        let run_id = match self.store.create_run(range.start, range.end).await {
            Ok(id) => id,
            Err(e) => {
                error!("failed to create run record: {}", e);
                self.fail_no_run("DB_ERROR", &e.to_string()).await;
                return CycleOutcome::Failed("DB_ERROR");
            }
        };

        // Step 6: fetch entries in chunks.
        let entries = match client
            .get_entries_chunked(range.start, range.end, FETCH_CHUNK_SIZE)
            .await
        {
            Ok(e) => e,
            Err(e) => {
                warn!("get_entries_chunked failed: {}", e);
                let code = e.code();
                if let Err(store_err) = self.store.update_run_error(run_id, code, &e.to_string()).await
                {
                    error!("failed to record run failure: {}", store_err);
                }
                if let Err(store_err) = self.store.set_state_error(code, &e.to_string()).await {
                    error!("failed to set state error: {}", store_err);
                }
                return CycleOutcome::Failed(code);
            }
        };

        // Step 7: process entries, one bad entry never aborts the cycle.
        let mut counts = RunCounts {
            entries_fetched: entries.len() as u64,
            ..Default::default()
        };
        let mut last_processed_index = current_state.last_processed_index;

        for (i, entry) in entries.iter().enumerate() {
            let ct_index = range.start + i as u64;
            match parse_entry(&entry.leaf_input, &entry.extra_data, ct_index) {
                ParseOutcome::Parsed(cert) => {
                    counts.certificates_processed += 1;
                    let matches = match_certificate(&matcher_keywords, &cert);
                    counts.matches_found += matches.len() as u64;

                    for m in &matches {
                        let insert = MatchInsert::from_match(
                            m,
                            &cert,
                            run_id,
                            ct_index,
                            &config.ct_log_base_url,
                        );
                        if let Err(e) = self.store.upsert_match(&insert).await {
                            warn!("failed to upsert match for entry {}: {}", ct_index, e);
                        }
                    }
                }
                ParseOutcome::Failed { index, kind } => {
                    counts.parse_error_count += 1;
                    warn!("parse error at entry {}: {}", index, kind);
                }
            }

            last_processed_index = ct_index as i64;
        }

        // Step 8: update high-water mark.
        if let Err(e) = self.store.update_run_success(run_id, counts).await {
            error!("failed to finalize successful run: {}", e);
        }
        if let Err(e) = self
            .store
            .set_state_idle(sth.tree_size, last_processed_index)
            .await
        {
            error!("failed to return to idle after successful run: {}", e);
        }

        CycleOutcome::Processed(counts)
    }

    async fn fail_no_run(&self, code: &str, message: &str) {
        if let Err(e) = self.store.set_state_error(code, message).await {
            error!("failed to set state error ({}): {}", code, e);
        }
    }
}
