//! Polling loop: list, filter, decide, enrich, emit, then advance watermarks.
//!
//! One [`Poller`] serves one watcher scope. Cycles never overlap, so the
//! watermark state needs no locking beyond what the store itself does.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::error::AppError;
use crate::models::{CandidateItem, ChangeRecord, Enrichment, WatermarkState, WatermarkUpdate};
use crate::sync::{
    format_timestamp, parse_timestamp, should_emit, CycleOutcome, CycleReport, CycleStats,
};
use crate::traits::{EmissionSink, WatermarkStore, WorkflowSource};

/// Polls one instance and reports changed workflows.
pub struct Poller<S, W, E> {
    scope: String,
    interval: Duration,
    include_detail: bool,
    max_per_cycle: usize,
    exclude: Option<Regex>,
    source: Arc<S>,
    store: Arc<W>,
    sink: Arc<E>,
}

/// Candidates gathered in one scan, before emission.
struct Scan {
    batch: Vec<ChangeRecord>,
    /// The cap stopped the scan while candidates were still left.
    truncated: bool,
}

impl<S, W, E> Poller<S, W, E>
where
    S: WorkflowSource,
    W: WatermarkStore,
    E: EmissionSink,
{
    /// Builds a poller for `config`, validating it first.
    ///
    /// The watermark scope is the watcher's name.
    pub fn new(
        config: &WatcherConfig,
        source: Arc<S>,
        store: Arc<W>,
        sink: Arc<E>,
    ) -> Result<Self, AppError> {
        config.validate()?;

        Ok(Self {
            scope: config.name.clone(),
            interval: config.poll_interval(),
            include_detail: config.include_detail,
            max_per_cycle: config.max_per_cycle,
            exclude: config.exclusion_regex()?,
            source,
            store,
            sink,
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Runs cycles until `cancel` fires.
    ///
    /// The token is checked before each cycle and raced against the sleep
    /// between cycles. A running cycle always completes.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            watcher = %self.scope,
            interval_secs = self.interval.as_secs(),
            "poller started"
        );

        while !cancel.is_cancelled() {
            self.run_cycle().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(watcher = %self.scope, "poller stopped");
    }

    /// Runs one cycle. Failures are logged and reported, never propagated.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut stats = CycleStats::new();

        match self.try_cycle(&mut stats).await {
            Ok(()) => {
                info!(
                    watcher = %self.scope,
                    emitted = stats.emitted,
                    unchanged = stats.unchanged,
                    excluded = stats.excluded,
                    skipped = stats.skipped,
                    deferred = stats.deferred,
                    enrichment_failures = stats.enrichment_failures,
                    "cycle complete"
                );
                CycleReport::success(self.scope.clone(), stats)
            }
            Err(e) => {
                warn!(
                    watcher = %self.scope,
                    error = %e,
                    retryable = e.is_retryable(),
                    "cycle failed, state unchanged"
                );
                CycleReport::failure(self.scope.clone(), stats, e.to_string())
            }
        }
    }

    async fn try_cycle(&self, stats: &mut CycleStats) -> Result<(), AppError> {
        let state = self.store.load(&self.scope).await?;
        let listing = self.source.list_workflows().await?;
        debug!(watcher = %self.scope, candidates = listing.len(), "listed workflows");

        let scan = self.scan(&listing, &state, stats).await;
        if scan.batch.is_empty() {
            return Ok(());
        }

        self.sink.emit(&scan.batch).await?;

        // A truncated scan keeps last_sync where it was: the unscanned
        // candidates must still clear it next cycle. seen entries alone
        // stop the emitted ones from repeating.
        let last_sync = if scan.truncated {
            state.last_sync.clone()
        } else {
            next_last_sync(&state.last_sync)
        };

        let update = WatermarkUpdate::for_batch(last_sync, &scan.batch);
        self.store.commit(&self.scope, &update).await
    }

    async fn scan(&self, listing: &[Value], state: &WatermarkState, stats: &mut CycleStats) -> Scan {
        let mut batch = Vec::new();

        for (index, raw) in listing.iter().enumerate() {
            if self.max_per_cycle > 0 && batch.len() >= self.max_per_cycle {
                stats.deferred = listing.len() - index;
                return Scan {
                    batch,
                    truncated: true,
                };
            }

            let outcome = match CandidateItem::from_json(raw) {
                None => {
                    debug!(watcher = %self.scope, "skipping entry without usable id");
                    CycleOutcome::Skipped
                }
                Some(item) => self.evaluate(item, state, stats, &mut batch).await,
            };
            stats.record(outcome);
        }

        Scan {
            batch,
            truncated: false,
        }
    }

    async fn evaluate(
        &self,
        item: CandidateItem,
        state: &WatermarkState,
        stats: &mut CycleStats,
        batch: &mut Vec<ChangeRecord>,
    ) -> CycleOutcome {
        if self.exclude.as_ref().is_some_and(|re| re.is_match(&item.name)) {
            debug!(watcher = %self.scope, id = %item.id, name = %item.name, "excluded by name");
            return CycleOutcome::Excluded;
        }

        let Some(updated_at) = item
            .updated_at
            .as_deref()
            .filter(|ts| parse_timestamp(ts).is_some())
        else {
            debug!(
                watcher = %self.scope,
                id = %item.id,
                updated_at = ?item.updated_at,
                "no valid update timestamp"
            );
            return CycleOutcome::Skipped;
        };

        if !should_emit(
            Some(updated_at),
            Some(&state.last_sync),
            state.seen_at(&item.id),
        ) {
            return CycleOutcome::Unchanged;
        }

        let workflow = if self.include_detail {
            let enrichment = Enrichment::from_result(self.source.fetch_workflow(&item.id).await);
            if let Enrichment::Unavailable(reason) = &enrichment {
                warn!(
                    watcher = %self.scope,
                    id = %item.id,
                    reason = %reason,
                    "detail fetch failed, emitting without it"
                );
                stats.enrichment_failures += 1;
            }
            enrichment.into_detail()
        } else {
            None
        };

        debug!(watcher = %self.scope, id = %item.id, updated_at, "changed");
        batch.push(ChangeRecord {
            updated_at: updated_at.to_string(),
            id: item.id,
            name: item.name,
            workflow,
        });
        CycleOutcome::Emitted
    }
}

impl<S, W, E> Poller<S, W, E>
where
    S: WorkflowSource + 'static,
    W: WatermarkStore + 'static,
    E: EmissionSink + 'static,
{
    /// Moves the poller onto its own task.
    pub fn spawn(self, cancel: CancellationToken) -> PollerHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        PollerHandle { cancel, task }
    }
}

/// Current wall-clock time, never earlier than the stored watermark.
fn next_last_sync(previous: &str) -> String {
    let now = Utc::now();
    match parse_timestamp(previous) {
        Some(prev) if prev > now => previous.to_string(),
        _ => format_timestamp(now),
    }
}

/// Stop hook for a spawned poller.
pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Requests a stop and returns immediately.
    ///
    /// In-flight requests of the current cycle finish on their own.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the poller task to exit.
    pub async fn join(self) -> Result<(), AppError> {
        self.task
            .await
            .map_err(|e| AppError::Generic(format!("poller task failed: {}", e)))
    }
}
