//! Change detection for workflow polling.
//!
//! This module provides the pure decision logic and per-cycle statistics,
//! decoupled from I/O operations and loop orchestration.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Naive layouts accepted in addition to RFC 3339; read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses an upstream or stored timestamp.
///
/// Accepts RFC 3339 with any offset, naive date-times (treated as UTC) and
/// bare dates (UTC midnight). Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Formats a timestamp the way watermarks are stored (`...T...000Z`).
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a watermark, falling back to the Unix epoch when absent or corrupted.
fn watermark(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(parse_timestamp)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Decides whether a workflow changed since it was last reported.
///
/// # Arguments
/// * `updated_at` - The workflow's reported update time (None or empty when missing)
/// * `last_sync` - End of the last emitting cycle (epoch when absent)
/// * `seen_at` - `updatedAt` of this workflow's last emission (epoch when absent)
///
/// # Returns
/// `true` only if `updated_at` parses and is strictly later than both watermarks.
///
/// # Examples
///
/// ```
/// use flowwatch_core::should_emit;
///
/// let last_sync = Some("2024-01-01T00:00:00.000Z");
/// assert!(should_emit(Some("2024-01-02T00:00:00Z"), last_sync, None));
/// assert!(!should_emit(Some("2024-01-01T00:00:00Z"), last_sync, None));
/// assert!(!should_emit(Some("not-a-date"), last_sync, None));
/// assert!(!should_emit(None, last_sync, None));
/// ```
pub fn should_emit(
    updated_at: Option<&str>,
    last_sync: Option<&str>,
    seen_at: Option<&str>,
) -> bool {
    let Some(updated) = updated_at.and_then(parse_timestamp) else {
        return false;
    };

    updated > watermark(last_sync) && updated > watermark(seen_at)
}

/// Outcome of evaluating a single candidate during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Changed since the watermarks - added to the batch
    Emitted,
    /// Not newer than the watermarks
    Unchanged,
    /// Name matched the exclusion pattern
    Excluded,
    /// No usable identifier or timestamp
    Skipped,
}

/// Statistics for one polling cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub emitted: usize,
    pub unchanged: usize,
    pub excluded: usize,
    pub skipped: usize,
    /// Candidates left unscanned because the per-cycle cap was reached.
    pub deferred: usize,
    /// Emitted records whose detail fetch failed.
    pub enrichment_failures: usize,
}

impl CycleStats {
    /// Creates a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: CycleOutcome) {
        match outcome {
            CycleOutcome::Emitted => self.emitted += 1,
            CycleOutcome::Unchanged => self.unchanged += 1,
            CycleOutcome::Excluded => self.excluded += 1,
            CycleOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Returns the number of candidates looked at.
    pub fn scanned(&self) -> usize {
        self.emitted + self.unchanged + self.excluded + self.skipped
    }
}

/// Result of running one cycle for one watcher.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Watcher (watermark scope) name.
    pub watcher: String,
    pub stats: CycleStats,
    /// Error message if the cycle aborted, None if it completed.
    pub error: Option<String>,
}

impl CycleReport {
    /// Creates a report for a completed cycle.
    pub fn success(watcher: String, stats: CycleStats) -> Self {
        Self {
            watcher,
            stats,
            error: None,
        }
    }

    /// Creates a report for an aborted cycle.
    ///
    /// Stats gathered before the failure are kept, but nothing was committed.
    pub fn failure(watcher: String, stats: CycleStats, error: String) -> Self {
        Self {
            watcher,
            stats,
            error: Some(error),
        }
    }

    /// Returns true if the cycle completed.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated reports from running several watchers once.
#[derive(Debug, Clone, Default)]
pub struct WatchSummary {
    pub reports: Vec<CycleReport>,
}

impl WatchSummary {
    /// Creates a new empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a watcher's report.
    pub fn add(&mut self, report: CycleReport) {
        self.reports.push(report);
    }

    /// Returns the count of completed cycles.
    pub fn successful_count(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    /// Returns the count of aborted cycles.
    pub fn failed_count(&self) -> usize {
        self.reports.iter().filter(|r| !r.is_success()).count()
    }

    /// Returns the total number of emitted records across watchers.
    pub fn total_emitted(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.stats.emitted)
            .sum()
    }
}
