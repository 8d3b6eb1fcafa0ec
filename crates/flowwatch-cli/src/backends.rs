//! Store and sink selection for the CLI.
//!
//! The core traits use static dispatch, so the runtime choice between
//! backends is an enum that forwards to the selected implementation.

use std::io::Write;
use std::path::PathBuf;

use flowwatch_client::WebhookSink;
use flowwatch_core::error::AppError;
use flowwatch_core::models::{ChangeRecord, WatermarkState, WatermarkUpdate};
use flowwatch_core::sync::format_timestamp;
use flowwatch_core::traits::{EmissionSink, WatermarkStore};
use flowwatch_core::JsonFileWatermarkStore;
use flowwatch_db::WatermarkRepository;

/// Watermark backend chosen at startup.
pub enum AnyStore {
    File(JsonFileWatermarkStore),
    Postgres(WatermarkRepository),
}

/// One line of `flowwatch status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLine {
    pub scope: String,
    pub last_sync: String,
    pub seen: usize,
}

impl AnyStore {
    pub fn describe(&self) -> String {
        match self {
            AnyStore::File(store) => format!("state file {}", store.path().display()),
            AnyStore::Postgres(_) => "PostgreSQL".to_string(),
        }
    }

    /// Every stored scope, sorted by name.
    pub async fn list_scopes(&self) -> Result<Vec<ScopeLine>, AppError> {
        let mut lines: Vec<ScopeLine> = match self {
            AnyStore::File(store) => store
                .load_all()
                .await?
                .into_iter()
                .map(|(scope, state)| ScopeLine {
                    scope,
                    last_sync: state.last_sync,
                    seen: state.seen.len(),
                })
                .collect(),
            AnyStore::Postgres(repo) => repo
                .list_scopes()
                .await?
                .into_iter()
                .map(|s| ScopeLine {
                    scope: s.scope,
                    last_sync: format_timestamp(s.last_sync),
                    seen: usize::try_from(s.seen_count).unwrap_or_default(),
                })
                .collect(),
        };
        lines.sort_by(|a, b| a.scope.cmp(&b.scope));
        Ok(lines)
    }
}

impl WatermarkStore for AnyStore {
    async fn load(&self, scope: &str) -> Result<WatermarkState, AppError> {
        match self {
            AnyStore::File(store) => store.load(scope).await,
            AnyStore::Postgres(repo) => repo.load(scope).await,
        }
    }

    async fn commit(&self, scope: &str, update: &WatermarkUpdate) -> Result<(), AppError> {
        match self {
            AnyStore::File(store) => store.commit(scope, update).await,
            AnyStore::Postgres(repo) => repo.commit(scope, update).await,
        }
    }

    async fn reset(&self, scope: &str) -> Result<bool, AppError> {
        match self {
            AnyStore::File(store) => store.reset(scope).await,
            AnyStore::Postgres(repo) => repo.reset(scope).await,
        }
    }
}

/// Output channel chosen at startup.
pub enum AnySink {
    Stdout(StdoutSink),
    Webhook(WebhookSink),
}

impl EmissionSink for AnySink {
    async fn emit(&self, batch: &[ChangeRecord]) -> Result<(), AppError> {
        match self {
            AnySink::Stdout(sink) => sink.emit(batch).await,
            AnySink::Webhook(sink) => sink.emit(batch).await,
        }
    }
}

/// Writes each record as one JSON line on stdout.
///
/// Logs go to stderr, so stdout stays machine-readable.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl StdoutSink {
    /// Renders a batch as JSON lines.
    pub fn render(batch: &[ChangeRecord]) -> Result<String, AppError> {
        let mut out = String::new();
        for record in batch {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl EmissionSink for StdoutSink {
    async fn emit(&self, batch: &[ChangeRecord]) -> Result<(), AppError> {
        let rendered = Self::render(batch)?;
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(rendered.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|e| AppError::EmissionError(format!("stdout: {}", e)))
    }
}

/// Picks the state file: explicit path, else the platform data dir.
pub fn state_file_path(explicit: Option<PathBuf>) -> Result<PathBuf, AppError> {
    explicit
        .or_else(flowwatch_core::default_state_path)
        .ok_or_else(|| {
            AppError::InvalidConfig(
                "no data directory on this platform; pass --state-file".to_string(),
            )
        })
}
