//! Watermark repository for PostgreSQL.
//!
//! Two tables hold the state of every watcher scope:
//!
//! - `watermark_sync` - one row per scope with its `last_sync`
//! - `watermark_seen` - one row per `(scope, workflow_id)` with the last
//!   emitted `updatedAt`, kept verbatim as text
//!
//! # Testing
//!
//! TODO: Add integration tests for `commit()` and `reset()` against a real
//! PostgreSQL instance (testcontainers-rs); current tests only cover the
//! row conversions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use flowwatch_core::error::AppError;
use flowwatch_core::models::{WatermarkState, WatermarkUpdate};
use flowwatch_core::sync::{format_timestamp, parse_timestamp};
use flowwatch_core::traits::WatermarkStore;
use sqlx::{PgPool, Pool, Postgres};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS watermark_sync (
    scope       TEXT PRIMARY KEY,
    last_sync   TIMESTAMPTZ NOT NULL,
    changed_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS watermark_seen (
    scope       TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    emitted_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (scope, workflow_id)
);
"#;

/// Repository for watermark persistence in PostgreSQL.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use flowwatch_db::WatermarkRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/flowwatch")
///     .await?;
///
/// let repo = WatermarkRepository::new(pool);
/// repo.ensure_schema().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WatermarkRepository {
    pool: Pool<Postgres>,
}

impl WatermarkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the watermark tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    /// Lists every scope that has a stored `last_sync`, with its seen count.
    pub async fn list_scopes(&self) -> Result<Vec<ScopeSummary>, AppError> {
        let rows: Vec<ScopeSummary> = sqlx::query_as(
            r#"
            SELECT s.scope, s.last_sync, COUNT(w.workflow_id) AS seen_count
            FROM watermark_sync s
            LEFT JOIN watermark_seen w ON w.scope = s.scope
            GROUP BY s.scope, s.last_sync
            ORDER BY s.scope
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(rows)
    }
}

impl WatermarkStore for WatermarkRepository {
    async fn load(&self, scope: &str) -> Result<WatermarkState, AppError> {
        let last_sync: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT last_sync FROM watermark_sync WHERE scope = $1")
                .bind(scope)
                .fetch_optional(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;

        let rows: Vec<SeenRow> = sqlx::query_as(
            r#"
            SELECT workflow_id, updated_at
            FROM watermark_seen
            WHERE scope = $1
            "#,
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(state_from_rows(last_sync.map(|r| r.0), rows))
    }

    /// Writes `last_sync` and all seen entries in one transaction.
    ///
    /// `last_sync` only moves forward (`GREATEST`), seen entries are upserted.
    async fn commit(&self, scope: &str, update: &WatermarkUpdate) -> Result<(), AppError> {
        let last_sync = parse_timestamp(&update.last_sync).ok_or_else(|| {
            AppError::Generic(format!("unparseable last_sync: {}", update.last_sync))
        })?;
        let (ids, timestamps) = seen_columns(update);

        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        sqlx::query(
            r#"
            INSERT INTO watermark_sync (scope, last_sync, changed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (scope)
            DO UPDATE SET
                last_sync = GREATEST(watermark_sync.last_sync, EXCLUDED.last_sync),
                changed_at = NOW()
            "#,
        )
        .bind(scope)
        .bind(last_sync)
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        if !ids.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO watermark_seen (scope, workflow_id, updated_at, emitted_at)
                SELECT $1, id, ts, NOW()
                FROM UNNEST($2::text[], $3::text[]) AS t(id, ts)
                ON CONFLICT (scope, workflow_id)
                DO UPDATE SET
                    updated_at = EXCLUDED.updated_at,
                    emitted_at = NOW()
                "#,
            )
            .bind(scope)
            .bind(&ids)
            .bind(&timestamps)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;
        }

        tx.commit().await.map_err(AppError::DatabaseError)?;
        debug!(scope, seen = ids.len(), "watermarks committed");
        Ok(())
    }

    async fn reset(&self, scope: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        let sync = sqlx::query("DELETE FROM watermark_sync WHERE scope = $1")
            .bind(scope)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;
        let seen = sqlx::query("DELETE FROM watermark_seen WHERE scope = $1")
            .bind(scope)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        tx.commit().await.map_err(AppError::DatabaseError)?;
        Ok(sync.rows_affected() + seen.rows_affected() > 0)
    }
}

/// One scope as listed by [`WatermarkRepository::list_scopes`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScopeSummary {
    pub scope: String,
    pub last_sync: DateTime<Utc>,
    pub seen_count: i64,
}

/// Helper struct for deserializing seen-map rows
#[derive(sqlx::FromRow)]
struct SeenRow {
    workflow_id: String,
    updated_at: String,
}

fn state_from_rows(last_sync: Option<DateTime<Utc>>, rows: Vec<SeenRow>) -> WatermarkState {
    let mut state = WatermarkState::default();
    if let Some(ts) = last_sync {
        state.last_sync = format_timestamp(ts);
    }
    state.seen = rows
        .into_iter()
        .map(|row| (row.workflow_id, row.updated_at))
        .collect::<HashMap<_, _>>();
    state
}

fn seen_columns(update: &WatermarkUpdate) -> (Vec<String>, Vec<String>) {
    update.seen.iter().cloned().unzip()
}
