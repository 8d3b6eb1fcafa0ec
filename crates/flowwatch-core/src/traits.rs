//! Collaborator interfaces consumed by the poller.
//!
//! The transport, the watermark storage and the output channel are injected
//! behind these traits; implementations live in `flowwatch-client`,
//! `flowwatch-db`, [`crate::store`] and the CLI.
//!
//! Uses native async fn in traits (static dispatch, no async_trait macro).

use std::future::Future;

use serde_json::Value;

use crate::error::AppError;
use crate::models::{ChangeRecord, WatermarkState, WatermarkUpdate};

/// Lists workflows and fetches their detail from the remote instance.
pub trait WorkflowSource: Send + Sync {
    /// Raw listing entries, in the order the instance returned them.
    fn list_workflows(&self) -> impl Future<Output = Result<Vec<Value>, AppError>> + Send;

    /// The full record of one workflow.
    fn fetch_workflow(&self, id: &str) -> impl Future<Output = Result<Value, AppError>> + Send;
}

/// Durable watermark storage, partitioned by watcher scope.
pub trait WatermarkStore: Send + Sync {
    /// Current state of `scope`, or defaults if nothing was stored yet.
    fn load(&self, scope: &str) -> impl Future<Output = Result<WatermarkState, AppError>> + Send;

    /// Applies one batch's watermark changes as a unit.
    fn commit(
        &self,
        scope: &str,
        update: &WatermarkUpdate,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Deletes all state of `scope`. Returns `true` if anything was stored.
    fn reset(&self, scope: &str) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Receives each cycle's batch of changes.
pub trait EmissionSink: Send + Sync {
    /// Called once per cycle that found changes; never with an empty batch.
    fn emit(&self, batch: &[ChangeRecord]) -> impl Future<Output = Result<(), AppError>> + Send;
}
