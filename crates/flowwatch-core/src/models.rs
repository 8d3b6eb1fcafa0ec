//! Domain models shared by the poller, the stores and the transports.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// ISO-8601 representation of the Unix epoch, the default watermark.
pub const EPOCH_ISO: &str = "1970-01-01T00:00:00.000Z";

/// Wrapper fields under which a listing may carry its items.
const LISTING_FIELDS: [&str; 3] = ["data", "items", "workflows"];

/// A workflow as reported by the remote listing, normalized for change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    pub id: String,
    pub name: String,
    /// Raw update timestamp; may be missing or malformed upstream.
    pub updated_at: Option<String>,
}

impl CandidateItem {
    /// Normalizes one raw listing entry.
    ///
    /// Returns `None` when the entry has no usable identifier: missing, null,
    /// empty, or neither a string nor a number.
    ///
    /// # Examples
    ///
    /// ```
    /// use flowwatch_core::CandidateItem;
    /// use serde_json::json;
    ///
    /// let item = CandidateItem::from_json(&json!({"id": 7, "updated_at": "2024-01-01T00:00:00Z"})).unwrap();
    /// assert_eq!(item.id, "7");
    /// assert_eq!(item.name, "Workflow 7");
    /// assert_eq!(item.updated_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    ///
    /// assert!(CandidateItem::from_json(&json!({"name": "no id"})).is_none());
    /// ```
    pub fn from_json(raw: &Value) -> Option<Self> {
        let id = match raw.get("id")? {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Workflow {}", id));

        // camelCase first, snake_case as fallback
        let updated_at = ["updatedAt", "updated_at"]
            .iter()
            .find_map(|key| raw.get(*key).and_then(Value::as_str))
            .map(str::to_string);

        Some(Self {
            id,
            name,
            updated_at,
        })
    }
}

/// Splits a listing response into its items and an optional pagination cursor.
///
/// Accepts a bare JSON array, or an object carrying the array under `data`,
/// `items` or `workflows`. A `nextCursor` string on the wrapper is returned
/// as the cursor.
pub fn split_listing(body: Value) -> Result<(Vec<Value>, Option<String>), AppError> {
    match body {
        Value::Array(items) => Ok((items, None)),
        Value::Object(mut map) => {
            let cursor = map
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);

            for field in LISTING_FIELDS {
                if let Some(Value::Array(items)) = map.remove(field) {
                    return Ok((items, cursor));
                }
            }

            Err(AppError::UnexpectedResponse(format!(
                "object without any of {:?}",
                LISTING_FIELDS
            )))
        }
        other => Err(AppError::UnexpectedResponse(format!(
            "expected array or object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One notification emitted for a changed workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub id: String,
    pub name: String,
    pub updated_at: String,
    /// Full workflow detail, only present when enrichment succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Value>,
}

/// Outcome of a best-effort detail fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Enrichment {
    /// The full workflow record.
    Detail(Value),
    /// The fetch failed; the reason is only logged.
    Unavailable(String),
}

impl Enrichment {
    /// Converts a fetch result, keeping the failure reason as text.
    pub fn from_result(result: Result<Value, AppError>) -> Self {
        match result {
            Ok(detail) => Enrichment::Detail(detail),
            Err(e) => Enrichment::Unavailable(e.to_string()),
        }
    }

    /// The detail to attach, if any.
    pub fn into_detail(self) -> Option<Value> {
        match self {
            Enrichment::Detail(detail) => Some(detail),
            Enrichment::Unavailable(_) => None,
        }
    }
}

/// Persisted watermarks of one trigger scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkState {
    /// End of the most recent cycle that emitted something.
    #[serde(default = "epoch")]
    pub last_sync: String,
    /// Workflow id -> `updatedAt` of its last emission.
    #[serde(default, rename = "seenMap")]
    pub seen: HashMap<String, String>,
}

fn epoch() -> String {
    EPOCH_ISO.to_string()
}

impl Default for WatermarkState {
    fn default() -> Self {
        Self {
            last_sync: epoch(),
            seen: HashMap::new(),
        }
    }
}

impl WatermarkState {
    /// The stored `updatedAt` of the last emission for `id`.
    pub fn seen_at(&self, id: &str) -> Option<&str> {
        self.seen.get(id).map(String::as_str)
    }

    /// Applies a committed update in place.
    pub fn apply(&mut self, update: &WatermarkUpdate) {
        self.last_sync = update.last_sync.clone();
        for (id, updated_at) in &update.seen {
            self.seen.insert(id.clone(), updated_at.clone());
        }
    }
}

/// Watermark changes derived from one emitted batch, committed as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkUpdate {
    pub last_sync: String,
    /// `(id, updatedAt)` for every emitted record.
    pub seen: Vec<(String, String)>,
}

impl WatermarkUpdate {
    /// Builds the update for `batch`, stamped with `last_sync`.
    pub fn for_batch(last_sync: String, batch: &[ChangeRecord]) -> Self {
        Self {
            last_sync,
            seen: batch
                .iter()
                .map(|r| (r.id.clone(), r.updated_at.clone()))
                .collect(),
        }
    }
}
