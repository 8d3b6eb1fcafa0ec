//! Watermark stores that need no database.
//!
//! [`MemoryWatermarkStore`] keeps state for the lifetime of the process (tests,
//! `--once` dry runs). [`JsonFileWatermarkStore`] keeps every scope in a single
//! JSON document on disk, replaced atomically on each commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::AppError;
use crate::models::{WatermarkState, WatermarkUpdate};
use crate::traits::WatermarkStore;

/// In-process watermark store.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    scopes: Mutex<HashMap<String, WatermarkState>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a scope, replacing whatever was there.
    pub fn with_state(self, scope: &str, state: WatermarkState) -> Self {
        if let Ok(mut scopes) = self.scopes.lock() {
            scopes.insert(scope.to_string(), state);
        }
        self
    }

    fn scopes(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, WatermarkState>>, AppError> {
        self.scopes
            .lock()
            .map_err(|_| AppError::Generic("watermark store lock poisoned".to_string()))
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self, scope: &str) -> Result<WatermarkState, AppError> {
        Ok(self.scopes()?.get(scope).cloned().unwrap_or_default())
    }

    async fn commit(&self, scope: &str, update: &WatermarkUpdate) -> Result<(), AppError> {
        self.scopes()?
            .entry(scope.to_string())
            .or_default()
            .apply(update);
        Ok(())
    }

    async fn reset(&self, scope: &str) -> Result<bool, AppError> {
        Ok(self.scopes()?.remove(scope).is_some())
    }
}

/// Watermark store backed by one JSON file holding all scopes.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous state intact.
#[derive(Debug)]
pub struct JsonFileWatermarkStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    write_lock: AsyncMutex<()>,
}

impl JsonFileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored scope and its state.
    pub async fn load_all(&self) -> Result<HashMap<String, WatermarkState>, AppError> {
        self.read_all().await
    }

    async fn read_all(&self) -> Result<HashMap<String, WatermarkState>, AppError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, scopes: &HashMap<String, WatermarkState>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(scopes)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl WatermarkStore for JsonFileWatermarkStore {
    async fn load(&self, scope: &str) -> Result<WatermarkState, AppError> {
        let mut scopes = self.read_all().await?;
        Ok(scopes.remove(scope).unwrap_or_default())
    }

    async fn commit(&self, scope: &str, update: &WatermarkUpdate) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut scopes = self.read_all().await?;
        scopes
            .entry(scope.to_string())
            .or_default()
            .apply(update);
        self.write_all(&scopes).await
    }

    async fn reset(&self, scope: &str) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;
        let mut scopes = self.read_all().await?;
        let existed = scopes.remove(scope).is_some();
        if existed {
            self.write_all(&scopes).await?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EPOCH_ISO;

    fn update(last_sync: &str, seen: &[(&str, &str)]) -> WatermarkUpdate {
        WatermarkUpdate {
            last_sync: last_sync.to_string(),
            seen: seen
                .iter()
                .map(|(id, ts)| (id.to_string(), ts.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_defaults_and_commit() {
        let store = MemoryWatermarkStore::new();
        let state = store.load("prod").await.unwrap();
        assert_eq!(state.last_sync, EPOCH_ISO);

        store
            .commit("prod", &update("2024-06-01T00:00:00.000Z", &[("1", "2024-05-01T00:00:00Z")]))
            .await
            .unwrap();

        let state = store.load("prod").await.unwrap();
        assert_eq!(state.last_sync, "2024-06-01T00:00:00.000Z");
        assert_eq!(state.seen_at("1"), Some("2024-05-01T00:00:00Z"));

        // scopes are independent
        assert_eq!(store.load("staging").await.unwrap(), WatermarkState::default());
    }

    #[tokio::test]
    async fn test_memory_store_reset() {
        let store = MemoryWatermarkStore::new();
        assert!(!store.reset("prod").await.unwrap());
        store
            .commit("prod", &update("2024-06-01T00:00:00.000Z", &[]))
            .await
            .unwrap();
        assert!(store.reset("prod").await.unwrap());
        assert_eq!(store.load("prod").await.unwrap().last_sync, EPOCH_ISO);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = JsonFileWatermarkStore::new(&path);
        store
            .commit("prod", &update("2024-06-01T00:00:00.000Z", &[("1", "2024-05-01T00:00:00Z")]))
            .await
            .unwrap();
        store
            .commit("prod", &update("2024-06-02T00:00:00.000Z", &[("2", "2024-06-01T12:00:00Z")]))
            .await
            .unwrap();
        drop(store);

        let reopened = JsonFileWatermarkStore::new(&path);
        let state = reopened.load("prod").await.unwrap();
        assert_eq!(state.last_sync, "2024-06-02T00:00:00.000Z");
        assert_eq!(state.seen.len(), 2);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_missing_or_empty_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = JsonFileWatermarkStore::new(&path);
        assert_eq!(store.load("prod").await.unwrap(), WatermarkState::default());

        std::fs::write(&path, "\n").unwrap();
        assert_eq!(store.load("prod").await.unwrap(), WatermarkState::default());
    }

    #[tokio::test]
    async fn test_file_store_scope_without_last_sync_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"prod": {"seenMap": {"1": "2024-05-01T00:00:00Z"}}}"#).unwrap();

        let store = JsonFileWatermarkStore::new(&path);
        let state = store.load("prod").await.unwrap();
        assert_eq!(state.last_sync, EPOCH_ISO);
        assert_eq!(state.seen_at("1"), Some("2024-05-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_file_store_corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileWatermarkStore::new(&path);
        assert!(matches!(
            store.load("prod").await,
            Err(AppError::SerializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_reset_keeps_other_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileWatermarkStore::new(dir.path().join("state.json"));
        store
            .commit("a", &update("2024-06-01T00:00:00.000Z", &[]))
            .await
            .unwrap();
        store
            .commit("b", &update("2024-07-01T00:00:00.000Z", &[]))
            .await
            .unwrap();

        assert!(store.reset("a").await.unwrap());
        assert_eq!(store.load("a").await.unwrap().last_sync, EPOCH_ISO);
        assert_eq!(
            store.load("b").await.unwrap().last_sync,
            "2024-07-01T00:00:00.000Z"
        );
    }
}
