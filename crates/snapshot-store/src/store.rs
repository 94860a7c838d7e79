use crate::error::StoreError;
use crate::snapshot::{OverrideMap, ServiceSnapshot};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Per-service persistence for the contract-test engine.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns `None` when nothing has been saved for the service yet.
    async fn load_snapshot(&self, service_id: &str) -> Result<Option<ServiceSnapshot>, StoreError>;

    async fn save_snapshot(
        &self,
        service_id: &str,
        snapshot: &ServiceSnapshot,
    ) -> Result<(), StoreError>;

    /// Returns an empty map when no overrides have been saved.
    async fn load_overrides(&self, service_id: &str) -> Result<OverrideMap, StoreError>;

    async fn save_overrides(&self, service_id: &str, overrides: &OverrideMap)
    -> Result<(), StoreError>;
}

/// Stores each document as `<dir>/<kind>-<service>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write never leaves a truncated snapshot behind.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, kind: &str, service_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.json", kind, sanitize_key(service_id)))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(path, source)),
        }
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Maps a service id onto a safe file-name fragment.
///
/// Bytes outside `[A-Za-z0-9_-]` become `%XX`, so distinct ids never share
/// a file.
fn sanitize_key(service_id: &str) -> String {
    let mut key = String::with_capacity(service_id.len());
    for byte in service_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            key.push(byte as char);
        } else {
            key.push_str(&format!("%{:02X}", byte));
        }
    }
    key
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load_snapshot(&self, service_id: &str) -> Result<Option<ServiceSnapshot>, StoreError> {
        self.read_json(&self.path_for("contract-tests", service_id))
            .await
    }

    async fn save_snapshot(
        &self,
        service_id: &str,
        snapshot: &ServiceSnapshot,
    ) -> Result<(), StoreError> {
        let path = self.path_for("contract-tests", service_id);
        self.write_json(&path, snapshot).await?;
        tracing::debug!(service = service_id, path = %path.display(), "Snapshot saved.");
        Ok(())
    }

    async fn load_overrides(&self, service_id: &str) -> Result<OverrideMap, StoreError> {
        Ok(self
            .read_json(&self.path_for("contract-overrides", service_id))
            .await?
            .unwrap_or_default())
    }

    async fn save_overrides(
        &self,
        service_id: &str,
        overrides: &OverrideMap,
    ) -> Result<(), StoreError> {
        self.write_json(&self.path_for("contract-overrides", service_id), overrides)
            .await
    }
}

/// Keeps everything in memory; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, ServiceSnapshot>>,
    overrides: Mutex<HashMap<String, OverrideMap>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load_snapshot(&self, service_id: &str) -> Result<Option<ServiceSnapshot>, StoreError> {
        Ok(self.snapshots.lock().await.get(service_id).cloned())
    }

    async fn save_snapshot(
        &self,
        service_id: &str,
        snapshot: &ServiceSnapshot,
    ) -> Result<(), StoreError> {
        self.snapshots
            .lock()
            .await
            .insert(service_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load_overrides(&self, service_id: &str) -> Result<OverrideMap, StoreError> {
        Ok(self
            .overrides
            .lock()
            .await
            .get(service_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_overrides(
        &self,
        service_id: &str,
        overrides: &OverrideMap,
    ) -> Result<(), StoreError> {
        self.overrides
            .lock()
            .await
            .insert(service_id.to_string(), overrides.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{ContractTestResult, ContractTestSpec, SpecOverride, TestStatus};
    use std::collections::BTreeMap;

    fn sample_snapshot() -> ServiceSnapshot {
        let spec = ContractTestSpec::new("quotes", "Quotes", "/quotes");
        let mut result = ContractTestResult::new(&spec, TestStatus::Pass, 1_700_000_000_000);
        result.http_status = Some(200);
        result.latency_ms = Some(35);
        ServiceSnapshot {
            results: vec![result],
            history: BTreeMap::from([("quotes".to_string(), vec![35, 40, 38])]),
        }
    }

    #[tokio::test]
    async fn file_store_round_trips_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("nested"));

        assert_eq!(store.load_snapshot("market-data").await.unwrap(), None);

        let snapshot = sample_snapshot();
        store.save_snapshot("market-data", &snapshot).await.unwrap();
        assert_eq!(
            store.load_snapshot("market-data").await.unwrap(),
            Some(snapshot)
        );
        assert!(
            dir.path()
                .join("nested/contract-tests-market-data.json")
                .exists()
        );
    }

    #[tokio::test]
    async fn file_store_persists_camel_case_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store
            .save_snapshot("svc", &sample_snapshot())
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("contract-tests-svc.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["results"][0]["latencyMs"], 35);
        assert_eq!(json["history"]["quotes"][2], 38);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("contract-tests-svc.json"), b"{not json").unwrap();
        let store = FileSnapshotStore::new(dir.path());

        let err = store.load_snapshot("svc").await.unwrap_err();
        assert!(matches!(err, StoreError::JsonError(_)));
    }

    #[tokio::test]
    async fn overrides_round_trip_and_default_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        assert!(store.load_overrides("svc").await.unwrap().is_empty());

        let overrides = OverrideMap::from([(
            "quotes".to_string(),
            SpecOverride {
                hard_latency_budget_ms: Some(900),
                ..SpecOverride::default()
            },
        )]);
        store.save_overrides("svc", &overrides).await.unwrap();

        let raw =
            std::fs::read_to_string(dir.path().join("contract-overrides-svc.json")).unwrap();
        assert_eq!(raw, r#"{"quotes":{"hardLatencyBudgetMs":900}}"#);
        assert_eq!(store.load_overrides("svc").await.unwrap(), overrides);
    }

    #[test]
    fn service_ids_are_sanitized_for_file_names() {
        assert_eq!(sanitize_key("fks_api"), "fks_api");
        assert_eq!(sanitize_key("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(sanitize_key("fks.api"), "fks%2Eapi");
        assert_ne!(sanitize_key("fks.api"), sanitize_key("fks_api"));
    }

    #[tokio::test]
    async fn similar_service_ids_keep_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let snapshot = |latency: u64| ServiceSnapshot {
            results: Vec::new(),
            history: BTreeMap::from([("health".to_string(), vec![latency])]),
        };

        store.save_snapshot("fks.api", &snapshot(10)).await.unwrap();
        store.save_snapshot("fks_api", &snapshot(20)).await.unwrap();

        let dotted = store.load_snapshot("fks.api").await.unwrap().unwrap();
        let underscored = store.load_snapshot("fks_api").await.unwrap().unwrap();
        assert_eq!(dotted.history["health"], vec![10]);
        assert_eq!(underscored.history["health"], vec![20]);
    }

    #[tokio::test]
    async fn memory_store_is_keyed_by_service() {
        let store = MemorySnapshotStore::new();
        store.save_snapshot("a", &sample_snapshot()).await.unwrap();
        assert!(store.load_snapshot("a").await.unwrap().is_some());
        assert!(store.load_snapshot("b").await.unwrap().is_none());
    }
}
