use std::path::{Path, PathBuf};

use jsonmaker_core::{
    BackupLedger, PersistenceError, SaveGraphRequest, SaveTopicsRequest, TopicSnapshot,
};
use jsonmaker_store_fs::{BackupEngine, GraphStore, TopicStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

pub use jsonmaker_core::PersistenceError as ApiError;

pub const API_CONTRACT_VERSION: &str = "api.v1";

pub type ApiResult<T> = Result<T, PersistenceError>;

/// Root directories shared by every store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub data_dir: PathBuf,
    pub backups_dir: PathBuf,
}

impl StorageLayout {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, backups_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), backups_dir: backups_dir.into() }
    }

    /// `json_data/` and `backups/` side by side under `base`.
    #[must_use]
    pub fn under(base: &Path) -> Self {
        Self::new(base.join("json_data"), base.join("backups"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveTopicsResponse {
    pub status: String,
    pub saved: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveGraphResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphResponse {
    pub books_meta: Map<String, Value>,
    pub graph_connections: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateBackupResponse {
    pub status: String,
    pub message: String,
    pub filename: String,
    pub timestamp: String,
    pub backups_count: usize,
}

#[derive(Debug, Clone)]
pub struct JsonMakerApi {
    topics: TopicStore,
    graph: GraphStore,
    backups: BackupEngine,
}

impl JsonMakerApi {
    #[must_use]
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            topics: TopicStore::new(&layout.data_dir),
            graph: GraphStore::new(&layout.data_dir),
            backups: BackupEngine::new(&layout.data_dir, &layout.backups_dir),
        }
    }

    /// Persist every topic plus the manifest.
    ///
    /// # Errors
    /// `InvalidInput` when `entriesByTopic` is missing or not an object, `Internal` on I/O failure.
    pub fn save_topics(&self, request: &SaveTopicsRequest) -> ApiResult<SaveTopicsResponse> {
        let saved = self.topics.save(request).map_err(classify)?;
        Ok(SaveTopicsResponse { status: "ok".to_string(), saved })
    }

    /// # Errors
    /// `Internal` when the data directory exists but cannot be listed.
    pub fn restore_topics(&self) -> ApiResult<TopicSnapshot> {
        self.topics.restore().map_err(classify)
    }

    /// # Errors
    /// `InvalidInput` for a malformed request, `Internal` on I/O failure.
    pub fn save_graph(&self, request: SaveGraphRequest) -> ApiResult<SaveGraphResponse> {
        self.graph.save(request).map_err(classify)?;
        Ok(SaveGraphResponse {
            status: "ok".to_string(),
            message: "Graph data saved successfully".to_string(),
        })
    }

    /// # Errors
    /// `Internal` when a stored graph document cannot be read or parsed.
    pub fn restore_graph(&self) -> ApiResult<GraphResponse> {
        let document = self.graph.restore().map_err(classify)?;
        Ok(GraphResponse {
            books_meta: document.books_meta,
            graph_connections: document.graph_connections,
        })
    }

    /// # Errors
    /// `RateLimited`, `NotFound` or `Internal`; see [`BackupEngine::create_backup_at`].
    pub fn create_backup(&self) -> ApiResult<CreateBackupResponse> {
        self.create_backup_at(OffsetDateTime::now_utc())
    }

    /// # Errors
    /// Same as [`JsonMakerApi::create_backup`].
    pub fn create_backup_at(&self, now: OffsetDateTime) -> ApiResult<CreateBackupResponse> {
        let outcome = self.backups.create_backup_at(now).map_err(classify)?;
        Ok(CreateBackupResponse {
            status: "ok".to_string(),
            message: "Backup created successfully".to_string(),
            filename: outcome.filename,
            timestamp: outcome.timestamp,
            backups_count: outcome.backups_count,
        })
    }

    #[must_use]
    pub fn list_backups(&self) -> BackupLedger {
        self.backups.list()
    }
}

/// Recover the typed failure raised by a store, or treat the error as internal.
#[must_use]
pub fn classify(err: anyhow::Error) -> PersistenceError {
    match err.downcast::<PersistenceError>() {
        Ok(typed) => typed,
        Err(other) => {
            tracing::error!(error = %format!("{other:#}"), "storage operation failed");
            PersistenceError::Internal(format!("{other:#}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context, Result};
    use serde_json::json;
    use tempfile::TempDir;
    use time::macros::datetime;
    use time::Duration;

    fn api_in(dir: &TempDir) -> JsonMakerApi {
        JsonMakerApi::new(&StorageLayout::under(dir.path()))
    }

    #[test]
    fn classify_keeps_typed_errors_and_wraps_the_rest() {
        let typed = anyhow::Error::new(PersistenceError::NotFound("x".to_string()));
        assert_eq!(classify(typed), PersistenceError::NotFound("x".to_string()));

        let wrapped: Result<()> = Err(anyhow!("disk full")).context("failed to write topic");
        let Err(err) = wrapped else { panic!("fixture must be an error") };
        match classify(err) {
            PersistenceError::Internal(message) => {
                assert!(message.contains("failed to write topic"));
                assert!(message.contains("disk full"));
            }
            other => panic!("expected internal error, got {other:?}"),
        }
    }

    #[test]
    fn topic_and_graph_flows_are_independent() -> Result<()> {
        let dir = TempDir::new()?;
        let api = api_in(&dir);

        let saved = api.save_topics(&SaveTopicsRequest {
            entries_by_topic: Some(json!({"Topic A": [{"id": "a"}]})),
            books_meta: Some(
                json!({"Topic A": {"id": "b1", "name": "Book"}})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            ),
            ..Default::default()
        })?;
        assert_eq!(saved.status, "ok");
        assert_eq!(saved.saved, vec!["Topic_A.json"]);

        let graph = api.restore_graph()?;
        assert!(graph.books_meta.is_empty(), "graph store must not mirror the manifest");

        api.save_graph(SaveGraphRequest {
            books_meta: Some(json!({"b1": {"id": "doc1"}})),
            graph_connections: Some(json!({"doc1": [{"to": "doc2"}]})),
        })?;
        let graph = api.restore_graph()?;
        assert_eq!(
            serde_json::to_value(&graph)?,
            json!({"booksMeta": {"b1": {"id": "doc1"}}, "graphConnections": {"doc1": [{"to": "doc2"}]}})
        );

        let snapshot = api.restore_topics()?;
        assert_eq!(snapshot.books_meta.get("Topic A"), Some(&json!({"id": "b1", "name": "Book"})));
        assert_eq!(snapshot.entries_by_topic.len(), 1, "graph files are not topics");
        Ok(())
    }

    #[test]
    fn backup_flow_maps_engine_failures() -> Result<()> {
        let dir = TempDir::new()?;
        let api = api_in(&dir);
        let t0 = datetime!(2024-05-01 08:00:00 UTC);

        assert!(matches!(api.create_backup_at(t0), Err(PersistenceError::NotFound(_))));

        api.save_topics(&SaveTopicsRequest {
            entries_by_topic: Some(json!({"Topic": []})),
            ..Default::default()
        })?;
        let created = api.create_backup_at(t0)?;
        assert_eq!(created.status, "ok");
        assert_eq!(created.backups_count, 1);

        match api.create_backup_at(t0 + Duration::seconds(10)) {
            Err(PersistenceError::RateLimited { remaining_seconds }) => {
                assert_eq!(remaining_seconds, 50);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        let listed = api.list_backups();
        assert_eq!(listed.backups.len(), 1);
        assert_eq!(listed.backups[0].filename, created.filename);
        Ok(())
    }
}
