use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;
use unicode_normalization::char::is_combining_mark;

pub const TOPIC_FILE_EXTENSION: &str = "json";
pub const FALLBACK_TOPIC_NAME: &str = "topic";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const GRAPH_DIR: &str = "graph";
pub const GRAPH_FILE: &str = "graph_data.json";
/// Older deployments kept the graph document next to the topic files; restore must skip it.
pub const LEGACY_GRAPH_FILE: &str = "graph_data.json";
pub const LEDGER_FILE: &str = "backup_metadata.json";
pub const BACKUP_FILE_PREFIX: &str = "backup_";
pub const BACKUP_ARCHIVE_EXTENSION: &str = "zip";
pub const BACKUP_COOLDOWN_SECONDS: f64 = 60.0;
pub const BACKUP_RETENTION: usize = 5;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PersistenceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backup cooldown active; retry in {remaining_seconds} seconds")]
    RateLimited { remaining_seconds: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl PersistenceError {
    /// Stable machine-readable code for transport layers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Map a topic label onto a filesystem-safe base name.
///
/// Keeps alphanumerics, `-`, `_` and spaces, trims the result and turns the
/// remaining spaces into `_`. Combining marks are not alphanumeric here, so
/// vowel signs and diacritics stored as separate code points are dropped. Distinct labels can collapse onto the same name
/// (`"A/B"` and `"A?B"` both become `"AB"`); callers writing a batch accept
/// that the later topic overwrites the earlier one.
#[must_use]
pub fn sanitize_topic_filename(label: &str) -> String {
    let kept: String = label
        .chars()
        .filter(|&c| {
            (c.is_alphanumeric() && !is_combining_mark(c)) || matches!(c, '-' | '_' | ' ')
        })
        .collect();
    let safe = kept.trim().replace(' ', "_");
    if safe.is_empty() {
        FALLBACK_TOPIC_NAME.to_string()
    } else {
        safe
    }
}

#[must_use]
pub fn topic_filename(label: &str) -> String {
    format!("{}.{TOPIC_FILE_EXTENSION}", sanitize_topic_filename(label))
}

/// Best-effort inverse of [`sanitize_topic_filename`].
///
/// Labels that originally contained `_` come back with spaces instead.
#[must_use]
pub fn topic_label_from_filename(stem: &str) -> String {
    stem.replace('_', " ")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaveTopicsRequest {
    #[serde(default)]
    pub entries_by_topic: Option<Value>,
    #[serde(default)]
    pub current_topic: Option<String>,
    #[serde(default)]
    pub order_counters: Option<Map<String, Value>>,
    #[serde(default)]
    pub topic_meta: Option<Map<String, Value>>,
    #[serde(default)]
    pub books_meta: Option<Map<String, Value>>,
}

impl SaveTopicsRequest {
    /// Borrow the topic mapping, rejecting bodies without one.
    ///
    /// # Errors
    /// Returns [`PersistenceError::InvalidInput`] when `entriesByTopic` is absent or not an object.
    pub fn entries_by_topic(&self) -> Result<&Map<String, Value>, PersistenceError> {
        match &self.entries_by_topic {
            Some(Value::Object(map)) => Ok(map),
            _ => Err(PersistenceError::InvalidInput(
                "entriesByTopic is required and must be an object".to_string(),
            )),
        }
    }
}

/// Summary of the last full topic save, stored as `manifest.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub current_topic: Option<String>,
    #[serde(default)]
    pub order_counters: Option<Map<String, Value>>,
    #[serde(default)]
    pub topic_meta: Option<Map<String, Value>>,
    #[serde(default)]
    pub books_meta: Option<Map<String, Value>>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopicSnapshot {
    pub entries_by_topic: Map<String, Value>,
    pub order_counters: Map<String, Value>,
    pub current_topic: Option<String>,
    pub topic_meta: Map<String, Value>,
    pub books_meta: Map<String, Value>,
}

impl TopicSnapshot {
    pub fn apply_manifest(&mut self, manifest: Manifest) {
        self.current_topic = manifest.current_topic;
        self.order_counters = manifest.order_counters.unwrap_or_default();
        self.topic_meta = manifest.topic_meta.unwrap_or_default();
        self.books_meta = manifest.books_meta.unwrap_or_default();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaveGraphRequest {
    #[serde(default)]
    pub books_meta: Option<Value>,
    #[serde(default)]
    pub graph_connections: Option<Value>,
}

impl SaveGraphRequest {
    /// Validate the request into the document that gets written.
    ///
    /// # Errors
    /// Returns [`PersistenceError::InvalidInput`] when `booksMeta` is not an object, or when
    /// `graphConnections` is present and not an object.
    pub fn into_document(self) -> Result<GraphDocument, PersistenceError> {
        let Some(Value::Object(books_meta)) = self.books_meta else {
            return Err(PersistenceError::InvalidInput(
                "booksMeta is required and must be an object".to_string(),
            ));
        };
        let graph_connections = match self.graph_connections {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(connections)) => connections,
            Some(_) => {
                return Err(PersistenceError::InvalidInput(
                    "graphConnections must be an object".to_string(),
                ))
            }
        };
        Ok(GraphDocument { books_meta, graph_connections })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    #[serde(default)]
    pub books_meta: Map<String, Value>,
    #[serde(default)]
    pub graph_connections: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRecord {
    pub filename: String,
    pub timestamp: f64,
    pub timestamp_str: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackupLedger {
    #[serde(default)]
    pub backups: Vec<BackupRecord>,
    #[serde(default)]
    pub last_backup_time: f64,
}

impl BackupLedger {
    /// Seconds left before another backup may run, or `None` when the cooldown has passed.
    ///
    /// The value is truncated to whole seconds but never reported below 1.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn cooldown_remaining(&self, now: f64) -> Option<u64> {
        let elapsed = now - self.last_backup_time;
        if elapsed < BACKUP_COOLDOWN_SECONDS {
            Some((BACKUP_COOLDOWN_SECONDS - elapsed).trunc().max(1.0) as u64)
        } else {
            None
        }
    }

    pub fn record(&mut self, record: BackupRecord) {
        self.last_backup_time = record.timestamp;
        self.backups.push(record);
    }

    /// Sort newest-first, keep `retain` records and hand back the ones dropped.
    pub fn prune(&mut self, retain: usize) -> Vec<BackupRecord> {
        self.backups.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        if self.backups.len() > retain {
            self.backups.split_off(retain)
        } else {
            Vec::new()
        }
    }
}

/// Seconds since the Unix epoch with sub-second precision.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn epoch_seconds(at: OffsetDateTime) -> f64 {
    at.unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

/// Archive filename for a backup taken at `at`, e.g. `backup_2024-05-01_13-45-09.zip`.
///
/// # Errors
/// Returns [`PersistenceError::Internal`] when the timestamp cannot be formatted.
pub fn backup_filename(at: OffsetDateTime) -> Result<String, PersistenceError> {
    let stamp = at
        .format(format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]"))
        .map_err(|err| PersistenceError::Internal(format!("failed to format timestamp: {err}")))?;
    Ok(format!("{BACKUP_FILE_PREFIX}{stamp}.{BACKUP_ARCHIVE_EXTENSION}"))
}

/// Human-readable form stored in the ledger and returned to callers.
///
/// # Errors
/// Returns [`PersistenceError::Internal`] when the timestamp cannot be formatted.
pub fn display_timestamp(at: OffsetDateTime) -> Result<String, PersistenceError> {
    at.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .map_err(|err| PersistenceError::Internal(format!("failed to format timestamp: {err}")))
}
