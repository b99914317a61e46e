use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jsonmaker_core::{
    topic_filename, topic_label_from_filename, Manifest, SaveTopicsRequest, TopicSnapshot,
    LEGACY_GRAPH_FILE, MANIFEST_FILE, TOPIC_FILE_EXTENSION,
};
use serde_json::Value;

use crate::{read_json, write_json_atomic};

/// One JSON array per topic plus `manifest.json`, all at the store root.
#[derive(Debug, Clone)]
pub struct TopicStore {
    root: PathBuf,
}

impl TopicStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write every topic file and then the manifest, returning the filenames in request order.
    ///
    /// Topics whose labels sanitize to the same name share one file; the later topic wins and
    /// the filename appears once per topic in the result and the manifest.
    ///
    /// # Errors
    /// Returns [`jsonmaker_core::PersistenceError::InvalidInput`] when `entriesByTopic` is
    /// missing or not an object, or an I/O error when a file cannot be written. Files written
    /// before a failure stay on disk.
    pub fn save(&self, request: &SaveTopicsRequest) -> Result<Vec<String>> {
        let entries_by_topic = request.entries_by_topic()?;

        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create data directory {}", self.root.display()))?;

        let mut saved = Vec::with_capacity(entries_by_topic.len());
        for (label, entries) in entries_by_topic {
            let filename = topic_filename(label);
            write_json_atomic(&self.root.join(&filename), entries)?;
            saved.push(filename);
        }

        let manifest = Manifest {
            current_topic: request.current_topic.clone(),
            order_counters: Some(request.order_counters.clone().unwrap_or_default()),
            topic_meta: Some(request.topic_meta.clone().unwrap_or_default()),
            books_meta: Some(request.books_meta.clone().unwrap_or_default()),
            topics: entries_by_topic.keys().cloned().collect(),
            files: saved.clone(),
        };
        write_json_atomic(&self.root.join(MANIFEST_FILE), &manifest)?;

        tracing::info!(topics = saved.len(), root = %self.root.display(), "saved topic snapshot");
        Ok(saved)
    }

    /// Rebuild the dataset from the topic files and the manifest.
    ///
    /// A missing store yields empty defaults. Unreadable topic files restore as empty
    /// sequences and an unreadable manifest is ignored; both are logged, neither fails.
    ///
    /// # Errors
    /// Returns an error only when the store directory exists but cannot be listed.
    pub fn restore(&self) -> Result<TopicSnapshot> {
        let mut snapshot = TopicSnapshot::default();
        if !self.root.is_dir() {
            return Ok(snapshot);
        }

        for path in self.topic_files()? {
            let Some(stem) = path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
            else {
                continue;
            };
            let entries = match read_json::<Value>(&path) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "topic file unreadable; restoring as empty");
                    Value::Array(Vec::new())
                }
            };
            snapshot.entries_by_topic.insert(topic_label_from_filename(&stem), entries);
        }

        let manifest_path = self.root.join(MANIFEST_FILE);
        if manifest_path.exists() {
            match read_json::<Manifest>(&manifest_path) {
                Ok(manifest) => snapshot.apply_manifest(manifest),
                Err(err) => {
                    tracing::warn!(path = %manifest_path.display(), error = %format!("{err:#}"), "manifest unreadable; using defaults");
                }
            }
        }

        Ok(snapshot)
    }

    fn topic_files(&self) -> Result<Vec<PathBuf>> {
        let listing = fs::read_dir(&self.root)
            .with_context(|| format!("failed to list data directory {}", self.root.display()))?;

        let mut files = Vec::new();
        for entry in listing {
            let entry = entry.with_context(|| {
                format!("failed to read entry in data directory {}", self.root.display())
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(TOPIC_FILE_EXTENSION) {
                continue;
            }
            let name = entry.file_name();
            if name == MANIFEST_FILE || name == LEGACY_GRAPH_FILE {
                continue;
            }
            files.push(path);
        }
        files.sort();
        Ok(files)
    }
}
