use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jsonmaker_core::{GraphDocument, PersistenceError, SaveGraphRequest, GRAPH_DIR, GRAPH_FILE};

use crate::{read_json, write_json_atomic};

/// Book metadata and the connection map, kept in `graph/graph_data.json` under the data root.
#[derive(Debug, Clone)]
pub struct GraphStore {
    root: PathBuf,
}

impl GraphStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn document_path(&self) -> PathBuf {
        self.root.join(GRAPH_DIR).join(GRAPH_FILE)
    }

    /// Replace the graph document with the request contents.
    ///
    /// # Errors
    /// Returns [`PersistenceError::InvalidInput`] for a malformed request, or an I/O error when
    /// the document cannot be written.
    pub fn save(&self, request: SaveGraphRequest) -> Result<()> {
        let document = request.into_document()?;
        let path = self.document_path();
        ensure_parent(&path)?;
        write_json_atomic(&path, &document)?;

        tracing::info!(
            books = document.books_meta.len(),
            connections = document.graph_connections.len(),
            "saved graph document"
        );
        Ok(())
    }

    /// Load the graph document; an absent document restores as empty.
    ///
    /// Unlike topic restore, a document that exists but cannot be read is an error.
    ///
    /// # Errors
    /// Returns [`PersistenceError::Internal`] when the document cannot be read or parsed.
    pub fn restore(&self) -> Result<GraphDocument> {
        let path = self.document_path();
        if !path.exists() {
            return Ok(GraphDocument::default());
        }

        read_json::<GraphDocument>(&path).map_err(|err| {
            tracing::error!(path = %path.display(), error = %format!("{err:#}"), "graph document unreadable");
            PersistenceError::Internal(format!("failed to load graph data: {err:#}")).into()
        })
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create graph directory {}", parent.display()))?;
    }
    Ok(())
}
