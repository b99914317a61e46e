//! Filesystem-backed stores for topic data, graph data and backup archives.
//!
//! Every document is written through [`write_json_atomic`]: the bytes land in a
//! temporary file next to the target and are renamed over it, so readers never
//! observe a half-written document. A multi-file topic save is still not atomic
//! as a whole.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

mod backup;
mod graph;
mod topic;

pub use backup::{BackupEngine, BackupOutcome, LedgerFile};
pub use graph::GraphStore;
pub use topic::TopicStore;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse JSON document {}", path.display()))
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("missing parent directory for {}", path.display()))?;
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;

    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    temp.write_all(&bytes)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;
    temp.persist(path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
