//! Cross-turn memory: the port pipes write to and recall from, plus a local store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::llm::Role;

/// One write-once turn in the memory log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: String,
    pub chat_id: String,
    pub message_id: String,
    pub role: Role,
    pub data: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(
        memory_id: impl Into<String>,
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
        role: Role,
        data: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            memory_id: memory_id.into(),
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            role,
            data: data.into(),
            reason,
            created_at: Utc::now(),
        }
    }
}

/// Append log plus similarity recall, keyed by `(memory_id, chat_id)`.
///
/// Implementations must keep concurrent `add` calls for the same key in a
/// consistent order; callers do not serialize writes.
#[async_trait]
pub trait MemoryPort: Send + Sync {
    async fn add(&self, record: MemoryRecord) -> Result<()>;

    async fn search(
        &self,
        query: &str,
        memory_id: &str,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>>;
}

/// Process-local memory store, optionally mirrored to a JSON file.
///
/// Writes go through `write_gate` so the file and the log always agree on
/// order; a record is only committed once the file write succeeded.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<MemoryRecord>>,
    storage_path: Option<PathBuf>,
    write_gate: tokio::sync::Mutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or load a store persisted at `path`. Every `add` rewrites the file.
    pub fn open(path: &Path) -> Result<Self> {
        let records = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read memory file '{}'", path.display()))?;
            serde_json::from_str::<Vec<MemoryRecord>>(&content)
                .with_context(|| format!("invalid memory file '{}'", path.display()))?
        } else {
            Vec::new()
        };
        tracing::debug!(path = %path.display(), records = records.len(), "memory store opened");

        Ok(Self {
            records: Mutex::new(records),
            storage_path: Some(path.to_path_buf()),
            write_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<MemoryRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = &self.storage_path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).context("failed to create memory directory")?;
            }
            std::fs::write(path, "[]")
                .with_context(|| format!("failed to write memory file '{}'", path.display()))?;
        }
        records.clear();
        Ok(())
    }
}

async fn write_records(path: &Path, records: &[MemoryRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("failed to create memory directory")?;
    }
    let json = serde_json::to_string_pretty(records).context("failed to serialize memory")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write memory file '{}'", path.display()))?;
    Ok(())
}

#[async_trait]
impl MemoryPort for InMemoryStore {
    async fn add(&self, record: MemoryRecord) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let mut candidate = self.records();
        candidate.push(record);
        if let Some(path) = &self.storage_path {
            write_records(path, &candidate).await?;
        }
        *self.records.lock().unwrap_or_else(|e| e.into_inner()) = candidate;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        memory_id: &str,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let terms = query_terms(query);
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        let mut scored = records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.memory_id == memory_id && record.chat_id == chat_id)
            .map(|(position, record)| (overlap(&terms, &record.data), position, record))
            .collect::<Vec<_>>();

        // Highest overlap first, newest first among equals.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, _, record)| record.clone())
            .collect())
    }
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .filter(|token| token.len() > 2)
        .collect()
}

fn overlap(terms: &[String], text: &str) -> usize {
    let text = text.to_ascii_lowercase();
    terms
        .iter()
        .filter(|term| text.contains(term.as_str()))
        .count()
}
