//! In-process collection with an optional append-only log on disk
//!
//! The log is JSON lines: a header naming the collection spec, then one line
//! per write batch. A batch is a single line, so a crash leaves either the
//! whole batch or a torn tail that replay ignores. Opening replays the log
//! and compacts it to one batch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{AgentError, Result};
use crate::storage::{append_line, read_lines, rewrite_lines};
use crate::vector::{
    insertion_stamp, rank_order, similarity, CollectionSpec, DocumentStatus, MetadataFilter,
    RecreateGuard, ScoredRecord, VectorCollection, VectorRecord,
};

type Records = HashMap<String, StoredRecord>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    record: VectorRecord,
    inserted_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogEntry {
    Header {
        spec: CollectionSpec,
    },
    Batch {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        upserts: Vec<StoredRecord>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        deletes: Vec<String>,
    },
}

/// Exact-search collection held in memory.
///
/// With a log path, every successful write is on disk before the call
/// returns. Writes run on the blocking pool and own the write lock until they
/// finish, so a cancelled caller never leaves memory and disk apart.
pub struct LocalCollection {
    spec: CollectionSpec,
    records: Arc<RwLock<Records>>,
    log: Option<PathBuf>,
}

impl LocalCollection {
    /// Volatile collection
    pub fn in_memory(spec: CollectionSpec) -> Result<Self> {
        validate_spec(&spec)?;
        Ok(Self {
            spec,
            records: Arc::new(RwLock::new(HashMap::new())),
            log: None,
        })
    }

    /// Durable collection backed by the log at `path`, created if absent
    pub fn open(spec: CollectionSpec, path: impl Into<PathBuf>) -> Result<Self> {
        validate_spec(&spec)?;
        let path = path.into();

        let mut records = HashMap::new();
        if path.exists() {
            let mut entries = read_lines::<LogEntry>(&path)?.into_iter();
            match entries.next() {
                None => {}
                Some(LogEntry::Header { spec: stored }) => check_stored_spec(&spec, &stored)?,
                Some(LogEntry::Batch { .. }) => {
                    return Err(AgentError::config(format!(
                        "{} does not start with a collection header",
                        path.display()
                    )))
                }
            }
            for entry in entries {
                if let LogEntry::Batch { upserts, deletes } = entry {
                    apply(&mut records, upserts, deletes);
                }
            }
        }

        rewrite_lines(&path, &compacted(&spec, &records))?;
        tracing::debug!(collection = %spec.name, records = records.len(), path = %path.display(), "opened local collection");

        Ok(Self {
            spec,
            records: Arc::new(RwLock::new(records)),
            log: Some(path),
        })
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_deref()
    }

    /// Run `write` on the blocking pool with exclusive access to the records
    async fn write<T, F>(&self, write: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Records, Option<&Path>) -> Result<T> + Send + 'static,
    {
        let mut records = self.records.clone().write_owned().await;
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || write(&mut *records, log.as_deref()))
            .await
            .map_err(|e| AgentError::Generic(format!("collection write task failed: {}", e)))?
    }
}

fn validate_spec(spec: &CollectionSpec) -> Result<()> {
    if spec.dimension == 0 {
        return Err(AgentError::config(format!(
            "collection {} must have a non-zero dimension",
            spec.name
        )));
    }
    Ok(())
}

fn check_stored_spec(spec: &CollectionSpec, stored: &CollectionSpec) -> Result<()> {
    if stored.dimension != spec.dimension || stored.model != spec.model {
        return Err(AgentError::ConfigError(format!(
            "collection {} on disk holds {}-dimensional {} vectors, configured {}-dimensional {}",
            spec.name, stored.dimension, stored.model, spec.dimension, spec.model
        )));
    }
    Ok(())
}

fn apply(records: &mut Records, upserts: Vec<StoredRecord>, deletes: Vec<String>) {
    for id in deletes {
        records.remove(&id);
    }
    for stored in upserts {
        records.insert(stored.record.id.clone(), stored);
    }
}

fn compacted(spec: &CollectionSpec, records: &Records) -> Vec<LogEntry> {
    let mut upserts: Vec<StoredRecord> = records.values().cloned().collect();
    upserts.sort_by_key(|r| r.inserted_at);

    let mut entries = vec![LogEntry::Header { spec: spec.clone() }];
    if !upserts.is_empty() {
        entries.push(LogEntry::Batch {
            upserts,
            deletes: Vec::new(),
        });
    }
    entries
}

/// Log the batch, then apply it. Nothing changes in memory if the log
/// write fails.
fn commit(records: &mut Records, log: Option<&Path>, entry: LogEntry) -> Result<()> {
    if let Some(path) = log {
        append_line(path, &entry)?;
    }
    if let LogEntry::Batch { upserts, deletes } = entry {
        apply(records, upserts, deletes);
    }
    Ok(())
}

#[async_trait]
impl VectorCollection for LocalCollection {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn dimension(&self) -> usize {
        self.spec.dimension
    }

    fn model(&self) -> &str {
        &self.spec.model
    }

    async fn upsert(&self, batch: Vec<VectorRecord>) -> Result<usize> {
        for record in &batch {
            self.spec.check_record(record)?;
        }

        self.write(move |records, log| {
            let mut upserts: Vec<StoredRecord> = Vec::new();
            for record in batch {
                let unchanged = records
                    .get(&record.id)
                    .map_or(false, |existing| existing.record == record);
                if unchanged {
                    continue;
                }
                upserts.retain(|s| s.record.id != record.id);
                upserts.push(StoredRecord {
                    record,
                    inserted_at: insertion_stamp(),
                });
            }

            let written = upserts.len();
            if written > 0 {
                let entry = LogEntry::Batch {
                    upserts,
                    deletes: Vec::new(),
                };
                commit(records, log, entry)?;
            }
            Ok(written)
        })
        .await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        self.spec.check_query(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let records = self.records.read().await;
        let mut hits: Vec<ScoredRecord> = records
            .values()
            .filter(|stored| filter.map_or(true, |f| f.matches(&stored.record)))
            .map(|stored| ScoredRecord {
                score: similarity(self.spec.distance, vector, &stored.record.embedding.values),
                inserted_at: stored.inserted_at,
                record: stored.record.clone(),
            })
            .collect();

        hits.sort_by(rank_order);
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }

    async fn document_status(&self, document_id: &str) -> Result<Option<DocumentStatus>> {
        let records = self.records.read().await;
        let mut status: Option<DocumentStatus> = None;
        for stored in records.values().filter(|s| s.record.document_id == document_id) {
            let entry = status.get_or_insert(DocumentStatus {
                stored: 0,
                expected: stored.record.chunk_total,
            });
            entry.stored += 1;
        }
        Ok(status)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let document_id = document_id.to_string();
        self.write(move |records, log| {
            let deletes: Vec<String> = records
                .values()
                .filter(|s| s.record.document_id == document_id)
                .map(|s| s.record.id.clone())
                .collect();

            let removed = deletes.len();
            if removed > 0 {
                let entry = LogEntry::Batch {
                    upserts: Vec::new(),
                    deletes,
                };
                commit(records, log, entry)?;
            }
            Ok(removed)
        })
        .await
    }

    async fn recreate(&self, _guard: RecreateGuard) -> Result<()> {
        let spec = self.spec.clone();
        self.write(move |records, log| {
            if let Some(path) = log {
                rewrite_lines(path, &compacted(&spec, &HashMap::new()))?;
            }
            records.clear();
            Ok(())
        })
        .await?;
        tracing::info!(collection = %self.spec.name, "collection recreated");
        Ok(())
    }
}
