//! JSON-lines memory store, one file per (agent, user)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{AgentError, Result};
use crate::memory::types::{rank, ConsolidationPolicy, MemoryRecord};
use crate::memory::MemoryStore;
use crate::storage::{append_line, read_lines, rewrite_lines, safe_component, KeyedLocks};

/// Stores facts under `<root>/<agent>/memory/<user>.jsonl`
#[derive(Debug, Clone)]
pub struct FileMemoryStore {
    root: PathBuf,
    locks: Arc<KeyedLocks>,
}

impl FileMemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, agent_id: &str, user_id: &str) -> Result<PathBuf> {
        let agent = safe_component("agent", agent_id).map_err(memory_error)?;
        let user = safe_component("user", user_id).map_err(memory_error)?;
        Ok(self
            .root
            .join(agent)
            .join("memory")
            .join(format!("{}.jsonl", user)))
    }

    async fn read_all(&self, path: PathBuf) -> Result<Vec<MemoryRecord>> {
        tokio::task::spawn_blocking(move || read_lines(&path))
            .await
            .map_err(|e| AgentError::MemoryError(format!("memory read task failed: {}", e)))?
            .map_err(memory_error)
    }
}

fn memory_error(err: anyhow::Error) -> AgentError {
    AgentError::MemoryError(format!("{:#}", err))
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn record(&self, agent_id: &str, user_id: &str, fact: &str) -> Result<MemoryRecord> {
        if fact.trim().is_empty() {
            return Err(AgentError::MemoryError("refusing to record an empty fact".to_string()));
        }

        let path = self.path_for(agent_id, user_id)?;
        let record = MemoryRecord::new(agent_id, user_id, fact);
        let guard = self.locks.lock(&path.to_string_lossy()).await;

        // The blocking task holds the lock until the line is on disk, even if
        // the caller is cancelled
        let line = record.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            append_line(&path, &line)
        })
        .await
            .map_err(|e| AgentError::MemoryError(format!("memory write task failed: {}", e)))?
            .map_err(memory_error)?;

        tracing::debug!(agent_id, user_id, "memory recorded");
        Ok(record)
    }

    async fn recall(
        &self,
        agent_id: &str,
        user_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<MemoryRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let records = self.facts(agent_id, user_id).await?;
        Ok(rank(records, query, k))
    }

    async fn facts(&self, agent_id: &str, user_id: &str) -> Result<Vec<MemoryRecord>> {
        let path = self.path_for(agent_id, user_id)?;
        self.read_all(path).await
    }

    async fn consolidate(
        &self,
        agent_id: &str,
        user_id: &str,
        policy: ConsolidationPolicy,
    ) -> Result<usize> {
        let path = self.path_for(agent_id, user_id)?;
        let guard = self.locks.lock(&path.to_string_lossy()).await;

        // Read, filter and rewrite under one lock hold so no append can land
        // between the read and the rename
        let removed = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            let _guard = guard;
            let records: Vec<MemoryRecord> = read_lines(&path)?;
            let before = records.len();
            let kept = policy.apply(records);
            let removed = before - kept.len();
            if removed > 0 {
                rewrite_lines(&path, &kept)?;
            }
            Ok(removed)
        })
        .await
        .map_err(|e| AgentError::MemoryError(format!("memory rewrite task failed: {}", e)))?
        .map_err(memory_error)?;

        if removed == 0 {
            return Ok(0);
        }

        tracing::info!(agent_id, user_id, removed, ?policy, "memory consolidated");
        Ok(removed)
    }
}
