//! Read-only union over several collections

use async_trait::async_trait;
use futures_util::future::try_join_all;
use std::sync::Arc;

use crate::errors::{AgentError, Result};
use crate::vector::{
    rank_order, DocumentStatus, MetadataFilter, RecreateGuard, ScoredRecord, VectorCollection,
    VectorRecord,
};

/// Queries every member and merges the hits into one global top-k.
///
/// Writes go to the member collections directly; the union rejects them.
pub struct CombinedCollection {
    name: String,
    dimension: usize,
    model: String,
    members: Vec<Arc<dyn VectorCollection>>,
}

impl CombinedCollection {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn VectorCollection>>) -> Result<Self> {
        let name = name.into();
        let first = members.first().ok_or_else(|| {
            AgentError::config(format!("combined collection {} has no members", name))
        })?;
        let dimension = first.dimension();
        let model = first.model().to_string();

        if let Some(odd) = members.iter().find(|m| m.dimension() != dimension) {
            return Err(AgentError::ConfigError(format!(
                "combined collection {}: member {} has dimension {}, {} has {}",
                name,
                odd.name(),
                odd.dimension(),
                first.name(),
                dimension
            )));
        }

        if let Some(odd) = members.iter().find(|m| m.model() != model) {
            return Err(AgentError::ConfigError(format!(
                "combined collection {}: member {} holds {} vectors, {} holds {}",
                name,
                odd.name(),
                odd.model(),
                first.name(),
                model
            )));
        }

        Ok(Self {
            name,
            dimension,
            model,
            members,
        })
    }

    pub fn members(&self) -> &[Arc<dyn VectorCollection>] {
        &self.members
    }

    fn read_only(&self, operation: &str) -> AgentError {
        AgentError::ConfigError(format!(
            "combined collection {} is read-only; {} a member collection instead",
            self.name, operation
        ))
    }
}

#[async_trait]
impl VectorCollection for CombinedCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn upsert(&self, _records: Vec<VectorRecord>) -> Result<usize> {
        Err(self.read_only("upsert into"))
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let per_member =
            try_join_all(self.members.iter().map(|m| m.query(vector, k, filter))).await?;

        let mut hits: Vec<ScoredRecord> = per_member.into_iter().flatten().collect();
        hits.sort_by(rank_order);
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        let counts = try_join_all(self.members.iter().map(|m| m.count())).await?;
        Ok(counts.into_iter().sum())
    }

    async fn document_status(&self, document_id: &str) -> Result<Option<DocumentStatus>> {
        let statuses =
            try_join_all(self.members.iter().map(|m| m.document_status(document_id))).await?;
        Ok(statuses.into_iter().flatten().reduce(|a, b| DocumentStatus {
            stored: a.stored + b.stored,
            expected: a.expected.max(b.expected),
        }))
    }

    async fn delete_document(&self, _document_id: &str) -> Result<usize> {
        Err(self.read_only("delete from"))
    }

    async fn recreate(&self, _guard: RecreateGuard) -> Result<()> {
        Err(self.read_only("recreate"))
    }
}
