//! Secondary relevance pass over similarity hits

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::{AgentError, Result};
use crate::model::{strip_code_fence, CompletionRequest, ModelClient};
use crate::vector::ScoredRecord;

/// Scores how well each hit answers a query, in `0.0..=1.0`
#[async_trait]
pub trait RelevanceFilter: Send + Sync {
    /// One score per hit, in hit order
    async fn score(&self, query: &str, hits: &[ScoredRecord]) -> Result<Vec<f32>>;
}

/// Drop hits scoring below `threshold`, keeping the similarity order.
///
/// If the filter itself fails the hits are returned untouched.
pub async fn prune(
    filter: &dyn RelevanceFilter,
    query: &str,
    hits: Vec<ScoredRecord>,
    threshold: f32,
) -> Vec<ScoredRecord> {
    if hits.is_empty() {
        return hits;
    }

    let scores = match filter.score(query, &hits).await {
        Ok(scores) if scores.len() == hits.len() => scores,
        Ok(scores) => {
            tracing::warn!(expected = hits.len(), received = scores.len(), "relevance scores do not match hits, keeping all");
            return hits;
        }
        Err(e) => {
            tracing::warn!(error = %e, "relevance filter failed, keeping all hits");
            return hits;
        }
    };

    let before = hits.len();
    let kept: Vec<ScoredRecord> = hits
        .into_iter()
        .zip(scores)
        .filter(|(_, score)| *score >= threshold)
        .map(|(hit, _)| hit)
        .collect();
    tracing::debug!(before, after = kept.len(), "relevance pruning");
    kept
}

/// Relevance judged by a chat model returning a JSON array of scores
pub struct ModelRelevanceFilter {
    model: Arc<dyn ModelClient>,
}

impl ModelRelevanceFilter {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    fn prompt(query: &str, hits: &[ScoredRecord]) -> CompletionRequest {
        let mut passages = String::new();
        for (idx, hit) in hits.iter().enumerate() {
            passages.push_str(&format!("[{}] {}\n\n", idx + 1, hit.record.text.trim()));
        }
        CompletionRequest::prompt(format!(
            "Rate how relevant each passage is to the question on a scale from 0 to 1. \
             Respond with a JSON array of {} numbers, one per passage, in order.\n\n\
             Question: {}\n\nPassages:\n{}",
            hits.len(),
            query,
            passages
        ))
        .with_temperature(0.0)
        .expect_json()
    }
}

#[async_trait]
impl RelevanceFilter for ModelRelevanceFilter {
    async fn score(&self, query: &str, hits: &[ScoredRecord]) -> Result<Vec<f32>> {
        let completion = self.model.complete(&Self::prompt(query, hits)).await?;
        let scores: Vec<f32> = serde_json::from_str(strip_code_fence(&completion.content))
            .map_err(|e| AgentError::RetrievalError(format!("unparseable relevance scores: {}", e)))?;
        Ok(scores.into_iter().map(|s| s.clamp(0.0, 1.0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingVector;
    use crate::vector::VectorRecord;
    use serde_json::Map;

    struct Fixed(Result<Vec<f32>>);

    #[async_trait]
    impl RelevanceFilter for Fixed {
        async fn score(&self, _query: &str, _hits: &[ScoredRecord]) -> Result<Vec<f32>> {
            match &self.0 {
                Ok(scores) => Ok(scores.clone()),
                Err(e) => Err(AgentError::Generic(e.to_string())),
            }
        }
    }

    fn hit(id: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            record: VectorRecord {
                id: VectorRecord::chunk_id(id, 0),
                document_id: id.to_string(),
                chunk_index: 0,
                chunk_total: 1,
                text: id.to_string(),
                metadata: Map::new(),
                embedding: EmbeddingVector::new(vec![1.0], "m"),
            },
            score,
            inserted_at: 0,
        }
    }

    #[tokio::test]
    async fn test_prune_keeps_similarity_order() {
        let hits = vec![hit("c", 0.95), hit("a", 0.9), hit("b", 0.7)];
        let filter = Fixed(Ok(vec![0.8, 0.1, 0.9]));
        let kept = prune(&filter, "q", hits, 0.5).await;
        let ids: Vec<_> = kept.iter().map(|h| h.record.document_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_prune_is_noop_when_filter_fails() {
        let hits = vec![hit("a", 0.9), hit("b", 0.7)];
        let filter = Fixed(Err(AgentError::Generic("offline".to_string())));
        assert_eq!(prune(&filter, "q", hits.clone(), 0.5).await, hits);
    }

    #[tokio::test]
    async fn test_prune_is_noop_on_score_count_mismatch() {
        let hits = vec![hit("a", 0.9), hit("b", 0.7)];
        let filter = Fixed(Ok(vec![0.0]));
        assert_eq!(prune(&filter, "q", hits.clone(), 0.5).await.len(), 2);
    }
}
