//! Knowledge base load and query through the public API

mod common;

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

use brainspark::errors::{AgentError, Result};
use brainspark::knowledge::{
    AgenticChunking, Document, FixedSizeChunking, KnowledgeBase, KnowledgeSource, MediaType,
    RelevanceFilter,
};
use brainspark::model::{Completion, CompletionRequest, ModelClient};
use brainspark::vector::{
    CollectionSpec, LocalCollection, MetadataFilter, ScoredRecord, VectorCollection,
};
use common::{HashEmbedder, ScriptedModel, DIMS, EMBED_MODEL};

const KEYWORDS: &str = "keyword,volume,intent\n\
lean seo,1200,informational\n\
local seo checklist,900,informational\n\
seo audit pricing,300,commercial\n\
bakery marketing ideas,450,informational\n\
sourdough instagram captions,200,informational\n";

const CHANNELS: &str = "channel,budget\n\
newsletter,200\n\
paid social,800\n\
podcast sponsorship,1500\n";

fn write_sources(dir: &Path) {
    std::fs::write(dir.join("keywords.csv"), KEYWORDS).unwrap();
    std::fs::write(dir.join("channels.csv"), CHANNELS).unwrap();
}

fn spec() -> CollectionSpec {
    CollectionSpec::new("marketing", DIMS, EMBED_MODEL)
}

fn knowledge_base(
    embedder: Arc<HashEmbedder>,
    collection: Arc<dyn VectorCollection>,
    sources: &Path,
) -> KnowledgeBase {
    KnowledgeBase::new("marketing", embedder, collection)
        .unwrap()
        .with_source(KnowledgeSource::csv(sources))
        .with_chunking(Arc::new(FixedSizeChunking::new(60, 0)))
        .with_batch_size(4)
}

async fn snapshot(collection: &dyn VectorCollection) -> Vec<(String, String)> {
    let mut all: Vec<(String, String)> = collection
        .query(&[1.0; DIMS], 1000, None)
        .await
        .unwrap()
        .into_iter()
        .map(|h| (h.record.id, h.record.text))
        .collect();
    all.sort();
    all
}

#[tokio::test]
async fn test_load_twice_is_idempotent() {
    let temp = TempDir::new().unwrap();
    write_sources(temp.path());
    let embedder = Arc::new(HashEmbedder::new());
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let kb = knowledge_base(embedder.clone(), collection.clone(), temp.path());

    let first = kb.load(false).await.unwrap();
    assert_eq!(first.loaded, 2);
    assert!(first.is_clean());
    let count = collection.count().await.unwrap();
    let content = snapshot(collection.as_ref()).await;
    assert!(count > 2, "small chunk size should split documents");

    let calls = embedder.calls.load(Ordering::SeqCst);
    let second = kb.load(false).await.unwrap();
    assert_eq!(second.loaded, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(collection.count().await.unwrap(), count);
    assert_eq!(snapshot(collection.as_ref()).await, content);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls, "nothing re-embedded");
}

#[tokio::test]
async fn test_recreate_rebuilds() {
    let temp = TempDir::new().unwrap();
    write_sources(temp.path());
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let kb = knowledge_base(Arc::new(HashEmbedder::new()), collection.clone(), temp.path());

    kb.load(false).await.unwrap();
    let count = collection.count().await.unwrap();

    let report = kb.load(true).await.unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(collection.count().await.unwrap(), count);
}

#[tokio::test]
async fn test_failed_chunk_is_isolated_and_resumed() {
    let temp = TempDir::new().unwrap();
    write_sources(temp.path());
    let embedder = Arc::new(HashEmbedder::new());
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let kb = knowledge_base(embedder.clone(), collection.clone(), temp.path());

    embedder.poison(Some("sourdough"));
    let report = kb.load(false).await.unwrap();
    assert_eq!(report.loaded, 1, "channels.csv is unaffected");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].document, "keywords");
    assert_eq!(report.chunk_failures, 1);
    assert!(matches!(
        report.clone().into_result().unwrap_err(),
        AgentError::IngestError { .. }
    ));

    let status = collection.document_status("keywords").await.unwrap().unwrap();
    assert!(!status.is_complete());
    assert_eq!(status.stored + 1, status.expected);

    embedder.poison(None);
    let resumed = kb.load(false).await.unwrap();
    assert_eq!(resumed.skipped, 1);
    assert_eq!(resumed.loaded, 1);
    assert!(resumed.is_clean());
    assert!(collection
        .document_status("keywords")
        .await
        .unwrap()
        .unwrap()
        .is_complete());
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let temp = TempDir::new().unwrap();
    write_sources(temp.path());
    let path = temp.path().join("vectors/marketing.jsonl");

    {
        let collection: Arc<dyn VectorCollection> =
            Arc::new(LocalCollection::open(spec(), &path).unwrap());
        let kb = knowledge_base(Arc::new(HashEmbedder::new()), collection, temp.path());
        assert_eq!(kb.load(false).await.unwrap().loaded, 2);
    }

    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::open(spec(), &path).unwrap());
    let kb = knowledge_base(Arc::new(HashEmbedder::new()), collection, temp.path());
    let report = kb.load(false).await.unwrap();
    assert_eq!(report.loaded, 0);
    assert_eq!(report.skipped, 2);
}

#[tokio::test]
async fn test_dimension_mismatch_fails_construction() {
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let err = KnowledgeBase::new("marketing", Arc::new(HashEmbedder::with_dims(8)), collection)
        .unwrap_err();
    assert!(matches!(err, AgentError::ConfigError(_)));
}

#[tokio::test]
async fn test_model_mismatch_fails_construction() {
    let other = CollectionSpec::new("marketing", DIMS, "text-embedding-004");
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(other).unwrap());
    let err = KnowledgeBase::new("marketing", Arc::new(HashEmbedder::new()), collection).unwrap_err();
    assert!(err.is_fatal_config());
    assert!(err.to_string().contains("text-embedding-004"));
}

#[tokio::test]
async fn test_missing_source_reported_not_fatal() {
    let temp = TempDir::new().unwrap();
    write_sources(temp.path());
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let kb = knowledge_base(Arc::new(HashEmbedder::new()), collection, temp.path())
        .with_source(KnowledgeSource::pdf(temp.path().join("missing")));

    let report = kb.load(false).await.unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(report.failed.len(), 1);
}

#[tokio::test]
async fn test_query_with_document_filter() {
    let temp = TempDir::new().unwrap();
    write_sources(temp.path());
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let kb = knowledge_base(Arc::new(HashEmbedder::new()), collection, temp.path());
    kb.load(false).await.unwrap();

    let hits = kb
        .query("paid social budget", 10, Some(&MetadataFilter::document("channels")))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.record.document_id == "channels"));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(hits[0].record.metadata.contains_key("row_start"));
}

#[tokio::test]
async fn test_query_failure_is_retrieval_error() {
    let embedder = Arc::new(HashEmbedder::new());
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let kb = KnowledgeBase::new("marketing", embedder.clone(), collection).unwrap();

    embedder.broken.store(true, Ordering::SeqCst);
    let err = kb.query("anything", 3, None).await.unwrap_err();
    assert!(matches!(err, AgentError::RetrievalError(_)));
}

struct Unreachable;

#[async_trait]
impl ModelClient for Unreachable {
    fn model_id(&self) -> &str {
        "unreachable"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        Err(AgentError::timeout("chunking model", std::time::Duration::from_secs(30)))
    }
}

fn brief() -> Document {
    let text = "Lean SEO starts with the pages you already have. ".repeat(6);
    Document::new("brief_1", "brief.pdf", MediaType::Pdf, text)
}

fn assert_covers(document: &Document, collection_hits: &[ScoredRecord]) {
    let mut records: Vec<_> = collection_hits.iter().map(|h| &h.record).collect();
    records.sort_by_key(|r| r.chunk_index);
    let joined: String = records.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(joined, document.text);
}

#[tokio::test]
async fn test_agentic_chunking_falls_back_when_model_fails() {
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let kb = KnowledgeBase::new("marketing", Arc::new(HashEmbedder::new()), collection.clone())
        .unwrap()
        .with_chunking(Arc::new(AgenticChunking::new(Arc::new(Unreachable), 80)));

    let document = brief();
    let report = kb.load_document(&document, false).await.unwrap();
    assert_eq!(report.loaded, 1);

    let hits = collection.query(&[1.0; DIMS], 100, None).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits
        .iter()
        .all(|h| h.record.metadata["chunking"] == json!("agentic+fixed")));
    assert_covers(&document, &hits);
}

#[tokio::test]
async fn test_agentic_chunking_uses_valid_breakpoints() {
    let document = brief();
    let model = Arc::new(ScriptedModel::new(Vec::new()).with_json_reply("[50, 150]"));
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let kb = KnowledgeBase::new("marketing", Arc::new(HashEmbedder::new()), collection.clone())
        .unwrap()
        .with_chunking(Arc::new(
            AgenticChunking::new(model, 200).with_section_chars(1000),
        ));

    kb.load_document(&document, false).await.unwrap();
    let hits = collection.query(&[1.0; DIMS], 100, None).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|h| h.record.metadata["chunking"] == json!("agentic")));
    assert_covers(&document, &hits);
}

/// Scores hits by whether they mention the query's first word
struct MentionFilter;

#[async_trait]
impl RelevanceFilter for MentionFilter {
    async fn score(&self, query: &str, hits: &[ScoredRecord]) -> Result<Vec<f32>> {
        let word = query.split_whitespace().next().unwrap_or_default().to_lowercase();
        Ok(hits
            .iter()
            .map(|h| if h.record.text.to_lowercase().contains(&word) { 1.0 } else { 0.0 })
            .collect())
    }
}

#[tokio::test]
async fn test_relevance_filter_prunes_without_reordering() {
    let temp = TempDir::new().unwrap();
    write_sources(temp.path());
    let collection: Arc<dyn VectorCollection> = Arc::new(LocalCollection::in_memory(spec()).unwrap());
    let kb = knowledge_base(Arc::new(HashEmbedder::new()), collection, temp.path())
        .with_relevance_filter(Arc::new(MentionFilter), 0.5);
    kb.load(false).await.unwrap();

    let all = kb.query_knowledge("seo tips", 20, None, false).await.unwrap();
    let pruned = kb.query_knowledge("seo tips", 20, None, true).await.unwrap();

    assert!(pruned.len() < all.len());
    assert!(pruned.iter().all(|h| h.record.text.contains("seo")));
    let expected: Vec<&str> = all
        .iter()
        .filter(|h| h.record.text.contains("seo"))
        .map(|h| h.record.id.as_str())
        .collect();
    let kept: Vec<&str> = pruned.iter().map(|h| h.record.id.as_str()).collect();
    assert_eq!(kept, expected);
}
