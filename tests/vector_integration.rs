//! Collection behaviour through the public API: ranking, fan-out,
//! filtering and the dimension invariant

mod common;

use serde_json::json;
use std::sync::Arc;

use brainspark::errors::AgentError;
use brainspark::vector::{
    CollectionSpec, CombinedCollection, LocalCollection, MetadataFilter, VectorCollection,
};
use common::{record_at, EMBED_MODEL};

const QUERY: [f32; 3] = [1.0, 0.0, 0.0];

fn collection(name: &str) -> LocalCollection {
    LocalCollection::in_memory(CollectionSpec::new(name, 3, EMBED_MODEL)).unwrap()
}

fn ids(hits: &[brainspark::vector::ScoredRecord]) -> Vec<&str> {
    hits.iter().map(|h| h.record.document_id.as_str()).collect()
}

#[tokio::test]
async fn test_query_ranks_by_similarity() {
    let kb = collection("ranking");
    kb.upsert(vec![
        record_at("A", 0.9, json!({})),
        record_at("B", 0.7, json!({})),
        record_at("C", 0.95, json!({})),
    ])
    .await
    .unwrap();

    let hits = kb.query(&QUERY, 2, None).await.unwrap();
    assert_eq!(ids(&hits), vec!["C", "A"]);
    assert!((hits[0].score - 0.95).abs() < 1e-4);
    assert!((hits[1].score - 0.9).abs() < 1e-4);
}

#[tokio::test]
async fn test_filter_applies_before_truncation() {
    let kb = collection("filtered");
    kb.upsert(vec![
        record_at("A", 0.9, json!({"status": "published"})),
        record_at("B", 0.7, json!({"status": "published"})),
        record_at("C", 0.95, json!({"status": "draft"})),
    ])
    .await
    .unwrap();

    let filter = MetadataFilter::new().ne("status", "draft");
    let hits = kb.query(&QUERY, 2, Some(&filter)).await.unwrap();
    assert_eq!(ids(&hits), vec!["A", "B"]);
}

#[tokio::test]
async fn test_combined_fan_out_returns_global_best() {
    let x: Arc<dyn VectorCollection> = Arc::new(collection("x"));
    let y: Arc<dyn VectorCollection> = Arc::new(collection("y"));
    x.upsert(vec![record_at("x1", 0.8, json!({})), record_at("x2", 0.3, json!({}))])
        .await
        .unwrap();
    y.upsert(vec![record_at("y1", 0.85, json!({})), record_at("y2", 0.1, json!({}))])
        .await
        .unwrap();

    let combined = CombinedCollection::new("x+y", vec![x, y]).unwrap();
    let hits = combined.query(&QUERY, 1, None).await.unwrap();
    assert_eq!(ids(&hits), vec!["y1"]);

    let hits = combined.query(&QUERY, 3, None).await.unwrap();
    assert_eq!(ids(&hits), vec!["y1", "x1", "x2"]);
    assert_eq!(combined.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_combined_view_rejects_writes() {
    let member: Arc<dyn VectorCollection> = Arc::new(collection("a"));
    let combined = CombinedCollection::new("view", vec![member]).unwrap();
    let err = combined
        .upsert(vec![record_at("A", 0.5, json!({}))])
        .await
        .unwrap_err();
    assert!(err.is_fatal_config());
}

#[tokio::test]
async fn test_dimension_mismatch_is_config_error() {
    let kb = collection("dims");
    let mut bad = record_at("A", 0.9, json!({}));
    bad.embedding.values.push(0.0);

    let err = kb.upsert(vec![record_at("ok", 0.5, json!({})), bad]).await.unwrap_err();
    assert!(matches!(err, AgentError::ConfigError(_)));
    // Nothing from the rejected batch is written, and nothing is padded
    assert_eq!(kb.count().await.unwrap(), 0);

    let err = kb.query(&[1.0, 0.0], 1, None).await.unwrap_err();
    assert!(err.is_fatal_config());
}

#[tokio::test]
async fn test_reupsert_does_not_grow() {
    let kb = collection("idempotent");
    let records = vec![record_at("A", 0.9, json!({})), record_at("B", 0.7, json!({}))];

    assert_eq!(kb.upsert(records.clone()).await.unwrap(), 2);
    assert_eq!(kb.upsert(records).await.unwrap(), 0);
    assert_eq!(kb.count().await.unwrap(), 2);
}
