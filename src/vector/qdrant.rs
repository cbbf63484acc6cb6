//! Qdrant-backed collection

#![allow(deprecated)]

use anyhow::Context;
use async_trait::async_trait;
use qdrant_client::{
    client::QdrantClient,
    qdrant::{
        condition::ConditionOneOf, point_id::PointIdOptions, points_selector::PointsSelectorOneOf,
        r#match::MatchValue, value::Kind, vectors::VectorsOptions, vectors_config::Config,
        with_payload_selector::SelectorOptions, with_vectors_selector, Condition, CountPoints,
        CreateCollection, Distance, FieldCondition, Filter, ListValue, Match, PointId, PointStruct,
        PointsSelector, ScrollPoints, SearchPoints, Struct, Value as QdrantValue, VectorParams,
        VectorsConfig, WithPayloadSelector, WithVectorsSelector,
    },
};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DistanceMetric;
use crate::embedding::EmbeddingVector;
use crate::errors::{AgentError, Result};
use crate::retry::RetryManager;
use crate::vector::filter::DOCUMENT_ID_KEY;
use crate::vector::{
    insertion_stamp, rank_order, CollectionSpec, DocumentStatus, MetadataFilter, RecreateGuard,
    ScoredRecord, VectorCollection, VectorRecord,
};

const TEXT_FIELD: &str = "document";
const RECORD_ID_FIELD: &str = "record_id";
const CHUNK_INDEX_FIELD: &str = "chunk_index";
const CHUNK_TOTAL_FIELD: &str = "chunk_total";
const MODEL_FIELD: &str = "model";
const INSERTED_AT_FIELD: &str = "inserted_at";
const METADATA_FIELD: &str = "metadata";

/// Collection stored in a Qdrant server.
///
/// Point ids are UUIDv5 digests of the record id, so re-upserting a chunk
/// overwrites it in place. Every server call runs under the request
/// timeout and the retry budget; an expired call is [`AgentError::Timeout`].
pub struct QdrantCollection {
    client: QdrantClient,
    spec: CollectionSpec,
    timeout: Duration,
    retry: RetryManager,
}

impl QdrantCollection {
    /// Connect and create the collection if it does not exist yet
    pub async fn connect(
        url: &str,
        api_key: Option<String>,
        spec: CollectionSpec,
        timeout: Duration,
        retry: RetryManager,
    ) -> Result<Self> {
        if spec.dimension == 0 {
            return Err(AgentError::config(format!(
                "collection {} must have a non-zero dimension",
                spec.name
            )));
        }

        let mut builder = QdrantClient::from_url(url)
            .with_timeout(timeout)
            .with_connect_timeout(timeout);
        if let Some(key) = api_key {
            builder = builder.with_api_key(key);
        }
        let client = builder.build().context("Failed to create Qdrant client")?;

        let collection = Self {
            client,
            spec,
            timeout,
            retry,
        };
        collection.ensure_collection().await?;
        Ok(collection)
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    /// Run one client call under the request timeout and retry budget
    async fn call<T, F, Fut>(&self, operation: &str, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let limit = self.timeout;
        self.retry
            .execute_with_retry(|| {
                let pending = request();
                async move {
                    match tokio::time::timeout(limit, pending).await {
                        Ok(result) => result.map_err(|e| qdrant_error(operation, limit, e)),
                        Err(_) => Err(AgentError::timeout(operation, limit)),
                    }
                }
            })
            .await
    }

    async fn ensure_collection(&self) -> Result<()> {
        let collections = self
            .call("qdrant list collections", || self.client.list_collections())
            .await?;
        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.spec.name);

        if !exists {
            return self.create().await;
        }

        let info = self
            .call("qdrant collection info", || self.client.collection_info(&self.spec.name))
            .await?;
        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                Config::Params(params) => Some(params.size),
                _ => None,
            });

        match size {
            Some(size) if size as usize != self.spec.dimension => Err(AgentError::ConfigError(format!(
                "Qdrant collection {} holds {}-dimensional vectors, configured {}",
                self.spec.name, size, self.spec.dimension
            ))),
            _ => Ok(()),
        }
    }

    async fn create(&self) -> Result<()> {
        let request = CreateCollection {
            collection_name: self.spec.name.clone(),
            vectors_config: Some(VectorsConfig {
                config: Some(Config::Params(VectorParams {
                    size: self.spec.dimension as u64,
                    distance: qdrant_distance(self.spec.distance).into(),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        };
        self.call("qdrant create collection", || self.client.create_collection(&request))
            .await?;

        tracing::info!(collection = %self.spec.name, dimension = self.spec.dimension, "created Qdrant collection");
        Ok(())
    }

    async fn count_matching(&self, filter: Option<Filter>) -> Result<usize> {
        let request = CountPoints {
            collection_name: self.spec.name.clone(),
            filter,
            exact: Some(true),
            ..Default::default()
        };
        let response = self
            .call("qdrant count", || self.client.count(&request))
            .await?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}

#[async_trait]
impl VectorCollection for QdrantCollection {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn dimension(&self) -> usize {
        self.spec.dimension
    }

    fn model(&self) -> &str {
        &self.spec.model
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize> {
        for record in &records {
            self.spec.check_record(record)?;
        }
        if records.is_empty() {
            return Ok(0);
        }

        let written = records.len();
        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|record| {
                let id = point_id(&record.id);
                let vector = record.embedding.values.clone();
                PointStruct::new(id, vector, record_payload(record, insertion_stamp()))
            })
            .collect();

        self.call("qdrant upsert", || {
            self.client
                .upsert_points_blocking(&self.spec.name, None, points.clone(), None)
        })
        .await?;

        Ok(written)
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

        let filter = filter.map(to_qdrant_filter).transpose()?;
        let request = SearchPoints {
            collection_name: self.spec.name.clone(),
            vector: vector.to_vec(),
            limit: k as u64,
            filter,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(SelectorOptions::Enable(true)),
            }),
            with_vectors: Some(WithVectorsSelector {
                selector_options: Some(with_vectors_selector::SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };
        let search = self
            .call("qdrant search", || self.client.search_points(&request))
            .await
            .map_err(|e| match e {
                AgentError::Timeout { .. } => e,
                other => AgentError::RetrievalError(format!("Qdrant search failed: {}", other)),
            })?;

        let mut hits = Vec::with_capacity(search.result.len());
        for point in search.result {
            let values = match point.vectors.and_then(|v| v.vectors_options) {
                Some(VectorsOptions::Vector(v)) => v.data,
                _ => Vec::new(),
            };
            let Some((record, inserted_at)) = record_from_payload(point.payload, values) else {
                tracing::warn!(
                    collection = %self.spec.name,
                    point = %point_id_to_string(&point.id),
                    "skipping point without record payload"
                );
                continue;
            };
            hits.push(ScoredRecord {
                record,
                score: normalize_score(self.spec.distance, point.score),
                inserted_at,
            });
        }

        hits.sort_by(rank_order);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        self.count_matching(None).await
    }

    async fn document_status(&self, document_id: &str) -> Result<Option<DocumentStatus>> {
        let filter = to_qdrant_filter(&MetadataFilter::document(document_id))?;
        let stored = self.count_matching(Some(filter.clone())).await?;
        if stored == 0 {
            return Ok(None);
        }

        let request = ScrollPoints {
            collection_name: self.spec.name.clone(),
            filter: Some(filter),
            limit: Some(1),
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };
        let scroll = self
            .call("qdrant scroll", || self.client.scroll(&request))
            .await?;

        let expected = scroll
            .result
            .first()
            .and_then(|p| p.payload.get(CHUNK_TOTAL_FIELD))
            .and_then(qdrant_to_json_value)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;

        Ok(Some(DocumentStatus { stored, expected }))
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let filter = to_qdrant_filter(&MetadataFilter::document(document_id))?;
        let removed = self.count_matching(Some(filter.clone())).await?;
        if removed == 0 {
            return Ok(0);
        }

        let selector = PointsSelector {
            points_selector_one_of: Some(PointsSelectorOneOf::Filter(filter)),
        };
        self.call("qdrant delete points", || {
            self.client.delete_points(&self.spec.name, None, &selector, None)
        })
        .await?;

        Ok(removed)
    }

    async fn recreate(&self, _guard: RecreateGuard) -> Result<()> {
        self.call("qdrant delete collection", || self.client.delete_collection(&self.spec.name))
            .await?;
        self.create().await
    }
}

/// Deadline failures reported by the server or the gRPC channel are
/// timeouts; everything else keeps its message and is not retried.
fn qdrant_error(operation: &str, limit: Duration, err: anyhow::Error) -> AgentError {
    let detail = format!("{:#}", err);
    let expired = ["DeadlineExceeded", "Deadline expired", "Timeout expired"];
    if expired.iter().any(|marker| detail.contains(marker)) {
        AgentError::timeout(operation, limit)
    } else {
        AgentError::Generic(format!("{} failed: {}", operation, detail))
    }
}

fn qdrant_distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::Dot => Distance::Dot,
        DistanceMetric::Euclid => Distance::Euclid,
    }
}

/// Qdrant reports raw distance for Euclid; map it onto larger-is-closer.
fn normalize_score(metric: DistanceMetric, score: f32) -> f32 {
    match metric {
        DistanceMetric::Euclid => 1.0 / (1.0 + score),
        _ => score,
    }
}

fn point_id(record_id: &str) -> PointId {
    PointId::from(Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes()).to_string())
}

fn point_id_to_string(point_id: &Option<PointId>) -> String {
    match point_id.as_ref().and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Num(n)) => n.to_string(),
        Some(PointIdOptions::Uuid(u)) => u.clone(),
        None => "unknown".to_string(),
    }
}

fn record_payload(record: VectorRecord, inserted_at: i64) -> HashMap<String, QdrantValue> {
    let mut payload = HashMap::new();
    payload.insert(TEXT_FIELD.to_string(), QdrantValue::from(record.text));
    payload.insert(RECORD_ID_FIELD.to_string(), QdrantValue::from(record.id));
    payload.insert(DOCUMENT_ID_KEY.to_string(), QdrantValue::from(record.document_id));
    payload.insert(CHUNK_INDEX_FIELD.to_string(), QdrantValue::from(record.chunk_index as i64));
    payload.insert(CHUNK_TOTAL_FIELD.to_string(), QdrantValue::from(record.chunk_total as i64));
    payload.insert(MODEL_FIELD.to_string(), QdrantValue::from(record.embedding.model));
    payload.insert(INSERTED_AT_FIELD.to_string(), QdrantValue::from(inserted_at));
    payload.insert(
        METADATA_FIELD.to_string(),
        json_to_qdrant_value(JsonValue::Object(record.metadata)),
    );
    payload
}

/// Rebuild a record from its payload. Cosine collections return normalized
/// vectors, so `values` may differ from what was upserted by a scale factor.
fn record_from_payload(
    payload: HashMap<String, QdrantValue>,
    values: Vec<f32>,
) -> Option<(VectorRecord, i64)> {
    let mut fields: Map<String, JsonValue> = payload
        .iter()
        .filter_map(|(k, v)| qdrant_to_json_value(v).map(|j| (k.clone(), j)))
        .collect();

    let text = fields.remove(TEXT_FIELD)?.as_str()?.to_string();
    let id = fields.remove(RECORD_ID_FIELD)?.as_str()?.to_string();
    let document_id = fields.remove(DOCUMENT_ID_KEY)?.as_str()?.to_string();
    let chunk_index = fields.remove(CHUNK_INDEX_FIELD)?.as_u64()? as usize;
    let chunk_total = fields.remove(CHUNK_TOTAL_FIELD)?.as_u64()? as usize;
    let model = fields.remove(MODEL_FIELD)?.as_str()?.to_string();
    let inserted_at = fields.remove(INSERTED_AT_FIELD)?.as_i64()?;
    let metadata = match fields.remove(METADATA_FIELD) {
        Some(JsonValue::Object(map)) => map,
        _ => Map::new(),
    };

    Some((
        VectorRecord {
            id,
            document_id,
            chunk_index,
            chunk_total,
            text,
            metadata,
            embedding: EmbeddingVector::new(values, model),
        },
        inserted_at,
    ))
}

fn to_qdrant_filter(filter: &MetadataFilter) -> Result<Filter> {
    let convert = |conditions: &[(String, JsonValue)]| -> Result<Vec<Condition>> {
        conditions
            .iter()
            .map(|(key, value)| field_condition(key, value))
            .collect()
    };

    Ok(Filter {
        must: convert(&filter.must)?,
        must_not: convert(&filter.must_not)?,
        ..Default::default()
    })
}

fn field_condition(key: &str, value: &JsonValue) -> Result<Condition> {
    let match_value = match value {
        JsonValue::String(s) => MatchValue::Keyword(s.clone()),
        JsonValue::Bool(b) => MatchValue::Boolean(*b),
        JsonValue::Number(n) if n.is_i64() => MatchValue::Integer(n.as_i64().unwrap_or_default()),
        other => {
            return Err(AgentError::RetrievalError(format!(
                "filter on '{}' uses unsupported value {}",
                key, other
            )))
        }
    };

    let key = if key == DOCUMENT_ID_KEY {
        key.to_string()
    } else {
        format!("{}.{}", METADATA_FIELD, key)
    };

    Ok(Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key,
            r#match: Some(Match {
                match_value: Some(match_value),
            }),
            ..Default::default()
        })),
    })
}

fn json_to_qdrant_value(json: JsonValue) -> QdrantValue {
    let kind = match json {
        JsonValue::Null => Kind::NullValue(0),
        JsonValue::Bool(b) => Kind::BoolValue(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => Kind::StringValue(s),
        JsonValue::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant_value).collect(),
        }),
        JsonValue::Object(map) => Kind::StructValue(Struct {
            fields: map
                .into_iter()
                .map(|(k, v)| (k, json_to_qdrant_value(v)))
                .collect(),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

fn qdrant_to_json_value(value: &QdrantValue) -> Option<JsonValue> {
    value.kind.as_ref().and_then(|kind| match kind {
        Kind::NullValue(_) => Some(JsonValue::Null),
        Kind::StringValue(s) => Some(JsonValue::String(s.clone())),
        Kind::IntegerValue(i) => Some(JsonValue::Number((*i).into())),
        Kind::DoubleValue(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number),
        Kind::BoolValue(b) => Some(JsonValue::Bool(*b)),
        Kind::ListValue(list) => Some(JsonValue::Array(
            list.values.iter().filter_map(qdrant_to_json_value).collect(),
        )),
        Kind::StructValue(s) => Some(JsonValue::Object(
            s.fields
                .iter()
                .filter_map(|(k, v)| qdrant_to_json_value(v).map(|j| (k.clone(), j)))
                .collect(),
        )),
    })
}
