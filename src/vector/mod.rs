//! Vector collections
//!
//! A collection is a named namespace of [`VectorRecord`]s searchable by
//! similarity. Every backend enforces the same contract:
//! - `upsert` overwrites by record id and is atomic per call
//! - vectors must match the collection's dimension and embedding model
//! - filters are applied before ranking, never after truncation to `k`
//! - results are ordered by descending score, most recent insertion first on ties
//! - `recreate` requires a [`RecreateGuard`], which only an explicit
//!   `KnowledgeBase::load(recreate = true)` hands out

pub mod combined;
pub mod filter;
pub mod local;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use crate::config::DistanceMetric;
use crate::embedding::EmbeddingVector;
use crate::errors::{AgentError, Result};

pub use combined::CombinedCollection;
pub use filter::MetadataFilter;
pub use local::LocalCollection;
pub use qdrant::QdrantCollection;

/// The atomic unit stored in and returned from a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Chunk id, `{document_id}#{chunk_index}`
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    /// Number of chunks the parent document produced
    pub chunk_total: usize,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
    pub embedding: EmbeddingVector,
}

impl VectorRecord {
    pub fn chunk_id(document_id: &str, chunk_index: usize) -> String {
        format!("{}#{}", document_id, chunk_index)
    }
}

/// A query hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    pub score: f32,
    /// Insertion time in microseconds, used to break score ties
    pub inserted_at: i64,
}

/// Shape every record of a collection must have
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    /// Embedding model identifier; vectors from other models are rejected
    pub model: String,
    #[serde(default)]
    pub distance: DistanceMetric,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dimension: usize, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimension,
            model: model.into(),
            distance: DistanceMetric::Cosine,
        }
    }

    pub fn with_distance(mut self, distance: DistanceMetric) -> Self {
        self.distance = distance;
        self
    }

    /// Reject a record whose vector does not belong in this collection
    pub fn check_record(&self, record: &VectorRecord) -> Result<()> {
        if record.embedding.dimension() != self.dimension {
            return Err(AgentError::ConfigError(format!(
                "record {} has dimension {}, collection {} expects {}",
                record.id,
                record.embedding.dimension(),
                self.name,
                self.dimension
            )));
        }
        if record.embedding.model != self.model {
            return Err(AgentError::ConfigError(format!(
                "record {} was embedded with {}, collection {} holds {} vectors",
                record.id, record.embedding.model, self.name, self.model
            )));
        }
        Ok(())
    }

    pub fn check_query(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(AgentError::ConfigError(format!(
                "query vector has dimension {}, collection {} expects {}",
                vector.len(),
                self.name,
                self.dimension
            )));
        }
        Ok(())
    }
}

/// Ingestion completeness of one document inside a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStatus {
    pub stored: usize,
    pub expected: usize,
}

impl DocumentStatus {
    pub fn is_complete(&self) -> bool {
        self.expected > 0 && self.stored >= self.expected
    }
}

/// Permission token for destroying a collection.
///
/// Only constructible inside the crate, so no query or ingest path can
/// recreate a collection by accident.
#[derive(Debug)]
pub struct RecreateGuard {
    _private: (),
}

impl RecreateGuard {
    pub(crate) fn explicit() -> Self {
        Self { _private: () }
    }
}

/// Named, queryable vector store
#[async_trait]
pub trait VectorCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Vector dimension accepted by upsert and query
    fn dimension(&self) -> usize;

    /// Embedding model whose vectors this collection holds
    fn model(&self) -> &str;

    /// Read-only views reject every write
    fn is_read_only(&self) -> bool {
        false
    }

    /// Insert or overwrite records by id. All records are validated before any
    /// is written; the batch lands entirely or not at all.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize>;

    /// Nearest neighbours of `vector`, filtered before ranking
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>>;

    /// Total number of records
    async fn count(&self) -> Result<usize>;

    /// How much of a document is stored; `None` when nothing is
    async fn document_status(&self, document_id: &str) -> Result<Option<DocumentStatus>>;

    /// Remove every record of a document, returning how many were removed
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// Drop and rebuild the namespace
    async fn recreate(&self, guard: RecreateGuard) -> Result<()>;
}

/// Monotonic insertion timestamp in microseconds, shared by every backend
/// in the process so stamps from different collections stay comparable.
pub(crate) fn insertion_stamp() -> i64 {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let now = chrono::Utc::now().timestamp_micros();
    let mut prev = LAST.load(AtomicOrdering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, AtomicOrdering::SeqCst, AtomicOrdering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

/// Similarity under a metric; larger is closer
pub fn similarity(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => {
            let dot = dot(a, b);
            let norm = dot_self(a).sqrt() * dot_self(b).sqrt();
            if norm == 0.0 {
                0.0
            } else {
                dot / norm
            }
        }
        DistanceMetric::Dot => dot(a, b),
        DistanceMetric::Euclid => {
            let dist: f32 = a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt();
            1.0 / (1.0 + dist)
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn dot_self(a: &[f32]) -> f32 {
    dot(a, a)
}

/// Ranking order: score descending, then newest insertion first
pub fn rank_order(a: &ScoredRecord, b: &ScoredRecord) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.inserted_at.cmp(&a.inserted_at))
}
