//! Knowledge base: reader → chunking → embedding → collection

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::embedding::{Embedder, EmbeddingVector};
use crate::errors::{AgentError, Result};
use crate::knowledge::chunking::{Chunk, ChunkingStrategy, FixedSizeChunking};
use crate::knowledge::document::{reader_for, Document, MediaType};
use crate::knowledge::relevance::{prune, RelevanceFilter};
use crate::vector::{MetadataFilter, RecreateGuard, ScoredRecord, VectorCollection, VectorRecord};

/// A file or directory of one media type
#[derive(Clone)]
pub struct KnowledgeSource {
    pub media_type: MediaType,
    pub path: PathBuf,
    /// Overrides the knowledge base's default strategy
    pub chunking: Option<Arc<dyn ChunkingStrategy>>,
}

impl std::fmt::Debug for KnowledgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeSource")
            .field("media_type", &self.media_type)
            .field("path", &self.path)
            .field("chunking", &self.chunking.as_ref().map(|c| c.name()))
            .finish()
    }
}

impl KnowledgeSource {
    pub fn new(media_type: MediaType, path: impl Into<PathBuf>) -> Self {
        Self {
            media_type,
            path: path.into(),
            chunking: None,
        }
    }

    pub fn pdf(path: impl Into<PathBuf>) -> Self {
        Self::new(MediaType::Pdf, path)
    }

    pub fn csv(path: impl Into<PathBuf>) -> Self {
        Self::new(MediaType::Csv, path)
    }

    pub fn with_chunking(mut self, strategy: Arc<dyn ChunkingStrategy>) -> Self {
        self.chunking = Some(strategy);
        self
    }

    /// Files this source expands to, sorted by name
    pub fn files(&self) -> anyhow::Result<Vec<PathBuf>> {
        if self.path.is_file() {
            return Ok(vec![self.path.clone()]);
        }
        if !self.path.is_dir() {
            bail!("source path {} does not exist", self.path.display());
        }

        let wanted = self.media_type.extension();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.path)
            .with_context(|| format!("Failed to list {}", self.path.display()))?
        {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.eq_ignore_ascii_case(wanted));
            if path.is_file() && matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// A document (or file) that could not be ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub document: String,
    pub reason: String,
}

/// Outcome of one `load`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Documents fully written this run
    pub loaded: usize,
    /// Documents already complete in the collection
    pub skipped: usize,
    pub failed: Vec<DocumentFailure>,
    /// Chunks whose embedding failed; their documents are listed in `failed`
    pub chunk_failures: usize,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Treat any failed document as an ingest error
    pub fn into_result(self) -> Result<LoadReport> {
        match self.failed.first() {
            None => Ok(self),
            Some(first) => {
                let documents: Vec<&str> = self.failed.iter().map(|f| f.document.as_str()).collect();
                Err(AgentError::IngestError {
                    document: documents.join(", "),
                    reason: if self.failed.len() == 1 {
                        first.reason.clone()
                    } else {
                        format!("{} (and {} more failures)", first.reason, self.failed.len() - 1)
                    },
                })
            }
        }
    }

    fn fail(&mut self, document: impl Into<String>, reason: impl std::fmt::Display) {
        let failure = DocumentFailure {
            document: document.into(),
            reason: reason.to_string(),
        };
        tracing::warn!(document = %failure.document, reason = %failure.reason, "document ingest failed");
        self.failed.push(failure);
    }
}

/// Documents from one or more sources, indexed in one collection
pub struct KnowledgeBase {
    name: String,
    sources: Vec<KnowledgeSource>,
    chunking: Arc<dyn ChunkingStrategy>,
    embedder: Arc<dyn Embedder>,
    collection: Arc<dyn VectorCollection>,
    relevance: Option<Arc<dyn RelevanceFilter>>,
    relevance_threshold: f32,
    batch_size: usize,
}

impl KnowledgeBase {
    /// Fails when the embedder and collection disagree on dimension or
    /// embedding model
    pub fn new(
        name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
        collection: Arc<dyn VectorCollection>,
    ) -> Result<Self> {
        let name = name.into();
        if embedder.dimensions() != collection.dimension() {
            return Err(AgentError::ConfigError(format!(
                "knowledge base {}: embedder {} produces {} dimensions, collection {} expects {}",
                name,
                embedder.model_id(),
                embedder.dimensions(),
                collection.name(),
                collection.dimension()
            )));
        }
        if embedder.model_id() != collection.model() {
            return Err(AgentError::ConfigError(format!(
                "knowledge base {}: embedder produces {} vectors, collection {} holds {}",
                name,
                embedder.model_id(),
                collection.name(),
                collection.model()
            )));
        }

        Ok(Self {
            name,
            sources: Vec::new(),
            chunking: Arc::new(FixedSizeChunking::default()),
            embedder,
            collection,
            relevance: None,
            relevance_threshold: 0.5,
            batch_size: 32,
        })
    }

    pub fn with_source(mut self, source: KnowledgeSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_chunking(mut self, strategy: Arc<dyn ChunkingStrategy>) -> Self {
        self.chunking = strategy;
        self
    }

    pub fn with_relevance_filter(mut self, filter: Arc<dyn RelevanceFilter>, threshold: f32) -> Self {
        self.relevance = Some(filter);
        self.relevance_threshold = threshold;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &Arc<dyn VectorCollection> {
        &self.collection
    }

    pub fn sources(&self) -> &[KnowledgeSource] {
        &self.sources
    }

    /// Ingest every source.
    ///
    /// Without `recreate`, documents already complete in the collection are
    /// skipped and partially stored ones are purged and ingested again, so an
    /// interrupted load resumes where it stopped. Per-document failures are
    /// collected in the report; only configuration errors abort the call.
    pub async fn load(&self, recreate: bool) -> Result<LoadReport> {
        if self.collection.is_read_only() && !self.sources.is_empty() {
            return Err(AgentError::config(format!(
                "knowledge base {} cannot load into read-only collection {}",
                self.name,
                self.collection.name()
            )));
        }

        if recreate {
            self.collection.recreate(RecreateGuard::explicit()).await?;
        }

        let mut report = LoadReport::default();
        for source in &self.sources {
            let files = match source.files() {
                Ok(files) => files,
                Err(e) => {
                    report.fail(source.path.display().to_string(), format!("{:#}", e));
                    continue;
                }
            };

            let reader = reader_for(source.media_type);
            let chunking = source.chunking.as_ref().unwrap_or(&self.chunking);

            for file in files {
                let documents = match reader.read(&file) {
                    Ok(documents) => documents,
                    Err(e) => {
                        report.fail(file.display().to_string(), format!("{:#}", e));
                        continue;
                    }
                };

                for document in documents {
                    self.ingest_document(&document, chunking.as_ref(), recreate, &mut report)
                        .await?;
                }
            }
        }

        tracing::info!(
            knowledge_base = %self.name,
            loaded = report.loaded,
            skipped = report.skipped,
            failed = report.failed.len(),
            "knowledge base load finished"
        );
        Ok(report)
    }

    /// Load a single already-read document
    pub async fn load_document(&self, document: &Document, recreate: bool) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        self.ingest_document(document, self.chunking.as_ref(), recreate, &mut report)
            .await?;
        Ok(report)
    }

    async fn ingest_document(
        &self,
        document: &Document,
        chunking: &dyn ChunkingStrategy,
        recreate: bool,
        report: &mut LoadReport,
    ) -> Result<()> {
        if !recreate {
            match self.collection.document_status(&document.id).await {
                Ok(Some(status)) if status.is_complete() => {
                    tracing::debug!(document = %document.id, "already indexed, skipping");
                    report.skipped += 1;
                    return Ok(());
                }
                Ok(Some(status)) => {
                    tracing::info!(
                        document = %document.id,
                        stored = status.stored,
                        expected = status.expected,
                        "purging partially indexed document"
                    );
                    if let Err(e) = self.collection.delete_document(&document.id).await {
                        report.fail(&document.id, e);
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_fatal_config() => return Err(e),
                Err(e) => {
                    report.fail(&document.id, e);
                    return Ok(());
                }
            }
        }

        let chunks = chunking.chunk(document).await;
        if chunks.is_empty() {
            tracing::debug!(document = %document.id, "document produced no chunks");
            report.skipped += 1;
            return Ok(());
        }

        let (embedded, failures) = self.embed_chunks(&document.id, &chunks).await?;
        let total = chunks.len();
        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embedded)
            .filter_map(|(chunk, embedding)| embedding.map(|e| to_record(chunk, total, e)))
            .collect();

        if !records.is_empty() {
            match self.collection.upsert(records).await {
                Ok(_) => {}
                Err(e) if e.is_fatal_config() => return Err(e),
                Err(e) => {
                    report.fail(&document.id, e);
                    return Ok(());
                }
            }
        }

        if failures > 0 {
            report.chunk_failures += failures;
            report.fail(
                &document.id,
                format!("{} of {} chunks failed to embed", failures, total),
            );
        } else {
            report.loaded += 1;
        }
        Ok(())
    }

    /// Embed in batches; a failed batch is retried chunk by chunk so one bad
    /// chunk does not sink its neighbours.
    async fn embed_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<(Vec<Option<EmbeddingVector>>, usize)> {
        let mut out = Vec::with_capacity(chunks.len());
        let mut failures = 0;

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => out.extend(vectors.into_iter().map(Some)),
                Err(e) if e.is_fatal_config() => return Err(e),
                Err(e) => {
                    tracing::warn!(document = %document_id, error = %e, "batch embedding failed, embedding chunks individually");
                    for chunk in batch {
                        match self.embedder.embed(&chunk.text).await {
                            Ok(vector) => out.push(Some(vector)),
                            Err(e) if e.is_fatal_config() => return Err(e),
                            Err(e) => {
                                tracing::warn!(
                                    document = %document_id,
                                    chunk = chunk.index,
                                    error = %e,
                                    "chunk embedding failed"
                                );
                                failures += 1;
                                out.push(None);
                            }
                        }
                    }
                }
            }
        }
        Ok((out, failures))
    }

    /// Similarity search over the collection
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        let vector = self.embedder.embed(text).await.map_err(as_retrieval)?;
        self.collection
            .query(&vector.values, k, filter)
            .await
            .map_err(as_retrieval)
    }

    /// Similarity search, optionally pruned by the relevance filter without
    /// reordering
    pub async fn query_knowledge(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
        agentic_filters: bool,
    ) -> Result<Vec<ScoredRecord>> {
        let hits = self.query(text, k, filter).await?;
        match (&self.relevance, agentic_filters) {
            (Some(relevance), true) => {
                Ok(prune(relevance.as_ref(), text, hits, self.relevance_threshold).await)
            }
            (None, true) => {
                tracing::debug!(knowledge_base = %self.name, "agentic filtering requested without a relevance filter");
                Ok(hits)
            }
            _ => Ok(hits),
        }
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("name", &self.name)
            .field("sources", &self.sources)
            .field("collection", &self.collection.name())
            .field("embedder", &self.embedder.model_id())
            .finish_non_exhaustive()
    }
}

fn as_retrieval(err: AgentError) -> AgentError {
    match err {
        AgentError::ConfigError(_) | AgentError::RetrievalError(_) => err,
        other => AgentError::RetrievalError(other.to_string()),
    }
}

fn to_record(chunk: Chunk, total: usize, embedding: EmbeddingVector) -> VectorRecord {
    VectorRecord {
        id: VectorRecord::chunk_id(&chunk.document_id, chunk.index),
        document_id: chunk.document_id,
        chunk_index: chunk.index,
        chunk_total: total,
        text: chunk.text,
        metadata: chunk.metadata,
        embedding,
    }
}
