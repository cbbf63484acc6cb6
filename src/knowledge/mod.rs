//! Knowledge bases
//!
//! Documents are read from PDF and CSV sources, split by a chunking
//! strategy, embedded, and written into a vector collection. Loading is
//! idempotent and resumable; querying embeds the question and searches the
//! collection, optionally pruning hits with a relevance filter.

pub mod base;
pub mod chunking;
pub mod document;
pub mod relevance;

pub use base::{DocumentFailure, KnowledgeBase, KnowledgeSource, LoadReport};
pub use chunking::{
    fixed_spans, strategy_from_config, AgenticChunking, Chunk, ChunkingStrategy,
    FixedSizeChunking, Span,
};
pub use document::{CsvReader, Document, DocumentReader, MediaType, PdfReader};
pub use relevance::{ModelRelevanceFilter, RelevanceFilter};
