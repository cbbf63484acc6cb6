//! Chunking strategies
//!
//! Both strategies return spans that tile the document: dropping each
//! chunk's leading `overlap` bytes and concatenating the rest rebuilds the
//! text exactly. Agentic chunking degrades to fixed-size windows whenever the
//! model call fails or proposes unusable boundaries, so chunking never fails
//! an ingest.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;

use crate::config::{ChunkingConfig, ChunkingKind};
use crate::knowledge::document::Document;
use crate::model::{strip_code_fence, CompletionRequest, ModelClient};

/// A retrieval-sized span of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub index: usize,
    /// Byte offsets into the document text
    pub start: usize,
    pub end: usize,
    /// Leading bytes shared with the previous chunk
    pub overlap: usize,
    pub text: String,
    pub metadata: Map<String, JsonValue>,
}

impl Chunk {
    /// The part of this chunk not already covered by its predecessor
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap..]
    }
}

/// Byte span with overlap, relative to some base text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub overlap: usize,
}

/// Boundary policy
#[async_trait]
pub trait ChunkingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Split a document. Deterministic for a given input and configuration
    /// when the strategy makes no model calls.
    async fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Materialize spans over a document
pub fn build_chunks(document: &Document, spans: &[Span], strategy: &str) -> Vec<Chunk> {
    let base = document.metadata();
    spans
        .iter()
        .enumerate()
        .map(|(index, span)| {
            let mut metadata = base.clone();
            metadata.insert("chunking".to_string(), json!(strategy));
            if let Some((first, last)) = document.row_range(span.start, span.end) {
                metadata.insert("row_start".to_string(), json!(first));
                metadata.insert("row_end".to_string(), json!(last));
            }
            Chunk {
                document_id: document.id.clone(),
                index,
                start: span.start,
                end: span.end,
                overlap: span.overlap,
                text: document.text[span.start..span.end].to_string(),
                metadata,
            }
        })
        .collect()
}

/// Fixed-size windows of `size` characters, backed off to the last
/// whitespace so words are not split. A remainder shorter than `size` still
/// forms a final window.
pub fn fixed_spans(text: &str, size: usize, overlap: usize) -> Vec<Span> {
    let size = size.max(1);
    let overlap = overlap.min(size - 1);

    // Byte offset of every char boundary, including the end of text
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = bounds.len() - 1;

    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut covered = 0usize;
    while start < n {
        let mut end = (start + size).min(n);
        if end < n {
            let floor = start.max(covered) + 1;
            if let Some(cut) = (floor..=end).rev().find(|&j| {
                text[bounds[j - 1]..bounds[j]]
                    .chars()
                    .next()
                    .map_or(false, char::is_whitespace)
            }) {
                end = cut;
            }
        }

        spans.push(Span {
            start: bounds[start],
            end: bounds[end],
            overlap: bounds[covered.max(start)] - bounds[start],
        });
        covered = end;
        if end == n {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    spans
}

/// Deterministic windowing, no external calls
#[derive(Debug, Clone)]
pub struct FixedSizeChunking {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl FixedSizeChunking {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let spans = fixed_spans(&document.text, self.chunk_size, self.overlap);
        build_chunks(document, &spans, "fixed")
    }
}

impl Default for FixedSizeChunking {
    fn default() -> Self {
        Self::new(5000, 0)
    }
}

#[async_trait]
impl ChunkingStrategy for FixedSizeChunking {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.split(document)
    }
}

/// Model-proposed semantic boundaries.
///
/// The document is cut into coarse sections; for each section the model
/// returns the character offsets where new chunks begin.
pub struct AgenticChunking {
    model: Arc<dyn ModelClient>,
    chunk_size: usize,
    section_chars: usize,
    temperature: f32,
    fallback: FixedSizeChunking,
}

impl AgenticChunking {
    pub fn new(model: Arc<dyn ModelClient>, chunk_size: usize) -> Self {
        Self {
            model,
            chunk_size,
            section_chars: chunk_size.saturating_mul(4),
            temperature: 0.2,
            fallback: FixedSizeChunking::new(chunk_size, 0),
        }
    }

    pub fn with_section_chars(mut self, section_chars: usize) -> Self {
        self.section_chars = section_chars.max(self.chunk_size);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Fixed-size strategy used when the model cannot be trusted
    pub fn with_fallback(mut self, fallback: FixedSizeChunking) -> Self {
        self.fallback = fallback;
        self
    }

    fn prompt(&self, section: &str) -> CompletionRequest {
        CompletionRequest::prompt(format!(
            "Split the text below into semantically coherent chunks of at most {} characters. \
             Respond with a JSON array of the character offsets where each new chunk starts, \
             in increasing order, excluding 0. Respond with [] if the text is one chunk.\n\n\
             <text>\n{}\n</text>",
            self.chunk_size, section
        ))
        .expect_json()
    }

    /// Ask for breakpoints, retrying once at temperature 0 if the call itself fails
    async fn propose(&self, document_id: &str, section: &str) -> Option<String> {
        let first = self
            .model
            .complete(&self.prompt(section).with_temperature(self.temperature))
            .await;
        match first {
            Ok(completion) => return Some(completion.content),
            Err(e) => {
                tracing::warn!(document = %document_id, error = %e, "breakpoint proposal failed, retrying");
            }
        }

        match self
            .model
            .complete(&self.prompt(section).with_temperature(0.0))
            .await
        {
            Ok(completion) => Some(completion.content),
            Err(e) => {
                tracing::warn!(document = %document_id, error = %e, "breakpoint proposal failed again");
                None
            }
        }
    }

    /// Spans for one section relative to the section start, or `None` when
    /// the model response is unusable.
    fn spans_from_response(&self, section: &str, response: &str) -> Option<Vec<Span>> {
        let offsets = parse_breakpoints(response)?;
        let char_count = section.chars().count();

        let valid = offsets.windows(2).all(|w| w[0] < w[1])
            && offsets.iter().all(|&o| o > 0 && o < char_count);
        if !valid {
            return None;
        }

        let bounds: Vec<usize> = section
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(section.len()))
            .collect();

        let cuts: Vec<usize> = std::iter::once(0)
            .chain(offsets.iter().copied())
            .chain(std::iter::once(char_count))
            .collect();

        let mut spans = Vec::new();
        for pair in cuts.windows(2) {
            let (start, end) = (bounds[pair[0]], bounds[pair[1]]);
            if pair[1] - pair[0] <= self.chunk_size {
                spans.push(Span {
                    start,
                    end,
                    overlap: 0,
                });
            } else {
                spans.extend(
                    fixed_spans(&section[start..end], self.chunk_size, 0)
                        .into_iter()
                        .map(|s| Span {
                            start: s.start + start,
                            end: s.end + start,
                            overlap: 0,
                        }),
                );
            }
        }
        Some(spans)
    }
}

fn parse_breakpoints(response: &str) -> Option<Vec<usize>> {
    let value: JsonValue = serde_json::from_str(strip_code_fence(response)).ok()?;
    let array = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("breakpoints") {
            Some(JsonValue::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    array
        .into_iter()
        .map(|v| v.as_u64().map(|n| n as usize))
        .collect()
}

#[async_trait]
impl ChunkingStrategy for AgenticChunking {
    fn name(&self) -> &'static str {
        "agentic"
    }

    async fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let sections = fixed_spans(&document.text, self.section_chars, 0);
        let mut spans = Vec::new();
        let mut fell_back = false;

        for section_span in sections {
            let section = &document.text[section_span.start..section_span.end];
            let proposed = match self.propose(&document.id, section).await {
                Some(response) => self.spans_from_response(section, &response),
                None => None,
            };

            let local = match proposed {
                Some(local) => local,
                None => {
                    fell_back = true;
                    fixed_spans(section, self.fallback.chunk_size, self.fallback.overlap)
                }
            };
            spans.extend(local.into_iter().map(|s| Span {
                start: s.start + section_span.start,
                end: s.end + section_span.start,
                overlap: s.overlap,
            }));
        }

        if fell_back {
            tracing::warn!(document = %document.id, "agentic chunking fell back to fixed-size windows");
        }
        let label = if fell_back { "agentic+fixed" } else { "agentic" };
        build_chunks(document, &spans, label)
    }
}

/// Strategy described by a chunking config section
pub fn strategy_from_config(
    config: &ChunkingConfig,
    model: Option<Arc<dyn ModelClient>>,
) -> Arc<dyn ChunkingStrategy> {
    let fixed = FixedSizeChunking::new(config.chunk_size, config.overlap);
    match (config.strategy, model) {
        (ChunkingKind::Agentic, Some(model)) => Arc::new(
            AgenticChunking::new(model, config.chunk_size)
                .with_section_chars(config.section_chars)
                .with_temperature(config.temperature)
                .with_fallback(fixed),
        ),
        (ChunkingKind::Agentic, None) => {
            tracing::warn!("agentic chunking configured without a model, using fixed-size windows");
            Arc::new(fixed)
        }
        (ChunkingKind::Fixed, _) => Arc::new(fixed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AgentError, Result};
    use crate::knowledge::document::MediaType;
    use crate::model::Completion;
    use quickcheck_macros::quickcheck;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn document(text: &str) -> Document {
        Document::new("doc", "doc.pdf", MediaType::Pdf, text)
    }

    fn rebuild(text: &str, spans: &[Span]) -> String {
        spans
            .iter()
            .map(|s| &text[s.start + s.overlap..s.end])
            .collect()
    }

    struct Scripted {
        replies: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
        temperatures: Mutex<Vec<Option<f32>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
                temperatures: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for Scripted {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.temperatures.lock().unwrap().push(request.temperature);
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(AgentError::Generic("no scripted reply".to_string()));
            }
            replies.remove(0).map(Completion::text)
        }
    }

    #[test]
    fn test_trailing_remainder_forms_final_chunk() {
        let spans = fixed_spans("aaaa bbbb cc", 5, 0);
        assert_eq!(rebuild("aaaa bbbb cc", &spans), "aaaa bbbb cc");
        assert_eq!(spans.last().unwrap().end, 12);
        assert!(spans.len() >= 3);
    }

    #[test]
    fn test_windows_break_after_whitespace() {
        let text = "alpha beta gamma";
        let spans = fixed_spans(text, 8, 0);
        assert_eq!(&text[spans[0].start..spans[0].end], "alpha ");
    }

    #[test]
    fn test_overlap_is_reported() {
        let text = "abcdefghij";
        let spans = fixed_spans(text, 4, 2);
        assert_eq!(spans[0], Span { start: 0, end: 4, overlap: 0 });
        assert_eq!(spans[1], Span { start: 2, end: 6, overlap: 2 });
        assert_eq!(rebuild(text, &spans), text);
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let text = "résumé über naïve café";
        let spans = fixed_spans(text, 3, 1);
        assert_eq!(rebuild(text, &spans), text);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(fixed_spans("", 10, 0).is_empty());
    }

    #[quickcheck]
    fn prop_fixed_spans_cover_text(text: String, size: u8, overlap: u8) -> bool {
        let size = (size as usize % 64) + 1;
        let overlap = overlap as usize % size;
        let spans = fixed_spans(&text, size, overlap);
        rebuild(&text, &spans) == text
    }

    #[test]
    fn test_csv_chunks_carry_row_range() {
        let mut doc = Document::new("webdata", "webdata.csv", MediaType::Csv, "a: 1\nb: 2\nc: 3\n");
        doc.row_offsets = vec![0, 5, 10];
        let chunks = FixedSizeChunking::new(6, 0).split(&doc);
        assert_eq!(chunks[0].metadata["row_start"], json!(1));
        assert_eq!(chunks.last().unwrap().metadata["row_end"], json!(3));
    }

    #[tokio::test]
    async fn test_agentic_uses_model_breakpoints() {
        let text = "Intro to SEO. Keyword research basics.";
        let model = Arc::new(Scripted::new(vec![Ok("```json\n[14]\n```".to_string())]));
        let chunker = AgenticChunking::new(model, 100);

        let chunks = chunker.chunk(&document(text)).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Intro to SEO. ");
        assert_eq!(chunks[1].text, "Keyword research basics.");
        assert_eq!(chunks[1].metadata["chunking"], json!("agentic"));
    }

    #[tokio::test]
    async fn test_agentic_rejects_non_monotonic_offsets() {
        let text = "one two three four five six";
        let model = Arc::new(Scripted::new(vec![Ok("[10, 4]".to_string())]));
        let chunker = AgenticChunking::new(model, 10);

        let chunks = chunker.chunk(&document(text)).await;
        let rebuilt: String = chunks.iter().map(|c| c.fresh_text()).collect();
        assert_eq!(rebuilt, text);
        assert_eq!(chunks[0].metadata["chunking"], json!("agentic+fixed"));
    }

    #[tokio::test]
    async fn test_agentic_retries_once_then_falls_back() {
        let text = "Growth loops compound. Retention beats acquisition.";
        let model = Arc::new(Scripted::new(vec![]));
        let chunker = AgenticChunking::new(model.clone(), 20);

        let chunks = chunker.chunk(&document(text)).await;
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert!(!chunks.is_empty());
        let rebuilt: String = chunks.iter().map(|c| c.fresh_text()).collect();
        assert_eq!(rebuilt, text);
    }

    #[tokio::test]
    async fn test_agentic_retry_can_succeed() {
        let text = "First idea. Second idea.";
        let model = Arc::new(Scripted::new(vec![
            Err(AgentError::timeout("chunk", std::time::Duration::from_secs(1))),
            Ok("[12]".to_string()),
        ]));
        let chunker = AgenticChunking::new(model.clone(), 100).with_temperature(0.4);

        let chunks = chunker.chunk(&document(text)).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata["chunking"], json!("agentic"));
        assert_eq!(
            *model.temperatures.lock().unwrap(),
            vec![Some(0.4), Some(0.0)]
        );
    }

    #[tokio::test]
    async fn test_oversized_model_span_is_subsplit() {
        let text = "aaaa bbbb cccc dddd";
        let model = Arc::new(Scripted::new(vec![Ok("[]".to_string())]));
        let chunker = AgenticChunking::new(model, 5);

        let chunks = chunker.chunk(&document(text)).await;
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 5));
    }
}
