//! Deterministic in-process doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use brainspark::embedding::{Embedder, EmbeddingVector};
use brainspark::errors::{AgentError, Result};
use brainspark::memory::{ConsolidationPolicy, MemoryRecord, MemoryStore};
use brainspark::model::{Completion, CompletionRequest, ModelClient, ToolCall};
use brainspark::session::{SessionStorage, SessionTurn};
use brainspark::tools::{ToolAdapter, ToolSchema};
use brainspark::vector::VectorRecord;

pub const DIMS: usize = 16;
pub const EMBED_MODEL: &str = "hash-embed";

/// Bag-of-words hashing embedder. Texts containing `poison` fail while
/// poisoning is switched on; `broken` makes every call fail.
pub struct HashEmbedder {
    dims: usize,
    pub poison: Mutex<Option<String>>,
    pub broken: AtomicBool,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::with_dims(DIMS)
    }

    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims,
            poison: Mutex::new(None),
            broken: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn poison(&self, marker: Option<&str>) {
        *self.poison.lock().unwrap() = marker.map(str::to_string);
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dims];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            let hash = word
                .bytes()
                .fold(5381u64, |h, b| h.wrapping_mul(33).wrapping_add(b as u64));
            values[(hash % self.dims as u64) as usize] += 1.0;
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        } else {
            values[0] = 1.0;
        }
        values
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        EMBED_MODEL
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(AgentError::EmbeddingError {
                reason: "provider unavailable".to_string(),
                retryable: true,
            });
        }
        let poison = self.poison.lock().unwrap().clone();
        texts
            .iter()
            .map(|text| match &poison {
                Some(marker) if text.contains(marker.as_str()) => Err(AgentError::EmbeddingError {
                    reason: format!("cannot embed text containing {}", marker),
                    retryable: false,
                }),
                _ => Ok(EmbeddingVector::new(self.vector(text), EMBED_MODEL)),
            })
            .collect()
    }
}

/// Replays scripted completions for turn requests; JSON-mode requests
/// (memory distillation, relevance scoring) get `json_reply`.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Completion>>>,
    pub json_reply: Mutex<String>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<Completion>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            json_reply: Mutex::new("[]".to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(Completion::text(text))])
    }

    pub fn with_json_reply(self, reply: &str) -> Self {
        *self.json_reply.lock().unwrap() = reply.to_string();
        self
    }

    /// Turn requests seen so far, excluding JSON-mode ones
    pub fn turn_requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.json_output)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        if request.json_output {
            return Ok(Completion::text(self.json_reply.lock().unwrap().clone()));
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Completion::text("(script exhausted)")))
    }
}

/// Asks for a tool every time tools are on offer; answers otherwise
pub struct ToolHungryModel {
    pub offered: AtomicUsize,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ToolHungryModel {
    pub fn new() -> Self {
        Self {
            offered: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ModelClient for ToolHungryModel {
    fn model_id(&self) -> &str {
        "tool-hungry"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        if request.json_output {
            return Ok(Completion::text("[]"));
        }
        if request.tools.is_empty() {
            return Ok(Completion::text("Here is what I found."));
        }
        let n = self.offered.fetch_add(1, Ordering::SeqCst);
        Ok(Completion::tools(vec![ToolCall::new(
            format!("call_{}", n),
            "keyword_lookup",
            json!({ "query": format!("seo {}", n) }),
        )]))
    }
}

/// Counts invocations and echoes its query
pub struct KeywordTool {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl KeywordTool {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ToolAdapter for KeywordTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "keyword_lookup",
            "Look up search volume for a keyword",
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        )
        .read_only()
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AgentError::tool("keyword_lookup", "quota exceeded"));
        }
        let query = args["query"].as_str().unwrap_or_default();
        Ok(format!("{}: 1200 searches/month", query))
    }
}

/// Session storage whose writes always fail after reads succeed
pub struct FailingWrites<S> {
    pub inner: S,
}

#[async_trait]
impl<S: SessionStorage> SessionStorage for FailingWrites<S> {
    async fn append_turn(
        &self,
        _agent_id: &str,
        _user_id: &str,
        _session_id: &str,
        _turn: &SessionTurn,
    ) -> Result<()> {
        Err(AgentError::SessionError("disk full".to_string()))
    }

    async fn load_history(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<SessionTurn>> {
        self.inner.load_history(agent_id, user_id, session_id).await
    }

    async fn list_sessions(&self, agent_id: &str, user_id: &str) -> Result<Vec<String>> {
        self.inner.list_sessions(agent_id, user_id).await
    }

    async fn delete_session(&self, agent_id: &str, user_id: &str, session_id: &str) -> Result<bool> {
        self.inner.delete_session(agent_id, user_id, session_id).await
    }
}

/// Memory store whose full listing fails while recall and record work
pub struct UnlistedFacts<M> {
    pub inner: M,
}

#[async_trait]
impl<M: MemoryStore> MemoryStore for UnlistedFacts<M> {
    async fn record(&self, agent_id: &str, user_id: &str, fact: &str) -> Result<MemoryRecord> {
        self.inner.record(agent_id, user_id, fact).await
    }

    async fn recall(
        &self,
        agent_id: &str,
        user_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<MemoryRecord>> {
        self.inner.recall(agent_id, user_id, query, k).await
    }

    async fn facts(&self, _agent_id: &str, _user_id: &str) -> Result<Vec<MemoryRecord>> {
        Err(AgentError::MemoryError("index unreadable".to_string()))
    }

    async fn consolidate(
        &self,
        agent_id: &str,
        user_id: &str,
        policy: ConsolidationPolicy,
    ) -> Result<usize> {
        self.inner.consolidate(agent_id, user_id, policy).await
    }
}

/// Record with a unit-length vector at the given cosine to `[1, 0, 0]`
pub fn record_at(document_id: &str, cosine: f32, metadata: Value) -> VectorRecord {
    let metadata: Map<String, Value> = serde_json::from_value(metadata).unwrap();
    let sine = (1.0 - cosine * cosine).max(0.0).sqrt();
    VectorRecord {
        id: VectorRecord::chunk_id(document_id, 0),
        document_id: document_id.to_string(),
        chunk_index: 0,
        chunk_total: 1,
        text: format!("text of {}", document_id),
        metadata,
        embedding: EmbeddingVector::new(vec![cosine, sine, 0.0], EMBED_MODEL),
    }
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
