//! Per-agent construction from `CoreConfig`
//!
//! Every store, collection and client an agent uses is built here and passed
//! in explicitly, so several agents can coexist in one process. Persisted
//! state is namespaced by agent id:
//!
//! ```text
//! <root>/<agent>/memory/<user>.jsonl
//! <root>/<agent>/sessions/<user>/<session>.jsonl
//! <root>/<agent>/vectors/<collection>.jsonl     (local backend)
//! <agent>__<collection>                          (Qdrant collection name)
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agent::AgentProfile;
use crate::config::{load_dotenv, resolve_secret, CoreConfig, Provider, VectorBackend};
use crate::embedding::{Embedder, GeminiEmbedder, OllamaEmbedder};
use crate::errors::{AgentError, Result};
use crate::knowledge::chunking::{strategy_from_config, ChunkingStrategy};
use crate::knowledge::relevance::ModelRelevanceFilter;
use crate::knowledge::{KnowledgeBase, KnowledgeSource};
use crate::memory::{FileMemoryStore, MemoryStore};
use crate::model::ollama::DEFAULT_OLLAMA_URL;
use crate::model::{GeminiClient, ModelClient, OllamaClient};
use crate::retry::RetryManager;
use crate::session::{FileSessionStorage, SessionStorage};
use crate::storage::safe_component;
use crate::telemetry::init_tracing;
use crate::tools::{
    CsvDescribeTool, CsvReadRowsTool, FetchPageTool, ListDirTool, ReadFileTool, ShellTool,
    TavilySearchTool, ToolContext, Toolbelt, WikipediaSearchTool, WriteFileTool,
};
use crate::vector::{CollectionSpec, LocalCollection, QdrantCollection, VectorCollection};

const RETRY_BASE_DELAY_MS: u64 = 500;

/// Names accepted by [`Wiring::toolbelt`]
pub const BUILTIN_TOOLS: &[&str] = &[
    "read_file",
    "write_file",
    "list_dir",
    "run_shell_command",
    "fetch_page",
    "wikipedia_search",
    "tavily_search",
    "csv_describe",
    "csv_read_rows",
];

/// Factory for agent components. Memory and session stores are created once
/// and shared, so writers for the same key serialize across agents.
/// Collections are opened once per location and handed out as the same
/// handle, so every writer sees one record map.
#[derive(Clone)]
pub struct Wiring {
    config: CoreConfig,
    root: PathBuf,
    memory: Arc<FileMemoryStore>,
    sessions: Arc<FileSessionStorage>,
    collections: Arc<Mutex<HashMap<String, Arc<dyn VectorCollection>>>>,
}

impl Wiring {
    /// Validate `config` and prepare the shared stores
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let root = config.storage_root();
        Ok(Self {
            memory: Arc::new(FileMemoryStore::new(&root)),
            sessions: Arc::new(FileSessionStorage::new(&root)),
            collections: Arc::new(Mutex::new(HashMap::new())),
            root,
            config,
        })
    }

    /// Load `.env`, then the config file (default location when `None`),
    /// and install the log subscriber it describes
    pub fn from_environment(path: Option<&Path>) -> Result<Self> {
        load_dotenv();
        let config = CoreConfig::load(path)?;
        init_tracing(&config.logging);
        Self::new(config)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn storage_root(&self) -> &Path {
        &self.root
    }

    pub fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        let cfg = &self.config.embedder;
        let retry = RetryManager::with_config(cfg.max_attempts, RETRY_BASE_DELAY_MS);

        let embedder: Arc<dyn Embedder> = match cfg.provider {
            Provider::Gemini => {
                let key = resolve_secret(&cfg.api_key_env)?;
                let mut embedder = GeminiEmbedder::new(&cfg.model, cfg.dimensions, key, cfg.timeout())?
                    .with_retry(retry);
                if let Some(url) = &cfg.base_url {
                    embedder = embedder.with_base_url(url);
                }
                Arc::new(embedder)
            }
            Provider::Ollama => {
                let url = cfg.base_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
                Arc::new(
                    OllamaEmbedder::new(url, &cfg.model, cfg.dimensions, cfg.timeout())?
                        .with_retry(retry),
                )
            }
        };
        Ok(embedder)
    }

    /// Chat model from the `[model]` section
    pub fn model(&self) -> Result<Arc<dyn ModelClient>> {
        self.model_named(&self.config.model.model, self.config.model.temperature)
    }

    /// Same provider settings as `[model]`, different model name
    pub fn model_named(&self, name: &str, temperature: f32) -> Result<Arc<dyn ModelClient>> {
        let cfg = &self.config.model;
        let retry = RetryManager::with_config(cfg.max_attempts, RETRY_BASE_DELAY_MS);

        let client: Arc<dyn ModelClient> = match cfg.provider {
            Provider::Gemini => {
                let key = resolve_secret(&cfg.api_key_env)?;
                let mut client = GeminiClient::new(name, key, cfg.timeout())?
                    .with_temperature(temperature)
                    .with_retry(retry);
                if let Some(url) = &cfg.base_url {
                    client = client.with_base_url(url);
                }
                Arc::new(client)
            }
            Provider::Ollama => {
                let url = cfg.base_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
                Arc::new(
                    OllamaClient::with_config(url, name, cfg.timeout())?
                        .with_temperature(temperature)
                        .with_retry(retry),
                )
            }
        };
        Ok(client)
    }

    /// Default chunking strategy; agentic chunking gets its own model
    pub fn chunking(&self) -> Result<Arc<dyn ChunkingStrategy>> {
        let cfg = &self.config.chunking;
        let model = match cfg.strategy {
            crate::config::ChunkingKind::Agentic => {
                let name = cfg.model.as_deref().unwrap_or(&self.config.model.model);
                Some(self.model_named(name, cfg.temperature)?)
            }
            crate::config::ChunkingKind::Fixed => None,
        };
        Ok(strategy_from_config(cfg, model))
    }

    /// Open (creating if absent) the named collection for an agent. Repeated
    /// calls for the same agent and name return the same handle.
    pub async fn collection(&self, agent_id: &str, name: &str) -> Result<Arc<dyn VectorCollection>> {
        let agent = safe_component("agent", agent_id).map_err(|e| AgentError::config(e.to_string()))?;
        let name = safe_component("collection", name).map_err(|e| AgentError::config(e.to_string()))?;
        let cfg = &self.config.vector;

        let key = match cfg.backend {
            VectorBackend::Local => self
                .root
                .join(agent)
                .join("vectors")
                .join(format!("{}.jsonl", name))
                .to_string_lossy()
                .to_string(),
            VectorBackend::Qdrant => format!("{}__{}", agent, name),
        };

        let mut open = self.collections.lock().await;
        if let Some(collection) = open.get(&key) {
            return Ok(collection.clone());
        }

        let collection: Arc<dyn VectorCollection> = match cfg.backend {
            VectorBackend::Local => {
                let spec = CollectionSpec::new(name, self.config.embedder.dimensions, &self.config.embedder.model)
                    .with_distance(cfg.distance);
                Arc::new(LocalCollection::open(spec, &key)?)
            }
            VectorBackend::Qdrant => {
                let spec = CollectionSpec::new(&key, self.config.embedder.dimensions, &self.config.embedder.model)
                    .with_distance(cfg.distance);
                let api_key = cfg.api_key_env.as_deref().map(resolve_secret).transpose()?;
                let retry = RetryManager::with_config(cfg.max_attempts, RETRY_BASE_DELAY_MS);
                Arc::new(QdrantCollection::connect(&cfg.url, api_key, spec, cfg.timeout(), retry).await?)
            }
        };

        tracing::debug!(agent_id, collection = name, location = %key, "opened collection");
        open.insert(key, collection.clone());
        Ok(collection)
    }

    /// Knowledge base over an agent's collection with the configured
    /// embedder, chunking and (when enabled) relevance filter
    pub async fn knowledge_base(
        &self,
        agent_id: &str,
        name: &str,
        sources: Vec<KnowledgeSource>,
    ) -> Result<KnowledgeBase> {
        let collection = self.collection(agent_id, name).await?;
        let mut kb = KnowledgeBase::new(name, self.embedder()?, collection)?
            .with_chunking(self.chunking()?)
            .with_batch_size(self.config.embedder.batch_size);

        for source in sources {
            kb = kb.with_source(source);
        }

        let runtime = &self.config.runtime;
        if runtime.agentic_filters {
            let filter = ModelRelevanceFilter::new(self.model()?);
            kb = kb.with_relevance_filter(Arc::new(filter), runtime.relevance_threshold);
        }
        Ok(kb)
    }

    pub fn memory_store(&self) -> Arc<dyn MemoryStore> {
        self.memory.clone()
    }

    pub fn session_storage(&self) -> Arc<dyn SessionStorage> {
        self.sessions.clone()
    }

    /// Built-in tools by name, in the order given
    pub fn toolbelt(&self, working_dir: &Path, names: &[&str]) -> Result<Toolbelt> {
        let timeout = self.config.runtime.tool_timeout();
        let context = ToolContext::new(working_dir.to_path_buf()).with_timeout(timeout);
        let mut belt = Toolbelt::new()
            .with_timeout(timeout)
            .with_max_output_size(context.max_output_size);

        for name in names {
            match *name {
                "read_file" => belt.register(Arc::new(ReadFileTool::new(&context)?))?,
                "write_file" => belt.register(Arc::new(WriteFileTool::new(&context)?))?,
                "list_dir" => belt.register(Arc::new(ListDirTool::new(&context)?))?,
                "run_shell_command" => belt.register(Arc::new(ShellTool::new(&context)))?,
                "fetch_page" => belt.register(Arc::new(FetchPageTool::new(&context)?))?,
                "wikipedia_search" => belt.register(Arc::new(WikipediaSearchTool::new(&context)?))?,
                "tavily_search" => belt.register(Arc::new(TavilySearchTool::from_env(&context)?))?,
                "csv_describe" => belt.register(Arc::new(CsvDescribeTool::new(&context)?))?,
                "csv_read_rows" => belt.register(Arc::new(CsvReadRowsTool::new(&context)?))?,
                other => {
                    return Err(AgentError::config(format!(
                        "unknown tool '{}', expected one of: {}",
                        other,
                        BUILTIN_TOOLS.join(", ")
                    )))
                }
            }
        }
        Ok(belt)
    }

    /// Profile with the configured model, shared stores and runtime settings.
    /// Knowledge and tools are attached by the caller.
    pub fn profile(&self, name: &str, agent_id: &str) -> Result<AgentProfile> {
        Ok(AgentProfile::new(name, agent_id, self.model()?, self.session_storage())?
            .with_memory(self.memory_store())
            .with_settings(self.config.runtime.clone()))
    }
}

impl std::fmt::Debug for Wiring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wiring")
            .field("root", &self.root)
            .field("embedder", &self.config.embedder.model)
            .field("model", &self.config.model.model)
            .field("backend", &self.config.vector.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingKind;
    use tempfile::TempDir;

    fn local_config(root: &Path) -> CoreConfig {
        let mut config = CoreConfig::default();
        config.storage.root = root.to_string_lossy().to_string();
        config.embedder.provider = Provider::Ollama;
        config.model.provider = Provider::Ollama;
        config
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = CoreConfig::default();
        config.embedder.dimensions = 0;
        assert!(Wiring::new(config).unwrap_err().is_fatal_config());
    }

    #[tokio::test]
    async fn test_local_collections_are_namespaced_by_agent() {
        let temp = TempDir::new().unwrap();
        let wiring = Wiring::new(local_config(temp.path())).unwrap();

        let seo = wiring.collection("seo", "lean_seo").await.unwrap();
        let content = wiring.collection("content", "lean_seo").await.unwrap();
        assert_eq!(seo.name(), content.name());
        assert_eq!(seo.dimension(), 768);
        assert!(temp.path().join("seo/vectors").is_dir());
        assert!(temp.path().join("content/vectors").is_dir());
        assert!(wiring.collection("../etc", "x").await.err().expect("expected error").is_fatal_config());
    }

    #[tokio::test]
    async fn test_collection_handles_are_shared() {
        use crate::embedding::EmbeddingVector;
        use crate::vector::VectorRecord;

        let temp = TempDir::new().unwrap();
        let mut config = local_config(temp.path());
        config.embedder.dimensions = 2;
        config.embedder.model = "nomic-embed-text".to_string();
        let wiring = Wiring::new(config).unwrap();

        let record = |doc: &str| VectorRecord {
            id: VectorRecord::chunk_id(doc, 0),
            document_id: doc.to_string(),
            chunk_index: 0,
            chunk_total: 1,
            text: format!("{} text", doc),
            metadata: Default::default(),
            embedding: EmbeddingVector::new(vec![1.0, 0.0], "nomic-embed-text"),
        };

        let first = wiring.collection("seo", "kb").await.unwrap();
        let second = wiring.collection("seo", "kb").await.unwrap();
        first.upsert(vec![record("keywords")]).await.unwrap();
        second.upsert(vec![record("channels")]).await.unwrap();
        assert_eq!(first.count().await.unwrap(), 2);

        // A fresh process reads both records back from the snapshot
        let reopened = Wiring::new(wiring.config().clone()).unwrap();
        let collection = reopened.collection("seo", "kb").await.unwrap();
        assert_eq!(collection.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_qdrant_key_is_config_error() {
        let temp = TempDir::new().unwrap();
        let mut config = local_config(temp.path());
        config.vector.backend = VectorBackend::Qdrant;
        config.vector.api_key_env = Some("BRAINSPARK_TEST_NO_SUCH_QDRANT_KEY".to_string());
        let wiring = Wiring::new(config).unwrap();

        let err = wiring.collection("seo", "kb").await.err().expect("expected error");
        assert!(err.is_fatal_config());
    }

    #[test]
    fn test_missing_gemini_key_is_config_error() {
        let temp = TempDir::new().unwrap();
        let mut config = local_config(temp.path());
        config.model.provider = Provider::Gemini;
        config.model.api_key_env = "BRAINSPARK_TEST_NO_SUCH_KEY".to_string();
        let wiring = Wiring::new(config).unwrap();
        assert!(wiring.model().err().expect("expected error").is_fatal_config());
    }

    #[test]
    fn test_agentic_chunking_uses_model() {
        let temp = TempDir::new().unwrap();
        let mut config = local_config(temp.path());
        config.chunking.strategy = ChunkingKind::Agentic;
        let wiring = Wiring::new(config).unwrap();
        assert_eq!(wiring.chunking().unwrap().name(), "agentic");
    }

    #[test]
    fn test_toolbelt_by_name() {
        let temp = TempDir::new().unwrap();
        let wiring = Wiring::new(local_config(temp.path())).unwrap();

        let belt = wiring
            .toolbelt(temp.path(), &["read_file", "csv_describe", "run_shell_command"])
            .unwrap();
        assert_eq!(belt.names(), vec!["read_file", "csv_describe", "run_shell_command"]);

        let err = wiring.toolbelt(temp.path(), &["teleport"]).unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[test]
    fn test_profile_shares_stores() {
        let temp = TempDir::new().unwrap();
        let wiring = Wiring::new(local_config(temp.path())).unwrap();
        let profile = wiring.profile("SEO Agent", "seo").unwrap();
        assert!(profile.memory.is_some());
        assert_eq!(profile.settings.max_tool_rounds, 8);
    }
}
