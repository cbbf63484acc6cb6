//! Agent identity and wiring

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::errors::{AgentError, Result};
use crate::knowledge::KnowledgeBase;
use crate::memory::MemoryStore;
use crate::model::ModelClient;
use crate::session::SessionStorage;
use crate::storage::safe_component;
use crate::tools::Toolbelt;

/// A configured agent: persona plus non-owning handles to its stores.
///
/// Built once at startup and shared read-only across turns. Knowledge bases
/// and stores may be shared by several profiles.
#[derive(Clone)]
pub struct AgentProfile {
    pub name: String,
    /// Stable identifier used to namespace persisted state
    pub id: String,
    /// Short role tag, e.g. "seo" or "content"
    pub role: String,
    pub instructions: Vec<String>,
    pub model: Arc<dyn ModelClient>,
    pub knowledge: Option<Arc<KnowledgeBase>>,
    pub memory: Option<Arc<dyn MemoryStore>>,
    pub sessions: Arc<dyn SessionStorage>,
    pub toolbelt: Arc<Toolbelt>,
    pub settings: RuntimeConfig,
}

impl AgentProfile {
    pub fn new(
        name: &str,
        id: &str,
        model: Arc<dyn ModelClient>,
        sessions: Arc<dyn SessionStorage>,
    ) -> Result<Self> {
        safe_component("agent", id).map_err(|e| AgentError::config(e.to_string()))?;
        if name.trim().is_empty() {
            return Err(AgentError::config("agent name cannot be empty"));
        }

        Ok(Self {
            name: name.to_string(),
            id: id.to_string(),
            role: String::new(),
            instructions: Vec::new(),
            model,
            knowledge: None,
            memory: None,
            sessions,
            toolbelt: Arc::new(Toolbelt::new()),
            settings: RuntimeConfig::default(),
        })
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }

    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instructions.push(instruction.to_string());
        self
    }

    pub fn with_instructions<I, S>(mut self, instructions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instructions.extend(instructions.into_iter().map(Into::into));
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_toolbelt(mut self, toolbelt: Toolbelt) -> Self {
        self.toolbelt = Arc::new(toolbelt);
        self
    }

    pub fn with_settings(mut self, settings: RuntimeConfig) -> Self {
        self.settings = settings;
        self
    }
}

impl std::fmt::Debug for AgentProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentProfile")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("role", &self.role)
            .field("model", &self.model.model_id())
            .field("knowledge", &self.knowledge.as_ref().map(|k| k.name().to_string()))
            .field("memory", &self.memory.is_some())
            .field("tools", &self.toolbelt.names())
            .finish_non_exhaustive()
    }
}
