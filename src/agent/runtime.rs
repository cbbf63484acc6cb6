//! Turn execution
//!
//! `Idle → Retrieving → Generating ⇄ ToolDispatch → Done`, `Failed` from
//! anywhere. Nothing is written to session storage until the final reply
//! exists, and the reply is written as a single turn record.

use chrono::Utc;
use std::sync::Arc;

use crate::agent::context::{ContextBuilder, Retrieved};
use crate::agent::distill::MemoryDistiller;
use crate::agent::profile::AgentProfile;
use crate::agent::state::{TurnEvent, TurnState, TurnTracker};
use crate::errors::Result;
use crate::memory::MemoryRecord;
use crate::model::{ChatMessage, CompletionRequest, ModelClient};
use crate::session::SessionTurn;

/// Result of a completed turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub turn: SessionTurn,
    /// Tool rounds actually executed
    pub tool_rounds: usize,
    pub knowledge_hits: usize,
    pub memories_recalled: usize,
    /// Facts recorded after the turn
    pub new_memories: Vec<MemoryRecord>,
    /// States visited, in order
    pub states: Vec<TurnState>,
}

/// Runs turns for one agent profile. Cheap to share; every turn is
/// independent apart from what it persists.
pub struct AgentRuntime {
    profile: AgentProfile,
    context: ContextBuilder,
    distiller: MemoryDistiller,
}

impl AgentRuntime {
    pub fn new(profile: AgentProfile) -> Self {
        let context = ContextBuilder::from_settings(&profile.settings);
        let distiller = MemoryDistiller::new(profile.model.clone());
        Self {
            profile,
            context,
            distiller,
        }
    }

    pub fn with_context_builder(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    /// Use a different (usually cheaper) model for memory distillation
    pub fn with_distiller_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.distiller = MemoryDistiller::new(model);
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Handle one user message in a session
    pub async fn run_turn(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<TurnOutcome> {
        let mut tracker = TurnTracker::new();
        match self.execute(&mut tracker, user_id, session_id, message).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let at = tracker.state();
                tracker.fail();
                tracing::error!(
                    agent_id = %self.profile.id,
                    user_id,
                    session_id,
                    state = at.display_name(),
                    error = %e,
                    "turn failed"
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        tracker: &mut TurnTracker,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<TurnOutcome> {
        let started_at = Utc::now();
        let agent_id = self.profile.id.as_str();
        let settings = &self.profile.settings;

        tracker.apply(TurnEvent::Start)?;
        let retrieved = self.retrieve(user_id, session_id, message).await?;

        let mut messages = self.context.build(&self.profile, &retrieved, message, started_at);
        let turn_start = messages.len() - 1;
        tracker.apply(TurnEvent::ContextReady)?;

        let schemas = self.profile.toolbelt.schemas();
        let max_rounds = settings.max_tool_rounds;
        let mut rounds = 0;

        let reply = loop {
            let offer_tools = !schemas.is_empty() && rounds < max_rounds;
            let request = CompletionRequest::new(messages.clone()).with_tools(if offer_tools {
                schemas.clone()
            } else {
                Vec::new()
            });
            let completion = self.profile.model.complete(&request).await?;

            if !completion.wants_tools() {
                break completion.content;
            }
            if !offer_tools {
                tracing::warn!(agent_id, calls = completion.tool_calls.len(), "ignoring tool calls made without tools on offer");
                break completion.content;
            }

            tracker.apply(TurnEvent::ToolsRequested)?;
            rounds += 1;
            messages.push(ChatMessage::assistant_tool_calls(
                completion.content.clone(),
                completion.tool_calls.clone(),
            ));

            for call in &completion.tool_calls {
                let output = match self.profile.toolbelt.invoke(&call.name, &call.arguments).await {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::warn!(agent_id, tool = %call.name, round = rounds, error = %e, "tool failed");
                        format!("Error: {}", e)
                    }
                };
                messages.push(ChatMessage::tool_result(&call.name, output));
            }

            if rounds >= max_rounds {
                tracing::warn!(agent_id, rounds, "tool round limit reached, forcing final answer");
                tracker.apply(TurnEvent::RoundLimitReached)?;
            } else {
                tracker.apply(TurnEvent::ToolsComplete)?;
            }
        };

        let mut turn_messages = messages.split_off(turn_start);
        turn_messages.push(ChatMessage::assistant(reply.clone()));
        let turn = SessionTurn::new(agent_id, user_id, session_id, turn_messages, started_at);

        self.profile
            .sessions
            .append_turn(agent_id, user_id, session_id, &turn)
            .await?;

        let new_memories = self
            .remember(user_id, message, &reply, &retrieved.memories)
            .await;
        tracker.apply(TurnEvent::Persisted)?;

        tracing::info!(
            agent_id,
            user_id,
            session_id,
            tool_rounds = rounds,
            knowledge_hits = retrieved.knowledge.len(),
            new_memories = new_memories.len(),
            "turn complete"
        );

        Ok(TurnOutcome {
            reply,
            turn,
            tool_rounds: rounds,
            knowledge_hits: retrieved.knowledge.len(),
            memories_recalled: retrieved.memories.len(),
            new_memories,
            states: tracker.history().to_vec(),
        })
    }

    /// Knowledge and memory are best-effort unless `require_retrieval` is
    /// set. Session history is always required.
    async fn retrieve(&self, user_id: &str, session_id: &str, message: &str) -> Result<Retrieved> {
        let agent_id = self.profile.id.as_str();
        let settings = &self.profile.settings;
        let mut retrieved = Retrieved::default();

        if let Some(knowledge) = &self.profile.knowledge {
            match knowledge
                .query_knowledge(message, settings.knowledge_k, None, settings.agentic_filters)
                .await
            {
                Ok(hits) => retrieved.knowledge = hits,
                Err(e) if settings.require_retrieval => return Err(e),
                Err(e) => {
                    tracing::warn!(agent_id, knowledge_base = knowledge.name(), error = %e, "knowledge retrieval failed, continuing without references");
                }
            }
        }

        if let Some(memory) = &self.profile.memory {
            match memory
                .recall(agent_id, user_id, message, settings.memory_k)
                .await
            {
                Ok(memories) => retrieved.memories = memories,
                Err(e) if settings.require_retrieval => return Err(e),
                Err(e) => {
                    tracing::warn!(agent_id, user_id, error = %e, "memory recall failed, continuing without memories");
                }
            }
        }

        retrieved.history = self
            .profile
            .sessions
            .load_history(agent_id, user_id, session_id)
            .await?;

        tracing::debug!(
            agent_id,
            knowledge = retrieved.knowledge.len(),
            memories = retrieved.memories.len(),
            history = retrieved.history.len(),
            "retrieval complete"
        );
        Ok(retrieved)
    }

    /// Distil and record new facts. Failures are logged and yield nothing.
    async fn remember(
        &self,
        user_id: &str,
        message: &str,
        reply: &str,
        recalled: &[MemoryRecord],
    ) -> Vec<MemoryRecord> {
        let Some(memory) = &self.profile.memory else {
            return Vec::new();
        };
        if !self.profile.settings.distill_memories {
            return Vec::new();
        }
        let agent_id = self.profile.id.as_str();

        let known = match memory.facts(agent_id, user_id).await {
            Ok(facts) => facts,
            Err(e) => {
                tracing::warn!(
                    agent_id,
                    user_id,
                    error = %e,
                    "loading known facts failed, deduplicating against recalled facts"
                );
                recalled.to_vec()
            }
        };

        let facts = match self.distiller.distill(message, reply, &known).await {
            Ok(facts) => facts,
            Err(e) => {
                tracing::warn!(agent_id, user_id, error = %e, "memory distillation failed");
                return Vec::new();
            }
        };

        let mut recorded = Vec::with_capacity(facts.len());
        for fact in facts {
            match memory.record(agent_id, user_id, &fact).await {
                Ok(record) => recorded.push(record),
                Err(e) => {
                    tracing::warn!(agent_id, user_id, error = %e, "failed to record memory");
                }
            }
        }
        recorded
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}
