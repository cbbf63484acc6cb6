//! Prompt assembly for one turn
//!
//! Persona, optional datetime, retrieved knowledge with references, recalled
//! memories, replayed session history and the new user message, in that order.

use chrono::{DateTime, Utc};

use crate::agent::profile::AgentProfile;
use crate::config::RuntimeConfig;
use crate::memory::MemoryRecord;
use crate::model::{ChatMessage, Role};
use crate::session::SessionTurn;
use crate::vector::ScoredRecord;

/// Character budget for the knowledge section
const DEFAULT_MAX_REFERENCE_CHARS: usize = 16_000;

/// Context assembly settings
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    pub max_reference_chars: usize,
    pub history_turns: usize,
    pub add_datetime: bool,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            max_reference_chars: DEFAULT_MAX_REFERENCE_CHARS,
            history_turns: 10,
            add_datetime: true,
        }
    }
}

/// Everything retrieved before generation
#[derive(Debug, Clone, Default)]
pub struct Retrieved {
    pub knowledge: Vec<ScoredRecord>,
    pub memories: Vec<MemoryRecord>,
    pub history: Vec<SessionTurn>,
}

impl ContextBuilder {
    pub fn from_settings(settings: &RuntimeConfig) -> Self {
        Self {
            history_turns: settings.history_turns,
            add_datetime: settings.add_datetime,
            ..Default::default()
        }
    }

    /// Full message list for the first model call of a turn
    pub fn build(
        &self,
        profile: &AgentProfile,
        retrieved: &Retrieved,
        user_message: &str,
        now: DateTime<Utc>,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt(profile, retrieved, now))];
        messages.extend(self.history_messages(&retrieved.history));
        messages.push(ChatMessage::user(user_message));
        messages
    }

    pub fn system_prompt(
        &self,
        profile: &AgentProfile,
        retrieved: &Retrieved,
        now: DateTime<Utc>,
    ) -> String {
        let mut sections = Vec::new();

        let mut persona = format!("You are {}.", profile.name);
        if !profile.role.is_empty() {
            persona.push_str(&format!(" Your role: {}.", profile.role));
        }
        sections.push(persona);

        if !profile.instructions.is_empty() {
            let list = profile
                .instructions
                .iter()
                .map(|i| format!("- {}", i))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("## Instructions\n{}", list));
        }

        if self.add_datetime {
            sections.push(format!(
                "The current time is {}.",
                now.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }

        if let Some(references) = self.references(&retrieved.knowledge) {
            sections.push(references);
        }

        if !retrieved.memories.is_empty() {
            let facts = retrieved
                .memories
                .iter()
                .map(|m| format!("- {}", m.fact))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("## What you know about this user\n{}", facts));
        }

        sections.join("\n\n")
    }

    /// Knowledge section with source and score per reference, within the
    /// character budget and in retrieval order
    fn references(&self, knowledge: &[ScoredRecord]) -> Option<String> {
        let mut parts = Vec::new();
        let mut used = 0;

        for (idx, hit) in knowledge.iter().enumerate() {
            let record = &hit.record;
            if used + record.text.len() > self.max_reference_chars && !parts.is_empty() {
                break;
            }

            let source = record
                .metadata
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or(record.document_id.as_str());
            let page = record
                .metadata
                .get("page")
                .and_then(|v| v.as_u64())
                .map(|p| format!(", page {}", p))
                .unwrap_or_default();

            parts.push(format!(
                "[{}] (source: {}{}, score: {:.2})\n{}",
                idx + 1,
                source,
                page,
                hit.score,
                record.text
            ));
            used += record.text.len();
        }

        if parts.is_empty() {
            return None;
        }
        Some(format!(
            "## References\nUse the following references from the knowledge base where relevant.\n\n{}",
            parts.join("\n\n")
        ))
    }

    /// The last `history_turns` turns, oldest first, without tool traffic
    pub fn history_messages(&self, history: &[SessionTurn]) -> Vec<ChatMessage> {
        let skip = history.len().saturating_sub(self.history_turns);
        history[skip..]
            .iter()
            .flat_map(|turn| turn.messages.iter())
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .filter(|m| m.tool_calls.is_empty() && !m.content.is_empty())
            .cloned()
            .collect()
    }
}
