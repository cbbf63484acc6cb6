//! Conversation session storage
//!
//! One growing, ordered sequence of turns per (agent, user, session).
//! Appends for the same key serialize; different keys never contend.

pub mod file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::model::ChatMessage;

pub use file::FileSessionStorage;

/// One completed request/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTurn {
    pub turn_id: uuid::Uuid,
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
    /// Messages of the turn in conversation order, tool rounds included
    pub messages: Vec<ChatMessage>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SessionTurn {
    pub fn new(
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        messages: Vec<ChatMessage>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            messages,
            started_at,
            completed_at: Utc::now(),
        }
    }
}

/// Durable turn history
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn append_turn(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        turn: &SessionTurn,
    ) -> Result<()>;

    /// Turns in insertion order
    async fn load_history(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<SessionTurn>>;

    /// Session ids with stored turns, sorted
    async fn list_sessions(&self, agent_id: &str, user_id: &str) -> Result<Vec<String>>;

    /// Remove a session; `false` when it did not exist
    async fn delete_session(&self, agent_id: &str, user_id: &str, session_id: &str)
        -> Result<bool>;
}
