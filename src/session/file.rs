//! JSON-lines session storage

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{AgentError, Result};
use crate::session::{SessionStorage, SessionTurn};
use crate::storage::{append_line, read_lines, safe_component, KeyedLocks};

/// Stores turns under `<root>/<agent>/sessions/<user>/<session>.jsonl`
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    root: PathBuf,
    locks: Arc<KeyedLocks>,
}

impl FileSessionStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, agent_id: &str, user_id: &str) -> Result<PathBuf> {
        let agent = safe_component("agent", agent_id).map_err(session_error)?;
        let user = safe_component("user", user_id).map_err(session_error)?;
        Ok(self.root.join(agent).join("sessions").join(user))
    }

    fn session_path(&self, agent_id: &str, user_id: &str, session_id: &str) -> Result<PathBuf> {
        let session = safe_component("session", session_id).map_err(session_error)?;
        Ok(self
            .user_dir(agent_id, user_id)?
            .join(format!("{}.jsonl", session)))
    }
}

fn session_error(err: anyhow::Error) -> AgentError {
    AgentError::SessionError(format!("{:#}", err))
}

fn join_error(err: tokio::task::JoinError) -> AgentError {
    AgentError::SessionError(format!("session task failed: {}", err))
}

#[async_trait]
impl SessionStorage for FileSessionStorage {
    async fn append_turn(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        turn: &SessionTurn,
    ) -> Result<()> {
        if turn.agent_id != agent_id || turn.user_id != user_id || turn.session_id != session_id {
            return Err(AgentError::SessionError(format!(
                "turn {} belongs to {}/{}/{}, not {}/{}/{}",
                turn.turn_id,
                turn.agent_id,
                turn.user_id,
                turn.session_id,
                agent_id,
                user_id,
                session_id
            )));
        }

        let path = self.session_path(agent_id, user_id, session_id)?;
        let guard = self.locks.lock(&path.to_string_lossy()).await;

        // The blocking task owns the lock and runs to completion even if this
        // future is dropped, so the next writer for the key waits for it.
        let line = turn.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            append_line(&path, &line)
        })
        .await
            .map_err(join_error)?
            .map_err(session_error)?;

        tracing::debug!(agent_id, user_id, session_id, turn_id = %turn.turn_id, "turn persisted");
        Ok(())
    }

    async fn load_history(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<SessionTurn>> {
        let path = self.session_path(agent_id, user_id, session_id)?;
        tokio::task::spawn_blocking(move || read_lines(&path))
            .await
            .map_err(join_error)?
            .map_err(session_error)
    }

    async fn list_sessions(&self, agent_id: &str, user_id: &str) -> Result<Vec<String>> {
        let dir = self.user_dir(agent_id, user_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AgentError::SessionError(format!("{}: {}", dir.display(), e))),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                sessions.push(stem.to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    async fn delete_session(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<bool> {
        let path = self.session_path(agent_id, user_id, session_id)?;
        let _guard = self.locks.lock(&path.to_string_lossy()).await;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentError::SessionError(format!("{}: {}", path.display(), e))),
        }
    }
}
