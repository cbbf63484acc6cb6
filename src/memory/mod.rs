//! Per-agent user memory
//!
//! Facts distilled from conversations, keyed by (agent, user). Ordinary
//! writes only append; rewriting a store happens solely through an explicit
//! [`MemoryStore::consolidate`] call.

pub mod file;
pub mod types;

use async_trait::async_trait;

use crate::errors::Result;

pub use file::FileMemoryStore;
pub use types::{ConsolidationPolicy, MemoryRecord};

/// Durable fact memory
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append a fact
    async fn record(&self, agent_id: &str, user_id: &str, fact: &str) -> Result<MemoryRecord>;

    /// The `k` facts most relevant to `query`
    async fn recall(
        &self,
        agent_id: &str,
        user_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<MemoryRecord>>;

    /// Every fact in insertion order
    async fn facts(&self, agent_id: &str, user_id: &str) -> Result<Vec<MemoryRecord>>;

    /// Apply a consolidation policy, returning how many facts were removed
    async fn consolidate(
        &self,
        agent_id: &str,
        user_id: &str,
        policy: ConsolidationPolicy,
    ) -> Result<usize>;
}
