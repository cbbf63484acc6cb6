//! Memory records and ranking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One remembered fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: uuid::Uuid,
    pub agent_id: String,
    pub user_id: String,
    pub fact: String,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(agent_id: &str, user_id: &str, fact: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            fact: fact.trim().to_string(),
            created_at: Utc::now(),
        }
    }
}

/// What `consolidate` does with a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationPolicy {
    /// Keep everything
    #[default]
    Accumulate,
    /// Keep the oldest of facts equal up to case and whitespace
    DropExactDuplicates,
}

impl ConsolidationPolicy {
    pub fn apply(&self, records: Vec<MemoryRecord>) -> Vec<MemoryRecord> {
        match self {
            Self::Accumulate => records,
            Self::DropExactDuplicates => {
                let mut seen = HashSet::new();
                records
                    .into_iter()
                    .filter(|r| seen.insert(normalize(&r.fact)))
                    .collect()
            }
        }
    }
}

fn normalize(fact: &str) -> String {
    fact.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Rank by lexical overlap with `query`, newest first on ties, and keep `k`.
///
/// `records` must be in insertion order; position breaks timestamp ties.
pub fn rank(records: Vec<MemoryRecord>, query: &str, k: usize) -> Vec<MemoryRecord> {
    let wanted = tokens(query);
    let mut scored: Vec<(usize, usize, MemoryRecord)> = records
        .into_iter()
        .enumerate()
        .map(|(position, record)| {
            let overlap = tokens(&record.fact).intersection(&wanted).count();
            (overlap, position, record)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.2.created_at.cmp(&a.2.created_at))
            .then_with(|| b.1.cmp(&a.1))
    });
    scored.into_iter().take(k).map(|(_, _, r)| r).collect()
}
