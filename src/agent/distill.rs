//! Durable user facts distilled from a finished turn

use serde_json::Value;
use std::sync::Arc;

use crate::errors::{AgentError, Result};
use crate::memory::MemoryRecord;
use crate::model::{strip_code_fence, CompletionRequest, ModelClient};

const MAX_FACTS_PER_TURN: usize = 5;
const MAX_FACT_CHARS: usize = 500;

/// Asks the model which facts about the user are worth remembering
pub struct MemoryDistiller {
    model: Arc<dyn ModelClient>,
}

impl MemoryDistiller {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    fn prompt(user_message: &str, reply: &str, known: &[MemoryRecord]) -> CompletionRequest {
        let known = if known.is_empty() {
            "(none)".to_string()
        } else {
            known
                .iter()
                .map(|m| format!("- {}", m.fact))
                .collect::<Vec<_>>()
                .join("\n")
        };

        CompletionRequest::prompt(format!(
            "Extract durable facts about the user from this exchange: preferences, business \
             details, goals, constraints. Skip anything already known and anything only \
             relevant to this one request. Respond with a JSON array of short strings, or [] \
             if there is nothing new.\n\n\
             Already known:\n{}\n\nUser: {}\n\nAssistant: {}",
            known, user_message, reply
        ))
        .with_temperature(0.0)
        .expect_json()
    }

    /// New facts, at most a handful, excluding ones already known
    pub async fn distill(
        &self,
        user_message: &str,
        reply: &str,
        known: &[MemoryRecord],
    ) -> Result<Vec<String>> {
        let completion = self
            .model
            .complete(&Self::prompt(user_message, reply, known))
            .await?;
        let facts = parse_facts(&completion.content)?;

        let known: Vec<String> = known.iter().map(|m| normalize(&m.fact)).collect();
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for fact in facts {
            let key = normalize(&fact);
            if key.is_empty() || known.contains(&key) || seen.contains(&key) {
                continue;
            }
            seen.push(key);
            out.push(fact);
            if out.len() == MAX_FACTS_PER_TURN {
                break;
            }
        }
        Ok(out)
    }
}

fn normalize(fact: &str) -> String {
    fact.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Accepts a bare array or an object wrapping one (`{"facts": [...]}`)
fn parse_facts(raw: &str) -> Result<Vec<String>> {
    let value: Value = serde_json::from_str(strip_code_fence(raw)).map_err(|e| {
        AgentError::ModelError {
            reason: format!("memory distillation returned invalid JSON: {}", e),
            retryable: false,
        }
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().chars().take(MAX_FACT_CHARS).collect::<String>()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect())
}
