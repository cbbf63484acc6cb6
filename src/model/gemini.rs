//! Gemini chat client
//!
//! `POST /v1beta/models/{model}:generateContent` with function declarations.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::{status_is_retryable, transport_error, AgentError, Result};
use crate::model::types::{ChatMessage, Completion, CompletionRequest, Role, ToolCall};
use crate::model::ModelClient;
use crate::retry::RetryManager;

/// Public Gemini API endpoint
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini chat client
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    timeout: Duration,
    retry: RetryManager,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(model: &str, api_key: String, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(AgentError::config("Gemini API key is empty"));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AgentError::HttpError)?;

        Ok(Self {
            client,
            base_url: DEFAULT_GEMINI_URL.to_string(),
            model: model.to_string(),
            api_key,
            temperature: 0.2,
            timeout,
            retry: RetryManager::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(gemini_content)
            .collect();

        let mut generation_config = json!({
            "temperature": request.temperature.unwrap_or(self.temperature)
        });
        if request.json_output {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });

        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        body
    }

    async fn send_once(&self, body: &Value) -> Result<Completion> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("gemini generateContent", self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::ModelError {
                reason: format!("Gemini HTTP {}: {}", status, error_text),
                retryable: status_is_retryable(status),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| transport_error("gemini generateContent", self.timeout, e))?;

        parse_completion(parsed)
    }
}

fn gemini_content(message: &ChatMessage) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "user",
            "parts": [{
                "functionResponse": {
                    "name": message.tool_name.clone().unwrap_or_default(),
                    "response": { "content": message.content },
                }
            }]
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let parts: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|c| json!({ "functionCall": { "name": c.name, "args": c.arguments } }))
                .collect();
            json!({ "role": "model", "parts": parts })
        }
        Role::Assistant => json!({ "role": "model", "parts": [{ "text": message.content }] }),
        Role::User | Role::System => {
            json!({ "role": "user", "parts": [{ "text": message.content }] })
        }
    }
}

fn parse_completion(response: GenerateResponse) -> Result<Completion> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::ModelError {
            reason: "Gemini returned no candidates".to_string(),
            retryable: false,
        })?;

    let mut completion = Completion::default();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            completion.content.push_str(&text);
        }
        if let Some(call) = part.function_call {
            let id = format!("call_{}", completion.tool_calls.len());
            completion
                .tool_calls
                .push(ToolCall::new(id, call.name, call.args.unwrap_or(Value::Null)));
        }
    }
    Ok(completion)
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.build_body(request);
        self.retry.execute_with_retry(|| self.send_once(&body)).await
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    args: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolSchema;

    fn client() -> GeminiClient {
        GeminiClient::new("gemini-2.0-flash", "test-key".to_string(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_empty_key_is_config_error() {
        let err = GeminiClient::new("gemini-2.0-flash", " ".to_string(), Duration::from_secs(5))
            .unwrap_err();
        assert!(err.is_fatal_config());
    }

    #[test]
    fn test_system_messages_become_system_instruction() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are an SEO specialist."),
            ChatMessage::user("Cluster these keywords"),
        ])
        .with_tools(vec![ToolSchema::new("tavily_search", "Search", json!({"type": "object"}))]);

        let body = client().build_body(&request);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            json!("You are an SEO specialist.")
        );
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            json!("tavily_search")
        );
    }

    #[test]
    fn test_tool_round_trip_shapes() {
        let call = ToolCall::new("call_0", "fetch_page", json!({"url": "https://a.b"}));
        let assistant = gemini_content(&ChatMessage::assistant_tool_calls("", vec![call]));
        assert_eq!(assistant["role"], json!("model"));
        assert_eq!(assistant["parts"][0]["functionCall"]["name"], json!("fetch_page"));

        let result = gemini_content(&ChatMessage::tool_result("fetch_page", "<html>"));
        assert_eq!(
            result["parts"][0]["functionResponse"]["response"]["content"],
            json!("<html>")
        );
    }

    #[test]
    fn test_parse_function_call_response() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "wikipedia_search", "args": {"query": "SEO"}}}]
                }
            }]
        });
        let completion = parse_completion(serde_json::from_value(raw).unwrap()).unwrap();
        assert!(completion.wants_tools());
        assert_eq!(completion.tool_calls[0].arguments["query"], json!("SEO"));
    }

    #[test]
    fn test_parse_empty_candidates_is_error() {
        let raw = json!({ "candidates": [] });
        assert!(parse_completion(serde_json::from_value(raw).unwrap()).is_err());
    }
}
