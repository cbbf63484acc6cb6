//! Web research tools: page fetch, Wikipedia search, Tavily search

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

use crate::config::resolve_secret;
use crate::errors::{status_is_retryable, transport_error, AgentError, Result};
use crate::tools::types::{optional_u64, required_str, truncate_output, ToolContext, ToolSchema};
use crate::tools::ToolAdapter;

/// Largest body downloaded before conversion
const MAX_DOWNLOAD_SIZE: usize = 10 * 1024 * 1024;

const DEFAULT_WIKIPEDIA_URL: &str = "https://en.wikipedia.org/w/api.php";
const DEFAULT_TAVILY_URL: &str = "https://api.tavily.com/search";
const DEFAULT_MAX_RESULTS: u64 = 5;
const MAX_RESULTS_LIMIT: u64 = 20;

fn http_client(tool: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("brainspark/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AgentError::config(format!("{}: cannot build HTTP client: {}", tool, e)))
}

fn max_results(args: &Value) -> u64 {
    optional_u64(args, "max_results")
        .unwrap_or(DEFAULT_MAX_RESULTS)
        .clamp(1, MAX_RESULTS_LIMIT)
}

async fn fail_on_status(tool: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    // Keep the reqwest error so 429/5xx stay retryable
    if status_is_retryable(status) {
        if let Err(e) = response.error_for_status_ref() {
            return Err(AgentError::HttpError(e));
        }
    }
    let body = response.text().await.unwrap_or_default();
    Err(AgentError::tool(
        tool,
        format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
    ))
}

/// Whether a host names a loopback, private or link-local target
fn is_private_host(host: &str) -> bool {
    let lower = host.trim_matches(|c| c == '[' || c == ']').to_lowercase();
    if lower == "localhost" || lower.ends_with(".local") || lower.ends_with(".internal") {
        return true;
    }

    match lower.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
        }
        Ok(IpAddr::V6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

/// Parse a user-supplied URL, upgrading plain HTTP and refusing private hosts
fn validate_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let normalized = if let Some(rest) = raw.strip_prefix("http://") {
        format!("https://{}", rest)
    } else if raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let url = Url::parse(&normalized)
        .map_err(|e| AgentError::tool("fetch_page", format!("invalid URL '{}': {}", raw, e)))?;

    let host = url
        .host_str()
        .ok_or_else(|| AgentError::tool("fetch_page", format!("URL has no host: {}", raw)))?;
    if is_private_host(host) {
        return Err(AgentError::tool(
            "fetch_page",
            format!("refusing to fetch private address: {}", host),
        ));
    }

    Ok(url)
}

/// Fetch a web page and return it as Markdown
#[derive(Debug, Clone)]
pub struct FetchPageTool {
    client: Client,
    timeout: Duration,
    max_output_size: usize,
}

impl FetchPageTool {
    pub fn new(context: &ToolContext) -> Result<Self> {
        Ok(Self {
            client: http_client("fetch_page", context.timeout)?,
            timeout: context.timeout,
            max_output_size: context.max_output_size,
        })
    }
}

#[async_trait]
impl ToolAdapter for FetchPageTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "fetch_page",
            "Fetch a public web page and return its content as Markdown",
            json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Page URL; plain HTTP is upgraded to HTTPS"
                    }
                },
                "required": ["url"]
            }),
        )
        .read_only()
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let url = validate_url(required_str("fetch_page", args, "url")?)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| transport_error("fetch_page", self.timeout, e))?;
        let response = fail_on_status("fetch_page", response).await?;

        if let Some(length) = response.content_length() {
            if length > MAX_DOWNLOAD_SIZE as u64 {
                return Err(AgentError::tool(
                    "fetch_page",
                    format!("response too large: {} bytes", length),
                ));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error("fetch_page", self.timeout, e))?;
        if bytes.len() > MAX_DOWNLOAD_SIZE {
            return Err(AgentError::tool(
                "fetch_page",
                format!("response too large: {} bytes", bytes.len()),
            ));
        }
        let body = String::from_utf8_lossy(&bytes);

        let text = if content_type.contains("text/html") || content_type.contains("xhtml") {
            htmd::convert(&body).map_err(|e| {
                AgentError::tool("fetch_page", format!("HTML conversion failed: {}", e))
            })?
        } else {
            body.into_owned()
        };

        tracing::debug!(url = %url, bytes = bytes.len(), "fetched page");
        Ok(truncate_output(text, self.max_output_size))
    }
}

/// Search Wikipedia and return intro extracts of the best matches
#[derive(Debug, Clone)]
pub struct WikipediaSearchTool {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl WikipediaSearchTool {
    pub fn new(context: &ToolContext) -> Result<Self> {
        Ok(Self {
            client: http_client("wikipedia_search", context.timeout)?,
            base_url: DEFAULT_WIKIPEDIA_URL.to_string(),
            timeout: context.timeout,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct WikipediaResponse {
    query: Option<WikipediaQuery>,
}

#[derive(Debug, Deserialize)]
struct WikipediaQuery {
    #[serde(default)]
    pages: std::collections::HashMap<String, WikipediaPage>,
}

#[derive(Debug, Deserialize)]
struct WikipediaPage {
    title: String,
    #[serde(default)]
    index: u32,
    #[serde(default)]
    extract: String,
}

fn render_wikipedia(response: WikipediaResponse) -> String {
    let mut pages: Vec<WikipediaPage> = response
        .query
        .map(|q| q.pages.into_values().collect())
        .unwrap_or_default();
    if pages.is_empty() {
        return "No Wikipedia articles found.".to_string();
    }
    pages.sort_by_key(|p| p.index);

    pages
        .iter()
        .map(|p| {
            let link = format!(
                "https://en.wikipedia.org/wiki/{}",
                p.title.replace(' ', "_")
            );
            format!("## {}\n{}\n{}", p.title, link, p.extract.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl ToolAdapter for WikipediaSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "wikipedia_search",
            "Search Wikipedia and return article summaries",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search terms" },
                    "max_results": {
                        "type": "integer",
                        "description": "Number of articles (1-20)",
                        "default": DEFAULT_MAX_RESULTS
                    }
                },
                "required": ["query"]
            }),
        )
        .read_only()
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let query = required_str("wikipedia_search", args, "query")?;
        let limit = max_results(args).to_string();

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("generator", "search"),
                ("gsrsearch", query),
                ("gsrlimit", limit.as_str()),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("exlimit", "max"),
            ])
            .send()
            .await
            .map_err(|e| transport_error("wikipedia_search", self.timeout, e))?;
        let response = fail_on_status("wikipedia_search", response).await?;

        let parsed: WikipediaResponse = response
            .json()
            .await
            .map_err(|e| AgentError::tool("wikipedia_search", format!("bad response: {}", e)))?;
        Ok(render_wikipedia(parsed))
    }
}

/// Web search through the Tavily API
#[derive(Clone)]
pub struct TavilySearchTool {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for TavilySearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilySearchTool")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TavilySearchTool {
    /// Build with the key from `TAVILY_API_KEY`
    pub fn from_env(context: &ToolContext) -> Result<Self> {
        Self::new(context, resolve_secret("TAVILY_API_KEY")?)
    }

    pub fn new(context: &ToolContext, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(AgentError::config("Tavily API key is empty"));
        }
        Ok(Self {
            client: http_client("tavily_search", context.timeout)?,
            api_key,
            base_url: DEFAULT_TAVILY_URL.to_string(),
            timeout: context.timeout,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

fn render_tavily(query: &str, response: TavilyResponse) -> String {
    if response.results.is_empty() {
        return format!("No results found for: {}", query);
    }
    response
        .results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}\n   {}\n   {}", i + 1, r.title, r.url, r.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl ToolAdapter for TavilySearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "tavily_search",
            "Search the web and return the top results with snippets",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "max_results": {
                        "type": "integer",
                        "description": "Number of results (1-20)",
                        "default": DEFAULT_MAX_RESULTS
                    }
                },
                "required": ["query"]
            }),
        )
        .read_only()
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let query = required_str("tavily_search", args, "query")?;
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results(args),
            "include_answer": false,
        });

        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("tavily_search", self.timeout, e))?;
        let response = fail_on_status("tavily_search", response).await?;

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| AgentError::tool("tavily_search", format!("bad response: {}", e)))?;
        Ok(render_tavily(query, parsed))
    }
}
