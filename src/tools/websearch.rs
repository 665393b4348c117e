//! `websearch-*` tools — web search and page fetch. The spec names web
//! search as an out-of-scope external collaborator (specified interface
//! only); `WebSearchProvider` is that interface. Fetch has no such
//! indirection since it's just an HTTP GET, done with the `reqwest` client
//! already in the dependency tree for the provider HTTP transport.

use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_FETCH_BYTES: usize = 200_000;

#[derive(Debug, Clone, serde::Serialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Pluggable web search backend. No concrete implementation ships — wiring
/// one to a real search API is left to the caller.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<WebSearchResult>, String>;
}

pub struct WebSearchTool {
    provider: Option<Arc<dyn WebSearchProvider>>,
}

impl WebSearchTool {
    pub fn new(provider: Option<Arc<dyn WebSearchProvider>>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AgentTool for WebSearchTool {
    fn name(&self) -> &str {
        "websearch-search"
    }
    fn label(&self) -> &str {
        "Web Search"
    }
    fn description(&self) -> &str {
        "Search the web and return matching page titles, URLs, and snippets."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "description": "Max results (default 5)" }
            },
            "required": ["query"]
        })
    }
    async fn execute(
        &self,
        _tool_call_id: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let query = params["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'query' parameter".into()))?;
        let limit = params["limit"].as_u64().unwrap_or(5) as usize;

        let Some(provider) = &self.provider else {
            return Ok(ToolResult {
                content: vec![Content::Text {
                    text: "Web search is not configured (no search provider registered)."
                        .to_string(),
                }],
                details: serde_json::json!({ "configured": false }),
            });
        };

        let results = provider
            .search(query, limit)
            .await
            .map_err(|e| ToolError::Failed(format!("web search failed: {}", e)))?;

        if results.is_empty() {
            return Ok(ToolResult {
                content: vec![Content::Text {
                    text: format!("No web results for '{}'", query),
                }],
                details: serde_json::json!({ "matches": 0 }),
            });
        }

        let text = results
            .iter()
            .map(|r| format!("{}\n{}\n{}", r.title, r.url, r.snippet))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(ToolResult {
            content: vec![Content::Text { text }],
            details: serde_json::json!({ "matches": results.len() }),
        })
    }
}

/// Fetches a URL's body as text, truncating large pages before they reach
/// the model (the real size limiting happens again downstream at the
/// TokenLimiter boundary; this cap just avoids pulling multi-megabyte pages
/// over the wire needlessly).
pub struct WebFetchTool;

impl WebFetchTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentTool for WebFetchTool {
    fn name(&self) -> &str {
        "websearch-fetch"
    }
    fn label(&self) -> &str {
        "Fetch URL"
    }
    fn description(&self) -> &str {
        "Fetch a URL's content as text."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        })
    }
    async fn execute(
        &self,
        _tool_call_id: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let url = params["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'url' parameter".into()))?;

        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ToolError::Failed(format!("failed to build HTTP client: {}", e)))?;

        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            result = client.get(url).send() => {
                result.map_err(|e| ToolError::Failed(format!("fetch failed: {}", e)))?
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Failed(format!("failed to read response body: {}", e)))?;

        let truncated = body.len() > MAX_FETCH_BYTES;
        let text = if truncated {
            let mut cut = MAX_FETCH_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}\n... (truncated at {} bytes)", &body[..cut], MAX_FETCH_BYTES)
        } else {
            body
        };

        Ok(ToolResult {
            content: vec![Content::Text { text }],
            details: serde_json::json!({ "url": url, "status": status.as_u16(), "truncated": truncated }),
        })
    }
}
