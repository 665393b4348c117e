//! ACE tools — code-navigation and semantic search, backed by the LSP client
//! pool (`crate::lsp::LSPManager`) for the navigation family and an optional
//! pluggable code index for semantic search.
//!
//! `codebase-search`'s embedding indexer is named in the spec as an external
//! collaborator (out of scope for this crate); `CodebaseIndex` is the trait
//! boundary for it, mirroring how `crate::snapshot`'s out-of-scope SSH
//! transport is represented as a trait with no shipped implementation.

use crate::lsp::LSPManager;
use crate::types::*;
use async_trait::async_trait;
use lsp_types::Position;
use std::path::Path;
use std::sync::Arc;

/// A single semantic-search hit. Shape mirrors what an embedding index would
/// realistically return: file, line, and the matched snippet.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub path: String,
    pub line: usize,
    pub snippet: String,
}

/// Pluggable code index consulted by `ace-semantic_search` and
/// `codebase-search`. No concrete implementation ships — registering one is
/// left to the embedding pipeline, which is out of scope here.
#[async_trait]
pub trait CodebaseIndex: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Vec<SearchHit>;
}

fn parse_position(params: &serde_json::Value) -> Result<(String, Position), ToolError> {
    let path = params["path"]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArgs("missing 'path' parameter".into()))?
        .to_string();
    let line = params["line"]
        .as_u64()
        .ok_or_else(|| ToolError::InvalidArgs("missing 'line' parameter (1-indexed)".into()))?;
    let column = params["column"].as_u64().unwrap_or(1);
    Ok((
        path,
        Position {
            line: (line.max(1) - 1) as u32,
            character: (column.max(1) - 1) as u32,
        },
    ))
}

async fn read_for_navigation(path: &str) -> Result<String, ToolError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ToolError::Failed(format!("Cannot read {}: {}", path, e)))
}

fn format_locations(locations: &[lsp_types::Location]) -> String {
    if locations.is_empty() {
        return "No results (unsupported by the language server, or none found).".to_string();
    }
    locations
        .iter()
        .map(|loc| {
            format!(
                "{}:{}:{}",
                loc.uri.path(),
                loc.range.start.line + 1,
                loc.range.start.character + 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `ace-find_definition` — jump to a symbol's definition via the LSP pool.
pub struct FindDefinitionTool {
    lsp: Arc<LSPManager>,
}

impl FindDefinitionTool {
    pub fn new(lsp: Arc<LSPManager>) -> Self {
        Self { lsp }
    }
}

#[async_trait]
impl AgentTool for FindDefinitionTool {
    fn name(&self) -> &str {
        "ace-find_definition"
    }

    fn label(&self) -> &str {
        "Find Definition"
    }

    fn description(&self) -> &str {
        "Find where the symbol at a file position is defined, via the project's language server."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File containing the symbol" },
                "line": { "type": "integer", "description": "1-indexed line number" },
                "column": { "type": "integer", "description": "1-indexed column (optional, defaults to 1)" }
            },
            "required": ["path", "line"]
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
        let (path, position) = parse_position(&params)?;
        let text = read_for_navigation(&path).await?;
        let locations = self.lsp.goto_definition(Path::new(&path), &text, position).await;
        let text_out = format_locations(&locations);
        Ok(ToolResult {
            content: vec![Content::Text { text: text_out }],
            details: serde_json::json!({ "path": path, "matches": locations.len() }),
        })
    }
}

/// `ace-find_references` — all references to the symbol at a file position.
pub struct FindReferencesTool {
    lsp: Arc<LSPManager>,
}

impl FindReferencesTool {
    pub fn new(lsp: Arc<LSPManager>) -> Self {
        Self { lsp }
    }
}

#[async_trait]
impl AgentTool for FindReferencesTool {
    fn name(&self) -> &str {
        "ace-find_references"
    }

    fn label(&self) -> &str {
        "Find References"
    }

    fn description(&self) -> &str {
        "Find every reference to the symbol at a file position, via the project's language server."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File containing the symbol" },
                "line": { "type": "integer", "description": "1-indexed line number" },
                "column": { "type": "integer", "description": "1-indexed column (optional, defaults to 1)" }
            },
            "required": ["path", "line"]
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
        let (path, position) = parse_position(&params)?;
        let text = read_for_navigation(&path).await?;
        let locations = self.lsp.find_references(Path::new(&path), &text, position).await;
        let text_out = format_locations(&locations);
        Ok(ToolResult {
            content: vec![Content::Text { text: text_out }],
            details: serde_json::json!({ "path": path, "matches": locations.len() }),
        })
    }
}

/// `ace-file_outline` — document symbol tree for a file, via the LSP pool.
pub struct FileOutlineTool {
    lsp: Arc<LSPManager>,
}

impl FileOutlineTool {
    pub fn new(lsp: Arc<LSPManager>) -> Self {
        Self { lsp }
    }
}

fn format_symbol(sym: &lsp_types::DocumentSymbol, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&format!(
        "{:?} {} (line {})\n",
        sym.kind,
        sym.name,
        sym.range.start.line + 1
    ));
    if let Some(children) = &sym.children {
        for child in children {
            format_symbol(child, depth + 1, out);
        }
    }
}

#[async_trait]
impl AgentTool for FileOutlineTool {
    fn name(&self) -> &str {
        "ace-file_outline"
    }

    fn label(&self) -> &str {
        "File Outline"
    }

    fn description(&self) -> &str {
        "List the symbol outline (functions, types, etc.) of a file, via the project's language server."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to outline" }
            },
            "required": ["path"]
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
        let path = params["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'path' parameter".into()))?;
        let text = read_for_navigation(path).await?;
        let symbols = self.lsp.document_symbol(Path::new(path), &text).await;
        if symbols.is_empty() {
            return Ok(ToolResult {
                content: vec![Content::Text {
                    text: "No symbols (unsupported by the language server, or file is empty)."
                        .to_string(),
                }],
                details: serde_json::json!({ "path": path, "symbols": 0 }),
            });
        }
        let mut out = String::new();
        for sym in &symbols {
            format_symbol(sym, 0, &mut out);
        }
        Ok(ToolResult {
            content: vec![Content::Text { text: out }],
            details: serde_json::json!({ "path": path, "symbols": symbols.len() }),
        })
    }
}

/// `ace-semantic_search` — natural-language code search against a pluggable
/// index. Gracefully reports the index as unavailable rather than failing
/// the turn when none is registered, matching the LSP pool's "never crash
/// the agent" posture for optional collaborators.
pub struct SemanticSearchTool {
    index: Option<Arc<dyn CodebaseIndex>>,
}

impl SemanticSearchTool {
    pub fn new(index: Option<Arc<dyn CodebaseIndex>>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl AgentTool for SemanticSearchTool {
    fn name(&self) -> &str {
        "ace-semantic_search"
    }

    fn label(&self) -> &str {
        "Semantic Search"
    }

    fn description(&self) -> &str {
        "Search the codebase by meaning rather than exact text, using the configured embedding index."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language description of what to find" },
                "limit": { "type": "integer", "description": "Max results (default 10)" }
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
        let limit = params["limit"].as_u64().unwrap_or(10) as usize;

        let Some(index) = &self.index else {
            return Ok(ToolResult {
                content: vec![Content::Text {
                    text: "Semantic search is not configured for this project (no codebase index registered)."
                        .to_string(),
                }],
                details: serde_json::json!({ "configured": false }),
            });
        };

        let hits = index.search(query, limit).await;
        if hits.is_empty() {
            return Ok(ToolResult {
                content: vec![Content::Text {
                    text: format!("No semantic matches for '{}'", query),
                }],
                details: serde_json::json!({ "matches": 0 }),
            });
        }
        let text = hits
            .iter()
            .map(|h| format!("{}:{}\n{}", h.path, h.line, h.snippet))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ToolResult {
            content: vec![Content::Text { text }],
            details: serde_json::json!({ "matches": hits.len() }),
        })
    }
}

/// `codebase-search` — same embedding index as `ace-semantic_search`, under
/// the contractual top-level name the spec also requires.
pub struct CodebaseSearchTool {
    index: Option<Arc<dyn CodebaseIndex>>,
}

impl CodebaseSearchTool {
    pub fn new(index: Option<Arc<dyn CodebaseIndex>>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl AgentTool for CodebaseSearchTool {
    fn name(&self) -> &str {
        "codebase-search"
    }

    fn label(&self) -> &str {
        "Codebase Search"
    }

    fn description(&self) -> &str {
        "Search the indexed codebase by meaning rather than exact text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language description of what to find" },
                "limit": { "type": "integer", "description": "Max results (default 10)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        tool_call_id: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        SemanticSearchTool::new(self.index.clone())
            .execute(tool_call_id, params, ctx)
            .await
    }
}
