//! `ide-get_diagnostics` — pull the IDE's current diagnostics for a file.
//!
//! The spec names the IDE bridge as an out-of-scope external collaborator
//! (specified interface only); `IdeBridge` is that interface, mirrored on
//! `crate::tools::ace::CodebaseIndex`'s no-shipped-implementation pattern.
//! Diagnostics are capped at 10 and the call itself is capped at 2.5s, per
//! the file-edit engine's diagnostics-request contract.

use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const MAX_DIAGNOSTICS: usize = 10;
const DIAGNOSTICS_TIMEOUT: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnostic {
    pub line: usize,
    pub severity: String,
    pub message: String,
}

/// Bridge to a running IDE/editor's diagnostics, if one is attached. No
/// concrete implementation ships — registering one is left to the editor
/// integration, which is out of scope here.
#[async_trait]
pub trait IdeBridge: Send + Sync {
    async fn diagnostics(&self, path: &str) -> Vec<Diagnostic>;
}

pub struct IdeDiagnosticsTool {
    bridge: Option<Arc<dyn IdeBridge>>,
}

impl IdeDiagnosticsTool {
    pub fn new(bridge: Option<Arc<dyn IdeBridge>>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl AgentTool for IdeDiagnosticsTool {
    fn name(&self) -> &str {
        "ide-get_diagnostics"
    }

    fn label(&self) -> &str {
        "Get Diagnostics"
    }

    fn description(&self) -> &str {
        "Get the IDE's current compiler/linter diagnostics for a file, if editor integration is enabled."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to get diagnostics for" }
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

        let Some(bridge) = &self.bridge else {
            return Ok(ToolResult {
                content: vec![Content::Text {
                    text: "Editor integration is not enabled; no diagnostics available.".into(),
                }],
                details: serde_json::json!({ "configured": false }),
            });
        };

        let diagnostics = match tokio::time::timeout(DIAGNOSTICS_TIMEOUT, bridge.diagnostics(path)).await
        {
            Ok(d) => d,
            Err(_) => {
                return Ok(ToolResult {
                    content: vec![Content::Text {
                        text: "Diagnostics request timed out.".into(),
                    }],
                    details: serde_json::json!({ "timed_out": true }),
                });
            }
        };

        if diagnostics.is_empty() {
            return Ok(ToolResult {
                content: vec![Content::Text {
                    text: format!("No diagnostics for {}", path),
                }],
                details: serde_json::json!({ "diagnostics": 0 }),
            });
        }

        let truncated = diagnostics.len() > MAX_DIAGNOSTICS;
        let shown = &diagnostics[..diagnostics.len().min(MAX_DIAGNOSTICS)];
        let mut text = shown
            .iter()
            .map(|d| format!("{}:{} [{}] {}", path, d.line, d.severity, d.message))
            .collect::<Vec<_>>()
            .join("\n");
        if truncated {
            text.push_str(&format!(
                "\n... ({} more diagnostics not shown)",
                diagnostics.len() - MAX_DIAGNOSTICS
            ));
        }

        Ok(ToolResult {
            content: vec![Content::Text { text }],
            details: serde_json::json!({ "diagnostics": diagnostics.len() }),
        })
    }
}
