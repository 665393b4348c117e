//! `askuser-ask_question` — the top-level question tool a model calls to ask
//! the user something mid-turn, blocking the tool-confirmation UI and the
//! message input per §5's suspension points.
//!
//! Reuses `crate::sub_agent::UserQuestionCb`, the same callback shape
//! `AskUserInterceptTool` wraps for a sub-agent's intercepted call — both
//! sites ask the same question of the same UI, just from different callers.

use crate::sub_agent::UserQuestionCb;
use crate::types::*;
use async_trait::async_trait;

pub struct AskUserTool {
    cb: UserQuestionCb,
}

impl AskUserTool {
    pub fn new(cb: UserQuestionCb) -> Self {
        Self { cb }
    }
}

#[async_trait]
impl AgentTool for AskUserTool {
    fn name(&self) -> &str {
        "askuser-ask_question"
    }

    fn label(&self) -> &str {
        "Ask User"
    }

    fn description(&self) -> &str {
        "Ask the user a clarifying question, optionally with a fixed set of options to choose from."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "options": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["question"]
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
        let question = params
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing 'question' parameter".into()))?
            .to_string();
        let options: Vec<String> = params
            .get("options")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let answer = (self.cb)(question, options);

        let body = serde_json::json!({ "answer": answer, "selected": answer });
        Ok(ToolResult {
            content: vec![Content::Text {
                text: body.to_string(),
            }],
            details: serde_json::json!({}),
        })
    }
}
