//! `useful-info-*` tools — a shared scratchpad of facts the model has
//! learned and wants to keep around without re-deriving them, rendered into
//! the outgoing message list each round as a "special user message" (see
//! `crate::prompt_compose::special_user_messages`) the same way
//! `crate::tools::todo`'s list is, and likewise never persisted.

use crate::types::*;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UsefulInfoEntry {
    pub id: String,
    pub text: String,
}

#[derive(Default)]
pub struct UsefulInfoStore {
    entries: Mutex<Vec<UsefulInfoEntry>>,
}

impl UsefulInfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<UsefulInfoEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn add(&self, text: String) -> UsefulInfoEntry {
        let entry = UsefulInfoEntry {
            id: uuid::Uuid::new_v4().to_string(),
            text,
        };
        self.entries.lock().unwrap().push(entry.clone());
        entry
    }

    fn delete(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Render the current entries as the useful-info snapshot injected into
    /// the outgoing message list each round.
    pub fn render_snapshot(&self) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            return None;
        }
        let mut out = String::from("Useful info gathered so far:\n");
        for entry in entries.iter() {
            out.push_str(&format!("- {} ({})\n", entry.text, entry.id));
        }
        Some(out)
    }
}

pub struct UsefulInfoAddTool {
    store: std::sync::Arc<UsefulInfoStore>,
}

impl UsefulInfoAddTool {
    pub fn new(store: std::sync::Arc<UsefulInfoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentTool for UsefulInfoAddTool {
    fn name(&self) -> &str {
        "useful-info-add"
    }
    fn label(&self) -> &str {
        "Add Useful Info"
    }
    fn description(&self) -> &str {
        "Record a fact worth keeping in context across turns (e.g. a discovered config value or constraint)."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
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
        let text = params["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'text' parameter".into()))?
            .to_string();
        let entry = self.store.add(text);
        Ok(ToolResult {
            content: vec![Content::Text {
                text: format!("Recorded useful info {}", entry.id),
            }],
            details: serde_json::json!({ "id": entry.id }),
        })
    }
}

pub struct UsefulInfoDeleteTool {
    store: std::sync::Arc<UsefulInfoStore>,
}

impl UsefulInfoDeleteTool {
    pub fn new(store: std::sync::Arc<UsefulInfoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentTool for UsefulInfoDeleteTool {
    fn name(&self) -> &str {
        "useful-info-delete"
    }
    fn label(&self) -> &str {
        "Delete Useful Info"
    }
    fn description(&self) -> &str {
        "Delete a previously recorded useful-info entry by id."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
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
        let id = params["id"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'id' parameter".into()))?;
        if !self.store.delete(id) {
            return Err(ToolError::Failed(format!("no useful-info entry with id {}", id)));
        }
        Ok(ToolResult {
            content: vec![Content::Text {
                text: format!("Deleted useful info {}", id),
            }],
            details: serde_json::json!({ "id": id }),
        })
    }
}

pub struct UsefulInfoListTool {
    store: std::sync::Arc<UsefulInfoStore>,
}

impl UsefulInfoListTool {
    pub fn new(store: std::sync::Arc<UsefulInfoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentTool for UsefulInfoListTool {
    fn name(&self) -> &str {
        "useful-info-list"
    }
    fn label(&self) -> &str {
        "List Useful Info"
    }
    fn description(&self) -> &str {
        "List all recorded useful-info entries."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(
        &self,
        _tool_call_id: &str,
        _params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let entries = self.store.list();
        let text = if entries.is_empty() {
            "No useful-info entries.".to_string()
        } else {
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        };
        Ok(ToolResult {
            content: vec![Content::Text { text }],
            details: serde_json::json!({ "count": entries.len() }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_list_delete_roundtrip() {
        let store = UsefulInfoStore::new();
        let entry = store.add("API base url is set via BASE_URL".into());
        assert_eq!(store.list().len(), 1);
        assert!(store.delete(&entry.id));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_render_snapshot_empty_is_none() {
        let store = UsefulInfoStore::new();
        assert!(store.render_snapshot().is_none());
    }
}
