//! `todo-*` tools — a shared task list the model uses to track multi-step
//! work, rendered into the outgoing message list each round as a "special
//! user message" (see `crate::prompt_compose::special_user_messages`) rather
//! than persisted into the session log.
//!
//! Shared state follows the same shape as `crate::sub_agent::SubAgentMessageRouter`:
//! one `Mutex`-guarded collection, cloned via `Arc` into every tool instance
//! and into the context-build step that renders the snapshot.

use crate::types::*;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub text: String,
    pub status: TodoStatus,
}

/// Shared todo list for one conversation. Cheap to clone (`Arc`-backed
/// internally via the tools that hold it); construct one and pass `Arc`
/// clones to `TodoGetTool`/`TodoAddTool`/`TodoUpdateTool`/`TodoDeleteTool`
/// and to the context layer that renders the snapshot.
#[derive(Default)]
pub struct TodoStore {
    items: Mutex<Vec<TodoItem>>,
}

impl TodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<TodoItem> {
        self.items.lock().unwrap().clone()
    }

    fn add(&self, text: String) -> TodoItem {
        let item = TodoItem {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            status: TodoStatus::Pending,
        };
        self.items.lock().unwrap().push(item.clone());
        item
    }

    fn update(&self, id: &str, status: TodoStatus) -> bool {
        let mut items = self.items.lock().unwrap();
        match items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.status = status;
                true
            }
            None => false,
        }
    }

    fn delete(&self, id: &str) -> bool {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|i| i.id != id);
        items.len() != before
    }

    /// Render the current list as the TODO snapshot injected into the
    /// outgoing message list each round. Empty list renders to `None` so no
    /// special user message is produced when there's nothing to track.
    pub fn render_snapshot(&self) -> Option<String> {
        let items = self.items.lock().unwrap();
        if items.is_empty() {
            return None;
        }
        let mut out = String::from("Current TODO list:\n");
        for item in items.iter() {
            let marker = match item.status {
                TodoStatus::Pending => "[ ]",
                TodoStatus::InProgress => "[~]",
                TodoStatus::Completed => "[x]",
            };
            out.push_str(&format!("{} {} ({})\n", marker, item.text, item.id));
        }
        Some(out)
    }
}

fn status_from_str(s: &str) -> Result<TodoStatus, ToolError> {
    match s {
        "pending" => Ok(TodoStatus::Pending),
        "in_progress" => Ok(TodoStatus::InProgress),
        "completed" => Ok(TodoStatus::Completed),
        other => Err(ToolError::InvalidArgs(format!(
            "invalid status '{}': expected pending, in_progress, or completed",
            other
        ))),
    }
}

pub struct TodoGetTool {
    store: std::sync::Arc<TodoStore>,
}

impl TodoGetTool {
    pub fn new(store: std::sync::Arc<TodoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentTool for TodoGetTool {
    fn name(&self) -> &str {
        "todo-get"
    }
    fn label(&self) -> &str {
        "Get TODOs"
    }
    fn description(&self) -> &str {
        "List the current TODO items and their statuses."
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
        let items = self.store.list();
        let text = if items.is_empty() {
            "No TODO items.".to_string()
        } else {
            serde_json::to_string_pretty(&items).unwrap_or_default()
        };
        Ok(ToolResult {
            content: vec![Content::Text { text }],
            details: serde_json::json!({ "count": items.len() }),
        })
    }
}

pub struct TodoAddTool {
    store: std::sync::Arc<TodoStore>,
}

impl TodoAddTool {
    pub fn new(store: std::sync::Arc<TodoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentTool for TodoAddTool {
    fn name(&self) -> &str {
        "todo-add"
    }
    fn label(&self) -> &str {
        "Add TODO"
    }
    fn description(&self) -> &str {
        "Add a new TODO item, initially pending."
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
        let item = self.store.add(text);
        Ok(ToolResult {
            content: vec![Content::Text {
                text: format!("Added TODO {}", item.id),
            }],
            details: serde_json::json!({ "id": item.id }),
        })
    }
}

pub struct TodoUpdateTool {
    store: std::sync::Arc<TodoStore>,
}

impl TodoUpdateTool {
    pub fn new(store: std::sync::Arc<TodoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentTool for TodoUpdateTool {
    fn name(&self) -> &str {
        "todo-update"
    }
    fn label(&self) -> &str {
        "Update TODO"
    }
    fn description(&self) -> &str {
        "Update a TODO item's status (pending, in_progress, or completed)."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] }
            },
            "required": ["id", "status"]
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
        let status = status_from_str(
            params["status"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArgs("missing 'status' parameter".into()))?,
        )?;
        if !self.store.update(id, status) {
            return Err(ToolError::Failed(format!("no TODO item with id {}", id)));
        }
        Ok(ToolResult {
            content: vec![Content::Text {
                text: format!("Updated TODO {}", id),
            }],
            details: serde_json::json!({ "id": id }),
        })
    }
}

pub struct TodoDeleteTool {
    store: std::sync::Arc<TodoStore>,
}

impl TodoDeleteTool {
    pub fn new(store: std::sync::Arc<TodoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AgentTool for TodoDeleteTool {
    fn name(&self) -> &str {
        "todo-delete"
    }
    fn label(&self) -> &str {
        "Delete TODO"
    }
    fn description(&self) -> &str {
        "Delete a TODO item by id."
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
            return Err(ToolError::Failed(format!("no TODO item with id {}", id)));
        }
        Ok(ToolResult {
            content: vec![Content::Text {
                text: format!("Deleted TODO {}", id),
            }],
            details: serde_json::json!({ "id": id }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_update_delete_roundtrip() {
        let store = TodoStore::new();
        let item = store.add("write tests".into());
        assert_eq!(store.list().len(), 1);

        assert!(store.update(&item.id, TodoStatus::InProgress));
        assert_eq!(store.list()[0].status, TodoStatus::InProgress);

        assert!(store.delete(&item.id));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_render_snapshot_empty_is_none() {
        let store = TodoStore::new();
        assert!(store.render_snapshot().is_none());
    }

    #[test]
    fn test_render_snapshot_includes_items() {
        let store = TodoStore::new();
        store.add("ship it".into());
        let snapshot = store.render_snapshot().unwrap();
        assert!(snapshot.contains("ship it"));
    }
}
