//! `skill-execute` — load a skill's full SKILL.md body for the model to
//! follow, the "instructions" tier of the progressive disclosure scheme
//! `crate::skills::SkillSet` documents (metadata is always in the system
//! prompt via `format_for_prompt`; this tool is how the model reaches the
//! next tier when it decides to activate one).

use crate::skills::SkillSet;
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

pub struct SkillExecuteTool {
    skills: Arc<SkillSet>,
}

impl SkillExecuteTool {
    pub fn new(skills: Arc<SkillSet>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl AgentTool for SkillExecuteTool {
    fn name(&self) -> &str {
        "skill-execute"
    }

    fn label(&self) -> &str {
        "Execute Skill"
    }

    fn description(&self) -> &str {
        "Load a skill's full instructions by name so they can be followed for the current task."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Skill name, as listed in <available_skills>" }
            },
            "required": ["name"]
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
        let name = params["name"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArgs("missing 'name' parameter".into()))?;

        let skill = self
            .skills
            .skills()
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ToolError::Failed(format!("no skill named '{}'", name)))?;

        let body = tokio::fs::read_to_string(&skill.file_path)
            .await
            .map_err(|e| ToolError::Failed(format!("cannot read {}: {}", skill.file_path.display(), e)))?;

        Ok(ToolResult {
            content: vec![Content::Text { text: body }],
            details: serde_json::json!({ "skill": name, "source": skill.source }),
        })
    }
}
