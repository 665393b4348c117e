//! Sub-agent tool — delegates tasks to a child agent loop.
//!
//! The `SubAgentTool` implements `AgentTool` and internally runs `agent_loop()`
//! with its own system prompt, tools, and provider. The parent LLM invokes it
//! like any other tool, passing a natural-language `task` string.
//!
//! # Design
//!
//! - **Context isolation**: each invocation starts a fresh conversation
//! - **Depth limiting**: sub-agents are not given other SubAgentTools (static, no runtime counter)
//! - **Cancellation propagation**: the parent's cancel token is forwarded
//! - **Event forwarding**: sub-agent events stream to the parent via `on_update`
//!
//! # Example
//!
//! ```rust,no_run
//! use termagent::sub_agent::SubAgentTool;
//! use termagent::provider::AnthropicProvider;
//! use std::sync::Arc;
//!
//! let researcher = SubAgentTool::new("researcher", Arc::new(AnthropicProvider))
//!     .with_description("Searches codebases and documents")
//!     .with_system_prompt("You are a research assistant.")
//!     .with_model("claude-sonnet-4-20250514")
//!     .with_api_key("sk-...");
//! ```

use crate::agent_loop::{agent_loop, AgentLoopConfig, SnapshotContext};
use crate::context::ExecutionLimits;
use crate::provider::StreamProvider;
use crate::types::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Default max turns for sub-agents (prevents runaway execution).
const DEFAULT_MAX_TURNS: usize = 10;
/// Retries for a model round that comes back with no content at all.
const EMPTY_RESPONSE_RETRIES: usize = 3;
const EMPTY_RESPONSE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);
/// Bound on onSubAgentComplete-forced re-iterations, so a misbehaving hook
/// can't spin a sub-agent forever.
const MAX_FORCED_ITERATIONS: usize = 3;

/// Shared routing table for messages addressed to a running sub-agent by
/// `instanceId` — e.g. steering input the user typed while a sub-agent turn
/// is in flight. One instance is shared across all `SubAgentTool`s in a
/// parent `Agent`.
#[derive(Default)]
pub struct SubAgentMessageRouter {
    inbox: Mutex<HashMap<String, VecDeque<String>>>,
}

impl SubAgentMessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a message to the named running sub-agent instance.
    pub fn route(&self, instance_id: &str, text: impl Into<String>) {
        self.inbox
            .lock()
            .unwrap()
            .entry(instance_id.to_string())
            .or_default()
            .push_back(text.into());
    }

    /// Drain and clear everything queued for this instance.
    pub fn drain(&self, instance_id: &str) -> Vec<String> {
        self.inbox
            .lock()
            .unwrap()
            .remove(instance_id)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }
}

/// Callback the parent session provides so an `askuser-*` call made by a
/// sub-agent surfaces through the main session's question UI instead of a
/// sub-agent-local one the user never sees.
pub type UserQuestionCb = Arc<dyn Fn(String, Vec<String>) -> String + Send + Sync>;

/// Decides whether a finished sub-agent turn should run again (e.g. a
/// validation step failed and the agent should retry). Receives the
/// messages produced by the just-finished turn.
pub type SubAgentCompleteHook = Arc<dyn Fn(&[AgentMessage]) -> bool + Send + Sync>;

/// A tool that delegates work to a child agent loop.
///
/// When the parent LLM calls this tool, it spawns a fresh `agent_loop()` with
/// its own system prompt, tools, and provider. The sub-agent runs to completion
/// and its final text output is returned as the tool result.
pub struct SubAgentTool {
    tool_name: String,
    tool_description: String,
    system_prompt: String,
    model: String,
    model_config: Option<crate::provider::ModelConfig>,
    api_key: String,
    provider: Arc<dyn StreamProvider>,
    tools: Vec<Arc<dyn AgentTool>>,
    thinking_level: ThinkingLevel,
    max_tokens: Option<u32>,
    cache_config: CacheConfig,
    tool_execution: ToolExecutionStrategy,
    retry_config: crate::retry::RetryConfig,
    max_turns: usize,
    message_router: Option<Arc<SubAgentMessageRouter>>,
    user_question_cb: Option<UserQuestionCb>,
    on_complete: Option<SubAgentCompleteHook>,
    folders_read: Option<Arc<Mutex<HashSet<PathBuf>>>>,
}

impl SubAgentTool {
    /// Create a new sub-agent tool with a name and provider.
    pub fn new(name: impl Into<String>, provider: Arc<dyn StreamProvider>) -> Self {
        let name = name.into();
        Self {
            tool_description: format!("Delegate a task to the '{}' sub-agent", name),
            tool_name: name,
            system_prompt: String::new(),
            model: String::new(),
            model_config: None,
            api_key: String::new(),
            provider,
            tools: Vec::new(),
            thinking_level: ThinkingLevel::Off,
            max_tokens: None,
            cache_config: CacheConfig::default(),
            tool_execution: ToolExecutionStrategy::default(),
            retry_config: crate::retry::RetryConfig::default(),
            max_turns: DEFAULT_MAX_TURNS,
            message_router: None,
            user_question_cb: None,
            on_complete: None,
            folders_read: None,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.tool_description = desc.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_model_config(mut self, config: crate::provider::ModelConfig) -> Self {
        self.model = config.id.clone();
        self.model_config = Some(config);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn AgentTool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_thinking(mut self, level: ThinkingLevel) -> Self {
        self.thinking_level = level;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn with_tool_execution(mut self, strategy: ToolExecutionStrategy) -> Self {
        self.tool_execution = strategy;
        self
    }

    pub fn with_retry_config(mut self, config: crate::retry::RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = max;
        self
    }

    /// Share a message router with the parent so steering input addressed to
    /// this instance (by `instanceId`) reaches it between rounds.
    pub fn with_message_router(mut self, router: Arc<SubAgentMessageRouter>) -> Self {
        self.message_router = Some(router);
        self
    }

    /// Route `askuser-*` tool calls made by this sub-agent to the parent
    /// session's question UI instead of answering them locally.
    pub fn with_user_question_cb(mut self, cb: UserQuestionCb) -> Self {
        self.user_question_cb = Some(cb);
        self
    }

    /// Hook run once the sub-agent's turn completes; returning `true` forces
    /// another iteration (e.g. the agent's own validation step failed).
    pub fn with_on_complete(mut self, hook: SubAgentCompleteHook) -> Self {
        self.on_complete = Some(hook);
        self
    }

    /// Share the parent's "folders read" set. It is saved and restored
    /// around each invocation so the sub-agent's exploratory reads don't leak
    /// into the parent's view of what's already been read.
    pub fn with_folders_read(mut self, folders_read: Arc<Mutex<HashSet<PathBuf>>>) -> Self {
        self.folders_read = Some(folders_read);
        self
    }
}

/// RAII guard restoring the parent's folders-read set on drop, per step 4 of
/// the sub-agent contract: the agent's exploratory reads must not pollute
/// parent state, win or lose.
struct FoldersReadGuard {
    shared: Arc<Mutex<HashSet<PathBuf>>>,
    parent_snapshot: HashSet<PathBuf>,
}

impl FoldersReadGuard {
    fn enter(shared: Arc<Mutex<HashSet<PathBuf>>>) -> Self {
        let parent_snapshot = {
            let mut guard = shared.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        Self {
            shared,
            parent_snapshot,
        }
    }
}

impl Drop for FoldersReadGuard {
    fn drop(&mut self) {
        let mut guard = self.shared.lock().unwrap();
        *guard = std::mem::take(&mut self.parent_snapshot);
    }
}

/// Wraps an `askuser-*` tool so invoking it calls back into the parent
/// session's question UI rather than the sub-agent's own (which the user
/// never sees).
struct AskUserInterceptTool {
    inner_name: String,
    cb: UserQuestionCb,
}

#[async_trait::async_trait]
impl AgentTool for AskUserInterceptTool {
    fn name(&self) -> &str {
        &self.inner_name
    }
    fn label(&self) -> &str {
        "ask user"
    }
    fn description(&self) -> &str {
        "Ask the user a clarifying question"
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
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let question = params
            .get("question")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
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
            details: serde_json::json!({ "intercepted_askuser": true }),
        })
    }
}

/// Thin adapter: wraps `Arc<dyn AgentTool>` so it can be placed in a
/// `Vec<Box<dyn AgentTool>>` (required by `AgentContext`).
struct ArcToolWrapper(Arc<dyn AgentTool>);

#[async_trait::async_trait]
impl AgentTool for ArcToolWrapper {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn label(&self) -> &str {
        self.0.label()
    }
    fn description(&self) -> &str {
        self.0.description()
    }
    fn parameters_schema(&self) -> serde_json::Value {
        self.0.parameters_schema()
    }
    async fn execute(
        &self,
        tool_call_id: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        self.0.execute(tool_call_id, params, ctx).await
    }
}

#[async_trait::async_trait]
impl AgentTool for SubAgentTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn label(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.tool_description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task to delegate to this sub-agent"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let cancel = ctx.cancel.clone();
        let on_update = ctx.on_update.clone();
        // Extract the task parameter
        let task = params
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("Missing required 'task' parameter".into()))?
            .to_string();
        let instance_id = params
            .get("instance_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        // Build tool list from Arc wrappers, intercepting askuser-* so the
        // question surfaces through the parent's UI instead of the
        // sub-agent's own (which the user never sees).
        let tools: Vec<Box<dyn AgentTool>> = self
            .tools
            .iter()
            .map(|t| -> Box<dyn AgentTool> {
                if t.name().starts_with("askuser") {
                    if let Some(cb) = &self.user_question_cb {
                        return Box::new(AskUserInterceptTool {
                            inner_name: t.name().to_string(),
                            cb: cb.clone(),
                        });
                    }
                }
                Box::new(ArcToolWrapper(Arc::clone(t)))
            })
            .collect();

        let _folders_guard = self.folders_read.clone().map(FoldersReadGuard::enter);

        // Drain any steering input the router has queued for this instance
        // and fold it into the seed prompt as an extra user turn.
        let routed = self
            .message_router
            .as_ref()
            .map(|r| r.drain(&instance_id))
            .unwrap_or_default();

        // Fresh context for the sub-agent
        let mut context = AgentContext {
            system_prompt: self.system_prompt.clone(),
            messages: Vec::new(),
            tools,
        };

        // Config referencing the Arc'd provider
        let config = AgentLoopConfig {
            provider: &*self.provider,
            model: self.model.clone(),
            model_config: self.model_config.clone(),
            api_key: self.api_key.clone(),
            thinking_level: self.thinking_level,
            max_tokens: self.max_tokens,
            temperature: None,
            convert_to_llm: None,
            transform_context: None,
            get_steering_messages: None,
            get_follow_up_messages: None,
            context_config: None,
            execution_limits: Some(ExecutionLimits {
                max_turns: self.max_turns,
                // Generous token/duration limits — turn limit is the primary guard
                max_total_tokens: 1_000_000,
                max_duration: std::time::Duration::from_secs(300),
            }),
            cache_config: self.cache_config.clone(),
            tool_execution: self.tool_execution.clone(),
            retry_config: self.retry_config.clone(),
            before_turn: None,
            after_turn: None,
            on_error: None,
            // The parent's permission gate already approved dispatching this
            // sub-agent; its own tool calls run under the same ambient
            // scoping (suffixes/snapshot store) rather than re-prompting.
            permission: None,
            token_limiter: None,
            editable_file_suffixes: ctx.editable_file_suffixes.clone(),
            snapshot: ctx.snapshot_store.clone().map(|store| SnapshotContext {
                session_id: ctx.session_id.clone().unwrap_or_default(),
                message_index: ctx.message_index,
                store,
            }),
            // The sub-agent's internal buffer is never persisted and has no
            // TODO/useful-info tools of its own registered by default.
            todo_store: None,
            useful_info_store: None,
        };

        // Channel for sub-agent events
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Forward sub-agent events to parent via on_update callback
        let forward_handle = if let Some(on_update) = on_update {
            let tool_name = self.tool_name.clone();
            Some(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    // Convert interesting events to ToolResult updates for the parent
                    let update_text = match &event {
                        AgentEvent::MessageUpdate {
                            delta: StreamDelta::Text { delta },
                            ..
                        } => Some(delta.clone()),
                        AgentEvent::ToolExecutionStart { tool_name, .. } => {
                            Some(format!("[sub-agent calling tool: {}]", tool_name))
                        }
                        _ => None,
                    };

                    if let Some(text) = update_text {
                        on_update(ToolResult {
                            content: vec![Content::Text { text }],
                            details: serde_json::json!({ "sub_agent": tool_name }),
                        });
                    }
                }
            }))
        } else {
            None
        };

        let mut seed = vec![AgentMessage::Llm(Message::user(task))];
        seed.extend(
            routed
                .into_iter()
                .map(|text| AgentMessage::Llm(Message::user(text))),
        );

        // Run the sub-agent loop, retrying an empty model response and
        // honoring onSubAgentComplete's request for another iteration.
        let mut new_messages = Vec::new();
        let mut prompts = seed;
        let mut forced_iterations = 0;
        loop {
            let mut attempt_messages = Vec::new();
            for attempt in 0..=EMPTY_RESPONSE_RETRIES {
                attempt_messages =
                    agent_loop(prompts.clone(), &mut context, &config, tx.clone(), cancel.clone())
                        .await;
                if final_text(&attempt_messages).is_some() || attempt == EMPTY_RESPONSE_RETRIES {
                    break;
                }
                tokio::time::sleep(EMPTY_RESPONSE_RETRY_DELAY).await;
            }
            new_messages = attempt_messages;

            let should_continue = self
                .on_complete
                .as_ref()
                .map(|hook| hook(&new_messages))
                .unwrap_or(false);
            if !should_continue || forced_iterations >= MAX_FORCED_ITERATIONS {
                break;
            }
            forced_iterations += 1;
            prompts = Vec::new();
        }
        drop(tx);

        // Wait for event forwarding to complete
        if let Some(handle) = forward_handle {
            let _ = handle.await;
        }

        // Extract final assistant text from the returned messages
        let result_text = extract_final_text(&new_messages);

        // Include full sub-agent conversation in details for debugging
        let details = serde_json::json!({
            "sub_agent": self.tool_name,
            "turns": new_messages.len(),
            "instance_id": instance_id,
        });

        Ok(ToolResult {
            content: vec![Content::Text { text: result_text }],
            details,
        })
    }
}

/// The last assistant message's text, or `None` if the model returned no
/// text content at all (the "empty response" case retried up to 3 times).
fn final_text(messages: &[AgentMessage]) -> Option<String> {
    for msg in messages.iter().rev() {
        if let AgentMessage::Llm(Message::Assistant { content, .. }) = msg {
            let texts: Vec<&str> = content
                .iter()
                .filter_map(|c| match c {
                    Content::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            if !texts.is_empty() {
                return Some(texts.join("\n"));
            }
        }
    }
    None
}

/// Extract the final assistant text from agent messages, with a fallback
/// for when the model never produced one even after retrying.
fn extract_final_text(messages: &[AgentMessage]) -> String {
    final_text(messages).unwrap_or_else(|| "(sub-agent produced no text output)".to_string())
}
