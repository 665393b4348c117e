//! Stateful Agent struct — wraps the agent loop with state management,
//! steering/follow-up queues, and abort support.

use crate::agent_loop::{
    agent_loop, agent_loop_continue, AfterTurnFn, AgentLoopConfig, BeforeTurnFn, OnErrorFn,
    SnapshotContext,
};
use crate::context::{ContextConfig, ExecutionLimits};
use crate::mcp::{McpClient, McpError, McpToolAdapter};
use crate::pending_queue::PendingMessageQueue;
use crate::permission::PermissionConfig;
use crate::provider::StreamProvider;
use crate::token_limiter::TokenLimiter;
use crate::types::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Queue mode for steering and follow-up messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Deliver one message per turn
    OneAtATime,
    /// Deliver all queued messages at once
    All,
}

/// The main Agent. Owns state, tools, and provider.
pub struct Agent {
    // State
    pub system_prompt: String,
    pub model: String,
    pub model_config: Option<crate::provider::ModelConfig>,
    pub api_key: String,
    pub thinking_level: ThinkingLevel,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    messages: Vec<AgentMessage>,
    tools: Vec<Box<dyn AgentTool>>,
    provider: Box<dyn StreamProvider>,

    // Queues (shared with the loop via Arc<Mutex>)
    steering_queue: Arc<Mutex<Vec<AgentMessage>>>,
    follow_up_queue: Arc<Mutex<Vec<AgentMessage>>>,
    steering_mode: QueueMode,
    follow_up_mode: QueueMode,
    /// Shared mid-stream input queue, set by an owning `Orchestrator` so
    /// messages `submit()`-ed while this agent is streaming reach the live
    /// turn as steering messages instead of being silently dropped.
    pending_queue: Option<Arc<PendingMessageQueue>>,

    // Context, limits & caching
    pub context_config: Option<ContextConfig>,
    pub execution_limits: Option<ExecutionLimits>,
    pub cache_config: CacheConfig,
    pub tool_execution: ToolExecutionStrategy,
    pub retry_config: crate::retry::RetryConfig,

    // Tool-call ambient context
    permission: Option<PermissionConfig>,
    token_limiter: Option<Arc<TokenLimiter>>,
    editable_file_suffixes: Option<Vec<String>>,
    snapshot: Option<SnapshotContext>,
    todo_store: Option<Arc<crate::tools::TodoStore>>,
    useful_info_store: Option<Arc<crate::tools::UsefulInfoStore>>,

    // Lifecycle callbacks
    before_turn: Option<BeforeTurnFn>,
    after_turn: Option<AfterTurnFn>,
    on_error: Option<OnErrorFn>,

    // Control
    cancel: Option<CancellationToken>,
    is_streaming: bool,
}

impl Agent {
    pub fn new(provider: impl StreamProvider + 'static) -> Self {
        Self {
            system_prompt: String::new(),
            model: String::new(),
            model_config: None,
            api_key: String::new(),
            thinking_level: ThinkingLevel::Off,
            max_tokens: None,
            temperature: None,
            messages: Vec::new(),
            tools: Vec::new(),
            provider: Box::new(provider),
            steering_queue: Arc::new(Mutex::new(Vec::new())),
            follow_up_queue: Arc::new(Mutex::new(Vec::new())),
            steering_mode: QueueMode::OneAtATime,
            follow_up_mode: QueueMode::OneAtATime,
            pending_queue: None,
            context_config: Some(ContextConfig::default()),
            execution_limits: Some(ExecutionLimits::default()),
            cache_config: CacheConfig::default(),
            tool_execution: ToolExecutionStrategy::default(),
            retry_config: crate::retry::RetryConfig::default(),
            permission: None,
            token_limiter: None,
            editable_file_suffixes: None,
            snapshot: None,
            todo_store: None,
            useful_info_store: None,
            before_turn: None,
            after_turn: None,
            on_error: None,
            cancel: None,
            is_streaming: false,
        }
    }

    // -- Builder-style setters --

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the model's endpoint/auth/compat info. Required for every
    /// provider except Anthropic's own direct API, which needs nothing
    /// beyond the model id and api key.
    pub fn with_model_config(mut self, config: crate::provider::ModelConfig) -> Self {
        self.model = config.id.clone();
        self.model_config = Some(config);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_thinking(mut self, level: ThinkingLevel) -> Self {
        self.thinking_level = level;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Box<dyn AgentTool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_context_config(mut self, config: ContextConfig) -> Self {
        self.context_config = Some(config);
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

    /// Gate tool calls behind confirmation. Every call is checked against
    /// `config.gate.needs_confirmation` before it runs; when confirmation is
    /// needed, `config.confirm` is invoked and the decision applied.
    pub fn with_permissions(mut self, config: PermissionConfig) -> Self {
        self.permission = Some(config);
        self
    }

    /// Truncate oversized tool results before they re-enter context.
    pub fn with_token_limiter(mut self, limiter: Arc<TokenLimiter>) -> Self {
        self.token_limiter = Some(limiter);
        self
    }

    /// Restrict file-edit tools to paths ending in one of these suffixes
    /// (used to scope sub-agents down to e.g. only `.md` files).
    pub fn with_editable_file_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.editable_file_suffixes = Some(suffixes);
        self
    }

    /// Back file edits with pre-image snapshots under this session/store, so
    /// `Orchestrator::rollback_to_turn` can restore them later.
    pub fn with_snapshot_store(
        mut self,
        session_id: impl Into<String>,
        message_index: usize,
        store: Arc<crate::snapshot::SnapshotStore>,
    ) -> Self {
        self.snapshot = Some(SnapshotContext {
            session_id: session_id.into(),
            message_index,
            store,
        });
        self
    }

    /// Back the TODO snapshot spliced into the outgoing message list each
    /// round with this store, shared with the `todo-*` tools so both see the
    /// same live list.
    pub fn with_todo_store(mut self, store: Arc<crate::tools::TodoStore>) -> Self {
        self.todo_store = Some(store);
        self
    }

    /// Back the useful-info notes spliced in the same way, shared with the
    /// `useful-info-*` tools.
    pub fn with_useful_info_store(mut self, store: Arc<crate::tools::UsefulInfoStore>) -> Self {
        self.useful_info_store = Some(store);
        self
    }

    /// Load skills and append their index to the system prompt.
    ///
    /// The skills index is appended as XML per the [AgentSkills standard](https://agentskills.io).
    /// The agent can then load a skill's full SKILL.md body with the
    /// `skill-execute` tool when it decides a skill is relevant.
    pub fn with_skills(mut self, skills: crate::skills::SkillSet) -> Self {
        let prompt_fragment = skills.format_for_prompt();
        if !prompt_fragment.is_empty() {
            if self.system_prompt.is_empty() {
                self.system_prompt = prompt_fragment;
            } else {
                self.system_prompt = format!("{}\n\n{}", self.system_prompt, prompt_fragment);
            }
        }
        self
    }

    pub fn with_execution_limits(mut self, limits: ExecutionLimits) -> Self {
        self.execution_limits = Some(limits);
        self
    }

    pub fn with_messages(mut self, msgs: Vec<AgentMessage>) -> Self {
        self.messages = msgs;
        self
    }

    pub fn on_before_turn(
        mut self,
        f: impl Fn(&[AgentMessage], usize) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.before_turn = Some(Arc::new(f));
        self
    }

    pub fn on_after_turn(
        mut self,
        f: impl Fn(&[AgentMessage], &Usage) + Send + Sync + 'static,
    ) -> Self {
        self.after_turn = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Add a sub-agent tool. The sub-agent runs its own `agent_loop()` when invoked.
    pub fn with_sub_agent(mut self, sub: crate::sub_agent::SubAgentTool) -> Self {
        self.tools.push(Box::new(sub));
        self
    }

    /// Disable automatic context compaction
    pub fn without_context_management(mut self) -> Self {
        self.context_config = None;
        self.execution_limits = None;
        self
    }

    // -- MCP integration --

    /// Connect to an MCP server via stdio and add its tools to the agent.
    pub async fn with_mcp_server_stdio(
        mut self,
        command: &str,
        args: &[&str],
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, McpError> {
        let client = McpClient::connect_stdio(command, args, env).await?;
        let client = Arc::new(tokio::sync::Mutex::new(client));
        let adapters = McpToolAdapter::from_client(client).await?;
        for adapter in adapters {
            self.tools.push(Box::new(adapter));
        }
        Ok(self)
    }

    /// Connect to an MCP server via HTTP and add its tools to the agent.
    pub async fn with_mcp_server_http(mut self, url: &str) -> Result<Self, McpError> {
        let client = McpClient::connect_http(url).await?;
        let client = Arc::new(tokio::sync::Mutex::new(client));
        let adapters = McpToolAdapter::from_client(client).await?;
        for adapter in adapters {
            self.tools.push(Box::new(adapter));
        }
        Ok(self)
    }

    // -- State access --

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn set_tools(&mut self, tools: Vec<Box<dyn AgentTool>>) {
        self.tools = tools;
    }

    /// Update the turn index snapshots are recorded under, without touching
    /// the session id or store. Call this once per turn (the Orchestrator
    /// does, right before `prompt_messages`).
    pub fn set_snapshot_message_index(&mut self, message_index: usize) {
        if let Some(snapshot) = &mut self.snapshot {
            snapshot.message_index = message_index;
        }
    }

    /// (Re)point the snapshot context at a session, e.g. when the
    /// Orchestrator starts or loads one after the Agent was already built.
    pub fn set_snapshot_session(
        &mut self,
        session_id: impl Into<String>,
        store: Arc<crate::snapshot::SnapshotStore>,
    ) {
        self.snapshot = Some(SnapshotContext {
            session_id: session_id.into(),
            message_index: 0,
            store,
        });
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    pub fn append_message(&mut self, msg: AgentMessage) {
        self.messages.push(msg);
    }

    pub fn replace_messages(&mut self, msgs: Vec<AgentMessage>) {
        self.messages = msgs;
    }

    pub fn save_messages(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.messages)
    }

    pub fn restore_messages(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let msgs: Vec<AgentMessage> = serde_json::from_str(json)?;
        self.messages = msgs;
        Ok(())
    }

    // -- Queue management --

    /// Queue a steering message (interrupts agent mid-tool-execution)
    pub fn steer(&self, msg: AgentMessage) {
        self.steering_queue.lock().unwrap().push(msg);
    }

    /// Queue a follow-up message (processed after agent finishes)
    pub fn follow_up(&self, msg: AgentMessage) {
        self.follow_up_queue.lock().unwrap().push(msg);
    }

    pub fn clear_steering_queue(&self) {
        self.steering_queue.lock().unwrap().clear();
    }

    pub fn clear_follow_up_queue(&self) {
        self.follow_up_queue.lock().unwrap().clear();
    }

    pub fn clear_all_queues(&self) {
        self.clear_steering_queue();
        self.clear_follow_up_queue();
    }

    pub fn set_steering_mode(&mut self, mode: QueueMode) {
        self.steering_mode = mode;
    }

    pub fn set_follow_up_mode(&mut self, mode: QueueMode) {
        self.follow_up_mode = mode;
    }

    /// Point this agent at a shared `PendingMessageQueue` so input enqueued
    /// mid-stream (e.g. via `Orchestrator::submit`) is drained into the live
    /// turn as a steering message instead of going nowhere.
    pub fn set_pending_queue(&mut self, queue: Arc<PendingMessageQueue>) {
        self.pending_queue = Some(queue);
    }

    // -- Control --

    pub fn abort(&self) {
        if let Some(ref cancel) = self.cancel {
            cancel.cancel();
        }
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.clear_all_queues();
        self.is_streaming = false;
        self.cancel = None;
    }

    // -- Prompting --

    /// Send a text prompt. Returns a stream of AgentEvents.
    pub async fn prompt(&mut self, text: impl Into<String>) -> mpsc::UnboundedReceiver<AgentEvent> {
        let msg = AgentMessage::Llm(Message::user(text));
        self.prompt_messages(vec![msg]).await
    }

    /// Send messages as a prompt.
    pub async fn prompt_messages(
        &mut self,
        messages: Vec<AgentMessage>,
    ) -> mpsc::UnboundedReceiver<AgentEvent> {
        assert!(
            !self.is_streaming,
            "Agent is already streaming. Use steer() or follow_up()."
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        self.is_streaming = true;

        // Build context
        let mut context = AgentContext {
            system_prompt: self.system_prompt.clone(),
            messages: self.messages.clone(),
            tools: Vec::new(), // Tools stay on Agent, referenced via config
        };

        // Move tools temporarily
        let tools = std::mem::take(&mut self.tools);
        context.tools = tools;

        let config = self.build_config();

        let _new_messages = agent_loop(messages, &mut context, &config, tx.clone(), cancel).await;

        // Restore tools and update state
        self.tools = context.tools;
        self.messages = context.messages;
        self.is_streaming = false;
        self.cancel = None;

        rx
    }

    /// Continue from current context (for retries after errors).
    pub async fn continue_loop(&mut self) -> mpsc::UnboundedReceiver<AgentEvent> {
        assert!(!self.is_streaming, "Agent is already streaming.");
        assert!(!self.messages.is_empty(), "No messages to continue from.");

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        self.is_streaming = true;

        let mut context = AgentContext {
            system_prompt: self.system_prompt.clone(),
            messages: self.messages.clone(),
            tools: std::mem::take(&mut self.tools),
        };

        let config = self.build_config();

        let _new_messages = agent_loop_continue(&mut context, &config, tx.clone(), cancel).await;

        self.tools = context.tools;
        self.messages = context.messages;
        self.is_streaming = false;
        self.cancel = None;

        rx
    }

    // -- Internal --

    fn build_config(&self) -> AgentLoopConfig<'_> {
        let steering_queue = self.steering_queue.clone();
        let steering_mode = self.steering_mode;
        let pending_queue = self.pending_queue.clone();

        let follow_up_queue = self.follow_up_queue.clone();
        let follow_up_mode = self.follow_up_mode;

        AgentLoopConfig {
            provider: &*self.provider,
            model: self.model.clone(),
            model_config: self.model_config.clone(),
            api_key: self.api_key.clone(),
            thinking_level: self.thinking_level,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            convert_to_llm: None,
            transform_context: None,
            get_steering_messages: Some(Box::new(move || {
                // Drain the Orchestrator-shared pending queue first, so
                // messages submitted mid-stream reach this turn.
                let mut messages: Vec<AgentMessage> = pending_queue
                    .as_ref()
                    .and_then(|q| q.drain_for(None))
                    .map(|text| vec![AgentMessage::Llm(Message::user(text))])
                    .unwrap_or_default();

                let mut queue = steering_queue.lock().unwrap();
                let internal: Vec<AgentMessage> = match steering_mode {
                    QueueMode::OneAtATime => {
                        if queue.is_empty() {
                            vec![]
                        } else {
                            vec![queue.remove(0)]
                        }
                    }
                    QueueMode::All => queue.drain(..).collect(),
                };
                messages.extend(internal);
                messages
            })),
            context_config: self.context_config.clone(),
            execution_limits: self.execution_limits.clone(),
            cache_config: self.cache_config.clone(),
            tool_execution: self.tool_execution.clone(),
            retry_config: self.retry_config.clone(),
            get_follow_up_messages: Some(Box::new(move || {
                let mut queue = follow_up_queue.lock().unwrap();
                match follow_up_mode {
                    QueueMode::OneAtATime => {
                        if queue.is_empty() {
                            vec![]
                        } else {
                            vec![queue.remove(0)]
                        }
                    }
                    QueueMode::All => queue.drain(..).collect(),
                }
            })),
            before_turn: self.before_turn.clone(),
            after_turn: self.after_turn.clone(),
            on_error: self.on_error.clone(),
            permission: self.permission.clone(),
            token_limiter: self.token_limiter.clone(),
            editable_file_suffixes: self.editable_file_suffixes.clone(),
            snapshot: self.snapshot.clone(),
            todo_store: self.todo_store.clone(),
            useful_info_store: self.useful_info_store.clone(),
        }
    }
}
