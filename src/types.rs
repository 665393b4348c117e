use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Content types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    #[serde(rename = "toolCall")]
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message synthesized by the engine itself and spliced into the prompt
/// near the tail of the conversation (TODO snapshot, useful-info notes,
/// folder notebooks) rather than persisted as part of the real transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpecialUserMessage {
    /// What generated this message, e.g. "todo", "useful_info", "notebook".
    pub kind: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    /// A system-level instruction injected outside the persisted transcript
    /// (AGENTS.md, platform/environment block, task-completion instruction).
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User {
        content: Vec<Content>,
        /// Images attached to this turn, kept separate from `content` so
        /// providers that need different encoding can handle them distinctly.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<Content>,
        /// The user's literal, unprocessed input, if `content` was rewritten
        /// (e.g. command expansion) before being sent to the model.
        #[serde(
            rename = "originalContent",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        original_content: Option<String>,
        /// Set when this message is an engine-synthesized insertion rather
        /// than something the user typed.
        #[serde(
            rename = "specialUserMessage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        special_user_message: Option<SpecialUserMessage>,
        timestamp: u64,
    },
    #[serde(rename = "assistant")]
    Assistant {
        content: Vec<Content>,
        #[serde(rename = "stopReason")]
        stop_reason: StopReason,
        model: String,
        provider: String,
        usage: Usage,
        timestamp: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    #[serde(rename = "toolResult")]
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        content: Vec<Content>,
        #[serde(rename = "isError")]
        is_error: bool,
        timestamp: u64,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: vec![Content::Text { text: text.into() }],
            images: Vec::new(),
            original_content: None,
            special_user_message: None,
            timestamp: now_ms(),
        }
    }

    /// Build an engine-synthesized user-turn insertion (TODO snapshot,
    /// useful-info notes, folder notebooks) — never persisted, rebuilt
    /// fresh every round.
    pub fn special_user(kind: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::User {
            content: vec![Content::Text { text: text.clone() }],
            images: Vec::new(),
            original_content: None,
            special_user_message: Some(SpecialUserMessage {
                kind: kind.into(),
                content: text,
            }),
            timestamp: now_ms(),
        }
    }

    pub fn role(&self) -> &str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "toolResult",
        }
    }
}

// ---------------------------------------------------------------------------
// AgentMessage — LLM messages + extensible custom types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentMessage {
    /// Standard LLM message
    Llm(Message),
    /// App-specific message (UI-only, notifications, etc.)
    Extension {
        role: String,
        #[serde(flatten)]
        data: serde_json::Value,
    },
}

impl AgentMessage {
    pub fn role(&self) -> &str {
        match self {
            Self::Llm(m) => m.role(),
            Self::Extension { role, .. } => role,
        }
    }

    pub fn as_llm(&self) -> Option<&Message> {
        match self {
            Self::Llm(m) => Some(m),
            _ => None,
        }
    }
}

impl From<Message> for AgentMessage {
    fn from(m: Message) -> Self {
        Self::Llm(m)
    }
}

// ---------------------------------------------------------------------------
// Stop reasons & usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cache_write: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Fraction of input tokens served from cache (0.0–1.0).
    /// Returns 0.0 if no input tokens were processed.
    pub fn cache_hit_rate(&self) -> f64 {
        let total_input = self.input + self.cache_read + self.cache_write;
        if total_input == 0 {
            return 0.0;
        }
        self.cache_read as f64 / total_input as f64
    }
}

// ---------------------------------------------------------------------------
// Cache configuration
// ---------------------------------------------------------------------------

/// Controls prompt caching behavior for providers that support it.
///
/// By default, caching is enabled with automatic breakpoint placement.
/// This gives optimal cost savings without any user configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch — set to false to disable all caching hints.
    /// Default: true.
    pub enabled: bool,
    /// How cache breakpoints are placed.
    pub strategy: CacheStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: CacheStrategy::Auto,
        }
    }
}

/// Strategy for placing cache breakpoints (Anthropic-specific; other providers
/// handle caching automatically regardless of this setting).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CacheStrategy {
    /// Automatic breakpoint placement (recommended).
    /// Caches: system prompt, tool definitions, and recent conversation history.
    #[default]
    Auto,
    /// Disable caching entirely.
    Disabled,
    /// Fine-grained control over what gets cached.
    Manual {
        /// Cache the system prompt.
        cache_system: bool,
        /// Cache tool definitions.
        cache_tools: bool,
        /// Cache conversation history (second-to-last message).
        cache_messages: bool,
    },
}

// ---------------------------------------------------------------------------
// Thinking level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
}

// ---------------------------------------------------------------------------
// Tool execution context
// ---------------------------------------------------------------------------

/// Callback a tool can invoke with a partial result while it's still running
/// (e.g. streaming bash output, or a partially-applied edit). Cheap to clone.
pub type ToolUpdateFn = std::sync::Arc<dyn Fn(ToolResult) + Send + Sync>;

/// How a batch of tool calls within one turn is scheduled.
///
/// Sequential is the only strategy the conversation engine currently drives
/// (file-edit tools are not safe to interleave against a shared snapshot
/// store), but the seam is kept so a future batch of read-only tools could
/// run concurrently without changing `AgentTool::execute`'s signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolExecutionStrategy {
    #[default]
    Sequential,
    Concurrent {
        max_in_flight: usize,
    },
}

/// Everything an `AgentTool::execute` call needs beyond its own parameters.
///
/// Replaces the three divergent ad-hoc signatures tools used to have
/// (some took only a cancellation token, some also took an update callback,
/// one took nothing but a struct of its own) with one shared context.
pub struct ToolContext {
    /// Cooperative cancellation — checked by long-running tools between steps.
    pub cancel: tokio_util::sync::CancellationToken,
    /// Optional sink for partial/streaming results while the tool still runs.
    pub on_update: Option<ToolUpdateFn>,
    /// File suffixes the file-edit tools are allowed to touch, if restricted
    /// (sub-agents can be scoped to e.g. only `.md` files).
    pub editable_file_suffixes: Option<Vec<String>>,
    /// Skip the permission gate / before-hooks for this call (used for
    /// synthetic tool calls the engine itself injects, e.g. compaction).
    pub skip_tool_hooks: bool,
    /// Session id and current user-turn index, for tools that record
    /// SnapshotStore pre-images (file edits) before mutating.
    pub session_id: Option<String>,
    pub message_index: usize,
    pub snapshot_store: Option<std::sync::Arc<crate::snapshot::SnapshotStore>>,
}

impl ToolContext {
    pub fn new(cancel: tokio_util::sync::CancellationToken) -> Self {
        Self {
            cancel,
            on_update: None,
            editable_file_suffixes: None,
            skip_tool_hooks: false,
            session_id: None,
            message_index: 0,
            snapshot_store: None,
        }
    }

    pub fn with_snapshot_store(
        mut self,
        session_id: impl Into<String>,
        message_index: usize,
        store: std::sync::Arc<crate::snapshot::SnapshotStore>,
    ) -> Self {
        self.session_id = Some(session_id.into());
        self.message_index = message_index;
        self.snapshot_store = Some(store);
        self
    }

    /// Record a pre-image of `path` with the SnapshotStore, if one is wired up.
    /// No-op when the context carries no session/store (e.g. most tests).
    pub async fn snapshot_before_write(&self, path: &std::path::Path) {
        let (Some(store), Some(session_id)) = (&self.snapshot_store, &self.session_id) else {
            return;
        };
        let existed = tokio::fs::metadata(path).await.is_ok();
        let content_before = if existed {
            tokio::fs::read_to_string(path).await.ok()
        } else {
            None
        };
        let _ = store
            .backup_file(session_id, self.message_index, path, existed, content_before)
            .await;
    }

    pub fn with_on_update(mut self, f: ToolUpdateFn) -> Self {
        self.on_update = Some(f);
        self
    }

    pub fn with_editable_file_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.editable_file_suffixes = Some(suffixes);
        self
    }

    pub fn with_skip_tool_hooks(mut self, skip: bool) -> Self {
        self.skip_tool_hooks = skip;
        self
    }

    /// Emit a partial update if a sink was wired up. No-op otherwise.
    pub fn emit_update(&self, result: ToolResult) {
        if let Some(f) = &self.on_update {
            f(result);
        }
    }
}

// ---------------------------------------------------------------------------
// Tool definition
// ---------------------------------------------------------------------------

/// A tool the agent can call. Implement this trait for your tools.
#[async_trait::async_trait]
pub trait AgentTool: Send + Sync {
    /// Unique tool name (used in LLM tool_use)
    fn name(&self) -> &str;
    /// Human-readable label for UI
    fn label(&self) -> &str;
    /// Description for the LLM
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;
    /// Execute the tool
    async fn execute(
        &self,
        tool_call_id: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("Cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Agent events (for streaming UI updates)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStart,
    AgentEnd {
        messages: Vec<AgentMessage>,
    },
    TurnStart,
    TurnEnd {
        message: AgentMessage,
        tool_results: Vec<Message>,
    },
    MessageStart {
        message: AgentMessage,
    },
    MessageUpdate {
        message: AgentMessage,
        delta: StreamDelta,
    },
    MessageEnd {
        message: AgentMessage,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        partial_result: ToolResult,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: ToolResult,
        is_error: bool,
    },
    /// A transient provider error or empty assistant response is being
    /// retried. Surfaced so UIs can show "retrying..." instead of stalling.
    RetryStatus {
        attempt: usize,
        max_attempts: usize,
        delay_ms: u64,
        reason: String,
    },
    /// Emitted instead of `TurnEnd` when a turn is cancelled mid-stream.
    /// `truncated` holds the dangling tail (in-progress assistant message and
    /// any tool calls it started) that was dropped from the conversation.
    Discontinued {
        truncated: Vec<AgentMessage>,
    },
}

#[derive(Debug, Clone)]
pub enum StreamDelta {
    Text { delta: String },
    Thinking { delta: String },
    ToolCallDelta { delta: String },
}

// ---------------------------------------------------------------------------
// Agent context (passed to the loop)
// ---------------------------------------------------------------------------

pub struct AgentContext {
    pub system_prompt: String,
    pub messages: Vec<AgentMessage>,
    pub tools: Vec<Box<dyn AgentTool>>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::ToolUse => write!(f, "toolUse"),
            Self::Error => write!(f, "error"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}
