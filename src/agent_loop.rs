//! The core agent loop: prompt → LLM stream → tool execution → repeat.
//!
//! This is the heart of yo-agent. It mirrors pi-agent-core's agent-loop.ts:
//!
//! - `agent_loop()` starts with new prompt messages
//! - `agent_loop_continue()` resumes from existing context
//!
//! Both return a stream of `AgentEvent`s.

use crate::context::{
    self, CompactionStrategy, ContextConfig, DefaultCompaction, ExecutionLimits, ExecutionTracker,
};
use crate::permission::{PermissionConfig, PermissionDecision};
use crate::provider::{StreamConfig, StreamEvent, StreamProvider, ToolDefinition};
use crate::retry::{log_retry, RetryConfig};
use crate::snapshot::SnapshotStore;
use crate::token_limiter::TokenLimiter;
use crate::types::*;
use std::sync::Arc;

/// Type alias for convert_to_llm callback.
pub type ConvertToLlmFn = Box<dyn Fn(&[AgentMessage]) -> Vec<Message> + Send + Sync>;
/// Type alias for transform_context callback.
pub type TransformContextFn = Box<dyn Fn(Vec<AgentMessage>) -> Vec<AgentMessage> + Send + Sync>;
/// Type alias for steering/follow-up message callbacks.
pub type GetMessagesFn = Box<dyn Fn() -> Vec<AgentMessage> + Send + Sync>;
/// Called before each turn's LLM call with the history so far and the turn
/// index. Returning `false` stops the loop before that turn is sent.
pub type BeforeTurnFn = Arc<dyn Fn(&[AgentMessage], usize) -> bool + Send + Sync>;
/// Called after each turn completes, with the full history and usage so far.
pub type AfterTurnFn = Arc<dyn Fn(&[AgentMessage], &Usage) + Send + Sync>;
/// Called when a turn ends in an unretryable provider error.
pub type OnErrorFn = Arc<dyn Fn(&str) + Send + Sync>;
use tokio::sync::mpsc;
use tracing::warn;

/// Configuration for the agent loop
pub struct AgentLoopConfig<'a> {
    pub provider: &'a dyn StreamProvider,
    pub model: String,
    /// Endpoint/header/compat info for this model. Required by every
    /// provider except Anthropic's own direct API.
    pub model_config: Option<crate::provider::ModelConfig>,
    pub api_key: String,
    pub thinking_level: ThinkingLevel,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,

    /// Convert AgentMessage[] → Message[] before each LLM call.
    /// Default: keep only LLM-compatible messages.
    pub convert_to_llm: Option<ConvertToLlmFn>,

    /// Transform context before convert_to_llm (for pruning, compaction).
    pub transform_context: Option<TransformContextFn>,

    /// Get steering messages (user interruptions mid-run).
    pub get_steering_messages: Option<GetMessagesFn>,

    /// Get follow-up messages (queued work after agent finishes).
    pub get_follow_up_messages: Option<GetMessagesFn>,

    /// Context window configuration (auto-compaction).
    pub context_config: Option<ContextConfig>,

    /// Execution limits (max turns, tokens, duration).
    pub execution_limits: Option<ExecutionLimits>,

    /// Prompt caching hints passed down to the provider on every call.
    pub cache_config: CacheConfig,

    /// How tool calls within one turn are scheduled. The loop itself only
    /// knows Sequential today; Concurrent is reserved for future tool sets.
    pub tool_execution: ToolExecutionStrategy,

    /// Retry policy for transient provider errors during streaming.
    pub retry_config: RetryConfig,

    /// Hook invoked immediately before each turn's LLM call.
    pub before_turn: Option<BeforeTurnFn>,

    /// Hook invoked immediately after each turn's assistant message lands.
    pub after_turn: Option<AfterTurnFn>,

    /// Hook invoked when a provider error exhausts retries.
    pub on_error: Option<OnErrorFn>,

    /// Gate + confirmation callback consulted before each tool call.
    /// `None` means every call runs unconfirmed (the behavior tests rely on).
    pub permission: Option<PermissionConfig>,

    /// Truncates oversized tool results before they re-enter context.
    pub token_limiter: Option<Arc<TokenLimiter>>,

    /// File suffixes the file-edit tools may touch, passed through to every
    /// call's `ToolContext` (sub-agents scope this down).
    pub editable_file_suffixes: Option<Vec<String>>,

    /// Session/store pair so file-edit tools can snapshot pre-images before
    /// mutating, threaded through to every call's `ToolContext`.
    pub snapshot: Option<SnapshotContext>,

    /// Backing store for the TODO snapshot spliced into the outgoing message
    /// list each round (§4.1 step 1's special-user messages).
    pub todo_store: Option<Arc<crate::tools::TodoStore>>,

    /// Backing store for the useful-info notes spliced the same way.
    pub useful_info_store: Option<Arc<crate::tools::UsefulInfoStore>>,
}

/// Ambient session identity + store a tool call's `ToolContext` needs to
/// back up a file before an edit tool overwrites it.
#[derive(Clone)]
pub struct SnapshotContext {
    pub session_id: String,
    pub message_index: usize,
    pub store: Arc<SnapshotStore>,
}

/// Default convert_to_llm: keep only user/assistant/toolResult messages.
fn default_convert_to_llm(messages: &[AgentMessage]) -> Vec<Message> {
    messages
        .iter()
        .filter_map(|m| m.as_llm().cloned())
        .collect()
}

/// Start an agent loop with new prompt messages.
pub async fn agent_loop(
    prompts: Vec<AgentMessage>,
    context: &mut AgentContext,
    config: &AgentLoopConfig<'_>,
    tx: mpsc::UnboundedSender<AgentEvent>,
    cancel: tokio_util::sync::CancellationToken,
) -> Vec<AgentMessage> {
    let mut new_messages: Vec<AgentMessage> = prompts.clone();

    // Add prompts to context
    for prompt in &prompts {
        context.messages.push(prompt.clone());
    }

    tx.send(AgentEvent::AgentStart).ok();
    tx.send(AgentEvent::TurnStart).ok();

    // Emit events for each prompt message
    for prompt in &prompts {
        tx.send(AgentEvent::MessageStart {
            message: prompt.clone(),
        })
        .ok();
        tx.send(AgentEvent::MessageEnd {
            message: prompt.clone(),
        })
        .ok();
    }

    run_loop(context, &mut new_messages, config, &tx, &cancel).await;

    tx.send(AgentEvent::AgentEnd {
        messages: new_messages.clone(),
    })
    .ok();
    new_messages
}

/// Continue an agent loop from existing context (for retries).
pub async fn agent_loop_continue(
    context: &mut AgentContext,
    config: &AgentLoopConfig<'_>,
    tx: mpsc::UnboundedSender<AgentEvent>,
    cancel: tokio_util::sync::CancellationToken,
) -> Vec<AgentMessage> {
    assert!(
        !context.messages.is_empty(),
        "Cannot continue: no messages in context"
    );

    if let Some(last) = context.messages.last() {
        assert!(
            last.role() != "assistant",
            "Cannot continue from assistant message"
        );
    }

    let mut new_messages: Vec<AgentMessage> = Vec::new();

    tx.send(AgentEvent::AgentStart).ok();
    tx.send(AgentEvent::TurnStart).ok();

    run_loop(context, &mut new_messages, config, &tx, &cancel).await;

    tx.send(AgentEvent::AgentEnd {
        messages: new_messages.clone(),
    })
    .ok();
    new_messages
}

/// True for messages that only make sense as part of a turn that completed:
/// a user/steering message awaiting a response, or an assistant message that
/// still has unresolved tool calls.
fn is_dangling_tail(msg: &AgentMessage) -> bool {
    match msg.as_llm() {
        Some(Message::User { .. }) => true,
        Some(Message::Assistant { content, .. }) => content
            .iter()
            .any(|c| matches!(c, Content::ToolCall { .. })),
        _ => false,
    }
}

/// Pop dangling messages off the tail of `messages` (and the mirrored
/// `new_messages`) after a cancelled turn, returning them in original order.
fn truncate_dangling_tail(
    messages: &mut Vec<AgentMessage>,
    new_messages: &mut Vec<AgentMessage>,
) -> Vec<AgentMessage> {
    let mut truncated = Vec::new();
    while let Some(last) = messages.last() {
        if is_dangling_tail(last) {
            truncated.push(messages.pop().unwrap());
            new_messages.pop();
        } else {
            break;
        }
    }
    truncated.reverse();
    truncated
}

/// Main loop logic shared by agent_loop and agent_loop_continue.
///
/// Outer loop: continues when follow-up messages arrive after agent would stop.
/// Inner loop: process tool calls and steering messages.
async fn run_loop(
    context: &mut AgentContext,
    new_messages: &mut Vec<AgentMessage>,
    config: &AgentLoopConfig<'_>,
    tx: &mpsc::UnboundedSender<AgentEvent>,
    cancel: &tokio_util::sync::CancellationToken,
) {
    let mut first_turn = true;
    let mut turn_index = 0usize;
    let mut tracker = config
        .execution_limits
        .as_ref()
        .map(|limits| ExecutionTracker::new(limits.clone()));

    // Check for steering messages at start
    let mut pending: Vec<AgentMessage> = config
        .get_steering_messages
        .as_ref()
        .map(|f| f())
        .unwrap_or_default();

    // Outer loop: follow-ups after agent would stop
    loop {
        if cancel.is_cancelled() {
            let truncated = truncate_dangling_tail(&mut context.messages, new_messages);
            tx.send(AgentEvent::Discontinued { truncated }).ok();
            return;
        }

        let mut steering_after_tools: Option<Vec<AgentMessage>> = None;

        // Inner loop: runs at least once, then continues if tool calls or pending messages
        loop {
            if cancel.is_cancelled() {
                let truncated = truncate_dangling_tail(&mut context.messages, new_messages);
                tx.send(AgentEvent::Discontinued { truncated }).ok();
                return;
            }

            if !first_turn {
                tx.send(AgentEvent::TurnStart).ok();
            } else {
                first_turn = false;
            }

            // Inject pending messages
            if !pending.is_empty() {
                for msg in pending.drain(..) {
                    tx.send(AgentEvent::MessageStart {
                        message: msg.clone(),
                    })
                    .ok();
                    tx.send(AgentEvent::MessageEnd {
                        message: msg.clone(),
                    })
                    .ok();
                    context.messages.push(msg.clone());
                    new_messages.push(msg);
                }
            }

            // Check execution limits
            if let Some(ref tracker) = tracker {
                if let Some(reason) = tracker.check_limits() {
                    warn!("Execution limit reached: {}", reason);
                    let limit_msg = AgentMessage::Llm(Message::User {
                        content: vec![Content::Text {
                            text: format!("[Agent stopped: {}]", reason),
                        }],
                        images: Vec::new(),
                        original_content: None,
                        special_user_message: None,
                        timestamp: now_ms(),
                    });
                    tx.send(AgentEvent::MessageStart {
                        message: limit_msg.clone(),
                    })
                    .ok();
                    tx.send(AgentEvent::MessageEnd {
                        message: limit_msg.clone(),
                    })
                    .ok();
                    context.messages.push(limit_msg.clone());
                    new_messages.push(limit_msg);
                    return;
                }
            }

            // Compact context if configured (tiered: tool outputs → summarize → drop)
            if let Some(ref ctx_config) = config.context_config {
                context.messages = context::compact_messages(
                    std::mem::take(&mut context.messages),
                    ctx_config,
                    &DefaultCompaction,
                );
            }

            if let Some(before_turn) = &config.before_turn {
                if !before_turn(&context.messages, turn_index) {
                    return;
                }
            }
            turn_index += 1;

            // Stream assistant response
            let message = stream_assistant_response(context, config, tx, cancel).await;

            // Check for error/abort BEFORE persisting anything — an
            // in-progress assistant message must never join the transcript.
            if let Message::Assistant {
                ref stop_reason, ..
            } = message
            {
                if *stop_reason == StopReason::Aborted {
                    let truncated = truncate_dangling_tail(&mut context.messages, new_messages);
                    tx.send(AgentEvent::Discontinued { truncated }).ok();
                    return;
                }
                if *stop_reason == StopReason::Error {
                    let agent_msg: AgentMessage = message.into();
                    tx.send(AgentEvent::TurnEnd {
                        message: agent_msg,
                        tool_results: vec![],
                    })
                    .ok();
                    return;
                }
            }

            let agent_msg: AgentMessage = message.clone().into();
            context.messages.push(agent_msg.clone());
            new_messages.push(agent_msg.clone());

            if let Some(after_turn) = &config.after_turn {
                let usage = match &message {
                    Message::Assistant { usage, .. } => usage.clone(),
                    _ => Usage::default(),
                };
                after_turn(&context.messages, &usage);
            }

            // Extract tool calls
            let tool_calls: Vec<_> = match &message {
                Message::Assistant { content, .. } => content
                    .iter()
                    .filter_map(|c| match c {
                        Content::ToolCall {
                            id,
                            name,
                            arguments,
                        } => Some((id.clone(), name.clone(), arguments.clone())),
                        _ => None,
                    })
                    .collect(),
                _ => vec![],
            };

            let has_tool_calls = !tool_calls.is_empty();
            let mut tool_results: Vec<Message> = Vec::new();

            if has_tool_calls {
                let execution = execute_tool_calls(&context.tools, &tool_calls, tx, cancel, config).await;

                tool_results = execution.tool_results;
                steering_after_tools = execution.steering_messages;

                for result in &tool_results {
                    let am: AgentMessage = result.clone().into();
                    context.messages.push(am.clone());
                    new_messages.push(am);
                }
            }

            // Track turn for execution limits
            if let Some(ref mut tracker) = tracker {
                let turn_tokens = match &message {
                    Message::Assistant { usage, .. } => (usage.input + usage.output) as usize,
                    _ => context::message_tokens(&agent_msg),
                };
                tracker.record_turn(turn_tokens);
            }

            tx.send(AgentEvent::TurnEnd {
                message: agent_msg,
                tool_results,
            })
            .ok();

            // Check steering after turn
            if let Some(steering) = steering_after_tools.take() {
                if !steering.is_empty() {
                    pending = steering;
                    continue;
                }
            }

            pending = config
                .get_steering_messages
                .as_ref()
                .map(|f| f())
                .unwrap_or_default();

            // Exit inner loop if no more tool calls and no pending messages
            if !has_tool_calls && pending.is_empty() {
                break;
            }
        }

        // Agent would stop. Check for follow-ups.
        let follow_ups = config
            .get_follow_up_messages
            .as_ref()
            .map(|f| f())
            .unwrap_or_default();

        if !follow_ups.is_empty() {
            pending = follow_ups;
            continue;
        }

        break;
    }
}

/// Number of internal retries when the model returns a response with no
/// text and no tool calls, before giving up and surfacing a failure.
const EMPTY_RESPONSE_RETRIES: usize = 3;
const EMPTY_RESPONSE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// True for an assistant turn that stopped normally but produced nothing
/// usable — no text, no tool calls. Providers occasionally return this on a
/// transient hiccup; retrying the call usually recovers.
fn is_empty_assistant_response(msg: &Message) -> bool {
    match msg {
        Message::Assistant {
            stop_reason,
            content,
            ..
        } => {
            if *stop_reason == StopReason::Error || *stop_reason == StopReason::Aborted {
                return false;
            }
            !content.iter().any(|c| match c {
                Content::Text { text } => !text.trim().is_empty(),
                Content::ToolCall { .. } => true,
                _ => false,
            })
        }
        _ => false,
    }
}

/// Stream an assistant response from the LLM, internally retrying empty
/// responses up to `EMPTY_RESPONSE_RETRIES` times.
async fn stream_assistant_response(
    context: &AgentContext,
    config: &AgentLoopConfig<'_>,
    tx: &mpsc::UnboundedSender<AgentEvent>,
    cancel: &tokio_util::sync::CancellationToken,
) -> Message {
    let mut attempt = 0usize;
    loop {
        let message = stream_assistant_response_once(context, config, tx, cancel).await;

        if !is_empty_assistant_response(&message) {
            return message;
        }

        if attempt >= EMPTY_RESPONSE_RETRIES {
            warn!("Assistant returned an empty response after {} retries, giving up", attempt);
            return Message::Assistant {
                content: vec![Content::Text {
                    text: String::new(),
                }],
                stop_reason: StopReason::Error,
                model: config.model.clone(),
                provider: "unknown".into(),
                usage: Usage::default(),
                timestamp: now_ms(),
                error_message: Some("assistant returned an empty response after retrying".into()),
            };
        }

        attempt += 1;
        tx.send(AgentEvent::RetryStatus {
            attempt,
            max_attempts: EMPTY_RESPONSE_RETRIES + 1,
            delay_ms: EMPTY_RESPONSE_RETRY_DELAY.as_millis() as u64,
            reason: "empty assistant response".into(),
        })
        .ok();
        tokio::time::sleep(EMPTY_RESPONSE_RETRY_DELAY).await;
    }
}

/// One LLM streaming call, with its own retry loop over transient provider
/// errors (rate limits, network blips).
async fn stream_assistant_response_once(
    context: &AgentContext,
    config: &AgentLoopConfig<'_>,
    tx: &mpsc::UnboundedSender<AgentEvent>,
    cancel: &tokio_util::sync::CancellationToken,
) -> Message {
    // Apply context transform
    let messages = if let Some(transform) = &config.transform_context {
        transform(context.messages.clone())
    } else {
        context.messages.clone()
    };

    // Convert to LLM messages
    let convert = config.convert_to_llm.as_ref();
    let mut llm_messages = match convert {
        Some(f) => f(&messages),
        None => default_convert_to_llm(&messages),
    };

    // Splice in this round's special-user messages (TODO snapshot,
    // useful-info notes) fresh every call — never persisted into
    // `context.messages`, per §4.1 step 1.
    let special = crate::prompt_compose::special_user_messages(
        config.todo_store.as_ref(),
        config.useful_info_store.as_ref(),
    );
    crate::prompt_compose::insert_before_nth_last_assistant(
        &mut llm_messages,
        special,
        crate::prompt_compose::SPECIAL_USER_MESSAGE_DEPTH,
    );

    // Build tool definitions
    let tool_defs: Vec<ToolDefinition> = context
        .tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();

    let stream_config = StreamConfig {
        model: config.model.clone(),
        system_prompt: context.system_prompt.clone(),
        messages: llm_messages,
        tools: tool_defs,
        thinking_level: config.thinking_level,
        api_key: config.api_key.clone(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        model_config: config.model_config.clone(),
        cache_config: config.cache_config.clone(),
    };

    let provider = config.provider;
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        let result = run_one_stream_attempt(provider, stream_config.clone(), tx, cancel).await;

        match result {
            Ok(msg) => return msg,
            Err(e) => {
                let retryable = e.is_retryable() && attempt <= config.retry_config.max_retries;
                if !retryable {
                    if let Some(on_error) = &config.on_error {
                        on_error(&e.to_string());
                    }
                    warn!("Provider error (giving up): {}", e);
                    return Message::Assistant {
                        content: vec![Content::Text {
                            text: String::new(),
                        }],
                        stop_reason: StopReason::Error,
                        model: config.model.clone(),
                        provider: "unknown".into(),
                        usage: Usage::default(),
                        timestamp: now_ms(),
                        error_message: Some(e.to_string()),
                    };
                }

                let delay = e
                    .retry_after()
                    .unwrap_or_else(|| config.retry_config.delay_for_attempt(attempt));
                log_retry(attempt, config.retry_config.max_retries, &delay, &e);
                tx.send(AgentEvent::RetryStatus {
                    attempt,
                    max_attempts: config.retry_config.max_retries + 1,
                    delay_ms: delay.as_millis() as u64,
                    reason: e.to_string(),
                })
                .ok();
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Run a single provider streaming attempt, forwarding events live as they
/// arrive rather than draining the channel only after the stream finishes —
/// the channel is unbounded so nothing would be lost either way, but
/// draining it only at the end meant deltas arriving before the final
/// `Done`/`Error` event had no in-progress message to attach to yet and
/// were silently swallowed.
async fn run_one_stream_attempt(
    provider: &dyn StreamProvider,
    stream_config: StreamConfig,
    tx: &mpsc::UnboundedSender<AgentEvent>,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<Message, crate::provider::ProviderError> {
    let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();
    let provider_cancel = cancel.clone();

    let stream_future = provider.stream(stream_config, stream_tx, provider_cancel);
    tokio::pin!(stream_future);

    let mut building: Option<AgentMessage> = None;

    loop {
        tokio::select! {
            result = &mut stream_future => {
                return result;
            }
            event = stream_rx.recv() => {
                let Some(event) = event else { continue };
                match event {
                    StreamEvent::Start => {
                        if building.is_none() {
                            let placeholder: AgentMessage = Message::Assistant {
                                content: vec![],
                                stop_reason: StopReason::ToolUse,
                                model: String::new(),
                                provider: String::new(),
                                usage: Usage::default(),
                                timestamp: now_ms(),
                                error_message: None,
                            }
                            .into();
                            tx.send(AgentEvent::MessageStart { message: placeholder.clone() }).ok();
                            building = Some(placeholder);
                        }
                    }
                    StreamEvent::TextDelta { delta, .. } => {
                        if let Some(ref msg) = building {
                            tx.send(AgentEvent::MessageUpdate {
                                message: msg.clone(),
                                delta: StreamDelta::Text { delta },
                            })
                            .ok();
                        }
                    }
                    StreamEvent::ThinkingDelta { delta, .. } => {
                        if let Some(ref msg) = building {
                            tx.send(AgentEvent::MessageUpdate {
                                message: msg.clone(),
                                delta: StreamDelta::Thinking { delta },
                            })
                            .ok();
                        }
                    }
                    StreamEvent::ToolCallDelta { delta, .. } => {
                        if let Some(ref msg) = building {
                            tx.send(AgentEvent::MessageUpdate {
                                message: msg.clone(),
                                delta: StreamDelta::ToolCallDelta { delta },
                            })
                            .ok();
                        }
                    }
                    StreamEvent::Done { message } => {
                        let am: AgentMessage = message.into();
                        tx.send(AgentEvent::MessageEnd { message: am }).ok();
                    }
                    StreamEvent::Error { message } => {
                        let am: AgentMessage = message.into();
                        tx.send(AgentEvent::MessageEnd { message: am }).ok();
                    }
                    StreamEvent::ToolCallStart { .. } | StreamEvent::ToolCallEnd { .. } => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tool execution
// ---------------------------------------------------------------------------

struct ToolExecutionResult {
    tool_results: Vec<Message>,
    steering_messages: Option<Vec<AgentMessage>>,
}

async fn execute_tool_calls(
    tools: &[Box<dyn AgentTool>],
    tool_calls: &[(String, String, serde_json::Value)],
    tx: &mpsc::UnboundedSender<AgentEvent>,
    cancel: &tokio_util::sync::CancellationToken,
    config: &AgentLoopConfig<'_>,
) -> ToolExecutionResult {
    // Sequential is the only strategy actually driven today (see
    // ToolExecutionStrategy's docs); Concurrent is accepted but not yet
    // parallelized, since interleaving file-edit tools against a shared
    // snapshot store isn't safe without per-file locking.
    let _ = config.tool_execution;
    let get_steering = config.get_steering_messages.as_ref();

    let mut results: Vec<Message> = Vec::new();
    let mut steering_messages: Option<Vec<AgentMessage>> = None;

    for (index, (id, name, args)) in tool_calls.iter().enumerate() {
        let tool = tools.iter().find(|t| t.name() == name);

        tx.send(AgentEvent::ToolExecutionStart {
            tool_call_id: id.clone(),
            tool_name: name.clone(),
            args: args.clone(),
        })
        .ok();

        let (result, is_error) = if let Some(reply) = check_permission(config, name, args) {
            (
                ToolResult {
                    content: vec![Content::Text { text: reply }],
                    details: serde_json::Value::Null,
                },
                true,
            )
        } else {
            let tx_update = tx.clone();
            let update_id = id.clone();
            let update_name = name.clone();
            let mut ctx = ToolContext::new(cancel.child_token()).with_on_update(Arc::new(
                move |partial| {
                    tx_update
                        .send(AgentEvent::ToolExecutionUpdate {
                            tool_call_id: update_id.clone(),
                            tool_name: update_name.clone(),
                            partial_result: partial,
                        })
                        .ok();
                },
            ));
            if let Some(suffixes) = &config.editable_file_suffixes {
                ctx = ctx.with_editable_file_suffixes(suffixes.clone());
            }
            if let Some(snapshot) = &config.snapshot {
                ctx = ctx.with_snapshot_store(
                    snapshot.session_id.clone(),
                    snapshot.message_index,
                    snapshot.store.clone(),
                );
            }

            match tool {
                Some(tool) => match tool.execute(id, args.clone(), &ctx).await {
                    Ok(r) => (r, false),
                    Err(e) => (
                        ToolResult {
                            content: vec![Content::Text {
                                text: e.to_string(),
                            }],
                            details: serde_json::Value::Null,
                        },
                        true,
                    ),
                },
                None => (
                    ToolResult {
                        content: vec![Content::Text {
                            text: format!("Tool {} not found", name),
                        }],
                        details: serde_json::Value::Null,
                    },
                    true,
                ),
            }
        };

        let result = match &config.token_limiter {
            Some(limiter) if !is_error => {
                limiter.wrap_tool_result_with_token_limit(result, name, None)
            }
            _ => result,
        };

        tx.send(AgentEvent::ToolExecutionEnd {
            tool_call_id: id.clone(),
            tool_name: name.clone(),
            result: result.clone(),
            is_error,
        })
        .ok();

        let tool_result_msg = Message::ToolResult {
            tool_call_id: id.clone(),
            tool_name: name.clone(),
            content: result.content,
            is_error,
            timestamp: now_ms(),
        };

        tx.send(AgentEvent::MessageStart {
            message: tool_result_msg.clone().into(),
        })
        .ok();
        tx.send(AgentEvent::MessageEnd {
            message: tool_result_msg.clone().into(),
        })
        .ok();

        results.push(tool_result_msg);

        // Check for steering — skip remaining tools if user interrupted
        if let Some(get_steering_fn) = get_steering {
            let steering = get_steering_fn();
            if !steering.is_empty() {
                steering_messages = Some(steering);

                // Skip remaining tool calls
                for (skip_id, skip_name, _) in &tool_calls[index + 1..] {
                    let skipped = skip_tool_call(skip_id, skip_name, tx);
                    results.push(skipped);
                }
                break;
            }
        }
    }

    ToolExecutionResult {
        tool_results: results,
        steering_messages,
    }
}

/// The string a call is checked/approved against: the shell command for
/// bash-like tools, the path for file tools, the whole params blob otherwise.
fn permission_arg(params: &serde_json::Value) -> String {
    params["command"]
        .as_str()
        .or_else(|| params["path"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| params.to_string())
}

/// Consults `config.permission`, if any, before a call runs. Returns `Some`
/// with the rejection message to surface as the tool result when the user
/// (or the gate itself) declines; `None` means the call may proceed.
fn check_permission(
    config: &AgentLoopConfig<'_>,
    name: &str,
    args: &serde_json::Value,
) -> Option<String> {
    let permission = config.permission.as_ref()?;
    let arg = permission_arg(args);

    if !permission.gate.needs_confirmation(name, &arg) {
        return None;
    }

    match (permission.confirm)(name, &arg) {
        PermissionDecision::ApproveOnce => None,
        PermissionDecision::ApproveAlways => {
            if let Some(entry) =
                permission
                    .gate
                    .apply_decision(name, &arg, &PermissionDecision::ApproveAlways)
            {
                if let Some(persist) = &permission.persist_always_approved {
                    persist(entry);
                }
            }
            None
        }
        PermissionDecision::Reject => Some("Error: Tool execution rejected by user".into()),
        PermissionDecision::RejectWithReply(reason) => {
            Some(format!("Error: Tool execution rejected by user: {reason}"))
        }
    }
}

fn skip_tool_call(
    tool_call_id: &str,
    tool_name: &str,
    tx: &mpsc::UnboundedSender<AgentEvent>,
) -> Message {
    let result = ToolResult {
        content: vec![Content::Text {
            text: "Skipped due to queued user message.".into(),
        }],
        details: serde_json::Value::Null,
    };

    tx.send(AgentEvent::ToolExecutionStart {
        tool_call_id: tool_call_id.into(),
        tool_name: tool_name.into(),
        args: serde_json::Value::Null,
    })
    .ok();

    tx.send(AgentEvent::ToolExecutionEnd {
        tool_call_id: tool_call_id.into(),
        tool_name: tool_name.into(),
        result: result.clone(),
        is_error: true,
    })
    .ok();

    let msg = Message::ToolResult {
        tool_call_id: tool_call_id.into(),
        tool_name: tool_name.into(),
        content: result.content,
        is_error: true,
        timestamp: now_ms(),
    };

    tx.send(AgentEvent::MessageStart {
        message: msg.clone().into(),
    })
    .ok();
    tx.send(AgentEvent::MessageEnd {
        message: msg.clone().into(),
    })
    .ok();

    msg
}
