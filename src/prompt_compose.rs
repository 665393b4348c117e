//! Builds the pieces of the outgoing message list that aren't just "the
//! persisted conversation": the composed system prompt (base prompt,
//! `AGENTS.md`, platform/environment block, task-completion instruction) and
//! the special-user-message insertion the loop splices in fresh every round
//! (TODO snapshot, useful-info notes) without ever persisting it.

use crate::tools::{TodoStore, UsefulInfoStore};
use crate::types::Message;
use std::path::Path;
use std::sync::Arc;

const TASK_COMPLETION_INSTRUCTION: &str = "When you believe the task is complete, say so explicitly and stop making further tool calls. Don't continue iterating once the goal has been met.";

/// How many assistant messages from the end of the conversation the
/// special-user-message block gets inserted before.
pub const SPECIAL_USER_MESSAGE_DEPTH: usize = 3;

/// Base system prompt + `AGENTS.md` (if present in `project_root`) + a
/// platform/environment block + the task-completion instruction, in that
/// order. Computed once per session — unlike the special-user messages,
/// none of these sections change round to round.
pub async fn compose_system_prompt(base: &str, project_root: &Path) -> String {
    let mut sections = Vec::new();
    if !base.is_empty() {
        sections.push(base.to_string());
    }

    match tokio::fs::read_to_string(project_root.join("AGENTS.md")).await {
        Ok(contents) => sections.push(format!("# Project instructions (AGENTS.md)\n\n{contents}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to read AGENTS.md: {}", e),
    }

    sections.push(platform_environment_block(project_root));
    sections.push(TASK_COMPLETION_INSTRUCTION.to_string());

    sections.join("\n\n")
}

fn platform_environment_block(project_root: &Path) -> String {
    format!(
        "# Environment\nOS: {}\nArchitecture: {}\nWorking directory: {}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        project_root.display(),
    )
}

/// This round's special-user messages, built fresh from whichever stores are
/// configured. A store with nothing to report contributes nothing — an empty
/// TODO list or useful-info log doesn't inject a message at all.
pub fn special_user_messages(
    todo_store: Option<&Arc<TodoStore>>,
    useful_info_store: Option<&Arc<UsefulInfoStore>>,
) -> Vec<Message> {
    let mut out = Vec::new();
    if let Some(store) = todo_store {
        if let Some(snapshot) = store.render_snapshot() {
            out.push(Message::special_user("todo", snapshot));
        }
    }
    if let Some(store) = useful_info_store {
        if let Some(snapshot) = store.render_snapshot() {
            out.push(Message::special_user("useful_info", snapshot));
        }
    }
    out
}

/// Insert `extra` into `messages` just before the `depth`-th-from-end
/// assistant message. With fewer than `depth` assistant messages in the
/// conversation so far, the block goes at the very front instead — there's
/// no "N turns back" yet, so the earliest point in the transcript is the
/// closest approximation.
pub fn insert_before_nth_last_assistant(messages: &mut Vec<Message>, extra: Vec<Message>, depth: usize) {
    if extra.is_empty() {
        return;
    }

    let mut seen = 0;
    let mut insert_at = 0;
    for (i, m) in messages.iter().enumerate().rev() {
        if matches!(m, Message::Assistant { .. }) {
            seen += 1;
            if seen == depth {
                insert_at = i;
                break;
            }
        }
    }

    for (offset, msg) in extra.into_iter().enumerate() {
        messages.insert(insert_at + offset, msg);
    }
}
