//! PermissionGate — decides whether a tool call needs user confirmation
//! before it runs.
//!
//! Generalizes [`crate::tools::bash::BashTool`]'s `deny_patterns` +
//! `confirm_fn` pair (a hardcoded reject list plus an optional callback) into
//! a reusable predicate that every file/shell tool can be checked against,
//! independent of which concrete tool is asking.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// The user's answer to a confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    ApproveOnce,
    ApproveAlways,
    Reject,
    RejectWithReply(String),
}

/// A (tool_name, arg_pattern) pair that's been approved for the rest of the
/// session, or persisted as always-approved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalEntry {
    pub tool: String,
    /// Glob-ish pattern matched against a tool-specific argument (e.g. a
    /// command prefix or path prefix). `*` matches the whole call.
    pub pattern: String,
}

impl ApprovalEntry {
    pub fn any(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            pattern: "*".into(),
        }
    }

    fn matches(&self, tool: &str, arg: &str) -> bool {
        self.tool == tool && (self.pattern == "*" || arg.starts_with(&self.pattern))
    }
}

/// Static classification of calls that require confirmation even under YOLO
/// mode: destructive shell patterns, unrestricted terminal execution, and
/// filesystem writes outside the project root.
fn is_always_sensitive(tool: &str, arg: &str) -> bool {
    const DENY_SHELL_PATTERNS: &[&str] = &[
        "rm -rf /",
        "rm -rf /*",
        "rm -rf ~",
        "mkfs",
        "dd if=",
        ":(){:|:&};:",
    ];

    match tool {
        "bash" | "terminal-execute" | "terminal_execute" => {
            DENY_SHELL_PATTERNS.iter().any(|p| arg.contains(p))
        }
        "write_file" | "edit_search" | "edit_range" | "filesystem-edit"
        | "filesystem-edit_search" | "filesystem-create" => {
            arg.starts_with("..") || arg.starts_with('/') && !arg.starts_with("/tmp")
        }
        _ => false,
    }
}

/// Whether YOLO mode would still need confirmation for this call, per the
/// caller-supplied policy function (`needsConfirmation`). Even when the
/// policy says no, always-sensitive calls are never bypassed.
pub type YoloChecker = Box<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Blocking prompt shown to the user when `PermissionGate::needs_confirmation`
/// returns true for a call the conversation engine is about to dispatch.
/// Called with the tool name and the same arg string the gate was checked
/// against, so a caller-supplied pattern (for `ApproveAlways`) lines up with
/// what `ApprovalEntry::matches` will see on the next call.
pub type ConfirmCb = Arc<dyn Fn(&str, &str) -> PermissionDecision + Send + Sync>;

/// Invoked with the `ApprovalEntry` `PermissionGate::apply_decision` just
/// recorded in memory, so the caller can persist it (e.g. to the on-disk
/// config's `always_approved` list) without the gate itself knowing about
/// config file storage. Synchronous — callers that need async persistence
/// should spawn their own task from inside this callback.
pub type PersistApprovalFn = Arc<dyn Fn(ApprovalEntry) + Send + Sync>;

/// Bundles a gate with the callback the conversation engine uses to ask the
/// user for a decision when the gate says a call isn't pre-approved.
#[derive(Clone)]
pub struct PermissionConfig {
    pub gate: Arc<PermissionGate>,
    pub confirm: ConfirmCb,
    /// Called when a decision is `ApproveAlways`, so it survives a restart.
    /// `None` means always-approved entries live only in the gate's
    /// in-memory session/global sets for this process's lifetime.
    pub persist_always_approved: Option<PersistApprovalFn>,
}

pub struct PermissionGate {
    yolo: bool,
    yolo_checker: Option<YoloChecker>,
    session_approved: Mutex<HashSet<ApprovalEntry>>,
    global_approved: Mutex<HashSet<ApprovalEntry>>,
}

impl PermissionGate {
    pub fn new(yolo: bool) -> Self {
        Self {
            yolo,
            yolo_checker: None,
            session_approved: Mutex::new(HashSet::new()),
            global_approved: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_yolo_checker(mut self, checker: YoloChecker) -> Self {
        self.yolo_checker = Some(checker);
        self
    }

    pub fn with_global_approved(self, entries: Vec<ApprovalEntry>) -> Self {
        *self.global_approved.lock().unwrap() = entries.into_iter().collect();
        self
    }

    fn is_approved(&self, tool: &str, arg: &str) -> bool {
        let session = self.session_approved.lock().unwrap();
        let global = self.global_approved.lock().unwrap();
        session.iter().any(|e| e.matches(tool, arg)) || global.iter().any(|e| e.matches(tool, arg))
    }

    /// True if the call can proceed without asking the user.
    pub fn needs_confirmation(&self, tool: &str, arg: &str) -> bool {
        if is_always_sensitive(tool, arg) {
            return true;
        }

        if self.is_approved(tool, arg) {
            return false;
        }

        if self.yolo {
            return match &self.yolo_checker {
                Some(checker) => checker(tool, arg),
                None => false,
            };
        }

        true
    }

    /// Apply the user's decision for one call; `approve_always` persists to
    /// both the session set (immediately) and the caller-owned global list
    /// (via the returned entry, which the caller is responsible for saving).
    pub fn apply_decision(
        &self,
        tool: &str,
        pattern: &str,
        decision: &PermissionDecision,
    ) -> Option<ApprovalEntry> {
        match decision {
            PermissionDecision::ApproveAlways => {
                let entry = ApprovalEntry {
                    tool: tool.to_string(),
                    pattern: pattern.to_string(),
                };
                self.session_approved.lock().unwrap().insert(entry.clone());
                self.global_approved.lock().unwrap().insert(entry.clone());
                Some(entry)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unapproved_call_requires_confirmation() {
        let gate = PermissionGate::new(false);
        assert!(gate.needs_confirmation("bash", "ls -la"));
    }

    #[test]
    fn test_approve_always_persists_in_session() {
        let gate = PermissionGate::new(false);
        gate.apply_decision("bash", "ls", &PermissionDecision::ApproveAlways);
        assert!(!gate.needs_confirmation("bash", "ls -la"));
    }

    #[test]
    fn test_always_sensitive_bypasses_yolo() {
        let gate = PermissionGate::new(true);
        assert!(gate.needs_confirmation("bash", "rm -rf /"));
    }

    #[test]
    fn test_yolo_skips_confirmation_for_non_sensitive() {
        let gate = PermissionGate::new(true);
        assert!(!gate.needs_confirmation("read_file", "/tmp/x"));
    }

    #[test]
    fn test_yolo_checker_can_still_request_confirmation() {
        let gate = PermissionGate::new(true)
            .with_yolo_checker(Box::new(|tool, _arg| tool == "bash"));
        assert!(gate.needs_confirmation("bash", "echo hi"));
        assert!(!gate.needs_confirmation("read_file", "/tmp/x"));
    }
}
