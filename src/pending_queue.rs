//! PendingMessageQueue — a standalone single-writer (UI) / single-reader
//! (conversation engine) queue for user input that arrives while a turn is
//! already streaming.
//!
//! This generalizes [`crate::agent::Agent`]'s `steering_queue`/`follow_up_queue`
//! `Arc<Mutex<Vec<_>>>` fields into one reusable type, so the Orchestrator and
//! any future engine entry point share a single well-defined queue instead of
//! ad hoc vectors living directly on the agent struct.

use crate::types::Content;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One piece of queued user input, optionally addressed to a specific
/// sub-agent instance rather than the main conversation.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub text: String,
    pub images: Vec<Content>,
    pub target_instance_id: Option<String>,
}

impl PendingMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
            target_instance_id: None,
        }
    }

    pub fn with_images(mut self, images: Vec<Content>) -> Self {
        self.images = images;
        self
    }

    pub fn for_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.target_instance_id = Some(instance_id.into());
        self
    }
}

/// FIFO queue for user input enqueued mid-stream. Single writer (the UI
/// thread calling `enqueue`), single reader (the engine calling `drain` or
/// `restore_head` between turns).
#[derive(Default)]
pub struct PendingMessageQueue {
    inner: Mutex<VecDeque<PendingMessage>>,
}

impl PendingMessageQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, msg: PendingMessage) {
        self.inner.lock().unwrap().push_back(msg);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Drain everything addressed to `instance_id` (`None` = the main
    /// conversation), concatenating their text with `\n\n` into a single
    /// user message body. Returns `None` if nothing matched.
    pub fn drain_for(&self, instance_id: Option<&str>) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let mut matched = Vec::new();
        let mut remaining = VecDeque::with_capacity(inner.len());
        while let Some(msg) = inner.pop_front() {
            if msg.target_instance_id.as_deref() == instance_id {
                matched.push(msg.text);
            } else {
                remaining.push_back(msg);
            }
        }
        *inner = remaining;

        if matched.is_empty() {
            None
        } else {
            Some(matched.join("\n\n"))
        }
    }

    /// Pop and return the single oldest queued message, for restoring to the
    /// input field on an ESC-cancel.
    pub fn restore_head(&self) -> Option<PendingMessage> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_concatenates_with_blank_line() {
        let q = PendingMessageQueue::new();
        q.enqueue(PendingMessage::new("first"));
        q.enqueue(PendingMessage::new("second"));
        let drained = q.drain_for(None).unwrap();
        assert_eq!(drained, "first\n\nsecond");
        assert!(q.is_empty());
    }

    #[test]
    fn test_drain_only_matches_target_instance() {
        let q = PendingMessageQueue::new();
        q.enqueue(PendingMessage::new("for main"));
        q.enqueue(PendingMessage::new("for sub").for_instance("sub-1"));

        let main_drained = q.drain_for(None).unwrap();
        assert_eq!(main_drained, "for main");

        let sub_drained = q.drain_for(Some("sub-1")).unwrap();
        assert_eq!(sub_drained, "for sub");
    }

    #[test]
    fn test_restore_head_returns_oldest() {
        let q = PendingMessageQueue::new();
        q.enqueue(PendingMessage::new("a"));
        q.enqueue(PendingMessage::new("b"));
        let head = q.restore_head().unwrap();
        assert_eq!(head.text, "a");
        assert_eq!(q.len(), 1);
    }
}
