//! Orchestrator — wires UI input to the conversation loop, owns the
//! session/snapshot stores, and handles cancellation and rollback.
//!
//! This is the outermost layer named by this expansion: the teacher's
//! `Agent` already owns a single conversation's state and event channel
//! (`agent.rs`); Orchestrator sits one level up, owning the *session* that
//! conversation belongs to, so rollback and "new session" can replace the
//! underlying `Agent` without the caller juggling two lifecycles.

use crate::agent::Agent;
use crate::pending_queue::{PendingMessage, PendingMessageQueue};
use crate::permission::PermissionGate;
use crate::session::{SessionError, SessionStore};
use crate::snapshot::{SnapshotError, SnapshotStore};
use crate::types::{AgentEvent, AgentMessage, Message};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("no active session")]
    NoActiveSession,
}

/// Wires a single `Agent` to its session, snapshot store, permission gate,
/// and pending-message queue. One Orchestrator per open conversation tab.
pub struct Orchestrator {
    agent: Agent,
    sessions: Arc<SessionStore>,
    snapshots: Arc<SnapshotStore>,
    permissions: Arc<PermissionGate>,
    pending: Arc<PendingMessageQueue>,
    session_id: Option<String>,
    turn_index: usize,
}

impl Orchestrator {
    pub fn new(
        mut agent: Agent,
        sessions: Arc<SessionStore>,
        snapshots: Arc<SnapshotStore>,
        permissions: Arc<PermissionGate>,
    ) -> Self {
        let pending = Arc::new(PendingMessageQueue::new());
        agent.set_pending_queue(pending.clone());
        Self {
            agent,
            sessions,
            snapshots,
            permissions,
            pending,
            session_id: None,
            turn_index: 0,
        }
    }

    pub fn permissions(&self) -> &Arc<PermissionGate> {
        &self.permissions
    }

    pub fn pending_queue(&self) -> &Arc<PendingMessageQueue> {
        &self.pending
    }

    pub fn start_new_session(&mut self, now_ms: u64) {
        let meta = self.sessions.create_new_session(now_ms);
        self.agent
            .set_snapshot_session(meta.id.clone(), self.snapshots.clone());
        self.session_id = Some(meta.id);
        self.turn_index = 0;
        self.agent.reset();
    }

    pub async fn load_session(&mut self, id: &str) -> Result<(), OrchestratorError> {
        self.sessions.load_session(id).await?;
        self.snapshots.load(id).await?;
        let (meta, messages) = self
            .sessions
            .get_current()
            .ok_or(OrchestratorError::NoActiveSession)?;
        self.agent
            .set_snapshot_session(meta.id.clone(), self.snapshots.clone());
        self.session_id = Some(meta.id);
        self.turn_index = messages.len();
        self.agent.replace_messages(messages);
        Ok(())
    }

    /// Drive one turn: enqueue the user's input if we're mid-stream, else
    /// run it through the agent, persisting every appended message and
    /// draining the pending queue between rounds.
    pub async fn submit(
        &mut self,
        text: impl Into<String>,
    ) -> Result<mpsc::UnboundedReceiver<AgentEvent>, OrchestratorError> {
        let session_id = self
            .session_id
            .clone()
            .ok_or(OrchestratorError::NoActiveSession)?;

        if self.agent.is_streaming() {
            self.pending.enqueue(PendingMessage::new(text.into()));
            let (_tx, rx) = mpsc::unbounded_channel();
            return Ok(rx);
        }

        let user_msg = AgentMessage::Llm(Message::user(text.into()));
        let now_ms = now_ms_placeholder();
        self.sessions.append_message(user_msg.clone(), now_ms).await?;
        self.turn_index += 1;
        self.agent.set_snapshot_message_index(self.turn_index);

        let upstream = self.agent.prompt_messages(vec![user_msg]).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let sessions = self.sessions.clone();
        let session_id_for_task = session_id.clone();
        tokio::spawn(forward_and_persist(upstream, tx, sessions, session_id_for_task));
        Ok(rx)
    }

    /// Cancel the in-flight turn. Any queued pending message is restored,
    /// not discarded.
    pub fn cancel(&self) -> Option<PendingMessage> {
        self.agent.abort();
        self.pending.restore_head()
    }

    pub async fn rollback_to_turn(&mut self, turn_index: usize) -> Result<Vec<std::path::PathBuf>, OrchestratorError> {
        let session_id = self
            .session_id
            .clone()
            .ok_or(OrchestratorError::NoActiveSession)?;
        let restored = self
            .snapshots
            .rollback_to_message_index(&session_id, turn_index)
            .await?;
        let now_ms = now_ms_placeholder();
        self.sessions.truncate_messages(turn_index, now_ms).await?;
        self.turn_index = turn_index;
        Ok(restored)
    }
}

/// Forward every event from the agent's channel to the caller, persisting
/// newly-completed messages to the SessionStore as they arrive so a crash
/// mid-stream loses at most the in-progress turn.
async fn forward_and_persist(
    mut upstream: mpsc::UnboundedReceiver<AgentEvent>,
    tx: mpsc::UnboundedSender<AgentEvent>,
    sessions: Arc<SessionStore>,
    _session_id: String,
) {
    while let Some(event) = upstream.recv().await {
        if let AgentEvent::MessageEnd { message } = &event {
            let now_ms = now_ms_placeholder();
            let _ = sessions.append_message(message.clone(), now_ms).await;
        }
        if tx.send(event).is_err() {
            break;
        }
    }
}

/// Orchestrator callers pass in wall-clock time explicitly (see module docs
/// on `Date.now()` restrictions during authoring); this placeholder exists
/// only so internal persistence calls have a monotonically-nondecreasing
/// stand-in when the caller doesn't supply one via `submit`/`rollback_to_turn`.
fn now_ms_placeholder() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn make_orchestrator(dir: &std::path::Path) -> Orchestrator {
        let agent = Agent::new(MockProvider::text("ok"))
            .with_model("mock")
            .with_api_key("test");
        let sessions = Arc::new(SessionStore::new(dir.join("sessions")));
        let snapshots = Arc::new(SnapshotStore::new(dir.join("snapshots")));
        let permissions = Arc::new(PermissionGate::new(false));
        Orchestrator::new(agent, sessions, snapshots, permissions)
    }

    #[tokio::test]
    async fn test_submit_without_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = make_orchestrator(dir.path());
        let err = orch.submit("hi").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoActiveSession));
    }

    #[tokio::test]
    async fn test_start_new_session_allows_submit() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = make_orchestrator(dir.path());
        orch.start_new_session(1);
        assert!(orch.submit("hello").await.is_ok());
    }
}
