//! SessionStore — one JSON file per conversation, holding its full message
//! list plus load-hook diagnostics.
//!
//! Writes follow the same append-or-replace-whole-file, atomic-rename-on-replace
//! discipline as [`crate::snapshot::SnapshotStore`]: a session is never left
//! half-written if the process dies mid-save.

use crate::types::AgentMessage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse session file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("session not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionFile {
    meta: SessionMeta,
    messages: Vec<AgentMessage>,
}

pub struct SessionStore {
    base_dir: PathBuf,
    current: Mutex<Option<(SessionMeta, Vec<AgentMessage>)>>,
    /// Set as a side effect of `load_session`, surfaced to the UI without a
    /// second round trip.
    pub last_load_hook_warning: Mutex<Option<String>>,
    pub last_load_hook_error: Mutex<Option<String>>,
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            current: Mutex::new(None),
            last_load_hook_warning: Mutex::new(None),
            last_load_hook_error: Mutex::new(None),
        }
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    pub fn create_new_session(&self, now_ms: u64) -> SessionMeta {
        let meta = SessionMeta {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now_ms,
            updated_at: now_ms,
            title: None,
        };
        *self.current.lock().unwrap() = Some((meta.clone(), Vec::new()));
        meta
    }

    pub fn get_current(&self) -> Option<(SessionMeta, Vec<AgentMessage>)> {
        self.current.lock().unwrap().clone()
    }

    pub fn set_current(&self, meta: SessionMeta, messages: Vec<AgentMessage>) {
        *self.current.lock().unwrap() = Some((meta, messages));
    }

    pub fn clear_current_session(&self) {
        *self.current.lock().unwrap() = None;
    }

    /// Load a session from disk and make it current. Hook-driven load issues
    /// (missing fields recovered with defaults, partial parse failures) are
    /// recorded rather than failing the whole load outright.
    pub async fn load_session(&self, id: &str) -> Result<(), SessionError> {
        *self.last_load_hook_warning.lock().unwrap() = None;
        *self.last_load_hook_error.lock().unwrap() = None;

        let path = self.session_path(id);
        let body = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SessionError::NotFound(id.to_string())
            } else {
                SessionError::Io(e)
            }
        })?;

        let parsed: SessionFile = serde_json::from_str(&body).map_err(|e| {
            *self.last_load_hook_error.lock().unwrap() = Some(e.to_string());
            SessionError::Parse {
                path: path.clone(),
                source: e,
            }
        })?;

        if parsed.messages.is_empty() {
            *self.last_load_hook_warning.lock().unwrap() =
                Some("loaded session has no messages".to_string());
        }

        self.set_current(parsed.meta, parsed.messages);
        Ok(())
    }

    /// List sessions sorted by `updated_at` descending.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMeta>, SessionError> {
        let mut metas = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(metas),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(body) = tokio::fs::read_to_string(&path).await {
                if let Ok(parsed) = serde_json::from_str::<SessionFile>(&body) {
                    metas.push(parsed.meta);
                }
            }
        }

        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    pub async fn append_message(&self, msg: AgentMessage, now_ms: u64) -> Result<(), SessionError> {
        {
            let mut current = self.current.lock().unwrap();
            let (meta, messages) = current
                .as_mut()
                .ok_or_else(|| SessionError::NotFound("no current session".into()))?;
            messages.push(msg);
            meta.updated_at = now_ms;
        }
        self.flush().await
    }

    pub async fn truncate_messages(&self, to_length: usize, now_ms: u64) -> Result<(), SessionError> {
        {
            let mut current = self.current.lock().unwrap();
            let (meta, messages) = current
                .as_mut()
                .ok_or_else(|| SessionError::NotFound("no current session".into()))?;
            messages.truncate(to_length);
            meta.updated_at = now_ms;
        }
        self.flush().await
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), SessionError> {
        let path = self.session_path(id);
        if tokio::fs::metadata(&path).await.is_ok() {
            tokio::fs::remove_file(&path).await?;
        }
        let mut current = self.current.lock().unwrap();
        if current.as_ref().map(|(m, _)| m.id.as_str()) == Some(id) {
            *current = None;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), SessionError> {
        let snapshot = {
            let current = self.current.lock().unwrap();
            current.clone()
        };
        let Some((meta, messages)) = snapshot else {
            return Ok(());
        };

        tokio::fs::create_dir_all(&self.base_dir).await?;
        let final_path = self.session_path(&meta.id);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", meta.id));
        let body = serde_json::to_string_pretty(&SessionFile { meta, messages })
            .unwrap_or_else(|_| "{}".to_string());
        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn test_create_append_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let meta = store.create_new_session(1000);

        store
            .append_message(AgentMessage::Llm(Message::user("hello")), 1001)
            .await
            .unwrap();

        let store2 = SessionStore::new(dir.path());
        store2.load_session(&meta.id).await.unwrap();
        let (_, messages) = store2.get_current().unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_list_sessions_sorted_desc() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.create_new_session(100);
        store.flush().await.unwrap();
        store.create_new_session(200);
        store.flush().await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].created_at >= sessions[1].created_at);
    }

    #[tokio::test]
    async fn test_delete_session_removes_file_and_clears_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let meta = store.create_new_session(1);
        store.flush().await.unwrap();

        store.delete_session(&meta.id).await.unwrap();
        assert!(store.get_current().is_none());
        assert!(tokio::fs::metadata(store.session_path(&meta.id)).await.is_err());
    }

    #[tokio::test]
    async fn test_load_missing_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let err = store.load_session("does-not-exist").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }
}
