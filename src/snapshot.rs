//! SnapshotStore — per-turn pre-image capture for file edits, enabling rollback.
//!
//! A snapshot records a file's contents (or its absence) immediately before a
//! tool first mutates it during a given user-turn. A file is snapshotted once
//! per turn, at the first modification in that turn — further edits to the
//! same file within the same turn are no-ops, but a later turn touching the
//! same file again records its own snapshot. `rollback_to_message_index`
//! restores each touched path to the oldest pre-image recorded at or after
//! the target index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// A single file's state captured just before the first edit in a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub message_index: usize,
    pub path: PathBuf,
    pub existed: bool,
    pub content_before: Option<String>,
}

/// In-memory + on-disk snapshot log, one per session.
///
/// Snapshots are kept in memory for the lifetime of the process and mirrored
/// to `{base_dir}/{session_id}.snapshots.json` so a restarted session can
/// still roll back work from before the restart.
pub struct SnapshotStore {
    base_dir: PathBuf,
    // session_id -> (path, message_index) -> snapshot taken for that path in that turn
    sessions: Mutex<BTreeMap<String, BTreeMap<(PathBuf, usize), FileSnapshot>>>,
}

impl SnapshotStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    fn snapshot_file(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.snapshots.json"))
    }

    /// Record a pre-image for `path` if this is the first time it's touched
    /// during this `message_index` (turn). Later edits to the same path in
    /// the same turn are no-ops, preserving the turn's oldest pre-image; a
    /// different turn touching the same path records its own snapshot.
    pub async fn backup_file(
        &self,
        session_id: &str,
        message_index: usize,
        path: &Path,
        existed: bool,
        content_before: Option<String>,
    ) -> Result<(), SnapshotError> {
        let key = (path.to_path_buf(), message_index);
        let already_tracked = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .get(session_id)
                .map(|m| m.contains_key(&key))
                .unwrap_or(false)
        };
        if already_tracked {
            return Ok(());
        }

        {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.entry(session_id.to_string()).or_default().insert(
                key,
                FileSnapshot {
                    message_index,
                    path: path.to_path_buf(),
                    existed,
                    content_before,
                },
            );
        }

        self.flush(session_id).await
    }

    pub fn list_snapshots(&self, session_id: &str) -> Vec<FileSnapshot> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(session_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Paths that would be touched by a rollback to `from_index`.
    pub fn files_to_rollback(&self, session_id: &str, from_index: usize) -> Vec<PathBuf> {
        self.list_snapshots(session_id)
            .into_iter()
            .filter(|s| s.message_index >= from_index)
            .map(|s| s.path)
            .collect()
    }

    /// Restore every file touched at or after `from_index` to its pre-image,
    /// deleting files that did not exist before the edits began. When a path
    /// was snapshotted in more than one qualifying turn, the oldest
    /// pre-image (lowest `message_index` >= `from_index`) wins.
    pub async fn rollback_to_message_index(
        &self,
        session_id: &str,
        from_index: usize,
    ) -> Result<Vec<PathBuf>, SnapshotError> {
        let mut oldest_per_path: BTreeMap<PathBuf, FileSnapshot> = BTreeMap::new();
        for snap in self
            .list_snapshots(session_id)
            .into_iter()
            .filter(|s| s.message_index >= from_index)
        {
            match oldest_per_path.get(&snap.path) {
                Some(existing) if existing.message_index <= snap.message_index => {}
                _ => {
                    oldest_per_path.insert(snap.path.clone(), snap);
                }
            }
        }
        let targets: Vec<FileSnapshot> = oldest_per_path.into_values().collect();

        let mut restored = Vec::with_capacity(targets.len());
        for snap in &targets {
            if snap.existed {
                if let Some(content) = &snap.content_before {
                    tokio::fs::write(&snap.path, content).await?;
                }
            } else if snap.path.exists() {
                tokio::fs::remove_file(&snap.path).await?;
            }
            restored.push(snap.path.clone());
        }

        self.delete_snapshots_from_index(session_id, from_index)
            .await?;
        Ok(restored)
    }

    /// Restore the single snapshot recorded for `path` at `message_index` and
    /// forget it, for a `filesystem-undo` call made right after the edit that
    /// created it. Returns `false` if no such snapshot exists (nothing to
    /// undo — e.g. undo was already used, or the edit was in an earlier turn).
    pub async fn restore_and_forget(
        &self,
        session_id: &str,
        message_index: usize,
        path: &Path,
    ) -> Result<bool, SnapshotError> {
        let key = (path.to_path_buf(), message_index);
        let snap = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get_mut(session_id).and_then(|m| m.remove(&key)) {
                Some(s) => s,
                None => return Ok(false),
            }
        };

        if snap.existed {
            if let Some(content) = &snap.content_before {
                tokio::fs::write(&snap.path, content).await?;
            }
        } else if snap.path.exists() {
            tokio::fs::remove_file(&snap.path).await?;
        }

        self.flush(session_id).await?;
        Ok(true)
    }

    pub async fn delete_snapshots_from_index(
        &self,
        session_id: &str,
        from_index: usize,
    ) -> Result<(), SnapshotError> {
        {
            let mut sessions = self.sessions.lock().unwrap();
            if let Some(m) = sessions.get_mut(session_id) {
                m.retain(|_, s| s.message_index < from_index);
            }
        }
        self.flush(session_id).await
    }

    pub async fn clear_all_snapshots(&self, session_id: &str) -> Result<(), SnapshotError> {
        {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.remove(session_id);
        }
        let path = self.snapshot_file(session_id);
        if tokio::fs::metadata(&path).await.is_ok() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn flush(&self, session_id: &str) -> Result<(), SnapshotError> {
        let entries: Vec<FileSnapshot> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .get(session_id)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        };

        tokio::fs::create_dir_all(&self.base_dir).await?;
        let final_path = self.snapshot_file(session_id);
        let tmp_path = self.base_dir.join(format!("{session_id}.snapshots.json.tmp"));
        let body = serde_json::to_string_pretty(&entries)
            .unwrap_or_else(|_| "[]".to_string());
        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    /// Reload a session's snapshots from disk, e.g. after a process restart.
    pub async fn load(&self, session_id: &str) -> Result<(), SnapshotError> {
        let path = self.snapshot_file(session_id);
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let entries: Vec<FileSnapshot> = serde_json::from_str(&body).unwrap_or_default();
        let mut sessions = self.sessions.lock().unwrap();
        let map = sessions.entry(session_id.to_string()).or_default();
        for entry in entries {
            map.insert((entry.path.clone(), entry.message_index), entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backup_dedupes_within_same_turn() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = PathBuf::from("/tmp/example.rs");

        // Two edits to the same file in the same turn — only the first sticks.
        store
            .backup_file("s1", 0, &path, true, Some("v0".into()))
            .await
            .unwrap();
        store
            .backup_file("s1", 0, &path, true, Some("v0.5".into()))
            .await
            .unwrap();

        let snaps = store.list_snapshots("s1");
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].content_before.as_deref(), Some("v0"));
    }

    #[tokio::test]
    async fn test_backup_records_separately_across_turns() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let path = PathBuf::from("/tmp/example.rs");

        // Same file edited again in a later turn — a second snapshot is kept.
        store
            .backup_file("s1", 0, &path, true, Some("v0".into()))
            .await
            .unwrap();
        store
            .backup_file("s1", 1, &path, true, Some("v1".into()))
            .await
            .unwrap();

        let mut snaps = store.list_snapshots("s1");
        snaps.sort_by_key(|s| s.message_index);
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].content_before.as_deref(), Some("v0"));
        assert_eq!(snaps[1].content_before.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_restore_and_forget_undoes_single_edit() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "edited content").await.unwrap();

        store
            .backup_file("s1", 3, &file, true, Some("original content".into()))
            .await
            .unwrap();

        let undone = store.restore_and_forget("s1", 3, &file).await.unwrap();
        assert!(undone);
        assert_eq!(
            tokio::fs::read_to_string(&file).await.unwrap(),
            "original content"
        );
        assert!(store.list_snapshots("s1").is_empty());

        // A second undo has nothing left to restore.
        let undone_again = store.restore_and_forget("s1", 3, &file).await.unwrap();
        assert!(!undone_again);
    }

    #[tokio::test]
    async fn test_restore_and_forget_deletes_newly_created_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let file = dir.path().join("new.txt");
        tokio::fs::write(&file, "just created").await.unwrap();

        store.backup_file("s1", 1, &file, false, None).await.unwrap();
        let undone = store.restore_and_forget("s1", 1, &file).await.unwrap();
        assert!(undone);
        assert!(tokio::fs::metadata(&file).await.is_err());
    }

    #[tokio::test]
    async fn test_rollback_uses_oldest_preimage_at_or_after_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "latest content").await.unwrap();

        // Edited in turn 2 and again in turn 7 — rolling back to turn 5
        // should restore turn 7's pre-image, not turn 2's.
        store
            .backup_file("s1", 2, &file, true, Some("turn2 content".into()))
            .await
            .unwrap();
        store
            .backup_file("s1", 7, &file, true, Some("turn7 content".into()))
            .await
            .unwrap();

        store.rollback_to_message_index("s1", 5).await.unwrap();

        let restored = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(restored, "turn7 content");

        // The turn-2 snapshot, from before the rollback target, survives.
        let remaining = store.list_snapshots("s1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message_index, 2);
    }

    #[tokio::test]
    async fn test_rollback_restores_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "new content").await.unwrap();

        let new_file = dir.path().join("b.txt");
        tokio::fs::write(&new_file, "created by turn").await.unwrap();

        store
            .backup_file("s1", 2, &file, true, Some("old content".into()))
            .await
            .unwrap();
        store
            .backup_file("s1", 2, &new_file, false, None)
            .await
            .unwrap();

        store.rollback_to_message_index("s1", 2).await.unwrap();

        let restored = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(restored, "old content");
        assert!(tokio::fs::metadata(&new_file).await.is_err());
        assert!(store.list_snapshots("s1").is_empty());
    }

    #[tokio::test]
    async fn test_delete_snapshots_from_index_keeps_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let a = PathBuf::from("/tmp/a");
        let b = PathBuf::from("/tmp/b");
        store.backup_file("s1", 0, &a, true, Some("a".into())).await.unwrap();
        store.backup_file("s1", 5, &b, true, Some("b".into())).await.unwrap();

        store.delete_snapshots_from_index("s1", 5).await.unwrap();

        let snaps = store.list_snapshots("s1");
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].path, a);
    }
}
