//! Session store: cached, append-only JSONL transcripts.
//!
//! File format, one record per line under `<dir>/<safe_key>.jsonl`:
//! - line 1: `{"_type":"metadata","created_at":"…","metadata":{}}`
//! - line 2+: `{"role":"user","content":"hello"}` …
//!
//! A turn appends exactly its new records; the file is never rewritten
//! except by an explicit `clear`. Reload replays all lines.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Message, Session};
use crate::utils;

/// Metadata header written once, as the first line of each transcript.
#[derive(Debug, Serialize, Deserialize)]
struct SessionMetadata {
    #[serde(rename = "_type")]
    record_type: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

// ─────────────────────────────────────────────
// SessionStore
// ─────────────────────────────────────────────

/// Owns conversation transcripts: an in-memory cache over JSONL files.
///
/// Thread-safe via `RwLock`; in practice the agent loop is the only writer.
pub struct SessionStore {
    sessions_dir: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create a store rooted at `sessions_dir`, creating the directory.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = sessions_dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(SessionStore {
            sessions_dir: dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Conventional location: `<workspace>/sessions/`.
    pub fn for_workspace(workspace: impl Into<PathBuf>) -> std::io::Result<Self> {
        Self::new(workspace.into().join("sessions"))
    }

    /// Cache → disk → fresh, in that order.
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let cache = self.cache.read().unwrap();
            if let Some(session) = cache.get(key) {
                return session.clone();
            }
        }

        if let Some(session) = self.load_from_disk(key) {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
            return session;
        }

        let session = Session::new(key);
        let mut cache = self.cache.write().unwrap();
        cache.insert(key.to_string(), session.clone());
        session
    }

    /// Append one message to a session and its transcript file.
    pub fn add_message(&self, key: &str, message: Message) {
        let mut session = self.get_or_create(key);
        session.messages.push(message.clone());
        session.updated_at = Utc::now();

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
        }

        if let Err(e) = self.append_to_disk(&session, &message) {
            warn!(key, error = %e, "failed to persist session record");
        }
    }

    /// The last `max_messages` of a session's history.
    pub fn get_history(&self, key: &str, max_messages: usize) -> Vec<Message> {
        let session = self.get_or_create(key);
        let len = session.messages.len();
        if len <= max_messages {
            session.messages
        } else {
            session.messages[len - max_messages..].to_vec()
        }
    }

    /// Reset a conversation: empty history, fresh transcript file.
    pub fn clear(&self, key: &str) {
        let mut session = self.get_or_create(key);
        session.messages.clear();
        session.updated_at = Utc::now();

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
        }

        if let Err(e) = self.rewrite_metadata_only(&session) {
            warn!(key, error = %e, "failed to persist cleared session");
        }
    }

    /// Delete a session from cache and disk. Returns whether a transcript
    /// file existed.
    pub fn delete(&self, key: &str) -> bool {
        {
            let mut cache = self.cache.write().unwrap();
            cache.remove(key);
        }

        let path = self.session_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(key, error = %e, "failed to delete session file");
                return false;
            }
            true
        } else {
            false
        }
    }

    /// Summaries of all on-disk sessions, newest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.sessions_dir) else {
            return summaries;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "jsonl") {
                continue;
            }
            let Ok(file) = std::fs::File::open(&path) else {
                continue;
            };
            let mut lines = std::io::BufReader::new(file).lines();
            let Some(Ok(first)) = lines.next() else {
                continue;
            };
            let Ok(meta) = serde_json::from_str::<SessionMetadata>(&first) else {
                continue;
            };

            let updated_at = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or(meta.created_at);
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.replacen('_', ":", 1))
                .unwrap_or_default();

            summaries.push(SessionSummary {
                key,
                created_at: meta.created_at,
                updated_at,
                path,
            });
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Transcript path for a key (`channel:chat_id` → `channel_chat_id.jsonl`).
    fn session_path(&self, key: &str) -> PathBuf {
        let safe_key = utils::safe_filename(key);
        self.sessions_dir.join(format!("{safe_key}.jsonl"))
    }

    fn load_from_disk(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!(key, error = %e, "failed to open session file");
                return None;
            }
        };

        let mut session = Session::new(key);
        for line in std::io::BufReader::new(file).lines() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }

            if let Ok(meta) = serde_json::from_str::<SessionMetadata>(&line) {
                if meta.record_type == "metadata" {
                    session.created_at = meta.created_at;
                    session.metadata = meta.metadata;
                    continue;
                }
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(msg) => session.messages.push(msg),
                Err(e) => warn!(key, error = %e, "skipping unreadable session record"),
            }
        }

        debug!(key, messages = session.messages.len(), "session loaded from disk");
        Some(session)
    }

    fn append_to_disk(&self, session: &Session, message: &Message) -> std::io::Result<()> {
        let path = self.session_path(&session.key);
        let is_new = !path.exists();

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        if is_new {
            let meta = SessionMetadata {
                record_type: "metadata".to_string(),
                created_at: session.created_at,
                metadata: session.metadata.clone(),
            };
            writeln!(
                file,
                "{}",
                serde_json::to_string(&meta).map_err(std::io::Error::other)?
            )?;
        }
        writeln!(
            file,
            "{}",
            serde_json::to_string(message).map_err(std::io::Error::other)?
        )?;
        Ok(())
    }

    fn rewrite_metadata_only(&self, session: &Session) -> std::io::Result<()> {
        let path = self.session_path(&session.key);
        let meta = SessionMetadata {
            record_type: "metadata".to_string(),
            created_at: session.created_at,
            metadata: session.metadata.clone(),
        };
        let mut file = std::fs::File::create(&path)?;
        writeln!(
            file,
            "{}",
            serde_json::to_string(&meta).map_err(std::io::Error::other)?
        )?;
        Ok(())
    }
}

/// One row of `list_sessions`.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub path: PathBuf,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageContent;
    use tempfile::tempdir;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions")).unwrap();
        (store, dir)
    }

    #[test]
    fn new_session_is_empty() {
        let (store, _dir) = store();
        let session = store.get_or_create("telegram:1");
        assert_eq!(session.key, "telegram:1");
        assert!(session.messages.is_empty());
    }

    #[test]
    fn add_message_grows_history() {
        let (store, _dir) = store();
        store.add_message("t:1", Message::user("hello"));
        store.add_message("t:1", Message::assistant("hi"));
        assert_eq!(store.get_or_create("t:1").messages.len(), 2);
    }

    #[test]
    fn history_window_keeps_tail() {
        let (store, _dir) = store();
        for i in 0..10 {
            store.add_message("t:1", Message::user(format!("msg {i}")));
        }
        let history = store.get_history("t:1", 3);
        assert_eq!(history.len(), 3);
        match &history[0] {
            Message::User {
                content: MessageContent::Text(text),
                ..
            } => assert_eq!(text, "msg 7"),
            other => panic!("expected user message, got {other:?}"),
        }
    }

    #[test]
    fn a_turn_appends_exactly_two_lines() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        store.add_message("cli:u1", Message::user("q1"));
        store.add_message("cli:u1", Message::assistant("a1"));
        let path = dir.path().join("cli_u1.jsonl");
        let after_first: Vec<String> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(after_first.len(), 3); // metadata + user + assistant

        store.add_message("cli:u1", Message::user("q2"));
        store.add_message("cli:u1", Message::assistant("a2"));
        let after_second: Vec<String> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();

        // The earlier records are byte-identical; exactly two lines appended.
        assert_eq!(after_second.len(), 5);
        assert_eq!(&after_second[..3], &after_first[..]);
        let user: serde_json::Value = serde_json::from_str(&after_second[3]).unwrap();
        let assistant: serde_json::Value = serde_json::from_str(&after_second[4]).unwrap();
        assert_eq!(user["role"], "user");
        assert_eq!(assistant["role"], "assistant");
    }

    #[test]
    fn reload_replays_transcript() {
        let dir = tempdir().unwrap();
        {
            let store = SessionStore::new(dir.path()).unwrap();
            store.add_message("telegram:42", Message::user("Hello"));
            store.add_message("telegram:42", Message::assistant("Hi!"));
        }
        {
            let store = SessionStore::new(dir.path()).unwrap();
            let session = store.get_or_create("telegram:42");
            assert_eq!(session.messages.len(), 2);
        }
    }

    #[test]
    fn metadata_line_written_once() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        store.add_message("cli:x", Message::user("a"));
        store.add_message("cli:x", Message::user("b"));

        let content = std::fs::read_to_string(dir.path().join("cli_x.jsonl")).unwrap();
        let metadata_lines = content
            .lines()
            .filter(|l| l.contains("\"_type\":\"metadata\""))
            .count();
        assert_eq!(metadata_lines, 1);
    }

    #[test]
    fn clear_resets_history_and_file() {
        let dir = tempdir().unwrap();
        {
            let store = SessionStore::new(dir.path()).unwrap();
            store.add_message("t:1", Message::user("hello"));
            store.clear("t:1");
            assert!(store.get_or_create("t:1").messages.is_empty());
        }
        {
            let store = SessionStore::new(dir.path()).unwrap();
            assert!(store.get_or_create("t:1").messages.is_empty());
        }
    }

    #[test]
    fn delete_removes_cache_and_file() {
        let (store, _dir) = store();
        store.add_message("t:1", Message::user("hello"));
        assert!(store.delete("t:1"));
        assert!(!store.delete("t:1"));
        assert!(store.get_or_create("t:1").messages.is_empty());
    }

    #[test]
    fn list_sessions_finds_all_keys() {
        let (store, _dir) = store();
        store.add_message("telegram:1", Message::user("a"));
        store.add_message("discord:2", Message::user("b"));

        let sessions = store.list_sessions();
        let keys: Vec<&str> = sessions.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(sessions.len(), 2);
        assert!(keys.contains(&"telegram:1"));
        assert!(keys.contains(&"discord:2"));
    }

    #[test]
    fn sessions_are_independent() {
        let (store, _dir) = store();
        store.add_message("a:1", Message::user("one"));
        store.add_message("b:2", Message::user("two"));
        store.add_message("b:2", Message::user("three"));
        assert_eq!(store.get_history("a:1", 50).len(), 1);
        assert_eq!(store.get_history("b:2", 50).len(), 2);
    }

    #[test]
    fn for_workspace_nests_under_sessions() {
        let dir = tempdir().unwrap();
        let store = SessionStore::for_workspace(dir.path()).unwrap();
        store.add_message("cli:d", Message::user("x"));
        assert!(dir.path().join("sessions").join("cli_d.jsonl").exists());
    }
}
