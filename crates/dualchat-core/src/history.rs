//! Archived conversations, persisted through a small key-value capability so
//! the store can run against a file on disk or purely in memory.

use anyhow::Result;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::data_dir;
use crate::state::{Message, Session};

pub const HISTORY_KEY: &str = "chat_history";

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Store rooted at the application's config directory.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(data_dir()?))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }
}

/// Past sessions, newest first.
pub struct HistoryStore {
    store: Box<dyn KeyValueStore>,
    sessions: Vec<Session>,
    active: Option<String>,
}

impl HistoryStore {
    /// Reads the saved list once. Missing or corrupt data means no history.
    pub fn open(store: Box<dyn KeyValueStore>) -> Self {
        let sessions = match store.get(HISTORY_KEY) {
            None => Vec::new(),
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "ignoring unreadable chat history");
                Vec::new()
            }),
        };
        debug!(sessions = sessions.len(), "chat history loaded");

        Self {
            store,
            sessions,
            active: None,
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Id of the session the current conversation was loaded from.
    pub fn active_session(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Saves `messages` as a new session at the top of the list.
    pub fn archive_current(&mut self, messages: &[Message]) -> Option<String> {
        if messages.is_empty() {
            return None;
        }

        let session = Session::from_messages(messages.to_vec());
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.persist();
        Some(id)
    }

    /// Archives the current conversation and forgets which session it
    /// came from. The caller then clears the conversation.
    pub fn start_new_chat(&mut self, messages: &[Message]) -> Option<String> {
        let id = self.archive_current(messages);
        self.active = None;
        id
    }

    /// Returns the messages of session `id` to become the current
    /// conversation, archiving unsaved work first.
    pub fn load(&mut self, id: &str, current: &[Message]) -> Option<Vec<Message>> {
        let messages = self.get(id)?.messages.clone();

        if !current.is_empty() && self.active.is_none() {
            self.archive_current(current);
        }
        self.active = Some(id.to_string());
        Some(messages)
    }

    /// Removes session `id`. The current conversation is left alone but is
    /// treated as unsaved again if it came from that session.
    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            return false;
        }

        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        self.persist();
        true
    }

    fn persist(&mut self) {
        let result = serde_json::to_string(&self.sessions)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.store.set(HISTORY_KEY, &raw));

        if let Err(e) = result {
            warn!(error = %e, "failed to save chat history");
        }
    }
}
