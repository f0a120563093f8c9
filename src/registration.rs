//! Registration store: durable task → chat bindings.
//!
//! Persisted as a flat JSON object (`{"<task_id>": <chat_id>}`) and rewritten
//! in full after every mutation. Persistence is best-effort: a failed write is
//! logged and the in-memory map stays the source of truth for this process.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Maps task_id → chat_id. Loaded once at startup.
#[derive(Debug)]
pub struct RegistrationStore {
    path: PathBuf,
    entries: BTreeMap<String, i64>,
}

impl RegistrationStore {
    /// Load registrations from `path`, starting empty if the file is missing,
    /// unreadable, or not a JSON object. Entries whose value is not an integer
    /// chat id are dropped.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => parse_entries(&path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "registration file not found, starting fresh");
                BTreeMap::new()
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read registrations, starting fresh");
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    /// An empty store that will persist to `path` on the first mutation.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bind `task_id` to `chat_id`, replacing any earlier binding for the task.
    pub fn register(&mut self, task_id: &str, chat_id: i64) {
        let previous = self.entries.insert(task_id.to_owned(), chat_id);
        match previous {
            Some(old) if old != chat_id => {
                info!(task_id, chat_id, previous_chat_id = old, "re-registered task to a new chat");
            }
            _ => info!(task_id, chat_id, "registered task"),
        }
        self.persist();
    }

    /// Remove the binding for `task_id`. Returns the chat it was bound to.
    pub fn remove(&mut self, task_id: &str) -> Option<i64> {
        let removed = self.entries.remove(task_id)?;
        info!(task_id, chat_id = removed, "unregistered task");
        self.persist();
        Some(removed)
    }

    /// The chat currently bound to `task_id`.
    pub fn lookup(&self, task_id: &str) -> Option<i64> {
        self.entries.get(task_id).copied()
    }

    /// First task bound to `chat_id`, if any.
    pub fn task_for_chat(&self, chat_id: i64) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, bound)| **bound == chat_id)
            .map(|(task_id, _)| task_id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the full mapping to disk.
    ///
    /// Writes to a temp file then renames so a crash mid-write never leaves a
    /// truncated file behind.
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(std::io::Error::other)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn persist(&self) {
        match self.save() {
            Ok(()) => debug!(count = self.entries.len(), path = %self.path.display(), "saved registrations"),
            Err(e) => error!(path = %self.path.display(), error = %e, "failed to save registrations"),
        }
    }
}

fn parse_entries(path: &Path, content: &str) -> BTreeMap<String, i64> {
    let value: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "registration file is not valid JSON, starting fresh");
            return BTreeMap::new();
        }
    };
    let Value::Object(map) = value else {
        warn!(path = %path.display(), "registration file is not a JSON object, starting fresh");
        return BTreeMap::new();
    };

    let entries: BTreeMap<String, i64> = map
        .into_iter()
        .filter_map(|(task_id, v)| chat_id_from_value(&v).map(|chat_id| (task_id, chat_id)))
        .collect();
    info!(count = entries.len(), path = %path.display(), "loaded registrations");
    entries
}

fn chat_id_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
