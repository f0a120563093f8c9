//! Pending-question tracker: which task is waiting on which chat.
//!
//! In-memory only; a restart drops in-flight questions. At most one question
//! is pending per chat, and a newer question replaces the older one.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;

/// A question sent to a chat that has not been answered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    pub task_id: String,
    pub asked_at: DateTime<Utc>,
}

impl PendingQuestion {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            asked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingQuestions {
    by_chat: HashMap<i64, PendingQuestion>,
}

impl PendingQuestions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task_id` is waiting on `chat_id`, replacing any earlier
    /// question for that chat. Returns the replaced entry.
    pub fn set(&mut self, chat_id: i64, task_id: &str) -> Option<PendingQuestion> {
        self.insert(chat_id, PendingQuestion::new(task_id))
    }

    /// Put a popped entry back, keeping its original timestamp.
    pub fn restore(&mut self, chat_id: i64, question: PendingQuestion) {
        self.insert(chat_id, question);
    }

    /// Remove and return the pending question for `chat_id`.
    pub fn pop(&mut self, chat_id: i64) -> Option<PendingQuestion> {
        self.by_chat.remove(&chat_id)
    }

    pub fn get(&self, chat_id: i64) -> Option<&PendingQuestion> {
        self.by_chat.get(&chat_id)
    }

    /// Drop the entry for `chat_id` only if it belongs to `task_id`.
    pub fn clear_if(&mut self, chat_id: i64, task_id: &str) -> bool {
        if self
            .by_chat
            .get(&chat_id)
            .is_some_and(|p| p.task_id == task_id)
        {
            self.by_chat.remove(&chat_id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.by_chat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chat.is_empty()
    }

    fn insert(&mut self, chat_id: i64, question: PendingQuestion) -> Option<PendingQuestion> {
        let previous = self.by_chat.insert(chat_id, question);
        if let Some(prev) = &previous {
            warn!(
                chat_id,
                abandoned_task_id = %prev.task_id,
                task_id = %self.by_chat[&chat_id].task_id,
                "overwriting pending question for chat"
            );
        }
        previous
    }
}
