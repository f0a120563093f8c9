//! Wire frames exchanged with the editor over the link.
//!
//! One JSON object per text frame. The editor sends `followup` frames carrying
//! a question for one of its tasks; the bridge answers with `reply` frames.

use serde::Serialize;
use serde_json::{Map, Value};

const FOLLOWUP: &str = "followup";

/// Why an inbound frame was discarded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("unknown message type: {}", .0.as_deref().unwrap_or("<none>"))]
    UnknownType(Option<String>),

    #[error("followup frame is missing `{0}`")]
    MissingField(&'static str),
}

/// A suggested answer attached to a question.
///
/// The editor sends either bare strings or objects exposing a `suggest`
/// field; both collapse to display text when the question is formatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestion {
    PlainText(String),
    Suggested { text: String },
}

impl Suggestion {
    /// Interpret one element of the `suggestions` array.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::PlainText(s.clone()),
            Value::Object(map) => match map.get("suggest") {
                Some(Value::String(s)) => Self::Suggested { text: s.clone() },
                Some(other) => Self::Suggested {
                    text: other.to_string(),
                },
                None => Self::PlainText(value.to_string()),
            },
            other => Self::PlainText(other.to_string()),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::PlainText(text) | Self::Suggested { text } => text,
        }
    }
}

/// A clarifying question from the editor for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Followup {
    pub task_id: String,
    pub question: String,
    pub suggestions: Vec<Suggestion>,
}

/// Parse an inbound text frame.
///
/// Only `followup` frames are accepted. `taskId` and `question` must be
/// non-empty strings; a `suggestions` value that is not an array is ignored.
pub fn parse_frame(text: &str) -> Result<Followup, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    let obj = value.as_object().ok_or(FrameError::NotAnObject)?;

    let kind = obj.get("type").and_then(Value::as_str);
    if kind != Some(FOLLOWUP) {
        return Err(FrameError::UnknownType(kind.map(str::to_owned)));
    }

    let task_id = required_str(obj, "taskId")?;
    let question = required_str(obj, "question")?;
    let suggestions = match obj.get("suggestions") {
        Some(Value::Array(items)) => items.iter().map(Suggestion::from_value).collect(),
        _ => Vec::new(),
    };

    Ok(Followup {
        task_id,
        question,
        suggestions,
    })
}

fn required_str(obj: &Map<String, Value>, field: &'static str) -> Result<String, FrameError> {
    match obj.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_owned()),
        _ => Err(FrameError::MissingField(field)),
    }
}

/// The human's answer, sent back to the editor as a single text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "reply", rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub task_id: String,
    pub reply: String,
}

impl ReplyEnvelope {
    pub fn new(task_id: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            reply: reply.into(),
        }
    }

    /// Serialize to the text frame the editor expects.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
