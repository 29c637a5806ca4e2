//! Conversation data shared between the controller, the history store and
//! any front end.
//!
//! The serialized shape matches what the web client keeps in local storage:
//! lowercase roles, backend model names and a `createdAt` session stamp.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::model::ModelId;

/// Stable key of a message for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Token accounting as reported by the backend; kept opaque.
pub type Usage = Map<String, Value>;

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: MessageId,
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelId>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl Message {
    pub fn user(content: &str, timestamp: &str) -> Self {
        Self {
            id: MessageId::new(),
            role: ChatRole::User,
            content: content.to_string(),
            model: None,
            timestamp: timestamp.to_string(),
            latency: None,
            usage: None,
            error: false,
        }
    }

    /// Empty assistant reply, filled in as the model's stream arrives.
    pub fn placeholder(model: ModelId, timestamp: &str) -> Self {
        Self {
            id: MessageId::new(),
            role: ChatRole::Assistant,
            content: String::new(),
            model: Some(model),
            timestamp: timestamp.to_string(),
            latency: None,
            usage: None,
            error: false,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == ChatRole::User
    }

    /// Local wall-clock time as `HH:MM`.
    pub fn timestamp_now() -> String {
        chrono::Local::now().format("%H:%M").to_string()
    }
}

pub const TITLE_MAX_CHARS: usize = 50;
const UNTITLED: &str = "New Chat";

/// An archived conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    #[serde(
        rename = "createdAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<String>,
}

impl Session {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: session_title(&messages),
            messages,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Title from the first user message, cut at [`TITLE_MAX_CHARS`] characters.
pub fn session_title(messages: &[Message]) -> String {
    let Some(first) = messages.iter().find(|m| m.is_user()) else {
        return UNTITLED.to_string();
    };

    let mut title: String = first.content.chars().take(TITLE_MAX_CHARS).collect();
    if first.content.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_truncated_on_char_boundary_with_ellipsis() {
        let long = "ñ".repeat(60);
        let messages = vec![
            Message::placeholder(ModelId::Gpt4, "10:00"),
            Message::user(&long, "10:00"),
        ];

        let title = session_title(&messages);

        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn short_titles_are_kept_verbatim() {
        let messages = vec![Message::user("hello", "10:00")];
        assert_eq!(session_title(&messages), "hello");
        assert_eq!(session_title(&[]), "New Chat");
    }

    #[test]
    fn message_serializes_in_web_client_shape() {
        let mut message = Message::placeholder(ModelId::DeepSeek, "09:15");
        message.content = "hi".to_string();
        message.latency = Some(1.5);

        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["role"], "assistant");
        assert_eq!(json["model"], "deepseek");
        assert_eq!(json["latency"], 1.5);
        assert!(json.get("error").is_none());
        assert!(json.get("usage").is_none());
    }

    #[test]
    fn messages_without_id_get_a_fresh_one() {
        let message: Message =
            serde_json::from_str(r#"{"role":"user","content":"hey","timestamp":"08:00"}"#).unwrap();

        assert_eq!(message.role, ChatRole::User);
        assert!(!message.error);
        assert_ne!(message.id.as_uuid(), Uuid::nil());
    }
}
