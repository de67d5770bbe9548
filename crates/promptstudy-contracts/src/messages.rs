use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-failure notices shown inline, styled apart from genuine transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    QuotaExceeded,
    CapabilityMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default = "now_utc_iso")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<NoticeKind>,
}

impl Message {
    pub fn user(id: MessageId, content: &str, message_type: MessageType) -> Self {
        Self {
            id,
            sender: Sender::User,
            content: content.to_string(),
            message_type,
            timestamp: now_utc_iso(),
            model: None,
            is_error: false,
            notice: None,
        }
    }

    pub fn ai(id: MessageId, content: String, message_type: MessageType, model: &str) -> Self {
        Self {
            id,
            sender: Sender::Ai,
            content,
            message_type,
            timestamp: now_utc_iso(),
            model: Some(model.to_string()),
            is_error: false,
            notice: None,
        }
    }

    pub fn ai_error(id: MessageId, description: &str, model: &str) -> Self {
        let mut message = Self::ai(
            id,
            format!("Error: {description}"),
            MessageType::Text,
            model,
        );
        message.is_error = true;
        message
    }

    pub fn with_notice(mut self, notice: NoticeKind) -> Self {
        self.notice = Some(notice);
        self
    }

    pub fn is_from_user(&self) -> bool {
        self.sender == Sender::User
    }
}

/// Inline notice attached to a task without entering its message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
    pub timestamp: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: now_utc_iso(),
        }
    }
}

/// Hands out millisecond-based ids that never repeat or go backwards, even when
/// two messages are created inside the same millisecond.
#[derive(Debug, Clone, Default)]
pub struct MessageClock {
    last: u64,
}

impl MessageClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> MessageId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        self.last = now.max(self.last.saturating_add(1));
        MessageId(self.last)
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
