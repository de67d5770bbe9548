use serde::{Deserialize, Serialize};

use crate::messages::{Message, MessageType, Sender};
use crate::tasks::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedMessage {
    pub sender: Sender,
    pub content: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

impl From<&Message> for RecordedMessage {
    fn from(message: &Message) -> Self {
        Self {
            sender: message.sender,
            content: message.content.clone(),
            timestamp: message.timestamp.clone(),
            message_type: message.message_type,
        }
    }
}

/// One user turn and the reply it produced, as posted to the interaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub participant_id: String,
    pub task_id: TaskId,
    pub ai_tool: String,
    pub message_type: MessageType,
    pub messages: Vec<RecordedMessage>,
}

impl InteractionRecord {
    pub fn from_exchange(
        participant_id: &str,
        task_id: &TaskId,
        ai_tool: &str,
        message_type: MessageType,
        user: &Message,
        reply: &Message,
    ) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            task_id: task_id.clone(),
            ai_tool: ai_tool.to_string(),
            message_type,
            messages: vec![RecordedMessage::from(user), RecordedMessage::from(reply)],
        }
    }
}

/// Body of the task submission call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub participant_id: String,
    pub task_id: TaskId,
}
