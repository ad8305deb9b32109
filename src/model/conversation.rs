//! Conversation types (spec.md §3 "Conversation")

use super::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default cap on stored messages before head-truncation kicks in
/// (spec.md §3: "if size exceeds cap (default 1000) the oldest are
/// dropped").
pub const DEFAULT_MAX_MESSAGES: usize = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default)]
    pub context_usage: Option<f64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub item_ref: Option<String>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub metadata: ConversationMetadata,
}

impl Conversation {
    pub fn new(project_id: impl Into<String>, item_ref: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            item_ref,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            label: None,
            metadata: ConversationMetadata::default(),
        }
    }

    /// Append a message, applying head-truncation (spec.md §3, §4.A).
    /// Returns the number of messages dropped from the head.
    pub fn push_message(&mut self, message: Message, max_messages: usize) -> usize {
        self.messages.push(message);
        self.updated_at = Utc::now();
        let overflow = self.messages.len().saturating_sub(max_messages);
        if overflow > 0 {
            self.messages.drain(0..overflow);
        }
        overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::MessageBody;

    #[test]
    fn head_truncation_drops_oldest() {
        let mut conv = Conversation::new("p1", None);
        for i in 0..2000 {
            conv.push_message(
                Message::new(MessageBody::System {
                    text: format!("msg-{i}"),
                }),
                1000,
            );
        }
        assert_eq!(conv.messages.len(), 1000);
        match &conv.messages[0].body {
            MessageBody::System { text } => assert_eq!(text, "msg-1000"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn updated_at_is_non_decreasing() {
        let mut conv = Conversation::new("p1", None);
        let t0 = conv.updated_at;
        conv.push_message(
            Message::new(MessageBody::System {
                text: "x".into(),
            }),
            1000,
        );
        assert!(conv.updated_at >= t0);
    }
}
