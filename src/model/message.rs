//! Message tagged-union (spec.md §3 "Message")
//!
//! Grounded on the teacher's `state_machine::state::ToolInput` pattern:
//! a `#[serde(tag = "type")]` enum with per-variant payloads, no
//! prototype-chain or runtime field sniffing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanModeAction {
    Enter,
    Exit,
}

/// Tagged-union message body. `timestamp`/`is_debug` live on the
/// enclosing `Message` envelope, not duplicated per-variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    User {
        text: String,
        #[serde(default)]
        images: Vec<String>,
    },
    Assistant {
        text: String,
    },
    ToolUse {
        tool_id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_id: String,
        status: ToolResultStatus,
        #[serde(default)]
        result_content: Option<Value>,
    },
    System {
        text: String,
    },
    Question {
        header: String,
        question: String,
        options: Vec<String>,
    },
    Permission {
        tool: String,
        action: String,
        details: Value,
    },
    PlanMode {
        action: PlanModeAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan_file: Option<String>,
    },
    Compaction {
        summary: String,
    },
}

impl MessageBody {
    /// Short tag naming the variant, used by `ConversationStore::search`
    /// results and WS/HTTP payloads that need a `message_type` field
    /// separate from the full serialized body.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::User { .. } => "user",
            MessageBody::Assistant { .. } => "assistant",
            MessageBody::ToolUse { .. } => "tool_use",
            MessageBody::ToolResult { .. } => "tool_result",
            MessageBody::System { .. } => "system",
            MessageBody::Question { .. } => "question",
            MessageBody::Permission { .. } => "permission",
            MessageBody::PlanMode { .. } => "plan_mode",
            MessageBody::Compaction { .. } => "compaction",
        }
    }

    /// Best-effort plain-text projection used by `ConversationStore::search`
    /// (spec.md §4.A: "case-insensitive substring scan over `message.content`").
    pub fn searchable_text(&self) -> String {
        match self {
            MessageBody::User { text, .. }
            | MessageBody::Assistant { text }
            | MessageBody::System { text } => text.clone(),
            MessageBody::ToolUse { name, input, .. } => format!("{name} {input}"),
            MessageBody::ToolResult { result_content, .. } => result_content
                .as_ref()
                .map(std::string::ToString::to_string)
                .unwrap_or_default(),
            MessageBody::Question {
                header, question, ..
            } => format!("{header} {question}"),
            MessageBody::Permission { tool, action, .. } => format!("{tool} {action}"),
            MessageBody::PlanMode { .. } => String::new(),
            MessageBody::Compaction { summary } => summary.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(flatten)]
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_debug: bool,
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            body,
            timestamp: Utc::now(),
            is_debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_use_and_result_round_trip_json() {
        let msg = Message::new(MessageBody::ToolUse {
            tool_id: "t1".into(),
            name: "Read".into(),
            input: serde_json::json!({"file_path": "/tmp/a"}),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "tool_use");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.body, msg.body);
    }

    #[test]
    fn searchable_text_covers_question() {
        let m = MessageBody::Question {
            header: "Pick one".into(),
            question: "Which file?".into(),
            options: vec!["a".into(), "b".into()],
        };
        assert_eq!(m.searchable_text(), "Pick one Which file?");
    }
}
