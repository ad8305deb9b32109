//! Child stdout envelope schema (spec.md §4.D, §6, §9)
//!
//! The exact schema emitted by the installed coding-assistant CLI is
//! explicitly left unpinned by spec.md §9 ("implementers must pin it
//! to the installed CLI version"). This module defines the logical
//! shape spec.md §4.D enumerates — assistant text, tool use/result,
//! a blocking prompt, context-usage, compaction, session id — with a
//! final `Unknown` fallback, mirroring the teacher's
//! `ToolInput::from_name_and_value` "classify or fall back" discipline
//! in `state_machine/state.rs`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound stdin frame (spec.md §4.D step 2, §6): text plus
/// already-base64-encoded image blocks, one JSON object per line.
#[derive(Debug, Clone, Serialize)]
pub struct ChildInputFrame {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildEnvelope {
    /// A chunk of assistant text. The child may stream several of
    /// these per turn; the runtime extends the in-progress assistant
    /// message rather than starting a new one each time.
    Assistant { text: String },

    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    ToolResult {
        tool_use_id: String,
        status: ToolResultStatusWire,
        #[serde(default)]
        content: Option<Value>,
    },

    /// A blocking or non-blocking interactive prompt (spec.md §4.G).
    Prompt {
        prompt_type: PromptType,
        #[serde(default)]
        header: Option<String>,
        #[serde(default)]
        question: Option<String>,
        #[serde(default)]
        options: Vec<String>,
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        details: Option<Value>,
        #[serde(default)]
        plan_file: Option<String>,
    },

    ContextUsage {
        used_fraction: f64,
    },

    Compaction {
        summary: String,
    },

    /// Startup/system event carrying the vendor's own session id, used
    /// for `--resume`-style continuation (spec.md §4.D, §6).
    System {
        #[serde(default)]
        session_id: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatusWire {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    Question,
    Permission,
    PlanModeExit,
    PlanModeEnter,
}

impl ChildEnvelope {
    /// Parse one newline-delimited JSON line. Unparseable lines are
    /// logged by the caller and skipped — they never abort the
    /// reader loop (spec.md §4.D is silent on malformed lines; treating
    /// them as `Unknown`-equivalent noise keeps the runtime resilient
    /// to a CLI version that emits something unrecognized).
    pub fn parse_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_use() {
        let line = r#"{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"/a"}}"#;
        let env = ChildEnvelope::parse_line(line).unwrap();
        assert!(matches!(env, ChildEnvelope::ToolUse { id, .. } if id == "t1"));
    }

    #[test]
    fn unknown_type_falls_back() {
        let line = r#"{"type":"some_future_event","foo":1}"#;
        let env = ChildEnvelope::parse_line(line).unwrap();
        assert!(matches!(env, ChildEnvelope::Unknown));
    }

    #[test]
    fn garbage_is_a_parse_error_not_a_panic() {
        assert!(ChildEnvelope::parse_line("not json at all").is_err());
    }
}
