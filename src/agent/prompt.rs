//! PromptInterpreter (spec.md §4.G)
//!
//! Classifies a child-emitted prompt envelope into one of the four
//! signals spec.md's table names, grounded on the teacher's
//! `ToolInput::from_name_and_value` "inspect a tag, build a typed
//! variant" dispatch in `state_machine/state.rs`.

use crate::agent::envelope::{ChildEnvelope, PromptType};
use crate::model::{MessageBody, PlanModeAction};

/// Result of interpreting a `Prompt` envelope.
pub struct InterpretedPrompt {
    pub body: MessageBody,
    /// Whether this sub-state blocks further input until replied to
    /// (spec.md §4.G "Blocks input" column).
    pub blocks_input: bool,
}

pub struct PromptInterpreter;

impl PromptInterpreter {
    /// Returns `None` for any envelope that isn't a `Prompt` — callers
    /// handle those through the normal message-append path instead.
    pub fn interpret(envelope: &ChildEnvelope, current_plan_file: Option<&str>) -> Option<InterpretedPrompt> {
        let ChildEnvelope::Prompt {
            prompt_type,
            header,
            question,
            options,
            tool,
            action,
            details,
            plan_file,
        } = envelope
        else {
            return None;
        };

        match prompt_type {
            PromptType::Question => Some(InterpretedPrompt {
                body: MessageBody::Question {
                    header: header.clone().unwrap_or_default(),
                    question: question.clone().unwrap_or_default(),
                    options: options.clone(),
                },
                blocks_input: true,
            }),
            PromptType::Permission => Some(InterpretedPrompt {
                body: MessageBody::Permission {
                    tool: tool.clone().unwrap_or_default(),
                    action: action.clone().unwrap_or_default(),
                    details: details.clone().unwrap_or(serde_json::Value::Null),
                },
                blocks_input: true,
            }),
            PromptType::PlanModeExit => {
                let resolved_plan_file = plan_file.clone().or_else(|| current_plan_file.map(str::to_string));
                Some(InterpretedPrompt {
                    body: MessageBody::PlanMode {
                        action: PlanModeAction::Exit,
                        plan_file: resolved_plan_file,
                    },
                    blocks_input: true,
                })
            }
            PromptType::PlanModeEnter => Some(InterpretedPrompt {
                body: MessageBody::PlanMode {
                    action: PlanModeAction::Enter,
                    plan_file: None,
                },
                blocks_input: false,
            }),
        }
    }
}

/// Tracks the tool-name special casing spec.md §4.D calls for: the
/// "current plan file" remembered across a `Write`/`Edit` to
/// `plans/*.md` so the next `exit_plan_mode` prompt can attach it.
#[derive(Debug, Default, Clone)]
pub struct PlanFileTracker {
    current: Option<String>,
}

impl PlanFileTracker {
    pub fn note_write(&mut self, file_path: &str) {
        if is_plan_file(file_path) {
            self.current = Some(file_path.to_string());
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

fn is_plan_file(file_path: &str) -> bool {
    let normalized = file_path.replace('\\', "/");
    normalized
        .rsplit_once("plans/")
        .is_some_and(|(_, rest)| rest.ends_with(".md"))
}
