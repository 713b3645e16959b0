//! UI message stream protocol
//!
//! What this module provides
//! - `UiChunk`: one `data:` frame of the streamed assistant response
//! - `MessageAccumulator`: folds a chunk sequence back into a `UiMessage`
//!
//! Wire format
//! - Server-sent events; each event's data is one JSON-encoded `UiChunk`
//! - The response carries `x-vercel-ai-ui-message-stream: v1`
//! - The stream ends with a literal `[DONE]` data frame
//!
//! Ordering guarantees emitted by the response loop
//! - `start` first, then per step `start-step ... finish-step`, then `finish`
//! - for each tool call: `tool-input-start`, deltas, `tool-input-available`,
//!   then exactly one of `tool-output-available` / `tool-output-error`
//! - a provider failure emits `error` and no `finish`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::{Role, ToolPart, ToolState, UiMessage, UiPart};

pub const STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const STREAM_VERSION: &str = "v1";
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum UiChunk {
    Start {
        message_id: String,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolInputDelta {
        tool_call_id: String,
        input_text_delta: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: Value,
    },
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    FinishStep,
    Finish,
    Error {
        error_text: String,
    },
}

/// Rebuilds the assistant message a client would render from a chunk sequence.
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    message_id: String,
    parts: Vec<UiPart>,
    open_text: Option<(String, usize)>,
    errors: Vec<String>,
    finished: bool,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, chunk: &UiChunk) {
        match chunk {
            UiChunk::Start { message_id } => self.message_id = message_id.clone(),
            UiChunk::StartStep => self.parts.push(UiPart::Other {
                kind: "step-start".to_string(),
            }),
            UiChunk::TextStart { id } => {
                self.parts.push(UiPart::Text {
                    text: String::new(),
                });
                self.open_text = Some((id.clone(), self.parts.len() - 1));
            }
            UiChunk::TextDelta { id, delta } => {
                let slot = match &self.open_text {
                    Some((open, idx)) if open == id => Some(*idx),
                    _ => None,
                };
                match slot.and_then(|i| self.parts.get_mut(i)) {
                    Some(UiPart::Text { text }) => text.push_str(delta),
                    _ => self.parts.push(UiPart::Text {
                        text: delta.clone(),
                    }),
                }
            }
            UiChunk::TextEnd { .. } => self.open_text = None,
            UiChunk::ToolInputStart {
                tool_call_id,
                tool_name,
            } => self.parts.push(UiPart::Tool(ToolPart {
                tool_name: tool_name.clone(),
                tool_call_id: tool_call_id.clone(),
                state: ToolState::InputStreaming,
                input: None,
                output: None,
                error_text: None,
            })),
            UiChunk::ToolInputDelta { .. } => {}
            UiChunk::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            } => {
                self.ensure_tool(tool_call_id, tool_name);
                if let Some(part) = self.find_tool(tool_call_id) {
                    part.state = ToolState::InputAvailable;
                    part.input = Some(input.clone());
                }
            }
            UiChunk::ToolOutputAvailable {
                tool_call_id,
                output,
            } => {
                if let Some(part) = self.find_tool(tool_call_id) {
                    part.state = ToolState::OutputAvailable;
                    part.output = Some(output.clone());
                }
            }
            UiChunk::ToolOutputError {
                tool_call_id,
                error_text,
            } => {
                if let Some(part) = self.find_tool(tool_call_id) {
                    part.state = ToolState::OutputError;
                    part.error_text = Some(error_text.clone());
                }
            }
            UiChunk::FinishStep => {}
            UiChunk::Finish => self.finished = true,
            UiChunk::Error { error_text } => self.errors.push(error_text.clone()),
        }
    }

    fn find_tool(&mut self, id: &str) -> Option<&mut ToolPart> {
        self.parts.iter_mut().find_map(|p| match p {
            UiPart::Tool(t) if t.tool_call_id == id => Some(t),
            _ => None,
        })
    }

    fn ensure_tool(&mut self, id: &str, name: &str) {
        if self.find_tool(id).is_none() {
            self.parts.push(UiPart::Tool(ToolPart {
                tool_name: name.to_string(),
                tool_call_id: id.to_string(),
                state: ToolState::InputStreaming,
                input: None,
                output: None,
                error_text: None,
            }));
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Every tool part reached `output-available` or `output-error`.
    pub fn all_tools_terminal(&self) -> bool {
        self.parts.iter().all(|p| match p {
            UiPart::Tool(t) => t.state.is_terminal(),
            _ => true,
        })
    }

    pub fn into_message(self) -> UiMessage {
        UiMessage {
            id: self.message_id,
            role: Role::Assistant,
            parts: self.parts,
        }
    }
}
