//! Lowering UI messages into chat-completion messages.
//!
//! Assistant messages are cut into blocks: text followed by the tool calls
//! made after it. Each block becomes one assistant message carrying the
//! `tool_calls`, followed by one tool message per call. A `step-start` part
//! or text appearing after tool parts opens a new block.

use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionToolType, FunctionCall,
};
use serde_json::Value;

use super::{Role, ToolPart, ToolState, UiMessage, UiPart};
use crate::error::{ChatError, Result};

const STEP_START: &str = "step-start";

/// Convert a UI conversation into model messages.
///
/// Tool parts that never reached a terminal state are dropped along with
/// their call, so the model never sees a call without a result.
pub fn to_model_messages(messages: &[UiMessage]) -> Result<Vec<ChatCompletionRequestMessage>> {
    if messages.is_empty() {
        return Err(ChatError::malformed("`messages` must not be empty"));
    }

    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::System => {
                let text = message.text();
                if !text.is_empty() {
                    out.push(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(text)
                            .build()?
                            .into(),
                    );
                }
            }
            Role::User => {
                let text = message.text();
                if !text.is_empty() {
                    out.push(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(text)
                            .build()?
                            .into(),
                    );
                }
            }
            Role::Assistant => lower_assistant(message, &mut out)?,
        }
    }
    if out.is_empty() {
        return Err(ChatError::malformed("`messages` carry no content"));
    }
    Ok(out)
}

#[derive(Default)]
struct Block<'a> {
    text: Vec<&'a str>,
    tools: Vec<&'a ToolPart>,
}

impl Block<'_> {
    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tools.is_empty()
    }
}

fn lower_assistant(message: &UiMessage, out: &mut Vec<ChatCompletionRequestMessage>) -> Result<()> {
    let mut block = Block::default();
    for part in &message.parts {
        match part {
            UiPart::Text { text } => {
                if text.trim().is_empty() {
                    continue;
                }
                if !block.tools.is_empty() {
                    flush(std::mem::take(&mut block), out)?;
                }
                block.text.push(text);
            }
            UiPart::Tool(tool) if tool.state.is_terminal() => block.tools.push(tool),
            UiPart::Tool(_) => {}
            UiPart::Other { kind } if kind == STEP_START => {
                flush(std::mem::take(&mut block), out)?;
            }
            UiPart::Other { .. } => {}
        }
    }
    flush(block, out)
}

fn flush(block: Block<'_>, out: &mut Vec<ChatCompletionRequestMessage>) -> Result<()> {
    if block.is_empty() {
        return Ok(());
    }

    let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
    if !block.text.is_empty() {
        assistant.content(block.text.join("\n\n"));
    }
    if !block.tools.is_empty() {
        let calls: Vec<ChatCompletionMessageToolCall> = block
            .tools
            .iter()
            .map(|t| ChatCompletionMessageToolCall {
                id: t.tool_call_id.clone(),
                r#type: ChatCompletionToolType::Function,
                function: FunctionCall {
                    name: t.tool_name.clone(),
                    arguments: t.input.as_ref().unwrap_or(&Value::Null).to_string(),
                },
            })
            .collect();
        assistant.tool_calls(calls);
    }
    out.push(assistant.build()?.into());

    for tool in block.tools {
        out.push(
            ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(tool.tool_call_id.clone())
                .content(tool_result_text(tool))
                .build()?
                .into(),
        );
    }
    Ok(())
}

fn tool_result_text(tool: &ToolPart) -> String {
    match tool.state {
        ToolState::OutputError => {
            let message = tool.error_text.as_deref().unwrap_or("tool execution failed");
            serde_json::json!({ "error": message }).to_string()
        }
        _ => tool.output.as_ref().unwrap_or(&Value::Null).to_string(),
    }
}
