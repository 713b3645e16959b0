//! UI message format exchanged with the browser client
//!
//! A conversation is a list of `UiMessage`s; each message is an ordered list
//! of parts. Text parts carry prose, `tool-<name>` parts carry one tool
//! invocation and its lifecycle state. Unknown part kinds (`step-start`,
//! `reasoning`, ...) are kept as `UiPart::Other` so richer clients are not
//! rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod convert;

pub use convert::to_model_messages;

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<UiMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<UiPart>,
}

impl UiMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            role: Role::User,
            parts: vec![UiPart::Text { text: text.into() }],
        }
    }

    /// Concatenated text parts, separated by blank lines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                UiPart::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn tool_parts(&self) -> impl Iterator<Item = &ToolPart> {
        self.parts.iter().filter_map(|p| match p {
            UiPart::Tool(t) => Some(t),
            _ => None,
        })
    }
}

/// Lifecycle of a single tool invocation.
///
/// `input-streaming → input-available → output-available | output-error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

impl ToolState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolState::OutputAvailable | ToolState::OutputError)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolPart {
    pub tool_name: String,
    pub tool_call_id: String,
    pub state: ToolState,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPart", into = "RawPart")]
pub enum UiPart {
    Text { text: String },
    Tool(ToolPart),
    Other { kind: String },
}

const TOOL_PREFIX: &str = "tool-";
const DYNAMIC_TOOL: &str = "dynamic-tool";

/// Flat wire shape shared by every part kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<ToolState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_text: Option<String>,
}

impl TryFrom<RawPart> for UiPart {
    type Error = String;

    fn try_from(raw: RawPart) -> Result<Self, Self::Error> {
        if raw.kind == "text" {
            let text = raw.text.ok_or("text part without `text`")?;
            return Ok(UiPart::Text { text });
        }

        let tool_name = if raw.kind == DYNAMIC_TOOL {
            raw.tool_name.clone()
        } else {
            raw.kind.strip_prefix(TOOL_PREFIX).map(str::to_string)
        };
        let Some(tool_name) = tool_name.filter(|n| !n.is_empty()) else {
            return Ok(UiPart::Other { kind: raw.kind });
        };

        let tool_call_id = raw
            .tool_call_id
            .ok_or_else(|| format!("{} part without `toolCallId`", raw.kind))?;
        let state = raw
            .state
            .ok_or_else(|| format!("{} part without `state`", raw.kind))?;
        Ok(UiPart::Tool(ToolPart {
            tool_name,
            tool_call_id,
            state,
            input: raw.input,
            output: raw.output,
            error_text: raw.error_text,
        }))
    }
}

impl From<UiPart> for RawPart {
    fn from(part: UiPart) -> Self {
        let empty = RawPart {
            kind: String::new(),
            text: None,
            tool_name: None,
            tool_call_id: None,
            state: None,
            input: None,
            output: None,
            error_text: None,
        };
        match part {
            UiPart::Text { text } => RawPart {
                kind: "text".to_string(),
                text: Some(text),
                ..empty
            },
            UiPart::Tool(t) => RawPart {
                kind: format!("{TOOL_PREFIX}{}", t.tool_name),
                tool_call_id: Some(t.tool_call_id),
                state: Some(t.state),
                input: t.input,
                output: t.output,
                error_text: t.error_text,
                ..empty
            },
            UiPart::Other { kind } => RawPart { kind, ..empty },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ui_message_parts() {
        let msg: UiMessage = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "parts": [
                {"type": "step-start"},
                {"type": "text", "text": "확인해볼게요"},
                {
                    "type": "tool-weather",
                    "toolCallId": "call_1",
                    "state": "output-available",
                    "input": {"location": "서울"},
                    "output": {"location": "서울", "temperature": 21}
                }
            ]
        }))
        .unwrap();

        assert_eq!(msg.parts.len(), 3);
        assert!(matches!(&msg.parts[0], UiPart::Other { kind } if kind == "step-start"));
        let tool = msg.tool_parts().next().unwrap();
        assert_eq!(tool.tool_name, "weather");
        assert!(tool.state.is_terminal());
        assert_eq!(msg.text(), "확인해볼게요");
    }

    #[test]
    fn tool_part_round_trips_wire_shape() {
        let part = UiPart::Tool(ToolPart {
            tool_name: "search".into(),
            tool_call_id: "c".into(),
            state: ToolState::OutputError,
            input: Some(json!({"query": "q"})),
            output: None,
            error_text: Some("boom".into()),
        });
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "tool-search",
                "toolCallId": "c",
                "state": "output-error",
                "input": {"query": "q"},
                "errorText": "boom"
            })
        );
    }

    #[test]
    fn dynamic_tool_parts_use_tool_name_field() {
        let part: UiPart = serde_json::from_value(json!({
            "type": "dynamic-tool",
            "toolName": "analyze",
            "toolCallId": "c2",
            "state": "input-available",
            "input": {}
        }))
        .unwrap();
        assert!(matches!(part, UiPart::Tool(t) if t.tool_name == "analyze"));
    }

    #[test]
    fn tool_part_without_state_is_rejected() {
        let err = serde_json::from_value::<UiPart>(json!({
            "type": "tool-search",
            "toolCallId": "c"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("state"));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(serde_json::from_value::<UiMessage>(json!({"role": "robot", "parts": []})).is_err());
    }
}
