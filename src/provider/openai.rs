use std::future::Future;
use std::pin::Pin;

use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateChatCompletionRequest, CreateChatCompletionStreamResponse};
use async_openai::Client;
use futures::{stream, StreamExt};
use tower::BoxError;
use tracing::debug;

use super::{ProviderChunk, ProviderStream, StepProvider};
use crate::config::AppConfig;
use crate::error::{ChatError, Result};

/// Streams turns from an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAIStreamProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAIStreamProvider {
    pub fn new(api_base: &str, api_key: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
        }
    }

    /// Build from config, reading the key from `config.api_key_env`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let key = std::env::var(&config.api_key_env).map_err(|_| {
            ChatError::config(format!("{} is not set", config.api_key_env))
        })?;
        Ok(Self::new(&config.api_base, &key))
    }
}

impl StepProvider for OpenAIStreamProvider {
    fn stream_step(
        &self,
        mut req: CreateChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<ProviderStream, BoxError>> + Send>> {
        let client = self.client.clone();
        Box::pin(async move {
            req.stream = Some(true);
            debug!(model = %req.model, messages = req.messages.len(), "opening completion stream");
            let upstream = client.chat().create_stream(req).await?;
            let chunks = upstream.flat_map(|item| {
                let mapped: Vec<std::result::Result<ProviderChunk, BoxError>> = match item {
                    Ok(response) => map_response(response).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(Box::new(e) as BoxError)],
                };
                stream::iter(mapped)
            });
            Ok(Box::pin(chunks) as ProviderStream)
        })
    }
}

/// Flatten one streamed completion chunk into provider chunks.
///
/// Only the first choice is considered. A tool-call fragment carrying an `id`
/// opens a new call; argument text is forwarded as-is.
pub(crate) fn map_response(response: CreateChatCompletionStreamResponse) -> Vec<ProviderChunk> {
    let mut out = Vec::new();
    if let Some(choice) = response.choices.into_iter().next() {
        let delta = choice.delta;
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            out.push(ProviderChunk::TextDelta(content));
        }
        for call in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = call
                .function
                .map(|f| (f.name, f.arguments))
                .unwrap_or((None, None));
            if let Some(id) = call.id {
                out.push(ProviderChunk::ToolCallStart {
                    index: call.index,
                    id,
                    name: name.unwrap_or_default(),
                });
            }
            if let Some(arguments) = arguments.filter(|a| !a.is_empty()) {
                out.push(ProviderChunk::ToolCallDelta {
                    index: call.index,
                    arguments,
                });
            }
        }
    }
    if let Some(usage) = response.usage {
        out.push(ProviderChunk::Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(value: serde_json::Value) -> CreateChatCompletionStreamResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn maps_text_and_tool_fragments() {
        let first = chunk(json!({
            "id": "x", "object": "chat.completion.chunk", "created": 0, "model": "m",
            "choices": [{"index": 0, "delta": {
                "content": "잠시만요",
                "tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                                "function": {"name": "weather", "arguments": "{\"loc"}}]
            }, "finish_reason": null}]
        }));
        assert_eq!(
            map_response(first),
            vec![
                ProviderChunk::TextDelta("잠시만요".into()),
                ProviderChunk::ToolCallStart { index: 0, id: "call_1".into(), name: "weather".into() },
                ProviderChunk::ToolCallDelta { index: 0, arguments: "{\"loc".into() },
            ]
        );

        let next = chunk(json!({
            "id": "x", "object": "chat.completion.chunk", "created": 0, "model": "m",
            "choices": [{"index": 0, "delta": {
                "tool_calls": [{"index": 0, "function": {"arguments": "ation\":\"서울\"}"}}]
            }, "finish_reason": null}]
        }));
        assert_eq!(
            map_response(next),
            vec![ProviderChunk::ToolCallDelta { index: 0, arguments: "ation\":\"서울\"}".into() }]
        );
    }

    #[test]
    fn maps_usage_on_final_chunk() {
        let last = chunk(json!({
            "id": "x", "object": "chat.completion.chunk", "created": 0, "model": "m",
            "choices": [],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }));
        assert_eq!(
            map_response(last),
            vec![ProviderChunk::Usage { prompt_tokens: 12, completion_tokens: 3 }]
        );
    }
}
