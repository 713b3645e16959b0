//! Tool-augmented response loop
//!
//! What this module provides
//! - `ResponseLoop`: drives model turns and tool executions for one request and
//!   streams `UiChunk`s as they happen
//!
//! Exports
//! - Models
//!   - `LoopEvent::{Chunk(UiChunk), Finished(LoopOutcome)}`
//!   - `LoopOutcome { messages, steps, stop }`
//!   - `LoopPhase`, `AbortReason`, `LoopSignal` and the pure `next_phase` table
//! - Services
//!   - `ResponseLoop: Service<ChatRequest, Response = LoopStream, Error = BoxError>`
//!
//! Implementation strategy
//! - The loop runs in a spawned task and forwards events over a bounded mpsc
//!   channel, so slow consumers apply back-pressure to the provider stream
//! - Tool calls of one turn run concurrently; outputs are streamed as each call
//!   finishes but appended to history in call order before the next turn
//! - Tool failures (including timeouts) become `tool-output-error`; provider
//!   failures close every open call with an error, emit `error` and abort
//!
//! Testing strategy
//! - `ScriptedProvider` with zero tool latency; see `tests/response_loop.rs`
//!   for step-budget, ordering and failure scenarios

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, FunctionCall,
};
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower::{BoxError, Layer, Service, ServiceExt};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{Result, ToolExecutionError};
use crate::messages::{to_model_messages, ChatRequest, UiMessage};
use crate::provider::{ProviderChunk, StepProvider};
use crate::resilience::{Elapsed, Timeout, TimeoutLayer};
use crate::streaming::UiChunk;
use crate::tools::{ToolInvocation, ToolRegistry};

mod phase;

pub use phase::{next_phase, AbortReason, LoopPhase, LoopSignal};

/// Final state of one run, published after the last chunk.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub messages: Vec<ChatCompletionRequestMessage>,
    pub steps: usize,
    pub stop: LoopPhase,
}

#[derive(Debug, Clone)]
pub enum LoopEvent {
    Chunk(UiChunk),
    Finished(LoopOutcome),
}

pub type LoopStream = Pin<Box<dyn Stream<Item = LoopEvent> + Send>>;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct ResponseLoop {
    provider: Arc<dyn StepProvider>,
    tools: Timeout<ToolRegistry>,
    tool_specs: Arc<Vec<ChatCompletionTool>>,
    model: String,
    system_prompt: Arc<str>,
    max_steps: usize,
    step_timeout: Option<Duration>,
}

impl ResponseLoop {
    pub fn new(provider: Arc<dyn StepProvider>, tools: ToolRegistry, model: impl Into<String>) -> Result<Self> {
        let defaults = AppConfig::default();
        let tool_specs = Arc::new(tools.specs()?);
        Ok(Self {
            provider,
            tools: TimeoutLayer::new(defaults.tool_timeout).layer(tools),
            tool_specs,
            model: model.into(),
            system_prompt: Arc::from(defaults.system_prompt.as_str()),
            max_steps: defaults.max_steps,
            step_timeout: defaults.step_timeout,
        })
    }

    pub fn from_config(provider: Arc<dyn StepProvider>, config: &AppConfig) -> Result<Self> {
        let registry = ToolRegistry::new(config.tool_latency);
        Ok(Self::new(provider, registry, config.model.clone())?
            .with_system_prompt(config.system_prompt.clone())
            .with_max_steps(config.max_steps)
            .with_tool_timeout(config.tool_timeout)
            .with_step_timeout(config.step_timeout))
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Arc::from(prompt.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_tool_timeout(mut self, dur: Option<Duration>) -> Self {
        self.tools = TimeoutLayer::new(dur).layer(self.tools.into_inner());
        self
    }

    pub fn with_step_timeout(mut self, dur: Option<Duration>) -> Self {
        self.step_timeout = dur;
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Validate and lower a UI conversation, system prompt first.
    pub fn prepare(&self, history: &[UiMessage]) -> Result<Vec<ChatCompletionRequestMessage>> {
        let converted = to_model_messages(history)?;
        let mut messages = Vec::with_capacity(converted.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.system_prompt.to_string())
                    .build()?
                    .into(),
            );
        }
        messages.extend(converted);
        Ok(messages)
    }

    /// Start the loop over already prepared model messages.
    pub fn stream(&self, messages: Vec<ChatCompletionRequestMessage>) -> LoopStream {
        let (tx, rx) = mpsc::channel::<LoopEvent>(CHANNEL_CAPACITY);
        let message_id = format!("msg_{}", Uuid::new_v4().simple());
        let span = info_span!("response_loop", message_id = %message_id);
        let this = self.clone();
        tokio::spawn(this.drive(messages, message_id, Emitter { tx }).instrument(span));
        Box::pin(ReceiverStream::new(rx))
    }

    pub fn run(&self, history: &[UiMessage]) -> Result<LoopStream> {
        let messages = self.prepare(history)?;
        Ok(self.stream(messages))
    }

    async fn drive(self, mut messages: Vec<ChatCompletionRequestMessage>, message_id: String, out: Emitter) {
        out.chunk(UiChunk::Start { message_id }).await;

        let mut phase = LoopPhase::Thinking;
        let mut steps = 0usize;
        let mut pending: Vec<PendingCall> = Vec::new();

        while !phase.is_terminal() {
            if out.is_closed() {
                debug!(steps, "client went away; stopping");
                return;
            }
            let signal = match phase {
                LoopPhase::Thinking => {
                    steps += 1;
                    let span = info_span!("step", step = steps);
                    self.think(&mut messages, &mut pending, &out)
                        .instrument(span)
                        .await
                }
                LoopPhase::ExecutingTools => {
                    let span = info_span!("tools", step = steps, calls = pending.len());
                    self.execute(std::mem::take(&mut pending), &mut messages, &out)
                        .instrument(span)
                        .await;
                    out.chunk(UiChunk::FinishStep).await;
                    LoopSignal::ToolsCompleted
                }
                LoopPhase::Done | LoopPhase::Aborted(_) => break,
            };
            phase = next_phase(&phase, signal, steps, self.max_steps);
        }

        match &phase {
            LoopPhase::Aborted(AbortReason::Provider(e)) => {
                warn!(steps, stop_reason = %phase, error = %e, "response loop aborted");
            }
            _ => {
                info!(steps, stop_reason = %phase, "response loop finished");
                out.chunk(UiChunk::Finish).await;
            }
        }
        out.send(LoopEvent::Finished(LoopOutcome {
            messages,
            steps,
            stop: phase,
        }))
        .await;
    }

    /// One model turn. Appends the assistant message and leaves requested calls in `pending`.
    async fn think(
        &self,
        messages: &mut Vec<ChatCompletionRequestMessage>,
        pending: &mut Vec<PendingCall>,
        out: &Emitter,
    ) -> LoopSignal {
        out.chunk(UiChunk::StartStep).await;
        let mut turn = Turn::default();

        let result = match self.request(messages) {
            Err(e) => Err(e),
            Ok(req) => match self.step_timeout {
                None => self.stream_turn(req, &mut turn, out).await,
                Some(d) => tokio::time::timeout(d, self.stream_turn(req, &mut turn, out))
                    .await
                    .unwrap_or_else(|_| Err(format!("model step timed out after {}ms", d.as_millis()))),
            },
        };

        if let Some(id) = turn.text_id.take() {
            out.chunk(UiChunk::TextEnd { id }).await;
        }

        if let Err(message) = result {
            for call in turn.calls.into_values() {
                out.chunk(UiChunk::ToolOutputError {
                    tool_call_id: call.id,
                    error_text: "model stream ended before the call completed".to_string(),
                })
                .await;
            }
            out.chunk(UiChunk::Error {
                error_text: message.clone(),
            })
            .await;
            return LoopSignal::ProviderFailed(message);
        }

        let calls: Vec<PendingCall> = turn.calls.into_values().collect();
        for call in &calls {
            out.chunk(UiChunk::ToolInputAvailable {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                input: call.input_value(),
            })
            .await;
        }

        match assistant_message(&turn.text, &calls) {
            Ok(msg) => messages.push(msg),
            Err(e) => {
                let message = e.to_string();
                out.chunk(UiChunk::Error {
                    error_text: message.clone(),
                })
                .await;
                return LoopSignal::ProviderFailed(message);
            }
        }

        if calls.is_empty() {
            out.chunk(UiChunk::FinishStep).await;
            LoopSignal::FinalAnswer
        } else {
            debug!(calls = calls.len(), "model requested tools");
            *pending = calls;
            LoopSignal::ToolCallsRequested
        }
    }

    fn request(&self, messages: &[ChatCompletionRequestMessage]) -> std::result::Result<CreateChatCompletionRequest, String> {
        let mut b = CreateChatCompletionRequestArgs::default();
        b.model(&self.model).messages(messages.to_vec());
        if !self.tool_specs.is_empty() {
            b.tools(self.tool_specs.as_ref().clone());
        }
        b.build().map_err(|e| format!("build request: {e}"))
    }

    async fn stream_turn(
        &self,
        req: CreateChatCompletionRequest,
        turn: &mut Turn,
        out: &Emitter,
    ) -> std::result::Result<(), String> {
        let mut stream = self
            .provider
            .stream_step(req)
            .await
            .map_err(|e| format!("model provider: {e}"))?;

        while let Some(item) = stream.next().await {
            match item.map_err(|e| format!("model provider: {e}"))? {
                ProviderChunk::TextDelta(delta) => {
                    let id = match &turn.text_id {
                        Some(id) => id.clone(),
                        None => {
                            let id = format!("txt_{}", Uuid::new_v4().simple());
                            out.chunk(UiChunk::TextStart { id: id.clone() }).await;
                            turn.text_id = Some(id.clone());
                            id
                        }
                    };
                    turn.text.push_str(&delta);
                    out.chunk(UiChunk::TextDelta { id, delta }).await;
                }
                ProviderChunk::ToolCallStart { index, id, name } => {
                    if let Some(open) = turn.calls.get(&index) {
                        if open.id != id {
                            warn!(index, open = %open.id, repeated = %id, "conflicting id for open tool call");
                        }
                        continue;
                    }
                    out.chunk(UiChunk::ToolInputStart {
                        tool_call_id: id.clone(),
                        tool_name: name.clone(),
                    })
                    .await;
                    turn.calls.insert(
                        index,
                        PendingCall {
                            id,
                            name,
                            raw_input: String::new(),
                        },
                    );
                }
                ProviderChunk::ToolCallDelta { index, arguments } => match turn.calls.get_mut(&index) {
                    Some(call) => {
                        call.raw_input.push_str(&arguments);
                        out.chunk(UiChunk::ToolInputDelta {
                            tool_call_id: call.id.clone(),
                            input_text_delta: arguments,
                        })
                        .await;
                    }
                    None => warn!(index, "argument fragment for unknown tool call"),
                },
                ProviderChunk::Usage {
                    prompt_tokens,
                    completion_tokens,
                } => debug!(prompt_tokens, completion_tokens, "usage"),
            }
        }
        Ok(())
    }

    /// Run every pending call concurrently and append results in call order.
    async fn execute(
        &self,
        calls: Vec<PendingCall>,
        messages: &mut Vec<ChatCompletionRequestMessage>,
        out: &Emitter,
    ) {
        let mut running: FuturesUnordered<_> = calls
            .iter()
            .enumerate()
            .map(|(slot, call)| {
                let tools = self.tools.clone();
                let name = call.name.clone();
                let invocation = call.invocation();
                async move {
                    let result = match invocation {
                        Err(e) => Err(e),
                        Ok(inv) => tools
                            .oneshot(inv)
                            .await
                            .map(|o| o.result)
                            .map_err(|e| tool_error(&name, e)),
                    };
                    (slot, result)
                }
            })
            .collect();

        let mut results: Vec<Option<std::result::Result<Value, ToolExecutionError>>> =
            vec![None; calls.len()];
        while let Some((slot, result)) = running.next().await {
            let id = calls[slot].id.clone();
            match &result {
                Ok(output) => {
                    out.chunk(UiChunk::ToolOutputAvailable {
                        tool_call_id: id,
                        output: output.clone(),
                    })
                    .await
                }
                Err(e) => {
                    warn!(tool = %e.tool, call_id = %id, error = %e.message, "tool failed");
                    out.chunk(UiChunk::ToolOutputError {
                        tool_call_id: id,
                        error_text: e.to_string(),
                    })
                    .await
                }
            }
            results[slot] = Some(result);
        }

        for (call, result) in calls.iter().zip(results) {
            let content = match result {
                Some(Ok(output)) => output.to_string(),
                Some(Err(e)) => json!({ "error": e.to_string() }).to_string(),
                None => json!({ "error": "tool did not complete" }).to_string(),
            };
            match ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(call.id.clone())
                .content(content)
                .build()
            {
                Ok(msg) => messages.push(msg.into()),
                Err(e) => warn!(call_id = %call.id, error = %e, "dropping tool result"),
            }
        }
    }
}

impl Service<ChatRequest> for ResponseLoop {
    type Response = LoopStream;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ChatRequest) -> Self::Future {
        let result = self.run(&req.messages).map_err(BoxError::from);
        Box::pin(async move { result })
    }
}

fn tool_error(tool: &str, err: BoxError) -> ToolExecutionError {
    if let Some(e) = err.downcast_ref::<ToolExecutionError>() {
        return e.clone();
    }
    if let Some(elapsed) = err.downcast_ref::<Elapsed>() {
        return ToolExecutionError::new(tool, elapsed.to_string());
    }
    ToolExecutionError::new(tool, err.to_string())
}

fn assistant_message(text: &str, calls: &[PendingCall]) -> Result<ChatCompletionRequestMessage> {
    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
    if !text.is_empty() {
        args.content(text.to_string());
    }
    if !calls.is_empty() {
        args.tool_calls(
            calls
                .iter()
                .map(|c| ChatCompletionMessageToolCall {
                    id: c.id.clone(),
                    r#type: ChatCompletionToolType::Function,
                    function: FunctionCall {
                        name: c.name.clone(),
                        arguments: if c.raw_input.trim().is_empty() {
                            "{}".to_string()
                        } else {
                            c.raw_input.clone()
                        },
                    },
                })
                .collect::<Vec<_>>(),
        );
    }
    Ok(args.build()?.into())
}

#[derive(Default)]
struct Turn {
    text: String,
    text_id: Option<String>,
    calls: BTreeMap<u32, PendingCall>,
}

#[derive(Debug, Clone)]
struct PendingCall {
    id: String,
    name: String,
    raw_input: String,
}

impl PendingCall {
    fn parsed(&self) -> std::result::Result<Value, serde_json::Error> {
        if self.raw_input.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&self.raw_input)
    }

    /// Parsed arguments, or the raw text when they are not valid JSON.
    fn input_value(&self) -> Value {
        self.parsed()
            .unwrap_or_else(|_| Value::String(self.raw_input.clone()))
    }

    fn invocation(&self) -> std::result::Result<ToolInvocation, ToolExecutionError> {
        let arguments = self
            .parsed()
            .map_err(|e| ToolExecutionError::new(&self.name, format!("invalid tool input: {e}")))?;
        Ok(ToolInvocation {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments,
        })
    }
}

/// Sending half of the event channel; a closed receiver is not an error.
struct Emitter {
    tx: mpsc::Sender<LoopEvent>,
}

impl Emitter {
    async fn chunk(&self, chunk: UiChunk) {
        self.send(LoopEvent::Chunk(chunk)).await;
    }

    async fn send(&self, event: LoopEvent) {
        let _ = self.tx.send(event).await;
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolLatency;
    use crate::messages::UiMessage;
    use crate::provider::{ScriptedProvider, ScriptedTurn};
    use crate::streaming::MessageAccumulator;

    fn chunks(events: &[LoopEvent]) -> Vec<UiChunk> {
        events
            .iter()
            .filter_map(|e| match e {
                LoopEvent::Chunk(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn outcome(events: &[LoopEvent]) -> LoopOutcome {
        match events.last() {
            Some(LoopEvent::Finished(o)) => o.clone(),
            other => panic!("expected outcome, got {other:?}"),
        }
    }

    fn response_loop(provider: ScriptedProvider) -> ResponseLoop {
        ResponseLoop::new(Arc::new(provider), ToolRegistry::new(ToolLatency::none()), "test-model").unwrap()
    }

    #[tokio::test]
    async fn final_answer_stops_after_one_step() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn::text("안녕하세요!")]);
        let lp = response_loop(provider.clone());
        let events: Vec<_> = lp.run(&[UiMessage::user_text("안녕")]).unwrap().collect().await;

        let c = chunks(&events);
        assert!(matches!(c.first(), Some(UiChunk::Start { .. })));
        assert_eq!(c.last(), Some(&UiChunk::Finish));
        let done = outcome(&events);
        assert_eq!(done.steps, 1);
        assert_eq!(done.stop, LoopPhase::Done);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn system_prompt_leads_history_and_tools_are_declared() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn::text("ok")]);
        let lp = response_loop(provider.clone()).with_system_prompt("be brief");
        let _: Vec<_> = lp.run(&[UiMessage::user_text("hi")]).unwrap().collect().await;

        let req = &provider.requests()[0];
        assert!(matches!(req.messages[0], ChatCompletionRequestMessage::System(_)));
        assert_eq!(req.model, "test-model");
        assert_eq!(req.tools.as_ref().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn empty_history_is_rejected_before_any_model_call() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn::text("x")]);
        let lp = response_loop(provider.clone());
        assert!(lp.run(&[]).is_err());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_json_arguments_become_output_error() {
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn::Chunks(vec![
                ProviderChunk::ToolCallStart { index: 0, id: "c1".into(), name: "weather".into() },
                ProviderChunk::ToolCallDelta { index: 0, arguments: "{\"location\":".into() },
            ]),
            ScriptedTurn::text("죄송합니다"),
        ]);
        let lp = response_loop(provider);
        let events: Vec<_> = lp.run(&[UiMessage::user_text("날씨")]).unwrap().collect().await;
        let c = chunks(&events);
        assert!(c.iter().any(|c| matches!(
            c,
            UiChunk::ToolOutputError { tool_call_id, error_text }
                if tool_call_id == "c1" && error_text.contains("invalid tool input")
        )));
        assert_eq!(outcome(&events).stop, LoopPhase::Done);
    }

    #[tokio::test]
    async fn repeated_call_start_keeps_collected_arguments() {
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn::Chunks(vec![
                ProviderChunk::ToolCallStart { index: 0, id: "c1".into(), name: "weather".into() },
                ProviderChunk::ToolCallDelta { index: 0, arguments: "{\"location\":".into() },
                ProviderChunk::ToolCallStart { index: 0, id: "c1".into(), name: "weather".into() },
                ProviderChunk::ToolCallDelta { index: 0, arguments: "\"서울\"}".into() },
            ]),
            ScriptedTurn::text("맑습니다"),
        ]);
        let lp = response_loop(provider);
        let events: Vec<_> = lp.run(&[UiMessage::user_text("날씨")]).unwrap().collect().await;
        let c = chunks(&events);

        let starts = c.iter().filter(|c| matches!(c, UiChunk::ToolInputStart { .. })).count();
        assert_eq!(starts, 1);
        assert!(c.contains(&UiChunk::ToolInputAvailable {
            tool_call_id: "c1".into(),
            tool_name: "weather".into(),
            input: serde_json::json!({"location": "서울"}),
        }));
        assert!(c.iter().any(|c| matches!(
            c,
            UiChunk::ToolOutputAvailable { tool_call_id, .. } if tool_call_id == "c1"
        )));

        let mut acc = MessageAccumulator::new();
        for chunk in &c {
            acc.apply(chunk);
        }
        assert!(acc.all_tools_terminal());
        assert_eq!(acc.into_message().tool_parts().count(), 1);
    }

    #[tokio::test]
    async fn service_interface_streams_events() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn::text("ok")]);
        let lp = response_loop(provider);
        let stream = lp
            .oneshot(ChatRequest { messages: vec![UiMessage::user_text("hi")] })
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(outcome(&events).stop, LoopPhase::Done);
    }
}
