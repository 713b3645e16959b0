//! Model provider abstraction
//!
//! What this module provides
//! - An interface for streaming LLM providers decoupled from the response loop
//!
//! Exports
//! - Models
//!   - `ProviderChunk::{TextDelta, ToolCallStart, ToolCallDelta, Usage}`
//!   - `ProviderStream`: boxed stream of `Result<ProviderChunk, BoxError>`
//! - Traits
//!   - `StepProvider::stream_step(CreateChatCompletionRequest)`
//! - Implementations
//!   - `OpenAIStreamProvider` over any OpenAI-compatible endpoint (Groq by default)
//!   - `ScriptedProvider` replaying fixed turns, for tests and offline runs
//!
//! Implementation strategy
//! - One `stream_step` call is one model turn; the loop owns history and tools
//! - Tool-call arguments arrive as fragments keyed by `index`; the loop assembles them
//! - Failures before the first chunk surface as `Err` from the future, later ones
//!   as an `Err` item in the stream
//!
//! Testing strategy
//! - `ScriptedProvider` records every request so tests can assert on the
//!   history the loop sent back (tool results in call order, system prompt first)

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_openai::types::CreateChatCompletionRequest;
use futures::{stream, Stream};
use serde_json::Value;
use tower::BoxError;

mod openai;

pub use openai::OpenAIStreamProvider;

/// Incremental output of a single model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderChunk {
    TextDelta(String),
    ToolCallStart {
        index: u32,
        id: String,
        name: String,
    },
    ToolCallDelta {
        index: u32,
        arguments: String,
    },
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
}

pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderChunk, BoxError>> + Send>>;

/// A provider that yields one assistant turn as a stream of `ProviderChunk`s.
pub trait StepProvider: Send + Sync + 'static {
    fn stream_step(
        &self,
        req: CreateChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderStream, BoxError>> + Send>>;
}

impl<P: StepProvider + ?Sized> StepProvider for Arc<P> {
    fn stream_step(
        &self,
        req: CreateChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderStream, BoxError>> + Send>> {
        (**self).stream_step(req)
    }
}

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Stream these chunks, then end the turn.
    Chunks(Vec<ProviderChunk>),
    /// Stream these chunks, then fail mid-stream.
    FailAfter(Vec<ProviderChunk>, String),
    /// Fail before any chunk is produced.
    Fail(String),
}

impl ScriptedTurn {
    /// A plain text answer, delivered in two deltas.
    pub fn text(text: &str) -> Self {
        let split = text
            .char_indices()
            .nth(text.chars().count() / 2)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let (head, tail) = text.split_at(split);
        ScriptedTurn::Chunks(
            [head, tail]
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(|s| ProviderChunk::TextDelta(s.to_string()))
                .collect(),
        )
    }

    /// A single tool call with no accompanying text.
    pub fn tool_call(id: &str, name: &str, arguments: Value) -> Self {
        Self::tool_calls(&[(id, name, arguments)])
    }

    /// Several tool calls in one turn; arguments arrive in two fragments each.
    pub fn tool_calls(calls: &[(&str, &str, Value)]) -> Self {
        let mut chunks = Vec::new();
        for (index, (id, name, arguments)) in calls.iter().enumerate() {
            let index = index as u32;
            chunks.push(ProviderChunk::ToolCallStart {
                index,
                id: id.to_string(),
                name: name.to_string(),
            });
            let raw = arguments.to_string();
            let mid = raw
                .char_indices()
                .nth(raw.chars().count() / 2)
                .map(|(i, _)| i)
                .unwrap_or(raw.len());
            let (head, tail) = raw.split_at(mid);
            for fragment in [head, tail] {
                if !fragment.is_empty() {
                    chunks.push(ProviderChunk::ToolCallDelta {
                        index,
                        arguments: fragment.to_string(),
                    });
                }
            }
        }
        ScriptedTurn::Chunks(chunks)
    }
}

/// Replays scripted turns in order; the last turn repeats once the script runs out.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    turns: Arc<Vec<ScriptedTurn>>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<VecDeque<CreateChatCompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Arc::new(turns),
            ..Self::default()
        }
    }

    /// Number of turns requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CreateChatCompletionRequest> {
        match self.requests.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl StepProvider for ScriptedProvider {
    fn stream_step(
        &self,
        req: CreateChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderStream, BoxError>> + Send>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.requests.lock() {
            Ok(mut guard) => guard.push_back(req),
            Err(poisoned) => poisoned.into_inner().push_back(req),
        }
        let turn = self
            .turns
            .get(n)
            .or_else(|| self.turns.last())
            .cloned()
            .unwrap_or(ScriptedTurn::Chunks(Vec::new()));

        Box::pin(async move {
            let items: Vec<Result<ProviderChunk, BoxError>> = match turn {
                ScriptedTurn::Fail(message) => return Err(message.into()),
                ScriptedTurn::Chunks(chunks) => chunks.into_iter().map(Ok).collect(),
                ScriptedTurn::FailAfter(chunks, message) => chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(BoxError::from(message))))
                    .collect(),
            };
            Ok(Box::pin(stream::iter(items)) as ProviderStream)
        })
    }
}
