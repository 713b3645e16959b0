//! Tool registry: the four simulated research tools and their routing service
//!
//! What this module provides
//! - `ToolKind`, a closed set of tools resolved by name once at startup
//! - `ToolRegistry`, a cloneable `tower::Service<ToolInvocation>` that routes
//!   invocations to the matching tool and advertises their function specs
//!
//! Each tool declares a JSON schema derived from its typed input struct; the
//! executor deserializes the model-supplied arguments into that struct, waits
//! out the configured latency, and returns a structured JSON object. Argument
//! mismatches and unknown names surface as `ToolExecutionError`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_openai::types::{
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType, FunctionObjectArgs,
};
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tower::{BoxError, Service};
use tracing::{debug, info_span, Instrument};

use crate::config::ToolLatency;
use crate::error::{Result, ToolExecutionError};

pub mod analyze;
pub mod search;
pub mod synthesize;
pub mod weather;

/// Uniform tool invocation routed through the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,   // tool_call_id
    pub name: String, // function.name
    pub arguments: Value,
}

/// Uniform tool output produced by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub id: String, // same as invocation.id
    pub result: Value,
}

/// The tools this service knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Search,
    Analyze,
    Synthesize,
    Weather,
}

impl ToolKind {
    /// Every tool, in the order advertised to the model.
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Weather,
        ToolKind::Search,
        ToolKind::Analyze,
        ToolKind::Synthesize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Search => "search",
            ToolKind::Analyze => "analyze",
            ToolKind::Synthesize => "synthesize",
            ToolKind::Weather => "weather",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::Search => search::DESCRIPTION,
            ToolKind::Analyze => analyze::DESCRIPTION,
            ToolKind::Synthesize => synthesize::DESCRIPTION,
            ToolKind::Weather => weather::DESCRIPTION,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// JSON schema of the accepted input object.
    pub fn parameters_schema(self) -> Value {
        match self {
            ToolKind::Search => schema_for::<search::SearchInput>(),
            ToolKind::Analyze => schema_for::<analyze::AnalyzeInput>(),
            ToolKind::Synthesize => schema_for::<synthesize::SynthesizeInput>(),
            ToolKind::Weather => schema_for::<weather::WeatherInput>(),
        }
    }

    fn latency(self, latency: &ToolLatency) -> Duration {
        match self {
            ToolKind::Search => latency.search,
            ToolKind::Analyze => latency.analyze,
            ToolKind::Synthesize => latency.synthesize,
            ToolKind::Weather => latency.weather,
        }
    }

    /// Run the tool against raw model-supplied arguments.
    pub async fn execute(
        self,
        arguments: Value,
        latency: &ToolLatency,
    ) -> std::result::Result<Value, ToolExecutionError> {
        let delay = self.latency(latency);
        match self {
            ToolKind::Search => {
                let input: search::SearchInput = self.parse(arguments)?;
                sleep_for(delay).await;
                self.encode(search::execute(input))
            }
            ToolKind::Analyze => {
                let input: analyze::AnalyzeInput = self.parse(arguments)?;
                sleep_for(delay).await;
                self.encode(analyze::execute(input))
            }
            ToolKind::Synthesize => {
                let input: synthesize::SynthesizeInput = self.parse(arguments)?;
                sleep_for(delay).await;
                self.encode(synthesize::execute(input))
            }
            ToolKind::Weather => {
                let input: weather::WeatherInput = self.parse(arguments)?;
                sleep_for(delay).await;
                self.encode(weather::execute(input))
            }
        }
    }

    /// Function spec advertised to the model.
    pub fn to_openai_tool(self) -> Result<ChatCompletionTool> {
        let func = FunctionObjectArgs::default()
            .name(self.name())
            .description(self.description())
            .parameters(self.parameters_schema())
            .build()?;
        let tool = ChatCompletionToolArgs::default()
            .r#type(ChatCompletionToolType::Function)
            .function(func)
            .build()?;
        Ok(tool)
    }

    fn parse<A: DeserializeOwned>(self, arguments: Value) -> std::result::Result<A, ToolExecutionError> {
        serde_json::from_value(arguments)
            .map_err(|e| ToolExecutionError::new(self.name(), format!("invalid arguments: {e}")))
    }

    fn encode<R: Serialize>(self, output: R) -> std::result::Result<Value, ToolExecutionError> {
        serde_json::to_value(output)
            .map_err(|e| ToolExecutionError::new(self.name(), format!("unserializable output: {e}")))
    }
}

async fn sleep_for(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Inline JSON schema for a typed tool input.
fn schema_for<A: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();
    let root = generator.into_root_schema_for::<A>();
    serde_json::to_value(root.schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

/// Name-keyed router over the enabled tools.
#[derive(Clone)]
pub struct ToolRegistry {
    by_name: Arc<HashMap<&'static str, ToolKind>>,
    order: Arc<Vec<ToolKind>>,
    latency: ToolLatency,
}

impl ToolRegistry {
    /// Registry with all four tools.
    pub fn new(latency: ToolLatency) -> Self {
        Self::with_tools(&ToolKind::ALL, latency)
    }

    pub fn with_tools(kinds: &[ToolKind], latency: ToolLatency) -> Self {
        let mut order = Vec::with_capacity(kinds.len());
        let mut by_name = HashMap::with_capacity(kinds.len());
        for kind in kinds {
            if by_name.insert(kind.name(), *kind).is_none() {
                order.push(*kind);
            }
        }
        Self {
            by_name: Arc::new(by_name),
            order: Arc::new(order),
            latency,
        }
    }

    pub fn resolve(&self, name: &str) -> Option<ToolKind> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.order.iter().map(|k| k.name()).collect()
    }

    /// Function specs for every registered tool, in registration order.
    pub fn specs(&self) -> Result<Vec<ChatCompletionTool>> {
        self.order.iter().map(|k| k.to_openai_tool()).collect()
    }
}

impl Service<ToolInvocation> for ToolRegistry {
    type Response = ToolOutput;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, inv: ToolInvocation) -> Self::Future {
        let kind = self.resolve(&inv.name);
        let latency = self.latency;
        let span = info_span!("tool", tool = %inv.name, call_id = %inv.id);
        Box::pin(
            async move {
                let Some(kind) = kind else {
                    return Err::<ToolOutput, BoxError>(
                        ToolExecutionError::new(&inv.name, "unknown tool").into(),
                    );
                };
                let result = kind.execute(inv.arguments, &latency).await?;
                debug!("tool finished");
                Ok::<ToolOutput, BoxError>(ToolOutput { id: inv.id, result })
            }
            .instrument(span),
        )
    }
}
