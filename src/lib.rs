//! # research-chat
//!
//! Backend for a tool-augmented research chat. A browser client posts its
//! conversation to `POST /api/chat`; the server admits or rejects the request
//! per client, then streams a model response in which the model may call four
//! simulated tools (`search`, `analyze`, `synthesize`, `weather`) for up to a
//! fixed number of steps.
//!
//! ## Components
//!
//! - [`rate_limit`]: fixed-window per-client admission (`RateLimiter`)
//! - [`tools`]: the closed tool set and its `tower::Service` router
//! - [`orchestrator`]: the bounded model/tool loop and its state machine
//! - [`provider`]: streaming model providers (OpenAI-compatible, scripted)
//! - [`messages`] / [`streaming`]: UI message format in, UI chunk stream out
//! - [`http`]: axum router wiring the above together
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use research_chat::{
//!     build_router, AppConfig, AppState, FixedWindowLimiter, ResponseLoop, ScriptedProvider,
//!     ScriptedTurn,
//! };
//!
//! # fn example() -> research_chat::Result<()> {
//! let config = AppConfig::default();
//! let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text("안녕하세요")]));
//! let chat = ResponseLoop::from_config(provider, &config)?;
//! let limiter = Arc::new(FixedWindowLimiter::new(config.rate_limit));
//! let app = build_router(AppState::new(limiter, chat));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod messages;
pub mod orchestrator;
pub mod provider;
pub mod rate_limit;
pub mod resilience;
pub mod streaming;
pub mod telemetry;
pub mod tools;

pub use config::{AppConfig, RateLimitConfig, ToolLatency};
pub use error::{ChatError, Result, ToolExecutionError};
pub use http::{build_router, client_key, AppState};
pub use messages::{ChatRequest, Role, ToolPart, ToolState, UiMessage, UiPart};
pub use orchestrator::{AbortReason, LoopEvent, LoopOutcome, LoopPhase, LoopStream, ResponseLoop};
pub use provider::{OpenAIStreamProvider, ProviderChunk, ScriptedProvider, ScriptedTurn, StepProvider};
pub use rate_limit::{ClientKey, Decision, FixedWindowLimiter, RateLimiter};
pub use streaming::{MessageAccumulator, UiChunk};
pub use tools::{ToolInvocation, ToolKind, ToolOutput, ToolRegistry};
